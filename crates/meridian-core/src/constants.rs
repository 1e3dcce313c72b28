//! ─── Meridian protocol constants ────────────────────────────────────────────
//!
//! Base unit:    drop  (1 MRD = 1,000,000 drops)
//! Ticker:       MRD

// ── Supply ───────────────────────────────────────────────────────────────────

/// Genesis supply in drops. Fees burn drops; the total only ever decreases.
pub const GENESIS_DROPS: u64 = 100_000_000_000 * DROPS_PER_MRD;

/// 1 MRD expressed in drops.
pub const DROPS_PER_MRD: u64 = 1_000_000;

// ── Fees & reserves (genesis defaults; updated by Fee pseudo-transactions) ──

/// Reference fee for the cheapest transaction, in drops.
pub const BASE_FEE_DROPS: u64 = 10;

/// Account reserve: balance that cannot be spent while the account exists.
pub const RESERVE_BASE_DROPS: u64 = 20_000_000;

/// Additional reserve per owned object (trust line, offer, escrow, …).
pub const RESERVE_INCREMENT_DROPS: u64 = 5_000_000;

// ── Ledger timing ────────────────────────────────────────────────────────────

/// Initial close-time resolution, seconds.
pub const INITIAL_CLOSE_RESOLUTION: u32 = 10;

/// Close-time resolution bounds, seconds.
pub const MIN_CLOSE_RESOLUTION: u32 = 10;
pub const MAX_CLOSE_RESOLUTION: u32 = 120;

/// Consecutive agreeing closes before the resolution halves.
pub const DECREASE_RESOLUTION_EVERY: u32 = 8;

// ── Amendments ───────────────────────────────────────────────────────────────

/// Amendment transitions may only occur at ledgers with seq % 256 == 0.
pub const FLAG_LEDGER_INTERVAL: u32 = 256;

/// Fraction of trusted validators (in percent) that must vote for an
/// amendment continuously before it activates.
pub const AMENDMENT_MAJORITY_PCT: u32 = 80;

/// Default hold period before an amendment with sustained majority activates,
/// seconds (two weeks).
pub const AMENDMENT_MAJORITY_TIME: u32 = 14 * 24 * 60 * 60;

// ── Transaction limits ───────────────────────────────────────────────────────

/// Maximum offers consumed by one payment or offer crossing.
pub const MAX_OFFERS_CONSUMED: usize = 1000;

/// Maximum path length the pathfinder will explore.
pub const MAX_PATH_LENGTH: usize = 7;

/// Maximum paths returned by one pathfinding request.
pub const MAX_PATHS_FOUND: usize = 4;

/// Ledgers a locally-submitted transaction is retried before being dropped.
pub const LOCAL_TX_HOLD_LEDGERS: u32 = 5;

/// Entries per directory page.
pub const DIR_NODE_MAX: usize = 32;
