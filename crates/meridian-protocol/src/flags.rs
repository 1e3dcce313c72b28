//! Ledger-entry (`lsf`) and transaction (`tf`) flag bits.

// ── Universal transaction flags ──────────────────────────────────────────────

/// Set on every modern signed transaction; pins the canonical signature form.
pub const TF_FULLY_CANONICAL_SIG: u32 = 0x8000_0000;

/// Bits every transactor accepts.
pub const TF_UNIVERSAL_MASK: u32 = TF_FULLY_CANONICAL_SIG;

// ── Payment flags ────────────────────────────────────────────────────────────

/// Skip the default direct path; only explicit paths are used.
pub const TF_NO_DIRECT_TRANSIT: u32 = 0x0001_0000;
pub const TF_PARTIAL_PAYMENT: u32 = 0x0002_0000;
pub const TF_LIMIT_QUALITY: u32 = 0x0004_0000;
pub const TF_PAYMENT_MASK: u32 =
    TF_UNIVERSAL_MASK | TF_NO_DIRECT_TRANSIT | TF_PARTIAL_PAYMENT | TF_LIMIT_QUALITY;

// ── OfferCreate flags ────────────────────────────────────────────────────────

pub const TF_PASSIVE: u32 = 0x0001_0000;
pub const TF_IMMEDIATE_OR_CANCEL: u32 = 0x0002_0000;
pub const TF_FILL_OR_KILL: u32 = 0x0004_0000;
pub const TF_SELL: u32 = 0x0008_0000;
pub const TF_OFFER_CREATE_MASK: u32 =
    TF_UNIVERSAL_MASK | TF_PASSIVE | TF_IMMEDIATE_OR_CANCEL | TF_FILL_OR_KILL | TF_SELL;

// ── TrustSet flags ───────────────────────────────────────────────────────────

pub const TF_SET_AUTH: u32 = 0x0001_0000;
pub const TF_SET_NO_TRANSIT: u32 = 0x0002_0000;
pub const TF_CLEAR_NO_TRANSIT: u32 = 0x0004_0000;
pub const TF_SET_FREEZE: u32 = 0x0010_0000;
pub const TF_CLEAR_FREEZE: u32 = 0x0020_0000;
pub const TF_TRUST_SET_MASK: u32 = TF_UNIVERSAL_MASK
    | TF_SET_AUTH
    | TF_SET_NO_TRANSIT
    | TF_CLEAR_NO_TRANSIT
    | TF_SET_FREEZE
    | TF_CLEAR_FREEZE;

// ── PayChanClaim flags ───────────────────────────────────────────────────────

pub const TF_PAYCHAN_RENEW: u32 = 0x0001_0000;
pub const TF_PAYCHAN_CLOSE: u32 = 0x0002_0000;
pub const TF_PAYCHAN_CLAIM_MASK: u32 = TF_UNIVERSAL_MASK | TF_PAYCHAN_RENEW | TF_PAYCHAN_CLOSE;

// ── AccountRoot flags ────────────────────────────────────────────────────────

pub const LSF_REQUIRE_DEST_TAG: u32 = 0x0002_0000;
pub const LSF_REQUIRE_AUTH: u32 = 0x0004_0000;
pub const LSF_DISABLE_MASTER: u32 = 0x0010_0000;
pub const LSF_GLOBAL_FREEZE: u32 = 0x0040_0000;
/// Trust lines may be transited through by default.
pub const LSF_DEFAULT_TRANSIT: u32 = 0x0080_0000;
pub const LSF_DEPOSIT_AUTH: u32 = 0x0100_0000;

// ── AccountSet toggles (SetFlag / ClearFlag values) ──────────────────────────

pub const ASF_REQUIRE_DEST_TAG: u32 = 1;
pub const ASF_REQUIRE_AUTH: u32 = 2;
pub const ASF_DISABLE_MASTER: u32 = 4;
pub const ASF_GLOBAL_FREEZE: u32 = 7;
pub const ASF_DEFAULT_TRANSIT: u32 = 8;
pub const ASF_DEPOSIT_AUTH: u32 = 9;

// ── TrustLine flags ──────────────────────────────────────────────────────────

pub const LSF_LOW_RESERVE: u32 = 0x0001_0000;
pub const LSF_HIGH_RESERVE: u32 = 0x0002_0000;
pub const LSF_LOW_AUTH: u32 = 0x0004_0000;
pub const LSF_HIGH_AUTH: u32 = 0x0008_0000;
pub const LSF_LOW_NO_TRANSIT: u32 = 0x0010_0000;
pub const LSF_HIGH_NO_TRANSIT: u32 = 0x0020_0000;
pub const LSF_LOW_FREEZE: u32 = 0x0040_0000;
pub const LSF_HIGH_FREEZE: u32 = 0x0080_0000;

// ── Offer flags ──────────────────────────────────────────────────────────────

pub const LSF_PASSIVE: u32 = 0x0001_0000;
pub const LSF_SELL: u32 = 0x0002_0000;
