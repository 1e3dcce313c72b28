use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use meridian_core::types::{NetClock, NET_EPOCH_OFFSET};

/// Largest plausible clock correction; samples beyond it are discarded.
const MAX_OFFSET_SECS: i64 = 10 * 60;

/// Tolerated difference between a peer-reported close time and our clock.
pub const CLOCK_TOLERANCE_SECS: u32 = 20;

/// Network-epoch clock with a bounded correction obtained from an external
/// time-sync source. All consensus timing flows through this.
pub struct TimeKeeper {
    /// Seconds to add to the local wall clock.
    offset: Mutex<i64>,
}

impl Default for TimeKeeper {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeKeeper {
    pub fn new() -> Self {
        Self {
            offset: Mutex::new(0),
        }
    }

    /// Seconds since the network epoch, offset-corrected.
    pub fn now(&self) -> NetClock {
        let unix = Utc::now().timestamp() + *self.offset.lock();
        (unix - NET_EPOCH_OFFSET).max(0) as NetClock
    }

    /// The close time this node would vote for right now. Identical to
    /// `now` at full resolution; rounding happens per ledger.
    pub fn close_time(&self) -> NetClock {
        self.now()
    }

    pub fn offset(&self) -> Duration {
        Duration::from_secs(self.offset.lock().unsigned_abs())
    }

    /// Feed a correction sample from the time-sync source. Implausible
    /// samples are rejected; accepted samples move the offset halfway
    /// toward the sample to damp jitter.
    pub fn adjust(&self, sample_offset_secs: i64) -> bool {
        if sample_offset_secs.abs() > MAX_OFFSET_SECS {
            debug!(sample_offset_secs, "clock sample rejected");
            return false;
        }
        let mut offset = self.offset.lock();
        *offset = (*offset + sample_offset_secs) / 2;
        true
    }

    /// Whether a remote timestamp is close enough to our clock to trust.
    pub fn in_tolerance(&self, remote: NetClock) -> bool {
        self.now().abs_diff(remote) <= CLOCK_TOLERANCE_SECS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_past_the_network_epoch() {
        let keeper = TimeKeeper::new();
        // The network epoch is 2000-01-01; any sane clock is far past it.
        assert!(keeper.now() > 700_000_000);
    }

    #[test]
    fn adjust_rejects_wild_samples() {
        let keeper = TimeKeeper::new();
        assert!(!keeper.adjust(86_400));
        assert!(keeper.adjust(30));
    }

    #[test]
    fn adjustment_moves_the_clock() {
        let keeper = TimeKeeper::new();
        let before = keeper.now();
        for _ in 0..8 {
            keeper.adjust(120);
        }
        let after = keeper.now();
        assert!(after >= before + 100, "offset should converge toward 120");
    }

    #[test]
    fn tolerance_window() {
        let keeper = TimeKeeper::new();
        let now = keeper.now();
        assert!(keeper.in_tolerance(now + CLOCK_TOLERANCE_SECS));
        assert!(!keeper.in_tolerance(now + CLOCK_TOLERANCE_SECS + 5));
    }
}
