/// Tuning constants of the consensus protocol. One instance parameterizes
/// every round; values are protocol-critical and identical across the
/// network.
#[derive(Clone, Debug)]
pub struct ConsensusParms {
    /// How long a validation is considered current, ms.
    pub validation_valid_wall_ms: u64,
    /// Tolerated local clock skew when judging validation freshness, ms.
    pub validation_valid_local_ms: u64,

    /// Proposals older than this are ignored, ms.
    pub propose_freshness_ms: u64,
    /// Minimum interval between re-broadcasts of our position, ms.
    pub propose_interval_ms: u64,

    /// Fraction of trusted peers that must agree on a tx set, percent.
    pub min_consensus_pct: usize,

    /// Idle spin before closing an empty open ledger, ms.
    pub ledger_idle_interval_ms: u64,
    /// Floor on time spent in the establish phase, ms.
    pub ledger_min_consensus_ms: u64,
    /// Hard cap on a round before it is abandoned, ms.
    pub ledger_max_consensus_ms: u64,
    /// Minimum open-phase duration, ms.
    pub ledger_min_close_ms: u64,
    /// Heartbeat between position re-evaluations, ms.
    pub ledger_granularity_ms: u64,

    /// Minimum time the network must hold an agreed position, ms.
    pub av_min_consensus_time_ms: u64,

    /// Avalanche schedule: thresholds (percent of trusted peers voting yes
    /// to keep a transaction) that tighten as the round ages, keyed by
    /// percent of expected round time elapsed.
    pub av_init_consensus_pct: usize,
    pub av_mid_consensus_time_pct: usize,
    pub av_mid_consensus_pct: usize,
    pub av_late_consensus_time_pct: usize,
    pub av_late_consensus_pct: usize,
    pub av_stuck_consensus_time_pct: usize,
    pub av_stuck_consensus_pct: usize,

    /// Support required to declare close-time agreement, percent.
    pub av_ct_consensus_pct: usize,
}

impl Default for ConsensusParms {
    fn default() -> Self {
        Self {
            validation_valid_wall_ms: 5 * 60 * 1000,
            validation_valid_local_ms: 3 * 60 * 1000,
            propose_freshness_ms: 20 * 1000,
            propose_interval_ms: 12 * 1000,
            min_consensus_pct: 80,
            ledger_idle_interval_ms: 15 * 1000,
            ledger_min_consensus_ms: 1950,
            ledger_max_consensus_ms: 10 * 1000,
            ledger_min_close_ms: 2000,
            ledger_granularity_ms: 1000,
            av_min_consensus_time_ms: 5000,
            av_init_consensus_pct: 50,
            av_mid_consensus_time_pct: 50,
            av_mid_consensus_pct: 65,
            av_late_consensus_time_pct: 85,
            av_late_consensus_pct: 70,
            av_stuck_consensus_time_pct: 200,
            av_stuck_consensus_pct: 95,
            av_ct_consensus_pct: 75,
        }
    }
}

impl ConsensusParms {
    /// The yes-vote percentage needed to keep a disputed transaction, as a
    /// function of how far into the expected round we are. Monotonically
    /// tightening, which is what forces convergence.
    pub fn avalanche_threshold(&self, converge_pct: usize) -> usize {
        if converge_pct < self.av_mid_consensus_time_pct {
            self.av_init_consensus_pct
        } else if converge_pct < self.av_late_consensus_time_pct {
            self.av_mid_consensus_pct
        } else if converge_pct < self.av_stuck_consensus_time_pct {
            self.av_late_consensus_pct
        } else {
            self.av_stuck_consensus_pct
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_tighten_monotonically() {
        let parms = ConsensusParms::default();
        let mut last = 0;
        for pct in [0, 25, 50, 84, 85, 150, 200, 400] {
            let t = parms.avalanche_threshold(pct);
            assert!(t >= last, "threshold regressed at {}%", pct);
            last = t;
        }
        assert_eq!(parms.avalanche_threshold(0), 50);
        assert_eq!(parms.avalanche_threshold(50), 65);
        assert_eq!(parms.avalanche_threshold(85), 70);
        assert_eq!(parms.avalanche_threshold(200), 95);
    }
}
