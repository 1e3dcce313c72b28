use meridian_core::constants::{BASE_FEE_DROPS, RESERVE_BASE_DROPS, RESERVE_INCREMENT_DROPS};

/// The fee and reserve schedule in force for a ledger. Updated only by the
/// SetFee pseudo-transaction at flag ledgers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FeeSchedule {
    /// Cost of the reference transaction, drops.
    pub base_fee: u64,
    /// Reserve for an account with no owned objects, drops.
    pub reserve_base: u64,
    /// Additional reserve per owned object, drops.
    pub reserve_increment: u64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            base_fee: BASE_FEE_DROPS,
            reserve_base: RESERVE_BASE_DROPS,
            reserve_increment: RESERVE_INCREMENT_DROPS,
        }
    }
}

impl FeeSchedule {
    /// The reserve an account owning `owner_count` objects must hold.
    pub fn account_reserve(&self, owner_count: u32) -> u64 {
        self.reserve_base + self.reserve_increment * owner_count as u64
    }
}
