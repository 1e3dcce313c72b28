use std::collections::HashSet;

use meridian_core::constants::GENESIS_DROPS;
use meridian_core::types::{AccountId, Hash256, NetClock};
use meridian_protocol::field;
use meridian_protocol::keylet::Keylet;
use meridian_protocol::sle::{LedgerEntryType, Sle};
use meridian_protocol::stobject::StValue;
use meridian_shamap::{MapType, ShaMap, ShaMapItem};

use crate::fees::FeeSchedule;
use crate::ledger::Ledger;
use crate::rules::Rules;

/// Parameters of the genesis ledger. The master account receives the whole
/// supply; the amendment list seeds the active rule set.
pub struct GenesisConfig {
    pub master: AccountId,
    pub amendments: Vec<Hash256>,
    pub fees: FeeSchedule,
    pub close_time: NetClock,
}

impl GenesisConfig {
    pub fn new(master: AccountId) -> Self {
        Self {
            master,
            amendments: Vec::new(),
            fees: FeeSchedule::default(),
            close_time: 0,
        }
    }

    pub fn with_amendments(mut self, amendments: Vec<Hash256>) -> Self {
        self.amendments = amendments;
        self
    }

    pub fn with_fees(mut self, fees: FeeSchedule) -> Self {
        self.fees = fees;
        self
    }

    pub fn at(mut self, close_time: NetClock) -> Self {
        self.close_time = close_time;
        self
    }

    pub fn build(self) -> Ledger {
        let mut state = ShaMap::new(MapType::State);

        let root = Sle::new_account_root(self.master, GENESIS_DROPS as i64, 1);
        state
            .add(ShaMapItem::new(root.key(), root.to_bytes()))
            .expect("fresh map");

        let mut fee_sle = Sle::new(LedgerEntryType::FeeSettings, Keylet::fees());
        fee_sle
            .obj_mut()
            .set_u64(&field::SF_BASE_FEE, self.fees.base_fee);
        fee_sle
            .obj_mut()
            .set_u32(&field::SF_RESERVE_BASE, self.fees.reserve_base as u32);
        fee_sle.obj_mut().set_u32(
            &field::SF_RESERVE_INCREMENT,
            self.fees.reserve_increment as u32,
        );
        state
            .add(ShaMapItem::new(fee_sle.key(), fee_sle.to_bytes()))
            .expect("fresh map");

        let mut amendments_sle = Sle::new(LedgerEntryType::Amendments, Keylet::amendments());
        amendments_sle
            .obj_mut()
            .set(&field::SF_AMENDMENTS, StValue::V256(self.amendments.clone()));
        state
            .add(ShaMapItem::new(
                amendments_sle.key(),
                amendments_sle.to_bytes(),
            ))
            .expect("fresh map");

        let rules = Rules::new(self.amendments.into_iter().collect::<HashSet<_>>());
        Ledger::genesis_with(state, self.fees, rules, self.close_time)
    }
}
