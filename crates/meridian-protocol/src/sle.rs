use meridian_core::amount::Amount;
use meridian_core::types::{AccountId, Hash256};

use crate::field::{self, SField};
use crate::keylet::Keylet;
use crate::stobject::{SerializeMode, StObject, StValue};
use crate::ProtocolError;

/// Ledger entry discriminants. One-byte ASCII mnemonics widened to u16.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u16)]
pub enum LedgerEntryType {
    AccountRoot = 0x0061,
    DirectoryNode = 0x0064,
    TrustLine = 0x0072,
    Offer = 0x006F,
    Escrow = 0x0075,
    PayChannel = 0x0078,
    Check = 0x0043,
    Ticket = 0x0054,
    SignerList = 0x0053,
    DepositPreauth = 0x0070,
    Amendments = 0x0066,
    FeeSettings = 0x0073,
    LedgerHashes = 0x0068,
}

impl LedgerEntryType {
    pub fn from_code(code: u16) -> Option<LedgerEntryType> {
        use LedgerEntryType::*;
        Some(match code {
            0x0061 => AccountRoot,
            0x0064 => DirectoryNode,
            0x0072 => TrustLine,
            0x006F => Offer,
            0x0075 => Escrow,
            0x0078 => PayChannel,
            0x0043 => Check,
            0x0054 => Ticket,
            0x0053 => SignerList,
            0x0070 => DepositPreauth,
            0x0066 => Amendments,
            0x0073 => FeeSettings,
            0x0068 => LedgerHashes,
            _ => return None,
        })
    }
}

/// A state ledger entry: a keyed, typed field object stored as a leaf of the
/// state map.
#[derive(Clone, PartialEq, Debug)]
pub struct Sle {
    key: Hash256,
    entry_type: LedgerEntryType,
    obj: StObject,
}

impl Sle {
    /// Fresh entry of `entry_type` at `keylet`.
    pub fn new(entry_type: LedgerEntryType, keylet: Keylet) -> Self {
        let mut obj = StObject::new();
        obj.set_u16(&field::SF_LEDGER_ENTRY_TYPE, entry_type as u16);
        Self {
            key: keylet.key(),
            entry_type,
            obj,
        }
    }

    /// Rehydrate from a state-map leaf.
    pub fn from_bytes(key: Hash256, data: &[u8]) -> Result<Self, ProtocolError> {
        let obj = StObject::parse(data)?;
        let code = obj
            .get_u16(&field::SF_LEDGER_ENTRY_TYPE)
            .ok_or(ProtocolError::MissingField("LedgerEntryType"))?;
        let entry_type =
            LedgerEntryType::from_code(code).ok_or(ProtocolError::UnknownEntryType(code))?;
        Ok(Self {
            key,
            entry_type,
            obj,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.obj.serialize(SerializeMode::Full)
    }

    pub fn key(&self) -> Hash256 {
        self.key
    }

    pub fn entry_type(&self) -> LedgerEntryType {
        self.entry_type
    }

    pub fn obj(&self) -> &StObject {
        &self.obj
    }

    pub fn obj_mut(&mut self) -> &mut StObject {
        &mut self.obj
    }

    // ── Common accessors ────────────────────────────────────────────────────

    pub fn flags(&self) -> u32 {
        self.obj.get_u32(&field::SF_FLAGS).unwrap_or(0)
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.obj.set_u32(&field::SF_FLAGS, flags);
    }

    pub fn set_flag(&mut self, flag: u32) {
        self.set_flags(self.flags() | flag);
    }

    pub fn clear_flag(&mut self, flag: u32) {
        self.set_flags(self.flags() & !flag);
    }

    pub fn is_flag(&self, flag: u32) -> bool {
        self.flags() & flag != 0
    }

    pub fn account(&self) -> Option<AccountId> {
        self.obj.get_account(&field::SF_ACCOUNT)
    }

    pub fn balance(&self) -> Option<Amount> {
        self.obj.get_amount(&field::SF_BALANCE)
    }

    pub fn set_balance(&mut self, amount: Amount) {
        self.obj.set_amount(&field::SF_BALANCE, amount);
    }

    pub fn sequence(&self) -> Option<u32> {
        self.obj.get_u32(&field::SF_SEQUENCE)
    }

    pub fn set_sequence(&mut self, seq: u32) {
        self.obj.set_u32(&field::SF_SEQUENCE, seq);
    }

    pub fn owner_count(&self) -> u32 {
        self.obj.get_u32(&field::SF_OWNER_COUNT).unwrap_or(0)
    }

    pub fn set_owner_count(&mut self, count: u32) {
        self.obj.set_u32(&field::SF_OWNER_COUNT, count);
    }

    // ── Typed constructors ──────────────────────────────────────────────────

    /// A new account root funded with `balance` drops.
    pub fn new_account_root(account: AccountId, balance: i64, sequence: u32) -> Self {
        let keylet = Keylet::account(&account);
        let mut sle = Sle::new(LedgerEntryType::AccountRoot, keylet);
        sle.obj.set_account(&field::SF_ACCOUNT, account);
        sle.obj.set_amount(&field::SF_BALANCE, Amount::Native(balance));
        sle.obj.set_u32(&field::SF_SEQUENCE, sequence);
        sle.obj.set_u32(&field::SF_OWNER_COUNT, 0);
        sle
    }

    /// An empty directory page.
    pub fn new_directory(keylet: Keylet, root: Hash256) -> Self {
        let mut sle = Sle::new(LedgerEntryType::DirectoryNode, keylet);
        sle.obj.set_h256(&field::SF_ROOT_INDEX, root);
        sle.obj
            .set(&field::SF_INDEXES, StValue::V256(Vec::new()));
        sle
    }

    /// Directory page entries.
    pub fn indexes(&self) -> &[Hash256] {
        self.obj.get_v256(&field::SF_INDEXES).unwrap_or(&[])
    }

    pub fn set_indexes(&mut self, indexes: Vec<Hash256>) {
        self.obj.set(&field::SF_INDEXES, StValue::V256(indexes));
    }

    pub fn field(&self, f: &'static SField) -> Option<&StValue> {
        self.obj.get(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_root_round_trip() {
        let id = AccountId::from_bytes([8u8; 20]);
        let sle = Sle::new_account_root(id, 1_000_000, 1);
        let bytes = sle.to_bytes();
        let back = Sle::from_bytes(sle.key(), &bytes).unwrap();
        assert_eq!(back, sle);
        assert_eq!(back.entry_type(), LedgerEntryType::AccountRoot);
        assert_eq!(back.balance(), Some(Amount::Native(1_000_000)));
        assert_eq!(back.sequence(), Some(1));
    }

    #[test]
    fn entry_type_codes_round_trip() {
        for ty in [
            LedgerEntryType::AccountRoot,
            LedgerEntryType::TrustLine,
            LedgerEntryType::Offer,
            LedgerEntryType::DirectoryNode,
            LedgerEntryType::SignerList,
            LedgerEntryType::FeeSettings,
        ] {
            assert_eq!(LedgerEntryType::from_code(ty as u16), Some(ty));
        }
        assert_eq!(LedgerEntryType::from_code(0xFFFF), None);
    }

    #[test]
    fn flag_helpers() {
        let id = AccountId::from_bytes([8u8; 20]);
        let mut sle = Sle::new_account_root(id, 0, 1);
        assert!(!sle.is_flag(0x0002_0000));
        sle.set_flag(0x0002_0000);
        assert!(sle.is_flag(0x0002_0000));
        sle.clear_flag(0x0002_0000);
        assert!(!sle.is_flag(0x0002_0000));
    }
}
