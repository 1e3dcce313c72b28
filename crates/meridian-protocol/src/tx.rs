use meridian_core::amount::Amount;
use meridian_core::types::{AccountId, Hash256, PublicKeyBytes};
use meridian_core::HashPrefix;
use meridian_crypto::hash::prefixed_hash256;
use meridian_crypto::keys::Keypair;
use meridian_crypto::{account_id_from_public, keys};

use crate::field::{self, SField};
use crate::stobject::{SerializeMode, StObject, StValue};
use crate::ProtocolError;

/// The closed set of transaction types.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u16)]
pub enum TxType {
    Payment = 0,
    EscrowCreate = 1,
    EscrowFinish = 2,
    AccountSet = 3,
    EscrowCancel = 4,
    SetRegularKey = 5,
    OfferCreate = 7,
    OfferCancel = 8,
    TicketCreate = 10,
    SignerListSet = 12,
    PayChanCreate = 13,
    PayChanFund = 14,
    PayChanClaim = 15,
    CheckCreate = 16,
    CheckCash = 17,
    CheckCancel = 18,
    DepositPreauth = 19,
    TrustSet = 20,
    /// Pseudo-transaction: activates an amendment at a flag ledger.
    Amendment = 100,
    /// Pseudo-transaction: updates the fee schedule.
    SetFee = 101,
}

impl TxType {
    pub fn from_code(code: u16) -> Option<TxType> {
        use TxType::*;
        Some(match code {
            0 => Payment,
            1 => EscrowCreate,
            2 => EscrowFinish,
            3 => AccountSet,
            4 => EscrowCancel,
            5 => SetRegularKey,
            7 => OfferCreate,
            8 => OfferCancel,
            10 => TicketCreate,
            12 => SignerListSet,
            13 => PayChanCreate,
            14 => PayChanFund,
            15 => PayChanClaim,
            16 => CheckCreate,
            17 => CheckCash,
            18 => CheckCancel,
            19 => DepositPreauth,
            20 => TrustSet,
            100 => Amendment,
            101 => SetFee,
            _ => return None,
        })
    }

    /// Pseudo-transactions are injected by consensus, not submitted by
    /// accounts, and carry no signature.
    pub fn is_pseudo(self) -> bool {
        matches!(self, TxType::Amendment | TxType::SetFee)
    }
}

/// A transaction envelope: a typed-field object with the common fields
/// (Account, TransactionType, Sequence, Fee, SigningPubKey, TxnSignature)
/// plus whatever its type requires.
#[derive(Clone, PartialEq, Debug)]
pub struct Transaction {
    obj: StObject,
    tx_type: TxType,
}

impl Transaction {
    /// Start building a transaction of `tx_type` from `account`.
    pub fn build(tx_type: TxType, account: AccountId) -> Self {
        let mut obj = StObject::new();
        obj.set_u16(&field::SF_TRANSACTION_TYPE, tx_type as u16);
        obj.set_account(&field::SF_ACCOUNT, account);
        Self { obj, tx_type }
    }

    /// Wrap a parsed object, validating the type field.
    pub fn from_object(obj: StObject) -> Result<Self, ProtocolError> {
        let code = obj
            .get_u16(&field::SF_TRANSACTION_TYPE)
            .ok_or(ProtocolError::MissingField("TransactionType"))?;
        let tx_type = TxType::from_code(code).ok_or(ProtocolError::UnknownTxType(code))?;
        obj.require(&field::SF_ACCOUNT)?;
        Ok(Self { obj, tx_type })
    }

    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        Self::from_object(StObject::parse(data)?)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.obj.serialize(SerializeMode::Full)
    }

    pub fn obj(&self) -> &StObject {
        &self.obj
    }

    pub fn obj_mut(&mut self) -> &mut StObject {
        &mut self.obj
    }

    // ── Common accessors ────────────────────────────────────────────────────

    pub fn tx_type(&self) -> TxType {
        self.tx_type
    }

    pub fn account(&self) -> AccountId {
        self.obj
            .get_account(&field::SF_ACCOUNT)
            .expect("validated at construction")
    }

    pub fn sequence(&self) -> u32 {
        self.obj.get_u32(&field::SF_SEQUENCE).unwrap_or(0)
    }

    /// The ticket consumed in place of the sequence, if any.
    pub fn ticket_sequence(&self) -> Option<u32> {
        self.obj.get_u32(&field::SF_TICKET_SEQUENCE)
    }

    pub fn fee(&self) -> Amount {
        self.obj
            .get_amount(&field::SF_FEE)
            .unwrap_or(Amount::Native(0))
    }

    pub fn flags(&self) -> u32 {
        self.obj.get_u32(&field::SF_FLAGS).unwrap_or(0)
    }

    pub fn signing_pub_key(&self) -> Option<PublicKeyBytes> {
        self.obj.get_public_key(&field::SF_SIGNING_PUB_KEY)
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.obj.get_blob(&field::SF_TXN_SIGNATURE)
    }

    pub fn last_ledger_sequence(&self) -> Option<u32> {
        self.obj.get_u32(&field::SF_LAST_LEDGER_SEQUENCE)
    }

    // ── Identity & signing ──────────────────────────────────────────────────

    /// The transaction id: digest over the full serialization.
    pub fn tx_id(&self) -> Hash256 {
        prefixed_hash256(HashPrefix::TransactionId, &self.to_bytes())
    }

    /// The single-signature payload: signing fields only.
    pub fn signing_data(&self) -> Vec<u8> {
        let mut data = HashPrefix::TxSign.to_bytes().to_vec();
        data.extend_from_slice(&self.obj.serialize(SerializeMode::Signing));
        data
    }

    /// The multi-signature payload for `signer`: a distinct domain prefix
    /// and the signer's id appended, so single- and multi-signatures can
    /// never be replayed across contexts.
    pub fn multi_signing_data(&self, signer: &AccountId) -> Vec<u8> {
        let mut data = HashPrefix::TxMultiSign.to_bytes().to_vec();
        data.extend_from_slice(&self.obj.serialize(SerializeMode::Signing));
        data.extend_from_slice(signer.as_bytes());
        data
    }

    /// Single-sign with `keypair`: sets SigningPubKey and TxnSignature.
    pub fn sign(&mut self, keypair: &Keypair) {
        self.obj
            .set_blob(&field::SF_SIGNING_PUB_KEY, keypair.public().0.clone());
        let sig = keypair.sign(&self.signing_data());
        self.obj.set_blob(&field::SF_TXN_SIGNATURE, sig);
    }

    /// Append a multi-signer entry. Multi-signed transactions carry an
    /// empty SigningPubKey.
    pub fn add_multi_signer(&mut self, keypair: &Keypair) {
        if !self.obj.has(&field::SF_SIGNING_PUB_KEY) {
            self.obj.set_blob(&field::SF_SIGNING_PUB_KEY, Vec::new());
        }
        let signer_id = keypair.account_id();
        let sig = keypair.sign(&self.multi_signing_data(&signer_id));

        let mut entry = StObject::new();
        entry.set_account(&field::SF_ACCOUNT, signer_id);
        entry.set_blob(&field::SF_SIGNING_PUB_KEY, keypair.public().0.clone());
        entry.set_blob(&field::SF_TXN_SIGNATURE, sig);

        let mut signers: Vec<(&'static SField, StObject)> = self
            .obj
            .get_array(&field::SF_SIGNERS)
            .map(|s| s.to_vec())
            .unwrap_or_default();
        signers.push((&field::SF_SIGNER, entry));
        // Signers sort by account id so the set is canonical.
        signers.sort_by_key(|(_, obj)| obj.get_account(&field::SF_ACCOUNT));
        self.obj.set(&field::SF_SIGNERS, StValue::Array(signers));
    }

    /// Multi-signer entries: (signer account, public key, signature).
    pub fn multi_signers(&self) -> Vec<(AccountId, PublicKeyBytes, Vec<u8>)> {
        self.obj
            .get_array(&field::SF_SIGNERS)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|(_, entry)| {
                        Some((
                            entry.get_account(&field::SF_ACCOUNT)?,
                            entry.get_public_key(&field::SF_SIGNING_PUB_KEY)?,
                            entry.get_blob(&field::SF_TXN_SIGNATURE)?.to_vec(),
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_multi_signed(&self) -> bool {
        matches!(self.signing_pub_key(), Some(pk) if pk.0.is_empty())
            && self.obj.has(&field::SF_SIGNERS)
    }

    /// Verify the single signature, or every signature of a multi-signed
    /// transaction. Signer-list authorization is checked by the transactor;
    /// this only proves each signature is genuine.
    pub fn check_signature(&self) -> bool {
        if self.tx_type.is_pseudo() {
            // Pseudo-transactions are unsigned by definition.
            return self.signature().is_none() && self.account().is_zero();
        }
        if self.is_multi_signed() {
            let signers = self.multi_signers();
            if signers.is_empty() {
                return false;
            }
            let mut last: Option<AccountId> = None;
            for (account, public, sig) in &signers {
                // Ascending, duplicate-free, and each key must own its entry.
                if let Some(prev) = last {
                    if *account <= prev {
                        return false;
                    }
                }
                last = Some(*account);
                if account_id_from_public(public) != *account {
                    return false;
                }
                if !keys::verify(public, &self.multi_signing_data(account), sig) {
                    return false;
                }
            }
            true
        } else {
            let (Some(public), Some(sig)) = (self.signing_pub_key(), self.signature()) else {
                return false;
            };
            keys::verify(&public, &self.signing_data(), sig)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_crypto::keys::{KeyType, Seed};

    fn keypair(tag: u8) -> Keypair {
        Keypair::from_seed(KeyType::Secp256k1, &Seed::from_bytes([tag; 16])).unwrap()
    }

    fn payment(kp: &Keypair) -> Transaction {
        let mut tx = Transaction::build(TxType::Payment, kp.account_id());
        tx.obj_mut().set_u32(&field::SF_SEQUENCE, 1);
        tx.obj_mut().set_amount(&field::SF_FEE, Amount::Native(10));
        tx.obj_mut()
            .set_amount(&field::SF_AMOUNT, Amount::Native(5_000_000));
        tx.obj_mut()
            .set_account(&field::SF_DESTINATION, AccountId::from_bytes([9u8; 20]));
        tx
    }

    #[test]
    fn sign_and_verify() {
        let kp = keypair(1);
        let mut tx = payment(&kp);
        tx.sign(&kp);
        assert!(tx.check_signature());
    }

    #[test]
    fn tampering_invalidates_signature() {
        let kp = keypair(1);
        let mut tx = payment(&kp);
        tx.sign(&kp);
        tx.obj_mut()
            .set_amount(&field::SF_AMOUNT, Amount::Native(6_000_000));
        assert!(!tx.check_signature());
    }

    #[test]
    fn tx_id_covers_signature() {
        let kp = keypair(1);
        let mut tx = payment(&kp);
        let unsigned_id = tx.tx_id();
        tx.sign(&kp);
        assert_ne!(tx.tx_id(), unsigned_id);
    }

    #[test]
    fn parse_round_trip() {
        let kp = keypair(2);
        let mut tx = payment(&kp);
        tx.sign(&kp);
        let bytes = tx.to_bytes();
        let back = Transaction::parse(&bytes).unwrap();
        assert_eq!(back, tx);
        assert_eq!(back.tx_id(), tx.tx_id());
        assert!(back.check_signature());
    }

    #[test]
    fn multisign_round_trip() {
        let master = keypair(3);
        let s1 = keypair(4);
        let s2 = keypair(5);
        let mut tx = payment(&master);
        tx.add_multi_signer(&s1);
        tx.add_multi_signer(&s2);
        assert!(tx.is_multi_signed());
        assert!(tx.check_signature());
        // Order of attachment does not matter.
        let mut tx2 = payment(&master);
        tx2.add_multi_signer(&s2);
        tx2.add_multi_signer(&s1);
        assert_eq!(tx.to_bytes(), tx2.to_bytes());
    }

    #[test]
    fn multi_and_single_payloads_differ() {
        let kp = keypair(6);
        let tx = payment(&kp);
        let single = tx.signing_data();
        let multi = tx.multi_signing_data(&kp.account_id());
        assert_ne!(single, multi);
    }
}
