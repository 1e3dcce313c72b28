use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;

/// Wire type codes. Fields serialize in ascending (type, field-code) order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(u8)]
pub enum FieldType {
    UInt16 = 1,
    UInt32 = 2,
    UInt64 = 3,
    Hash128 = 4,
    Hash256 = 5,
    Amount = 6,
    Blob = 7,
    AccountId = 8,
    Object = 14,
    Array = 15,
    UInt8 = 16,
    Hash160 = 17,
    PathSet = 18,
    Vector256 = 19,
}

impl FieldType {
    pub fn from_code(code: u8) -> Option<FieldType> {
        use FieldType::*;
        Some(match code {
            1 => UInt16,
            2 => UInt32,
            3 => UInt64,
            4 => Hash128,
            5 => Hash256,
            6 => Amount,
            7 => Blob,
            8 => AccountId,
            14 => Object,
            15 => Array,
            16 => UInt8,
            17 => Hash160,
            18 => PathSet,
            19 => Vector256,
            _ => return None,
        })
    }

    /// Variable-length types carry a length prefix on the wire.
    pub fn is_vl_encoded(self) -> bool {
        matches!(self, FieldType::Blob | FieldType::AccountId)
    }
}

/// A field's position in the canonical ordering.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct FieldId {
    pub type_code: FieldType,
    pub field_code: u8,
}

impl FieldId {
    pub const fn new(type_code: FieldType, field_code: u8) -> Self {
        Self {
            type_code,
            field_code,
        }
    }
}

/// A named protocol field. The two toggles control whether the field is part
/// of the signing payload and whether it appears in canonical JSON.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct SField {
    pub id: FieldId,
    pub name: &'static str,
    /// Excluded fields are dropped from the signing-prehash serialization.
    pub signing: bool,
    /// Excluded fields are dropped from the canonical JSON rendering.
    pub in_json: bool,
}

macro_rules! fields {
    ($( $konst:ident = ($ty:ident, $code:expr, $name:expr, $signing:expr, $json:expr); )*) => {
        $(
            pub const $konst: SField = SField {
                id: FieldId::new(FieldType::$ty, $code),
                name: $name,
                signing: $signing,
                in_json: $json,
            };
        )*

        static ALL_FIELDS: &[SField] = &[ $( $konst ),* ];
    };
}

fields! {
    // ── UInt8 ────────────────────────────────────────────────────────────────
    SF_CLOSE_RESOLUTION   = (UInt8, 1, "CloseResolution", true, true);
    SF_METHOD             = (UInt8, 2, "Method", true, true);
    SF_TRANSACTION_RESULT = (UInt8, 3, "TransactionResult", true, true);

    // ── UInt16 ───────────────────────────────────────────────────────────────
    SF_LEDGER_ENTRY_TYPE = (UInt16, 1, "LedgerEntryType", true, true);
    SF_TRANSACTION_TYPE  = (UInt16, 2, "TransactionType", true, true);
    SF_SIGNER_WEIGHT     = (UInt16, 3, "SignerWeight", true, true);
    SF_TRANSFER_FEE      = (UInt16, 4, "TransferFee", true, true);

    // ── UInt32 ───────────────────────────────────────────────────────────────
    SF_NETWORK_ID          = (UInt32, 1, "NetworkID", true, true);
    SF_FLAGS               = (UInt32, 2, "Flags", true, true);
    SF_SOURCE_TAG          = (UInt32, 3, "SourceTag", true, true);
    SF_SEQUENCE            = (UInt32, 4, "Sequence", true, true);
    SF_PREVIOUS_TXN_LGR_SEQ = (UInt32, 5, "PreviousTxnLgrSeq", true, true);
    SF_LEDGER_SEQUENCE     = (UInt32, 6, "LedgerSequence", true, true);
    SF_CLOSE_TIME          = (UInt32, 7, "CloseTime", true, true);
    SF_PARENT_CLOSE_TIME   = (UInt32, 8, "ParentCloseTime", true, true);
    SF_SIGNING_TIME        = (UInt32, 9, "SigningTime", true, true);
    SF_EXPIRATION          = (UInt32, 10, "Expiration", true, true);
    SF_TRANSFER_RATE       = (UInt32, 11, "TransferRate", true, true);
    SF_OFFER_SEQUENCE      = (UInt32, 12, "OfferSequence", true, true);
    SF_OWNER_COUNT         = (UInt32, 13, "OwnerCount", true, true);
    SF_DESTINATION_TAG     = (UInt32, 14, "DestinationTag", true, true);
    SF_QUALITY_IN          = (UInt32, 20, "QualityIn", true, true);
    SF_QUALITY_OUT         = (UInt32, 21, "QualityOut", true, true);
    SF_CANCEL_AFTER        = (UInt32, 24, "CancelAfter", true, true);
    SF_FINISH_AFTER        = (UInt32, 25, "FinishAfter", true, true);
    SF_SET_FLAG            = (UInt32, 26, "SetFlag", true, true);
    SF_CLEAR_FLAG          = (UInt32, 27, "ClearFlag", true, true);
    SF_SETTLE_DELAY        = (UInt32, 28, "SettleDelay", true, true);
    SF_RESERVE_BASE        = (UInt32, 31, "ReserveBase", true, true);
    SF_RESERVE_INCREMENT   = (UInt32, 32, "ReserveIncrement", true, true);
    SF_PROPOSE_SEQ         = (UInt32, 33, "ProposeSeq", true, true);
    SF_SIGNER_QUORUM       = (UInt32, 35, "SignerQuorum", true, true);
    SF_TICKET_SEQUENCE     = (UInt32, 41, "TicketSequence", true, true);
    SF_TICKET_COUNT        = (UInt32, 42, "TicketCount", true, true);
    SF_LAST_LEDGER_SEQUENCE = (UInt32, 43, "LastLedgerSequence", true, true);

    // ── UInt64 ───────────────────────────────────────────────────────────────
    SF_INDEX_NEXT     = (UInt64, 1, "IndexNext", true, true);
    SF_INDEX_PREVIOUS = (UInt64, 2, "IndexPrevious", true, true);
    SF_BASE_FEE       = (UInt64, 5, "BaseFee", true, true);
    SF_OWNER_NODE     = (UInt64, 7, "OwnerNode", true, true);
    SF_BOOK_NODE      = (UInt64, 8, "BookNode", true, true);
    SF_LOW_NODE       = (UInt64, 9, "LowNode", true, true);
    SF_HIGH_NODE      = (UInt64, 10, "HighNode", true, true);
    SF_DESTINATION_NODE = (UInt64, 11, "DestinationNode", true, true);

    // ── Hash256 ──────────────────────────────────────────────────────────────
    SF_LEDGER_HASH      = (Hash256, 1, "LedgerHash", true, true);
    SF_PARENT_HASH      = (Hash256, 2, "ParentHash", true, true);
    SF_TRANSACTION_HASH = (Hash256, 3, "TransactionHash", true, true);
    SF_ACCOUNT_HASH     = (Hash256, 4, "AccountHash", true, true);
    SF_PREVIOUS_TXN_ID  = (Hash256, 5, "PreviousTxnID", true, true);
    SF_LEDGER_INDEX     = (Hash256, 6, "LedgerIndex", true, true);
    SF_ROOT_INDEX       = (Hash256, 8, "RootIndex", true, true);
    SF_INVOICE_ID       = (Hash256, 17, "InvoiceID", true, true);
    SF_AMENDMENT        = (Hash256, 19, "Amendment", true, true);
    SF_TX_SET_HASH      = (Hash256, 20, "TxSetHash", true, true);
    SF_BOOK_DIRECTORY   = (Hash256, 16, "BookDirectory", true, true);
    SF_CHANNEL          = (Hash256, 22, "Channel", true, true);
    SF_CHECK_ID         = (Hash256, 24, "CheckID", true, true);

    // ── Amount ───────────────────────────────────────────────────────────────
    SF_AMOUNT        = (Amount, 1, "Amount", true, true);
    SF_BALANCE       = (Amount, 2, "Balance", true, true);
    SF_LIMIT_AMOUNT  = (Amount, 3, "LimitAmount", true, true);
    SF_TAKER_PAYS    = (Amount, 4, "TakerPays", true, true);
    SF_TAKER_GETS    = (Amount, 5, "TakerGets", true, true);
    SF_LOW_LIMIT     = (Amount, 6, "LowLimit", true, true);
    SF_HIGH_LIMIT    = (Amount, 7, "HighLimit", true, true);
    SF_FEE           = (Amount, 8, "Fee", true, true);
    SF_SEND_MAX      = (Amount, 9, "SendMax", true, true);
    SF_DELIVER_MIN   = (Amount, 10, "DeliverMin", true, true);
    SF_DELIVERED_AMOUNT = (Amount, 18, "DeliveredAmount", true, true);

    // ── Blob ─────────────────────────────────────────────────────────────────
    SF_PUBLIC_KEY       = (Blob, 1, "PublicKey", true, true);
    SF_SIGNING_PUB_KEY  = (Blob, 3, "SigningPubKey", true, true);
    // The signature cannot cover itself: excluded from the signing payload.
    SF_TXN_SIGNATURE    = (Blob, 4, "TxnSignature", false, true);
    SF_SIGNATURE        = (Blob, 6, "Signature", false, true);
    SF_CONDITION        = (Blob, 17, "Condition", true, true);
    SF_FULFILLMENT      = (Blob, 16, "Fulfillment", true, true);

    // ── AccountID ────────────────────────────────────────────────────────────
    SF_ACCOUNT     = (AccountId, 1, "Account", true, true);
    SF_OWNER       = (AccountId, 2, "Owner", true, true);
    SF_DESTINATION = (AccountId, 3, "Destination", true, true);
    SF_ISSUER      = (AccountId, 4, "Issuer", true, true);
    SF_AUTHORIZE   = (AccountId, 5, "Authorize", true, true);
    SF_UNAUTHORIZE = (AccountId, 6, "Unauthorize", true, true);
    SF_REGULAR_KEY = (AccountId, 8, "RegularKey", true, true);

    // ── Object ───────────────────────────────────────────────────────────────
    SF_SIGNER_ENTRY = (Object, 11, "SignerEntry", true, true);
    SF_SIGNER       = (Object, 16, "Signer", true, true);

    // ── Array ────────────────────────────────────────────────────────────────
    // Signers are appended after signing: excluded from the signing payload.
    SF_SIGNERS        = (Array, 3, "Signers", false, true);
    SF_SIGNER_ENTRIES = (Array, 4, "SignerEntries", true, true);

    // ── Hash160 ──────────────────────────────────────────────────────────────
    SF_TAKER_PAYS_CURRENCY = (Hash160, 1, "TakerPaysCurrency", true, true);
    SF_TAKER_PAYS_ISSUER   = (Hash160, 2, "TakerPaysIssuer", true, true);
    SF_TAKER_GETS_CURRENCY = (Hash160, 3, "TakerGetsCurrency", true, true);
    SF_TAKER_GETS_ISSUER   = (Hash160, 4, "TakerGetsIssuer", true, true);

    // ── PathSet ──────────────────────────────────────────────────────────────
    SF_PATHS = (PathSet, 1, "Paths", true, true);

    // ── Vector256 ────────────────────────────────────────────────────────────
    SF_INDEXES    = (Vector256, 1, "Indexes", true, true);
    SF_HASHES     = (Vector256, 2, "Hashes", true, true);
    SF_AMENDMENTS = (Vector256, 3, "Amendments", true, true);
}

static FIELD_BY_ID: Lazy<HashMap<FieldId, &'static SField>> = Lazy::new(|| {
    let mut map = HashMap::with_capacity(ALL_FIELDS.len());
    for field in ALL_FIELDS {
        let prev = map.insert(field.id, field);
        debug_assert!(prev.is_none(), "duplicate field id {:?}", field.id);
    }
    map
});

static FIELD_BY_NAME: Lazy<HashMap<&'static str, &'static SField>> =
    Lazy::new(|| ALL_FIELDS.iter().map(|f| (f.name, f)).collect());

impl SField {
    pub fn lookup(id: FieldId) -> Option<&'static SField> {
        FIELD_BY_ID.get(&id).copied()
    }

    pub fn by_name(name: &str) -> Option<&'static SField> {
        FIELD_BY_NAME.get(name).copied()
    }
}

impl fmt::Display for SField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_no_duplicates() {
        let mut seen = std::collections::HashSet::new();
        for f in ALL_FIELDS {
            assert!(seen.insert(f.id), "duplicate {:?}", f.id);
        }
    }

    #[test]
    fn lookup_by_id_and_name_agree() {
        let f = SField::by_name("Sequence").unwrap();
        assert_eq!(f.id, FieldId::new(FieldType::UInt32, 4));
        assert_eq!(SField::lookup(f.id).unwrap().name, "Sequence");
    }

    #[test]
    fn signature_fields_are_not_signing() {
        assert!(!SF_TXN_SIGNATURE.signing);
        assert!(!SF_SIGNERS.signing);
        assert!(SF_SIGNING_PUB_KEY.signing);
    }

    #[test]
    fn ordering_is_type_then_code() {
        assert!(SF_TRANSACTION_TYPE.id < SF_SEQUENCE.id);
        assert!(SF_SEQUENCE.id < SF_FEE.id);
        assert!(SF_FEE.id < SF_SIGNING_PUB_KEY.id);
        assert!(SF_ACCOUNT.id > SF_TXN_SIGNATURE.id);
    }
}
