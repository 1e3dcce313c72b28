use std::collections::BTreeMap;

use serde_json::{json, Value as Json};

use meridian_core::amount::Amount;
use meridian_core::types::{AccountId, Hash160, Hash256, PublicKeyBytes};
use meridian_core::HashPrefix;
use meridian_crypto::hash::prefixed_hash256;

use crate::field::{FieldId, FieldType, SField};
use crate::path::PathSet;
use crate::serializer::{BinaryReader, Serializer};
use crate::ProtocolError;

const OBJECT_END_MARKER: u8 = 0xE1;
const ARRAY_END_MARKER: u8 = 0xF1;

/// A typed field value.
#[derive(Clone, PartialEq, Debug)]
pub enum StValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    H160(Hash160),
    H256(Hash256),
    Amount(Amount),
    Blob(Vec<u8>),
    Account(AccountId),
    Object(StObject),
    Array(Vec<(&'static SField, StObject)>),
    PathSet(PathSet),
    V256(Vec<Hash256>),
}

impl StValue {
    fn type_matches(&self, ty: FieldType) -> bool {
        matches!(
            (self, ty),
            (StValue::U8(_), FieldType::UInt8)
                | (StValue::U16(_), FieldType::UInt16)
                | (StValue::U32(_), FieldType::UInt32)
                | (StValue::U64(_), FieldType::UInt64)
                | (StValue::H160(_), FieldType::Hash160)
                | (StValue::H256(_), FieldType::Hash256)
                | (StValue::Amount(_), FieldType::Amount)
                | (StValue::Blob(_), FieldType::Blob)
                | (StValue::Account(_), FieldType::AccountId)
                | (StValue::Object(_), FieldType::Object)
                | (StValue::Array(_), FieldType::Array)
                | (StValue::PathSet(_), FieldType::PathSet)
                | (StValue::V256(_), FieldType::Vector256)
        )
    }
}

/// Self-describing object of typed fields, kept in canonical
/// (type code, field code) order.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct StObject {
    fields: BTreeMap<FieldId, StValue>,
}

/// Which fields a serialization pass includes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SerializeMode {
    /// Every field.
    Full,
    /// Only fields marked for the signing payload.
    Signing,
}

impl StObject {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Typed setters ───────────────────────────────────────────────────────

    pub fn set(&mut self, field: &'static SField, value: StValue) {
        debug_assert!(
            value.type_matches(field.id.type_code),
            "value type mismatch for {}",
            field.name
        );
        self.fields.insert(field.id, value);
    }

    pub fn set_u8(&mut self, field: &'static SField, v: u8) {
        self.set(field, StValue::U8(v));
    }

    pub fn set_u16(&mut self, field: &'static SField, v: u16) {
        self.set(field, StValue::U16(v));
    }

    pub fn set_u32(&mut self, field: &'static SField, v: u32) {
        self.set(field, StValue::U32(v));
    }

    pub fn set_u64(&mut self, field: &'static SField, v: u64) {
        self.set(field, StValue::U64(v));
    }

    pub fn set_h256(&mut self, field: &'static SField, v: Hash256) {
        self.set(field, StValue::H256(v));
    }

    pub fn set_amount(&mut self, field: &'static SField, v: Amount) {
        self.set(field, StValue::Amount(v));
    }

    pub fn set_blob(&mut self, field: &'static SField, v: Vec<u8>) {
        self.set(field, StValue::Blob(v));
    }

    pub fn set_account(&mut self, field: &'static SField, v: AccountId) {
        self.set(field, StValue::Account(v));
    }

    pub fn remove(&mut self, field: &'static SField) -> Option<StValue> {
        self.fields.remove(&field.id)
    }

    // ── Typed getters ───────────────────────────────────────────────────────

    pub fn get(&self, field: &'static SField) -> Option<&StValue> {
        self.fields.get(&field.id)
    }

    pub fn has(&self, field: &'static SField) -> bool {
        self.fields.contains_key(&field.id)
    }

    pub fn get_u8(&self, field: &'static SField) -> Option<u8> {
        match self.get(field) {
            Some(StValue::U8(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u16(&self, field: &'static SField) -> Option<u16> {
        match self.get(field) {
            Some(StValue::U16(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u32(&self, field: &'static SField) -> Option<u32> {
        match self.get(field) {
            Some(StValue::U32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u64(&self, field: &'static SField) -> Option<u64> {
        match self.get(field) {
            Some(StValue::U64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_h256(&self, field: &'static SField) -> Option<Hash256> {
        match self.get(field) {
            Some(StValue::H256(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_amount(&self, field: &'static SField) -> Option<Amount> {
        match self.get(field) {
            Some(StValue::Amount(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_blob(&self, field: &'static SField) -> Option<&[u8]> {
        match self.get(field) {
            Some(StValue::Blob(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn get_account(&self, field: &'static SField) -> Option<AccountId> {
        match self.get(field) {
            Some(StValue::Account(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_array(&self, field: &'static SField) -> Option<&[(&'static SField, StObject)]> {
        match self.get(field) {
            Some(StValue::Array(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn get_path_set(&self, field: &'static SField) -> Option<&PathSet> {
        match self.get(field) {
            Some(StValue::PathSet(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_v256(&self, field: &'static SField) -> Option<&[Hash256]> {
        match self.get(field) {
            Some(StValue::V256(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn get_public_key(&self, field: &'static SField) -> Option<PublicKeyBytes> {
        self.get_blob(field).map(|b| PublicKeyBytes(b.to_vec()))
    }

    /// Required-field accessor for parse-time validation.
    pub fn require(&self, field: &'static SField) -> Result<&StValue, ProtocolError> {
        self.get(field).ok_or(ProtocolError::MissingField(field.name))
    }

    // ── Serialization ───────────────────────────────────────────────────────

    pub fn serialize(&self, mode: SerializeMode) -> Vec<u8> {
        let mut s = Serializer::new();
        self.serialize_into(&mut s, mode);
        s.into_bytes()
    }

    fn serialize_into(&self, s: &mut Serializer, mode: SerializeMode) {
        for (id, value) in &self.fields {
            let field = SField::lookup(*id).expect("constructed from the static table");
            if mode == SerializeMode::Signing && !field.signing {
                continue;
            }
            s.write_field_header(*id);
            Self::serialize_value(s, value, mode);
        }
    }

    fn serialize_value(s: &mut Serializer, value: &StValue, mode: SerializeMode) {
        match value {
            StValue::U8(v) => s.write_u8(*v),
            StValue::U16(v) => s.write_u16(*v),
            StValue::U32(v) => s.write_u32(*v),
            StValue::U64(v) => s.write_u64(*v),
            StValue::H160(v) => s.write_hash160(v),
            StValue::H256(v) => s.write_hash256(v),
            StValue::Amount(v) => s.write_amount(v),
            StValue::Blob(v) => s.write_vl(v),
            StValue::Account(v) => s.write_vl(v.as_bytes()),
            StValue::Object(obj) => {
                obj.serialize_into(s, mode);
                s.write_u8(OBJECT_END_MARKER);
            }
            StValue::Array(items) => {
                for (field, obj) in items {
                    s.write_field_header(field.id);
                    obj.serialize_into(s, mode);
                    s.write_u8(OBJECT_END_MARKER);
                }
                s.write_u8(ARRAY_END_MARKER);
            }
            StValue::PathSet(paths) => paths.serialize(s),
            StValue::V256(hashes) => {
                let mut inner = Serializer::new();
                for h in hashes {
                    inner.write_hash256(h);
                }
                s.write_vl(inner.as_slice());
            }
        }
    }

    /// Digest of `prefix ‖ serialize(mode)`.
    pub fn hash(&self, prefix: HashPrefix, mode: SerializeMode) -> Hash256 {
        prefixed_hash256(prefix, &self.serialize(mode))
    }

    // ── Parsing ─────────────────────────────────────────────────────────────

    pub fn parse(data: &[u8]) -> Result<StObject, ProtocolError> {
        let mut r = BinaryReader::new(data);
        let obj = Self::parse_fields(&mut r, None)?;
        if !r.is_done() {
            return Err(ProtocolError::Truncated(data.len() - r.remaining()));
        }
        Ok(obj)
    }

    /// Parse fields until the reader is exhausted or `end_marker` is hit.
    fn parse_fields(
        r: &mut BinaryReader<'_>,
        end_marker: Option<u8>,
    ) -> Result<StObject, ProtocolError> {
        let mut obj = StObject::new();
        let mut last: Option<FieldId> = None;
        loop {
            if end_marker.is_none() && r.is_done() {
                return Ok(obj);
            }
            if let Some(marker) = end_marker {
                let first = r.read_u8()?;
                if first == marker {
                    return Ok(obj);
                }
                // Not the marker: the byte begins a field header.
                let id = Self::reparse_header(r, first)?;
                last = Self::check_order(last, id)?;
                let value = Self::parse_value(r, id)?;
                obj.fields.insert(id, value);
                continue;
            }
            let id = r.read_field_header()?;
            last = Self::check_order(last, id)?;
            let value = Self::parse_value(r, id)?;
            obj.fields.insert(id, value);
        }
    }

    fn check_order(last: Option<FieldId>, id: FieldId) -> Result<Option<FieldId>, ProtocolError> {
        if let Some(prev) = last {
            if id <= prev {
                return Err(ProtocolError::OutOfOrder);
            }
        }
        Ok(Some(id))
    }

    /// Finish reading a field header whose first byte was already consumed.
    fn reparse_header(r: &mut BinaryReader<'_>, first: u8) -> Result<FieldId, ProtocolError> {
        let type_nibble = first >> 4;
        let field_nibble = first & 0x0F;
        let (type_code, field_code) = match (type_nibble, field_nibble) {
            (0, 0) => (r.read_u8()?, r.read_u8()?),
            (0, f) => (r.read_u8()?, f),
            (t, 0) => (t, r.read_u8()?),
            (t, f) => (t, f),
        };
        let ty = FieldType::from_code(type_code)
            .ok_or(ProtocolError::UnknownField(type_code, field_code))?;
        Ok(FieldId::new(ty, field_code))
    }

    fn parse_value(r: &mut BinaryReader<'_>, id: FieldId) -> Result<StValue, ProtocolError> {
        SField::lookup(id).ok_or(ProtocolError::UnknownField(id.type_code as u8, id.field_code))?;
        Ok(match id.type_code {
            FieldType::UInt8 => StValue::U8(r.read_u8()?),
            FieldType::UInt16 => StValue::U16(r.read_u16()?),
            FieldType::UInt32 => StValue::U32(r.read_u32()?),
            FieldType::UInt64 => StValue::U64(r.read_u64()?),
            FieldType::Hash128 => {
                return Err(ProtocolError::UnknownField(id.type_code as u8, id.field_code))
            }
            FieldType::Hash160 => StValue::H160(r.read_hash160()?),
            FieldType::Hash256 => StValue::H256(r.read_hash256()?),
            FieldType::Amount => StValue::Amount(r.read_amount()?),
            FieldType::Blob => StValue::Blob(r.read_vl()?.to_vec()),
            FieldType::AccountId => {
                let raw = r.read_vl()?;
                if raw.len() != 20 {
                    return Err(ProtocolError::Truncated(raw.len()));
                }
                StValue::Account(AccountId::from_bytes(raw.try_into().unwrap()))
            }
            FieldType::Object => StValue::Object(Self::parse_fields(r, Some(OBJECT_END_MARKER))?),
            FieldType::Array => {
                let mut items = Vec::new();
                loop {
                    let first = r.read_u8()?;
                    if first == ARRAY_END_MARKER {
                        break;
                    }
                    let inner_id = Self::reparse_header(r, first)?;
                    let field = SField::lookup(inner_id).ok_or(ProtocolError::UnknownField(
                        inner_id.type_code as u8,
                        inner_id.field_code,
                    ))?;
                    let obj = Self::parse_fields(r, Some(OBJECT_END_MARKER))?;
                    items.push((field, obj));
                }
                StValue::Array(items)
            }
            FieldType::PathSet => StValue::PathSet(PathSet::parse(r)?),
            FieldType::Vector256 => {
                let raw = r.read_vl()?;
                if raw.len() % 32 != 0 {
                    return Err(ProtocolError::Truncated(raw.len()));
                }
                StValue::V256(
                    raw.chunks_exact(32)
                        .map(|c| Hash256::from_bytes(c.try_into().unwrap()))
                        .collect(),
                )
            }
        })
    }

    // ── JSON ────────────────────────────────────────────────────────────────

    /// Canonical JSON rendering; fields with the JSON toggle off are
    /// omitted.
    pub fn to_json(&self) -> Json {
        let mut map = serde_json::Map::new();
        for (id, value) in &self.fields {
            let field = SField::lookup(*id).expect("constructed from the static table");
            if !field.in_json {
                continue;
            }
            map.insert(field.name.to_string(), Self::value_to_json(value));
        }
        Json::Object(map)
    }

    fn value_to_json(value: &StValue) -> Json {
        match value {
            StValue::U8(v) => json!(v),
            StValue::U16(v) => json!(v),
            StValue::U32(v) => json!(v),
            StValue::U64(v) => json!(format!("{:x}", v)),
            StValue::H160(v) => json!(hex::encode_upper(v.as_bytes())),
            StValue::H256(v) => json!(v.to_hex()),
            StValue::Amount(v) => match v {
                Amount::Native(drops) => json!(drops.to_string()),
                Amount::Iou { value, issue } => json!({
                    "currency": issue.currency.to_string(),
                    "issuer": issue.issuer.to_base58(),
                    "value": value.to_string(),
                }),
            },
            StValue::Blob(v) => json!(hex::encode_upper(v)),
            StValue::Account(v) => json!(v.to_base58()),
            StValue::Object(obj) => obj.to_json(),
            StValue::Array(items) => Json::Array(
                items
                    .iter()
                    .map(|(field, obj)| json!({ field.name: obj.to_json() }))
                    .collect(),
            ),
            StValue::PathSet(paths) => Json::Array(
                paths
                    .0
                    .iter()
                    .map(|path| {
                        Json::Array(
                            path.iter()
                                .map(|el| {
                                    let mut m = serde_json::Map::new();
                                    if let Some(a) = el.account {
                                        m.insert("account".into(), json!(a.to_base58()));
                                    }
                                    if let Some(c) = el.currency {
                                        m.insert("currency".into(), json!(c.to_string()));
                                    }
                                    if let Some(i) = el.issuer {
                                        m.insert("issuer".into(), json!(i.to_base58()));
                                    }
                                    Json::Object(m)
                                })
                                .collect(),
                        )
                    })
                    .collect(),
            ),
            StValue::V256(hashes) => {
                Json::Array(hashes.iter().map(|h| json!(h.to_hex())).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::*;
    use meridian_core::amount::IouValue;
    use meridian_core::issue::{Currency, Issue};

    fn sample() -> StObject {
        let mut obj = StObject::new();
        obj.set_u16(&SF_TRANSACTION_TYPE, 0);
        obj.set_u32(&SF_SEQUENCE, 7);
        obj.set_amount(&SF_FEE, Amount::Native(10));
        obj.set_account(&SF_ACCOUNT, AccountId::from_bytes([1u8; 20]));
        obj.set_blob(&SF_SIGNING_PUB_KEY, vec![2u8; 33]);
        obj.set_blob(&SF_TXN_SIGNATURE, vec![9u8; 70]);
        obj
    }

    #[test]
    fn round_trip_preserves_fields() {
        let obj = sample();
        let bytes = obj.serialize(SerializeMode::Full);
        let parsed = StObject::parse(&bytes).unwrap();
        assert_eq!(parsed, obj);
    }

    #[test]
    fn signing_serialization_drops_signature() {
        let obj = sample();
        let full = obj.serialize(SerializeMode::Full);
        let signing = obj.serialize(SerializeMode::Signing);
        assert!(signing.len() < full.len());
        let parsed = StObject::parse(&signing).unwrap();
        assert!(parsed.get_blob(&SF_TXN_SIGNATURE).is_none());
        assert!(parsed.get_blob(&SF_SIGNING_PUB_KEY).is_some());
    }

    #[test]
    fn serialization_is_sorted_and_insertion_order_free() {
        let mut a = StObject::new();
        a.set_u32(&SF_SEQUENCE, 1);
        a.set_u16(&SF_TRANSACTION_TYPE, 0);
        let mut b = StObject::new();
        b.set_u16(&SF_TRANSACTION_TYPE, 0);
        b.set_u32(&SF_SEQUENCE, 1);
        assert_eq!(
            a.serialize(SerializeMode::Full),
            b.serialize(SerializeMode::Full)
        );
    }

    #[test]
    fn nested_array_round_trip() {
        let mut entry = StObject::new();
        entry.set_account(&SF_ACCOUNT, AccountId::from_bytes([5u8; 20]));
        entry.set_u16(&SF_SIGNER_WEIGHT, 1);
        let mut obj = StObject::new();
        obj.set_u32(&SF_SIGNER_QUORUM, 2);
        obj.set(
            &SF_SIGNER_ENTRIES,
            StValue::Array(vec![(&SF_SIGNER_ENTRY, entry)]),
        );
        let bytes = obj.serialize(SerializeMode::Full);
        let parsed = StObject::parse(&bytes).unwrap();
        assert_eq!(parsed, obj);
    }

    #[test]
    fn out_of_order_input_rejected() {
        // Sequence (0x24) then TransactionType (0x12): descending, invalid.
        let mut s = Serializer::new();
        s.write_field_header(SF_SEQUENCE.id);
        s.write_u32(1);
        s.write_field_header(SF_TRANSACTION_TYPE.id);
        s.write_u16(0);
        let err = StObject::parse(s.as_slice()).unwrap_err();
        assert!(matches!(err, ProtocolError::OutOfOrder));
    }

    #[test]
    fn json_rendering() {
        let mut obj = sample();
        let usd = Issue::new(
            Currency::from_code("USD").unwrap(),
            AccountId::from_bytes([3u8; 20]),
        );
        obj.set_amount(
            &SF_AMOUNT,
            Amount::Iou {
                value: IouValue::from_int(100),
                issue: usd,
            },
        );
        let j = obj.to_json();
        assert_eq!(j["Sequence"], json!(7));
        assert_eq!(j["Fee"], json!("10"));
        assert_eq!(j["Amount"]["currency"], json!("USD"));
    }
}
