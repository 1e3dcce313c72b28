use serde::{Deserialize, Serialize};

use meridian_core::issue::Currency;
use meridian_core::types::AccountId;

use crate::serializer::{BinaryReader, Serializer};
use crate::ProtocolError;

const ELEMENT_ACCOUNT: u8 = 0x01;
const ELEMENT_CURRENCY: u8 = 0x10;
const ELEMENT_ISSUER: u8 = 0x20;
const PATH_SEPARATOR: u8 = 0xFF;
const PATHSET_END: u8 = 0x00;

/// One hop in an explicit payment path: an account to transit through
/// and/or a currency/issuer switch (an order book crossing).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize, Default)]
pub struct PathElement {
    pub account: Option<AccountId>,
    pub currency: Option<Currency>,
    pub issuer: Option<AccountId>,
}

impl PathElement {
    pub fn account(account: AccountId) -> Self {
        Self {
            account: Some(account),
            ..Default::default()
        }
    }

    pub fn book(currency: Currency, issuer: Option<AccountId>) -> Self {
        Self {
            account: None,
            currency: Some(currency),
            issuer,
        }
    }

    fn type_byte(&self) -> u8 {
        let mut t = 0;
        if self.account.is_some() {
            t |= ELEMENT_ACCOUNT;
        }
        if self.currency.is_some() {
            t |= ELEMENT_CURRENCY;
        }
        if self.issuer.is_some() {
            t |= ELEMENT_ISSUER;
        }
        t
    }
}

/// An ordered set of candidate paths carried by a payment.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct PathSet(pub Vec<Vec<PathElement>>);

impl PathSet {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn serialize(&self, s: &mut Serializer) {
        for (i, path) in self.0.iter().enumerate() {
            if i > 0 {
                s.write_u8(PATH_SEPARATOR);
            }
            for element in path {
                s.write_u8(element.type_byte());
                if let Some(account) = element.account {
                    s.write_bytes(account.as_bytes());
                }
                if let Some(currency) = element.currency {
                    s.write_bytes(currency.as_bytes());
                }
                if let Some(issuer) = element.issuer {
                    s.write_bytes(issuer.as_bytes());
                }
            }
        }
        s.write_u8(PATHSET_END);
    }

    pub fn parse(r: &mut BinaryReader<'_>) -> Result<PathSet, ProtocolError> {
        let mut paths = Vec::new();
        let mut current = Vec::new();
        loop {
            let marker = r.read_u8()?;
            match marker {
                PATHSET_END => {
                    if !current.is_empty() {
                        paths.push(std::mem::take(&mut current));
                    }
                    return Ok(PathSet(paths));
                }
                PATH_SEPARATOR => {
                    if current.is_empty() {
                        return Err(ProtocolError::BadPathSet);
                    }
                    paths.push(std::mem::take(&mut current));
                }
                t => {
                    if t & !(ELEMENT_ACCOUNT | ELEMENT_CURRENCY | ELEMENT_ISSUER) != 0 {
                        return Err(ProtocolError::BadPathSet);
                    }
                    let mut element = PathElement::default();
                    if t & ELEMENT_ACCOUNT != 0 {
                        element.account = Some(r.read_account_id()?);
                    }
                    if t & ELEMENT_CURRENCY != 0 {
                        element.currency = Some(Currency::from_bytes(
                            *r.read_hash160()?.as_bytes(),
                        ));
                    }
                    if t & ELEMENT_ISSUER != 0 {
                        element.issuer = Some(r.read_account_id()?);
                    }
                    current.push(element);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_two_paths() {
        let a = AccountId::from_bytes([1u8; 20]);
        let usd = Currency::from_code("USD").unwrap();
        let set = PathSet(vec![
            vec![PathElement::account(a), PathElement::book(usd, Some(a))],
            vec![PathElement::book(Currency::NATIVE, None)],
        ]);
        let mut s = Serializer::new();
        set.serialize(&mut s);
        let bytes = s.into_bytes();
        let mut r = BinaryReader::new(&bytes);
        assert_eq!(PathSet::parse(&mut r).unwrap(), set);
    }

    #[test]
    fn empty_set_is_a_lone_end_marker() {
        let mut s = Serializer::new();
        PathSet::default().serialize(&mut s);
        assert_eq!(s.as_slice(), &[PATHSET_END]);
    }
}
