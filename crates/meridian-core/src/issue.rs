use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::types::AccountId;

// ── Currency ─────────────────────────────────────────────────────────────────

/// 160-bit currency code. The native asset is all zeroes; a three-letter ISO
/// style code occupies bytes 12..15 with everything else zero; anything else
/// is an opaque 20-byte code.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Currency(pub [u8; 20]);

impl Currency {
    /// The native asset (MRD).
    pub const NATIVE: Currency = Currency([0u8; 20]);

    pub fn from_bytes(b: [u8; 20]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_native(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Build from a three-character code such as "USD".
    pub fn from_code(code: &str) -> Result<Self, CoreError> {
        let bytes = code.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_graphic()) {
            return Err(CoreError::BadCurrency(code.into()));
        }
        let mut arr = [0u8; 20];
        arr[12..15].copy_from_slice(bytes);
        Ok(Self(arr))
    }

    fn iso_code(&self) -> Option<String> {
        let head_zero = self.0[..12].iter().all(|&b| b == 0);
        let tail_zero = self.0[15..].iter().all(|&b| b == 0);
        let code = &self.0[12..15];
        if head_zero && tail_zero && code.iter().all(|b| b.is_ascii_graphic()) {
            Some(String::from_utf8_lossy(code).into_owned())
        } else {
            None
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_native() {
            write!(f, "MRD")
        } else if let Some(code) = self.iso_code() {
            write!(f, "{}", code)
        } else {
            write!(f, "{}", hex::encode_upper(self.0))
        }
    }
}

impl fmt::Debug for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Currency({})", self)
    }
}

// ── Issue ────────────────────────────────────────────────────────────────────

/// A currency together with its issuer. The native issue has a zero issuer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Issue {
    pub currency: Currency,
    pub issuer: AccountId,
}

impl Issue {
    pub const NATIVE: Issue = Issue {
        currency: Currency::NATIVE,
        issuer: AccountId::ZERO,
    };

    pub fn new(currency: Currency, issuer: AccountId) -> Self {
        Self { currency, issuer }
    }

    pub fn is_native(&self) -> bool {
        self.currency.is_native()
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_native() {
            write!(f, "MRD")
        } else {
            write!(f, "{}/{}", self.currency, self.issuer)
        }
    }
}

impl fmt::Debug for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Issue({})", self)
    }
}

// ── Book ─────────────────────────────────────────────────────────────────────

/// An order book: offers exchanging `taker_pays` for `taker_gets`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Book {
    pub taker_pays: Issue,
    pub taker_gets: Issue,
}

impl Book {
    pub fn new(taker_pays: Issue, taker_gets: Issue) -> Self {
        Self {
            taker_pays,
            taker_gets,
        }
    }

    /// The mirrored book, quoting the opposite direction.
    pub fn reversed(&self) -> Book {
        Book {
            taker_pays: self.taker_gets,
            taker_gets: self.taker_pays,
        }
    }
}

impl fmt::Debug for Book {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Book({} -> {})", self.taker_pays, self.taker_gets)
    }
}
