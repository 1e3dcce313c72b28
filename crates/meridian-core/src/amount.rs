use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::CoreError;
use crate::issue::Issue;

/// Canonical mantissa range for a non-zero IOU value.
pub const MANTISSA_MIN: u64 = 1_000_000_000_000_000; // 10^15
pub const MANTISSA_MAX: u64 = 9_999_999_999_999_999; // 10^16 - 1

/// Exponent range for a non-zero IOU value.
pub const EXPONENT_MIN: i32 = -96;
pub const EXPONENT_MAX: i32 = 80;

/// Largest representable drop count (absolute value).
pub const MAX_NATIVE_DROPS: i64 = 100_000_000_000 * 1_000_000;

// ── IouValue ─────────────────────────────────────────────────────────────────

/// Issued-currency value: sign, 54-bit-ish decimal mantissa and exponent.
/// Non-zero values are kept normalized with mantissa in
/// [10^15, 10^16) so that comparison is lexicographic on
/// (sign, exponent, mantissa). Zero is mantissa 0, exponent -100.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IouValue {
    mantissa: u64,
    exponent: i32,
    negative: bool,
}

/// Rounding direction for multiplication/division.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Rounding {
    Down,
    Up,
}

impl IouValue {
    pub const ZERO: IouValue = IouValue {
        mantissa: 0,
        exponent: -100,
        negative: false,
    };

    /// Build and normalize. `mantissa` carries the magnitude.
    pub fn new(negative: bool, mantissa: u64, exponent: i32) -> Result<Self, CoreError> {
        Self::normalize(negative, mantissa as u128, exponent, Rounding::Down)
    }

    /// Whole-number constructor, e.g. `IouValue::from_int(100)` = 100.
    pub fn from_int(n: i64) -> Self {
        if n == 0 {
            return Self::ZERO;
        }
        Self::normalize(n < 0, n.unsigned_abs() as u128, 0, Rounding::Down)
            .expect("small integers always normalize")
    }

    fn normalize(
        negative: bool,
        mut mantissa: u128,
        mut exponent: i32,
        rounding: Rounding,
    ) -> Result<Self, CoreError> {
        if mantissa == 0 {
            return Ok(Self::ZERO);
        }
        while mantissa < MANTISSA_MIN as u128 {
            if exponent <= EXPONENT_MIN {
                // Underflow rounds to zero.
                return Ok(Self::ZERO);
            }
            mantissa *= 10;
            exponent -= 1;
        }
        while mantissa > MANTISSA_MAX as u128 {
            let rem = mantissa % 10;
            mantissa /= 10;
            if rounding == Rounding::Up && rem != 0 {
                mantissa += 1;
                if mantissa > MANTISSA_MAX as u128 {
                    mantissa /= 10;
                    exponent += 1;
                }
            }
            exponent += 1;
        }
        if exponent > EXPONENT_MAX {
            return Err(CoreError::ExponentOutOfRange(exponent));
        }
        if exponent < EXPONENT_MIN {
            return Ok(Self::ZERO);
        }
        Ok(Self {
            mantissa: mantissa as u64,
            exponent,
            negative,
        })
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa == 0
    }

    pub fn is_negative(&self) -> bool {
        self.negative && !self.is_zero()
    }

    pub fn mantissa(&self) -> u64 {
        self.mantissa
    }

    pub fn exponent(&self) -> i32 {
        self.exponent
    }

    pub fn negate(self) -> Self {
        if self.is_zero() {
            self
        } else {
            Self {
                negative: !self.negative,
                ..self
            }
        }
    }

    pub fn abs(self) -> Self {
        Self {
            negative: false,
            ..self
        }
    }

    /// Signed mantissa scaled to `exponent`; None if it cannot be represented.
    fn scaled_to(&self, exponent: i32) -> Option<i128> {
        let mut m = self.mantissa as i128;
        let mut e = self.exponent;
        while e > exponent {
            m = m.checked_mul(10)?;
            e -= 1;
        }
        while e < exponent {
            m /= 10;
            e += 1;
        }
        Some(if self.negative { -m } else { m })
    }

    pub fn checked_add(self, other: IouValue) -> Result<IouValue, CoreError> {
        if self.is_zero() {
            return Ok(other);
        }
        if other.is_zero() {
            return Ok(self);
        }
        // Align at the smaller exponent; values more than 16 orders apart
        // cannot affect each other.
        let exponent = self.exponent.min(other.exponent).max(self.exponent.max(other.exponent) - 17);
        let a = self.scaled_to(exponent).ok_or(CoreError::AmountOverflow)?;
        let b = other.scaled_to(exponent).ok_or(CoreError::AmountOverflow)?;
        let sum = a + b;
        Self::normalize(sum < 0, sum.unsigned_abs(), exponent, Rounding::Down)
    }

    pub fn checked_sub(self, other: IouValue) -> Result<IouValue, CoreError> {
        self.checked_add(other.negate())
    }

    /// Multiply with an explicit rounding direction on the result magnitude.
    pub fn checked_mul(self, other: IouValue, rounding: Rounding) -> Result<IouValue, CoreError> {
        if self.is_zero() || other.is_zero() {
            return Ok(Self::ZERO);
        }
        let product = self.mantissa as u128 * other.mantissa as u128;
        Self::normalize(
            self.negative != other.negative,
            product,
            self.exponent + other.exponent,
            rounding,
        )
    }

    /// Divide with an explicit rounding direction on the result magnitude.
    pub fn checked_div(self, other: IouValue, rounding: Rounding) -> Result<IouValue, CoreError> {
        if other.is_zero() {
            return Err(CoreError::DivideByZero);
        }
        if self.is_zero() {
            return Ok(Self::ZERO);
        }
        // Scale the numerator by 10^17 so the integer quotient lands above
        // the canonical mantissa range, then normalize back down.
        let numerator = self.mantissa as u128 * 100_000_000_000_000_000u128;
        let denominator = other.mantissa as u128;
        let mut quotient = numerator / denominator;
        if rounding == Rounding::Up && numerator % denominator != 0 {
            quotient += 1;
        }
        Self::normalize(
            self.negative != other.negative,
            quotient,
            self.exponent - other.exponent - 17,
            rounding,
        )
    }
}

impl PartialOrd for IouValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IouValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_zero(), other.is_zero()) {
            (true, true) => return Ordering::Equal,
            (true, false) => {
                return if other.negative {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (false, true) => {
                return if self.negative {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            _ => {}
        }
        if self.negative != other.negative {
            return if self.negative {
                Ordering::Less
            } else {
                Ordering::Greater
            };
        }
        // Same sign: compare magnitudes by (exponent, mantissa).
        let mag = self
            .exponent
            .cmp(&other.exponent)
            .then(self.mantissa.cmp(&other.mantissa));
        if self.negative {
            mag.reverse()
        } else {
            mag
        }
    }
}

impl fmt::Display for IouValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "0");
        }
        let sign = if self.negative { "-" } else { "" };
        write!(f, "{}{}e{}", sign, self.mantissa, self.exponent)
    }
}

impl fmt::Debug for IouValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IouValue({})", self)
    }
}

// ── Amount ───────────────────────────────────────────────────────────────────

/// A quantity of either the native asset (signed drops) or an issued
/// currency. Signed so that view deltas and trust-line balances can carry
/// direction; ledger invariants forbid negative account balances.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Amount {
    Native(i64),
    Iou { value: IouValue, issue: Issue },
}

impl Amount {
    pub fn drops(n: i64) -> Self {
        Amount::Native(n)
    }

    pub fn iou(value: IouValue, issue: Issue) -> Self {
        Amount::Iou { value, issue }
    }

    /// Zero in the units of `issue`.
    pub fn zero(issue: Issue) -> Self {
        if issue.is_native() {
            Amount::Native(0)
        } else {
            Amount::Iou {
                value: IouValue::ZERO,
                issue,
            }
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Amount::Native(_))
    }

    pub fn issue(&self) -> Issue {
        match self {
            Amount::Native(_) => Issue::NATIVE,
            Amount::Iou { issue, .. } => *issue,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Amount::Native(n) => *n == 0,
            Amount::Iou { value, .. } => value.is_zero(),
        }
    }

    pub fn is_negative(&self) -> bool {
        match self {
            Amount::Native(n) => *n < 0,
            Amount::Iou { value, .. } => value.is_negative(),
        }
    }

    pub fn is_positive(&self) -> bool {
        !self.is_zero() && !self.is_negative()
    }

    pub fn negate(self) -> Self {
        match self {
            Amount::Native(n) => Amount::Native(-n),
            Amount::Iou { value, issue } => Amount::Iou {
                value: value.negate(),
                issue,
            },
        }
    }

    /// Native drop count; errors on an IOU amount.
    pub fn native_drops(&self) -> Result<i64, CoreError> {
        match self {
            Amount::Native(n) => Ok(*n),
            Amount::Iou { .. } => Err(CoreError::IssueMismatch),
        }
    }

    /// IOU value; errors on a native amount.
    pub fn iou_value(&self) -> Result<IouValue, CoreError> {
        match self {
            Amount::Native(_) => Err(CoreError::IssueMismatch),
            Amount::Iou { value, .. } => Ok(*value),
        }
    }

    /// The value viewed as an IouValue regardless of kind (drops become a
    /// whole-number value). Used by quality/rate arithmetic.
    pub fn as_iou_value(&self) -> IouValue {
        match self {
            Amount::Native(n) => IouValue::from_int(*n),
            Amount::Iou { value, .. } => *value,
        }
    }

    /// Rebuild an amount of this issue from an IouValue, rounding natives.
    pub fn with_value(&self, value: IouValue, rounding: Rounding) -> Result<Amount, CoreError> {
        match self {
            Amount::Native(_) => {
                let drops = iou_to_drops(value, rounding)?;
                Ok(Amount::Native(drops))
            }
            Amount::Iou { issue, .. } => Ok(Amount::Iou {
                value,
                issue: *issue,
            }),
        }
    }

    pub fn checked_add(self, other: Amount) -> Result<Amount, CoreError> {
        match (self, other) {
            (Amount::Native(a), Amount::Native(b)) => a
                .checked_add(b)
                .filter(|n| n.abs() <= MAX_NATIVE_DROPS)
                .map(Amount::Native)
                .ok_or(CoreError::AmountOverflow),
            (
                Amount::Iou { value: a, issue: ia },
                Amount::Iou { value: b, issue: ib },
            ) => {
                if ia != ib {
                    return Err(CoreError::IssueMismatch);
                }
                Ok(Amount::Iou {
                    value: a.checked_add(b)?,
                    issue: ia,
                })
            }
            _ => Err(CoreError::IssueMismatch),
        }
    }

    pub fn checked_sub(self, other: Amount) -> Result<Amount, CoreError> {
        self.checked_add(other.negate())
    }

    /// Order by value. Amounts of different issues are not comparable.
    pub fn compare(&self, other: &Amount) -> Result<Ordering, CoreError> {
        if self.issue() != other.issue() {
            return Err(CoreError::IssueMismatch);
        }
        match (self, other) {
            (Amount::Native(a), Amount::Native(b)) => Ok(a.cmp(b)),
            _ => Ok(self.as_iou_value().cmp(&other.as_iou_value())),
        }
    }

    /// min by value, assuming equal issues.
    pub fn min_of(self, other: Amount) -> Result<Amount, CoreError> {
        Ok(match self.compare(&other)? {
            Ordering::Greater => other,
            _ => self,
        })
    }
}

/// Convert an IOU value to whole drops with the given rounding.
pub fn iou_to_drops(value: IouValue, rounding: Rounding) -> Result<i64, CoreError> {
    if value.is_zero() {
        return Ok(0);
    }
    let mut m = value.mantissa() as u128;
    let mut e = value.exponent();
    while e > 0 {
        m = m.checked_mul(10).ok_or(CoreError::AmountOverflow)?;
        e -= 1;
    }
    let mut rem = 0u128;
    while e < 0 {
        rem |= m % 10;
        m /= 10;
        e += 1;
    }
    if rounding == Rounding::Up && rem != 0 {
        m += 1;
    }
    if m > MAX_NATIVE_DROPS as u128 {
        return Err(CoreError::DropsOutOfRange);
    }
    let n = m as i64;
    Ok(if value.is_negative() { -n } else { n })
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amount::Native(n) => write!(f, "{} drops", n),
            Amount::Iou { value, issue } => write!(f, "{} {}", value, issue),
        }
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::Currency;
    use crate::types::AccountId;

    fn usd() -> Issue {
        Issue::new(
            Currency::from_code("USD").unwrap(),
            AccountId::from_bytes([1u8; 20]),
        )
    }

    #[test]
    fn normalization_canonical_range() {
        let v = IouValue::new(false, 5, 0).unwrap();
        assert_eq!(v.mantissa(), 5_000_000_000_000_000);
        assert_eq!(v.exponent(), -15);

        let v = IouValue::new(false, 123_456_789_012_345_678, 0).unwrap();
        // 18 digits shrink to 16 with truncation.
        assert_eq!(v.mantissa(), 1_234_567_890_123_456);
        assert_eq!(v.exponent(), 2);
    }

    #[test]
    fn zero_is_special() {
        let z = IouValue::new(true, 0, 42).unwrap();
        assert!(z.is_zero());
        assert!(!z.is_negative());
        assert_eq!(z, IouValue::ZERO);
    }

    #[test]
    fn add_and_sub_inverse() {
        let a = IouValue::from_int(100);
        let b = IouValue::from_int(37);
        let sum = a.checked_add(b).unwrap();
        assert_eq!(sum, IouValue::from_int(137));
        assert_eq!(sum.checked_sub(b).unwrap(), a);
    }

    #[test]
    fn add_with_disparate_exponents() {
        let big = IouValue::new(false, MANTISSA_MIN, 20).unwrap();
        let tiny = IouValue::new(false, MANTISSA_MIN, -30).unwrap();
        // The tiny value vanishes against the big one.
        assert_eq!(big.checked_add(tiny).unwrap(), big);
    }

    #[test]
    fn mul_rounding_direction() {
        let third = IouValue::from_int(1)
            .checked_div(IouValue::from_int(3), Rounding::Down)
            .unwrap();
        let down = third
            .checked_mul(IouValue::from_int(3), Rounding::Down)
            .unwrap();
        let up = third.checked_mul(IouValue::from_int(3), Rounding::Up).unwrap();
        assert!(down < IouValue::from_int(1));
        assert!(up >= down);
    }

    #[test]
    fn div_exact() {
        let q = IouValue::from_int(100)
            .checked_div(IouValue::from_int(4), Rounding::Down)
            .unwrap();
        assert_eq!(q, IouValue::from_int(25));
    }

    #[test]
    fn ordering_by_exponent_then_mantissa() {
        let small = IouValue::new(false, MANTISSA_MIN, -5).unwrap();
        let large = IouValue::new(false, MANTISSA_MIN, 3).unwrap();
        assert!(small < large);
        assert!(large.negate() < small);
        assert!(IouValue::ZERO < small);
        assert!(large.negate() < IouValue::ZERO);
    }

    #[test]
    fn amount_issue_mismatch_errors() {
        let a = Amount::drops(10);
        let b = Amount::iou(IouValue::from_int(10), usd());
        assert!(a.checked_add(b).is_err());
    }

    #[test]
    fn native_overflow_guard() {
        let a = Amount::drops(MAX_NATIVE_DROPS);
        assert!(a.checked_add(Amount::drops(1)).is_err());
    }

    #[test]
    fn iou_to_drops_rounds() {
        let v = IouValue::from_int(10)
            .checked_div(IouValue::from_int(3), Rounding::Down)
            .unwrap();
        assert_eq!(iou_to_drops(v, Rounding::Down).unwrap(), 3);
        assert_eq!(iou_to_drops(v, Rounding::Up).unwrap(), 4);
    }
}
