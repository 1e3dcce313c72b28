use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid hex: {0}")]
    BadHex(String),

    #[error("invalid base58 token: {0}")]
    BadBase58(String),

    #[error("invalid currency code: {0}")]
    BadCurrency(String),

    #[error("amount exponent out of range: {0}")]
    ExponentOutOfRange(i32),

    #[error("amount overflow")]
    AmountOverflow,

    #[error("division by zero amount")]
    DivideByZero,

    #[error("incompatible issues in amount arithmetic")]
    IssueMismatch,

    #[error("native drop count out of range")]
    DropsOutOfRange,
}
