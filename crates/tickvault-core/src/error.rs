use thiserror::Error;

/// Validation errors for symbols, dates, and point values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol '{value}' is not a 1-6 digit exchange code")]
    InvalidSymbol { value: String },

    #[error("date '{value}' is not a recognised calendar date")]
    InvalidDate { value: String },

    #[error("unknown freshness requirement '{value}', expected strict, normal or relaxed")]
    InvalidRequirement { value: String },
    #[error("unknown provider '{value}', expected eastmoney, tencent or synthetic")]
    InvalidProvider { value: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },
    #[error("point high must be >= low")]
    InvalidPointRange,

    #[error("{symbol} is registered as {stored}, not {requested}")]
    KindMismatch {
        symbol: String,
        stored: &'static str,
        requested: &'static str,
    },
}
