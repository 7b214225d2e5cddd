//! Provider contract for upstream daily series.
//!
//! A provider only fetches: it returns a [`RawTable`] in its own column
//! vocabulary and knows nothing about caching. Normalization, validation,
//! retries and fallback live in [`crate::upstream`].

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::Date;

use crate::{InstrumentKind, Listing, Market, Symbol, ValidationError};

/// Upstream provider identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Eastmoney,
    Tencent,
    Synthetic,
}

impl ProviderId {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eastmoney => "eastmoney",
            Self::Tencent => "tencent",
            Self::Synthetic => "synthetic",
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "eastmoney" | "em" => Ok(Self::Eastmoney),
            "tencent" | "qq" => Ok(Self::Tencent),
            "synthetic" | "mock" => Ok(Self::Synthetic),
            _ => Err(ValidationError::InvalidProvider {
                value: value.to_string(),
            }),
        }
    }
}

/// Price adjustment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Adjust {
    #[default]
    None,
    Forward,
    Backward,
}

impl Adjust {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "qfq" | "forward" => Self::Forward,
            "hfq" | "backward" => Self::Backward,
            _ => Self::None,
        }
    }
}

/// Options that change which upstream series is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FetchOptions {
    pub kind: InstrumentKind,
    pub adjust: Adjust,
}

impl FetchOptions {
    pub fn index() -> Self {
        Self {
            kind: InstrumentKind::Index,
            adjust: Adjust::None,
        }
    }

    pub fn market(self, symbol: &Symbol) -> Market {
        Market::for_code(symbol.as_str(), self.kind)
    }
}

/// One daily-series request handed to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyRequest {
    pub symbol: Symbol,
    pub start: Date,
    pub end: Date,
    pub options: FetchOptions,
}

/// Provider output before normalization.
///
/// Column names are whatever the provider calls them; cells are untyped JSON
/// values (numbers or strings).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RawTable {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|column| (*column).to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Provider-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Unavailable,
    RateLimited,
    Timeout,
    InvalidRequest,
    InvalidResponse,
    Empty,
    Unsupported,
    CircuitOpen,
}

/// Structured provider error. Never crosses the upstream adapter boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    kind: ProviderErrorKind,
    message: String,
    retryable: bool,
}

impl ProviderError {
    fn with_kind(kind: ProviderErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::with_kind(ProviderErrorKind::Unavailable, message, true)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::with_kind(ProviderErrorKind::RateLimited, message, true)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::with_kind(ProviderErrorKind::Timeout, message, true)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::with_kind(ProviderErrorKind::InvalidRequest, message, false)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::with_kind(ProviderErrorKind::InvalidResponse, message, false)
    }

    pub fn empty(message: impl Into<String>) -> Self {
        Self::with_kind(ProviderErrorKind::Empty, message, false)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::with_kind(ProviderErrorKind::Unsupported, message, false)
    }

    pub fn circuit_open(provider: ProviderId) -> Self {
        Self::with_kind(
            ProviderErrorKind::CircuitOpen,
            format!("{provider} circuit breaker is open"),
            false,
        )
    }

    /// Map a non-success HTTP status onto an error kind.
    pub fn from_status(provider: ProviderId, status: u16) -> Self {
        let message = format!("{provider} returned status {status}");
        match status {
            429 => Self::rate_limited(message),
            408 | 500..=599 => Self::unavailable(message),
            _ => Self::invalid_response(message),
        }
    }

    pub const fn kind(&self) -> ProviderErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            ProviderErrorKind::Unavailable => "provider.unavailable",
            ProviderErrorKind::RateLimited => "provider.rate_limited",
            ProviderErrorKind::Timeout => "provider.timeout",
            ProviderErrorKind::InvalidRequest => "provider.invalid_request",
            ProviderErrorKind::InvalidResponse => "provider.invalid_response",
            ProviderErrorKind::Empty => "provider.empty",
            ProviderErrorKind::Unsupported => "provider.unsupported",
            ProviderErrorKind::CircuitOpen => "provider.circuit_open",
        }
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for ProviderError {}

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Upstream provider contract.
///
/// Implementations must be `Send + Sync`; one instance serves every request.
pub trait SeriesProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Daily rows for `request`, in the provider's own vocabulary.
    fn daily<'a>(&'a self, request: &'a DailyRequest) -> ProviderFuture<'a, RawTable>;

    /// Display name for an instrument, if the provider knows one.
    fn profile<'a>(
        &'a self,
        symbol: &'a Symbol,
        options: FetchOptions,
    ) -> ProviderFuture<'a, Option<String>> {
        let _ = (symbol, options);
        Box::pin(async { Ok(None) })
    }

    /// Every listed stock.
    fn listing<'a>(&'a self) -> ProviderFuture<'a, Vec<Listing>> {
        let id = self.id();
        Box::pin(async move {
            Err(ProviderError::unsupported(format!(
                "{id} does not provide a symbol listing"
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_marks_transient_failures_retryable() {
        assert!(ProviderError::from_status(ProviderId::Eastmoney, 503).retryable());
        assert_eq!(
            ProviderError::from_status(ProviderId::Eastmoney, 429).kind(),
            ProviderErrorKind::RateLimited
        );
        let not_found = ProviderError::from_status(ProviderId::Tencent, 404);
        assert!(!not_found.retryable());
        assert_eq!(not_found.code(), "provider.invalid_response");
    }

    #[test]
    fn provider_ids_parse_from_cli_spelling() {
        assert_eq!("Eastmoney".parse::<ProviderId>(), Ok(ProviderId::Eastmoney));
        assert_eq!("qq".parse::<ProviderId>(), Ok(ProviderId::Tencent));
        assert!("yahoo".parse::<ProviderId>().is_err());
    }

    #[test]
    fn index_options_resolve_index_market() {
        let symbol = Symbol::parse("000001").expect("symbol");
        assert_eq!(FetchOptions::default().market(&symbol), Market::Shenzhen);
        assert_eq!(FetchOptions::index().market(&symbol), Market::Shanghai);
    }
}
