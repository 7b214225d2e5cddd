use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const CODE_LEN: usize = 6;

/// Canonical exchange code, always six ASCII digits.
///
/// Accepts bare codes (`1`, `000001`), market-prefixed codes (`sz000001`)
/// and suffixed codes (`000001.SZ`). Parsing a canonical symbol returns it
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptySymbol);
        }

        let lowered = trimmed.to_ascii_lowercase();
        let code = strip_market_affix(&lowered);

        let valid = !code.is_empty()
            && code.len() <= CODE_LEN
            && code.bytes().all(|byte| byte.is_ascii_digit());
        if !valid {
            return Err(ValidationError::InvalidSymbol {
                value: trimmed.to_string(),
            });
        }

        Ok(Self(format!("{code:0>width$}", width = CODE_LEN)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exchange the code trades on when treated as a stock.
    pub fn market(&self) -> Market {
        Market::for_code(self.as_str(), InstrumentKind::Stock)
    }
}

fn strip_market_affix(value: &str) -> &str {
    for market in ["sh", "sz", "bj"] {
        if let Some(rest) = value.strip_prefix(market) {
            return rest.trim_start_matches('.');
        }
    }
    for suffix in [".sh", ".ss", ".sz", ".bj"] {
        if let Some(rest) = value.strip_suffix(suffix) {
            return rest;
        }
    }
    value
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Symbol {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for Symbol {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}

/// Stock or index. Index codes overlap stock codes (`000001`), so the kind
/// decides which exchange a code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    #[default]
    Stock,
    Index,
}

impl InstrumentKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stock => "stock",
            Self::Index => "index",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("index") {
            Self::Index
        } else {
            Self::Stock
        }
    }
}

/// Mainland exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    Shanghai,
    Shenzhen,
    Beijing,
}

impl Market {
    pub fn for_code(code: &str, kind: InstrumentKind) -> Self {
        if kind == InstrumentKind::Index {
            return if code.starts_with("399") {
                Self::Shenzhen
            } else {
                Self::Shanghai
            };
        }

        if code.starts_with("92") {
            return Self::Beijing;
        }
        match code.as_bytes().first() {
            Some(b'5' | b'6' | b'9') => Self::Shanghai,
            Some(b'4' | b'8') => Self::Beijing,
            _ => Self::Shenzhen,
        }
    }

    /// Lowercase prefix used by quote sites (`sh`, `sz`, `bj`).
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Shanghai => "sh",
            Self::Shenzhen => "sz",
            Self::Beijing => "bj",
        }
    }

    /// Numeric market id in eastmoney `secid` values.
    pub const fn eastmoney_id(self) -> u8 {
        match self {
            Self::Shanghai => 1,
            Self::Shenzhen | Self::Beijing => 0,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "sh" | "shanghai" => Some(Self::Shanghai),
            "sz" | "shenzhen" => Some(Self::Shenzhen),
            "bj" | "beijing" => Some(Self::Beijing),
            _ => None,
        }
    }
}

impl Display for Market {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}
