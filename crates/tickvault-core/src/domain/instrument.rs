use serde::{Deserialize, Serialize};
use tickvault_warehouse::InstrumentRecord;

use super::symbol::{InstrumentKind, Market, Symbol};
use crate::ValidationError;

/// Instrument master record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: Symbol,
    pub name: Option<String>,
    pub market: Market,
    pub kind: InstrumentKind,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Instrument {
    pub fn new(symbol: Symbol, kind: InstrumentKind, now_ms: i64) -> Self {
        let market = Market::for_code(symbol.as_str(), kind);
        Self {
            symbol,
            name: None,
            market,
            kind,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    pub fn to_record(&self) -> InstrumentRecord {
        InstrumentRecord {
            symbol: self.symbol.to_string(),
            name: self.name.clone(),
            market: self.market.prefix().to_string(),
            kind: self.kind.as_str().to_string(),
            created_at_ms: self.created_at_ms,
            updated_at_ms: self.updated_at_ms,
        }
    }
}

impl TryFrom<InstrumentRecord> for Instrument {
    type Error = ValidationError;

    fn try_from(record: InstrumentRecord) -> Result<Self, Self::Error> {
        let symbol = Symbol::parse(&record.symbol)?;
        let kind = InstrumentKind::parse(&record.kind);
        let market =
            Market::parse(&record.market).unwrap_or_else(|| Market::for_code(symbol.as_str(), kind));
        Ok(Self {
            symbol,
            name: record.name,
            market,
            kind,
            created_at_ms: record.created_at_ms,
            updated_at_ms: record.updated_at_ms,
        })
    }
}

/// One entry of the exchange-wide symbol listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub symbol: Symbol,
    pub name: String,
}
