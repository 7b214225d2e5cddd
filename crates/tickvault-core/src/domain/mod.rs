//! # Domain Models
//!
//! Canonical types shared by every component.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Symbol`] | Six-digit canonical exchange code |
//! | [`Market`] | Exchange inferred from the code |
//! | [`InstrumentKind`] | Stock or index |
//! | [`TimeSeriesPoint`] | Daily OHLCV row with derived fields |
//! | [`Instrument`] | Instrument master record |
//!
//! Dates are `time::Date`; see [`date`] for the accepted input spellings.

pub mod date;
mod instrument;
mod point;
mod symbol;

pub use date::{format_date, parse_date};
pub use instrument::{Instrument, Listing};
pub use point::{sort_and_dedupe, TimeSeriesPoint};
pub use symbol::{InstrumentKind, Market, Symbol};
