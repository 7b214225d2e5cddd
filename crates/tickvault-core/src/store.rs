//! Persisted series store seam.
//!
//! The coordinator talks to [`SeriesStore`] rather than the warehouse so tests
//! can inject failing stores. Calls are synchronous; async callers run them on
//! the blocking pool.

use thiserror::Error;
use time::Date;
use tickvault_warehouse::{IngestContext, Warehouse, WarehouseError};

use crate::domain::{format_date, parse_date};
use crate::{ProviderId, Symbol, TimeSeriesPoint};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    /// A persisted row no longer passes validation.
    #[error("corrupt persisted row: {0}")]
    Corrupt(String),

    /// The blocking task running the store call did not complete.
    #[error("store task failed: {0}")]
    Task(String),
}

/// Provenance of one persisted upstream batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestMeta {
    pub provider: ProviderId,
    pub request_id: String,
    pub latency_ms: u64,
}

/// Durable storage of one point per (symbol, date).
pub trait SeriesStore: Send + Sync {
    /// Points for `symbol` in `[start, end]`, ascending by date.
    fn query(
        &self,
        symbol: &Symbol,
        start: Date,
        end: Date,
    ) -> Result<Vec<TimeSeriesPoint>, StoreError>;

    /// Idempotent by (symbol, date); returns the number of rows written.
    fn upsert(&self, meta: &IngestMeta, points: &[TimeSeriesPoint]) -> Result<usize, StoreError>;

    fn date_range(&self, symbol: &Symbol) -> Result<Option<(Date, Date)>, StoreError>;
}

impl SeriesStore for Warehouse {
    fn query(
        &self,
        symbol: &Symbol,
        start: Date,
        end: Date,
    ) -> Result<Vec<TimeSeriesPoint>, StoreError> {
        let records = self.query_points(symbol.as_str(), &format_date(start), &format_date(end))?;
        records
            .into_iter()
            .map(|record| {
                TimeSeriesPoint::try_from(record)
                    .map_err(|error| StoreError::Corrupt(error.to_string()))
            })
            .collect()
    }

    fn upsert(&self, meta: &IngestMeta, points: &[TimeSeriesPoint]) -> Result<usize, StoreError> {
        let records = points
            .iter()
            .map(TimeSeriesPoint::to_record)
            .collect::<Vec<_>>();
        let context = IngestContext {
            source: meta.provider.as_str(),
            request_id: meta.request_id.as_str(),
            latency_ms: meta.latency_ms,
        };
        Ok(self.upsert_points(context, &records)?)
    }

    fn date_range(&self, symbol: &Symbol) -> Result<Option<(Date, Date)>, StoreError> {
        let Some((first, last)) = self.point_date_range(symbol.as_str())? else {
            return Ok(None);
        };
        let first = parse_date(&first).map_err(|error| StoreError::Corrupt(error.to_string()))?;
        let last = parse_date(&last).map_err(|error| StoreError::Corrupt(error.to_string()))?;
        Ok(Some((first, last)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickvault_warehouse::WarehouseConfig;
    use time::macros::date;

    fn point(date: Date, close: f64) -> TimeSeriesPoint {
        TimeSeriesPoint::new(
            Symbol::parse("000001").expect("symbol"),
            date,
            close,
            close,
            close,
            close,
            100,
        )
        .expect("point")
    }

    fn meta() -> IngestMeta {
        IngestMeta {
            provider: ProviderId::Eastmoney,
            request_id: String::from("req-1"),
            latency_ms: 12,
        }
    }

    #[test]
    fn upsert_is_idempotent_and_last_write_wins() {
        let warehouse = Warehouse::open(WarehouseConfig::in_memory()).expect("warehouse");
        let symbol = Symbol::parse("000001").expect("symbol");

        let first = vec![point(date!(2023 - 01 - 03), 10.0), point(date!(2023 - 01 - 04), 11.0)];
        assert_eq!(warehouse.upsert(&meta(), &first).expect("upsert"), 2);
        let second = vec![point(date!(2023 - 01 - 04), 12.0)];
        warehouse.upsert(&meta(), &second).expect("upsert again");

        let stored = SeriesStore::query(
            &warehouse,
            &symbol,
            date!(2023 - 01 - 01),
            date!(2023 - 01 - 31),
        )
        .expect("query");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].close, 12.0);
        assert_eq!(warehouse.count_ingest_log("000001").expect("log"), 2);
    }

    #[test]
    fn date_range_reports_persisted_bounds() {
        let warehouse = Warehouse::open(WarehouseConfig::in_memory()).expect("warehouse");
        let symbol = Symbol::parse("000001").expect("symbol");
        assert_eq!(warehouse.date_range(&symbol).expect("range"), None);

        warehouse
            .upsert(
                &meta(),
                &[point(date!(2023 - 01 - 05), 1.0), point(date!(2023 - 01 - 03), 1.0)],
            )
            .expect("upsert");
        assert_eq!(
            warehouse.date_range(&symbol).expect("range"),
            Some((date!(2023 - 01 - 03), date!(2023 - 01 - 05)))
        );
    }
}
