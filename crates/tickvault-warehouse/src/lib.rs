//! # Tickvault Warehouse
//!
//! DuckDB-backed persistence for tickvault.
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `daily_points` | One OHLCV row per (symbol, trade_date), upsert semantics |
//! | `instruments` | Instrument master records |
//! | `cache_entries` | Generic key/value cache rows (see [`blob_cache`]) |
//! | `ingest_log` | Audit row per persisted upstream batch |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tickvault_warehouse::{PointRecord, Warehouse};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open_default()?;
//!     let rows = warehouse.query_points("000001", "2023-01-01", "2023-01-31")?;
//!     println!("{} persisted rows", rows.len());
//!     Ok(())
//! }
//! ```
//!
//! All user-provided values travel as query parameters, never interpolated.

pub mod blob_cache;
pub mod duckdb;
pub mod migrations;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{Connection, ToSql};
use thiserror::Error;

pub use blob_cache::{BlobCache, CacheEntry, CacheStats, EntryStatus, HotKey};
pub use duckdb::{DbLocation, DuckDbConnectionManager, PooledConnection};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Cached value could not be (de)serialized.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// Input was rejected before reaching the database.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for tickvault data.
    pub home: PathBuf,
    /// Database location.
    pub location: DbLocation,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::at_home(resolve_home())
    }
}

impl WarehouseConfig {
    /// On-disk database under `<home>/cache/warehouse.duckdb`.
    pub fn at_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let db_path = home.join("cache").join("warehouse.duckdb");
        Self {
            home,
            location: DbLocation::File(db_path),
            max_pool_size: 4,
        }
    }

    /// Throwaway in-memory database.
    pub fn in_memory() -> Self {
        Self {
            home: resolve_home(),
            location: DbLocation::InMemory,
            max_pool_size: 4,
        }
    }
}

/// A persisted daily point.
///
/// Dates are ISO `YYYY-MM-DD` strings; the core crate owns the typed model.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    pub symbol: String,
    pub trade_date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub turnover: Option<f64>,
    pub amplitude: Option<f64>,
    pub pct_change: Option<f64>,
    pub change: Option<f64>,
    pub turnover_rate: Option<f64>,
}

/// Instrument master record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentRecord {
    pub symbol: String,
    pub name: Option<String>,
    pub market: String,
    pub kind: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// Metadata attached to one persisted upstream batch.
#[derive(Debug, Clone, Copy)]
pub struct IngestContext<'a> {
    pub source: &'a str,
    pub request_id: &'a str,
    pub latency_ms: u64,
}

const POINT_COLUMNS: &str = "symbol, CAST(trade_date AS VARCHAR), open, high, low, close, volume, \
     turnover, amplitude, pct_change, change_amount, turnover_rate";

/// The main warehouse interface.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    /// Open a warehouse with default configuration.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open a warehouse with the specified configuration.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let DbLocation::File(path) = &config.location {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = DuckDbConnectionManager::open(config.location.clone(), config.max_pool_size)?;
        let warehouse = Self { config, manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Initialize database schema.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    /// Path to the database file, `None` when running in memory.
    pub fn db_path(&self) -> Option<&Path> {
        self.manager.db_path()
    }

    /// Root directory for auxiliary files (calendar snapshot and friends).
    pub fn home(&self) -> &Path {
        self.config.home.as_path()
    }

    /// Generic cache store sharing this warehouse's database.
    pub fn blob_cache(&self) -> BlobCache {
        BlobCache::new(self.manager.clone())
    }

    /// Read persisted points for `symbol` in `[start, end]`, ascending by date.
    pub fn query_points(
        &self,
        symbol: &str,
        start: &str,
        end: &str,
    ) -> Result<Vec<PointRecord>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let sql = format!(
            "SELECT {POINT_COLUMNS} FROM daily_points \
             WHERE symbol = ? AND trade_date BETWEEN CAST(? AS DATE) AND CAST(? AS DATE) \
             ORDER BY trade_date ASC"
        );
        let mut statement = connection.prepare(sql.as_str())?;
        let params: [&dyn ToSql; 3] = [&symbol, &start, &end];
        let rows = statement.query_map(params.as_slice(), read_point)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(WarehouseError::from)
    }

    /// Upsert points keyed by (symbol, trade_date); conflicting rows are replaced.
    ///
    /// Writes one `ingest_log` row per symbol in the batch. Returns the number
    /// of rows written.
    pub fn upsert_points(
        &self,
        context: IngestContext<'_>,
        rows: &[PointRecord],
    ) -> Result<usize, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, WarehouseError> {
            for row in rows {
                let params: [&dyn ToSql; 13] = [
                    &row.symbol,
                    &row.trade_date,
                    &row.open,
                    &row.high,
                    &row.low,
                    &row.close,
                    &row.volume,
                    &row.turnover,
                    &row.amplitude,
                    &row.pct_change,
                    &row.change,
                    &row.turnover_rate,
                    &context.source,
                ];
                connection.execute(
                    "INSERT OR REPLACE INTO daily_points \
                     (symbol, trade_date, open, high, low, close, volume, turnover, amplitude, \
                      pct_change, change_amount, turnover_rate, source, updated_at) \
                     VALUES (?, CAST(? AS DATE), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
                    params.as_slice(),
                )?;
            }

            let mut symbols = rows.iter().map(|row| row.symbol.as_str()).collect::<Vec<_>>();
            symbols.sort_unstable();
            symbols.dedup();
            let latency_ms = i64::try_from(context.latency_ms).unwrap_or(i64::MAX);
            for symbol in symbols {
                let row_count = rows.iter().filter(|row| row.symbol == symbol).count() as i64;
                let params: [&dyn ToSql; 5] = [
                    &context.request_id,
                    &symbol,
                    &context.source,
                    &row_count,
                    &latency_ms,
                ];
                connection.execute(
                    "INSERT INTO ingest_log \
                     (request_id, symbol, source, dataset, status, row_count, latency_ms, timestamp) \
                     VALUES (?, ?, ?, 'daily_points', 'ok', ?, ?, CURRENT_TIMESTAMP)",
                    params.as_slice(),
                )?;
            }

            Ok(rows.len())
        })();

        finalize_transaction(&connection, result)
    }

    /// Earliest and latest persisted trade dates for `symbol`.
    pub fn point_date_range(
        &self,
        symbol: &str,
    ) -> Result<Option<(String, String)>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let (min, max): (Option<String>, Option<String>) = connection.query_row(
            "SELECT CAST(MIN(trade_date) AS VARCHAR), CAST(MAX(trade_date) AS VARCHAR) \
             FROM daily_points WHERE symbol = ?",
            [symbol],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(min.zip(max))
    }

    /// Number of persisted points for `symbol`.
    pub fn count_points(&self, symbol: &str) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM daily_points WHERE symbol = ?",
            [symbol],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Number of audit rows written for `symbol`.
    pub fn count_ingest_log(&self, symbol: &str) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM ingest_log WHERE symbol = ?",
            [symbol],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Look up an instrument master record.
    pub fn get_instrument(&self, symbol: &str) -> Result<Option<InstrumentRecord>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(
            "SELECT symbol, name, market, kind, created_at_ms, updated_at_ms \
             FROM instruments WHERE symbol = ?",
        )?;
        let mut rows = statement.query([symbol])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        Ok(Some(InstrumentRecord {
            symbol: row.get(0)?,
            name: row.get(1)?,
            market: row.get(2)?,
            kind: row.get(3)?,
            created_at_ms: row.get(4)?,
            updated_at_ms: row.get(5)?,
        }))
    }

    /// Insert or replace an instrument master record.
    pub fn put_instrument(&self, record: &InstrumentRecord) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 6] = [
            &record.symbol,
            &record.name,
            &record.market,
            &record.kind,
            &record.created_at_ms,
            &record.updated_at_ms,
        ];
        connection.execute(
            "INSERT OR REPLACE INTO instruments \
             (symbol, name, market, kind, created_at_ms, updated_at_ms) \
             VALUES (?, ?, ?, ?, ?, ?)",
            params.as_slice(),
        )?;
        Ok(())
    }
}

fn read_point(row: &::duckdb::Row<'_>) -> Result<PointRecord, ::duckdb::Error> {
    Ok(PointRecord {
        symbol: row.get(0)?,
        trade_date: row.get(1)?,
        open: row.get(2)?,
        high: row.get(3)?,
        low: row.get(4)?,
        close: row.get(5)?,
        volume: row.get(6)?,
        turnover: row.get(7)?,
        amplitude: row.get(8)?,
        pct_change: row.get(9)?,
        change: row.get(10)?,
        turnover_rate: row.get(11)?,
    })
}

/// Finalize a transaction, committing on success or rolling back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

/// Resolve the tickvault home directory from environment or default.
fn resolve_home() -> PathBuf {
    if let Some(path) = env::var_os("TICKVAULT_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".tickvault");
    }

    PathBuf::from(".tickvault")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn point(symbol: &str, date: &str, close: f64) -> PointRecord {
        PointRecord {
            symbol: symbol.to_string(),
            trade_date: date.to_string(),
            open: close - 0.1,
            high: close + 0.2,
            low: close - 0.3,
            close,
            volume: 1_000,
            turnover: Some(close * 1_000.0),
            amplitude: None,
            pct_change: None,
            change: None,
            turnover_rate: Some(0.5),
        }
    }

    fn context() -> IngestContext<'static> {
        IngestContext {
            source: "test",
            request_id: "req-0001",
            latency_ms: 12,
        }
    }

    #[test]
    fn initializes_on_disk_database() {
        let temp = tempdir().expect("tempdir");
        let warehouse = Warehouse::open(WarehouseConfig::at_home(temp.path())).expect("open");

        let path = warehouse.db_path().expect("file-backed");
        assert!(path.exists());
        assert_eq!(warehouse.count_points("000001").expect("count"), 0);
    }

    #[test]
    fn upsert_replaces_conflicting_rows() {
        let warehouse = Warehouse::open(WarehouseConfig::in_memory()).expect("open");

        warehouse
            .upsert_points(context(), &[point("000001", "2023-01-03", 10.0)])
            .expect("first upsert");
        warehouse
            .upsert_points(
                context(),
                &[
                    point("000001", "2023-01-03", 11.0),
                    point("000001", "2023-01-04", 12.0),
                ],
            )
            .expect("second upsert");

        let rows = warehouse
            .query_points("000001", "2023-01-01", "2023-01-31")
            .expect("query");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].trade_date, "2023-01-03");
        assert_eq!(rows[0].close, 11.0);
        assert_eq!(rows[1].trade_date, "2023-01-04");
        assert_eq!(warehouse.count_ingest_log("000001").expect("log"), 2);
    }

    #[test]
    fn query_is_bounded_and_ordered() {
        let warehouse = Warehouse::open(WarehouseConfig::in_memory()).expect("open");
        warehouse
            .upsert_points(
                context(),
                &[
                    point("000001", "2023-01-10", 3.0),
                    point("000001", "2023-01-03", 1.0),
                    point("000001", "2023-01-05", 2.0),
                    point("600000", "2023-01-05", 9.0),
                ],
            )
            .expect("upsert");

        let rows = warehouse
            .query_points("000001", "2023-01-04", "2023-01-10")
            .expect("query");
        let dates = rows.iter().map(|row| row.trade_date.as_str()).collect::<Vec<_>>();
        assert_eq!(dates, vec!["2023-01-05", "2023-01-10"]);

        assert_eq!(
            warehouse.point_date_range("000001").expect("range"),
            Some((String::from("2023-01-03"), String::from("2023-01-10")))
        );
        assert_eq!(warehouse.point_date_range("300750").expect("range"), None);
    }

    #[test]
    fn parameterized_symbol_is_stored_verbatim() {
        let warehouse = Warehouse::open(WarehouseConfig::in_memory()).expect("open");
        let dangerous = r#"000001'; DROP TABLE daily_points; --"#;

        warehouse
            .upsert_points(context(), &[point(dangerous, "2023-01-03", 1.0)])
            .expect("upsert");

        assert_eq!(warehouse.count_points(dangerous).expect("count"), 1);
    }

    #[test]
    fn instrument_round_trips_and_replaces() {
        let warehouse = Warehouse::open(WarehouseConfig::in_memory()).expect("open");
        assert!(warehouse.get_instrument("000001").expect("get").is_none());

        let mut record = InstrumentRecord {
            symbol: String::from("000001"),
            name: None,
            market: String::from("sz"),
            kind: String::from("stock"),
            created_at_ms: 1_000,
            updated_at_ms: 1_000,
        };
        warehouse.put_instrument(&record).expect("put");

        record.name = Some(String::from("Ping An Bank"));
        record.updated_at_ms = 2_000;
        warehouse.put_instrument(&record).expect("replace");

        let stored = warehouse.get_instrument("000001").expect("get").expect("present");
        assert_eq!(stored, record);
    }
}
