//! Incremental coverage: serve persisted rows, fetch only the gap.
//!
//! For a request `[start, end]` the coordinator
//!
//! 1. asks the calendar for the required sessions, up to today's session
//!    in exchange time (later days cannot have data yet),
//! 2. reads what the store already has and diffs the two,
//! 3. on a complete match returns the persisted rows untouched,
//! 4. otherwise fetches the enclosing span of every missing session in one
//!    upstream call, upserts it, and re-reads the range.
//!
//! Only one caller per symbol fetches at a time. Others wait on the symbol's
//! lease and redo the diff once it is released, which normally turns into a
//! cache hit. Pure cache hits never touch the lease.
//!
//! `get_series` never fails. Upstream and store failures are logged and
//! reported through [`CoverageReport`].

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use time::macros::offset;
use time::{Date, UtcOffset};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::calendar::TradingCalendar;
use crate::domain::date::iso_date;
use crate::domain::sort_and_dedupe;
use crate::freshness::{Clock, SystemClock};
use crate::store::{IngestMeta, SeriesStore, StoreError};
use crate::upstream::UpstreamAdapter;
use crate::{FetchOptions, ProviderId, Symbol, TimeSeriesPoint};

/// Shanghai and Shenzhen trade on China Standard Time.
const EXCHANGE_OFFSET: UtcOffset = offset!(+8);

/// Inclusive date span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateSpan {
    #[serde(with = "iso_date")]
    pub start: Date,
    #[serde(with = "iso_date")]
    pub end: Date,
}

/// Per-request coverage metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageReport {
    pub request_id: String,
    pub total_trading_days: usize,
    /// Required sessions already persisted before any fetch.
    pub covered_days: usize,
    pub coverage_ratio: f64,
    pub cache_hit: bool,
    pub upstream_called: bool,
    pub calendar_degraded: bool,
    /// The store could not be read or written; rows may not be durable.
    pub persist_failed: bool,
    pub gap: Option<DateSpan>,
    pub fetched_rows: usize,
    pub provider: Option<ProviderId>,
    pub upstream_error: Option<String>,
}

impl CoverageReport {
    fn new(calendar_degraded: bool) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            total_trading_days: 0,
            covered_days: 0,
            coverage_ratio: 0.0,
            cache_hit: false,
            upstream_called: false,
            calendar_degraded,
            persist_failed: false,
            gap: None,
            fetched_rows: 0,
            provider: None,
            upstream_error: None,
        }
    }

    fn record_coverage(&mut self, covered: usize) {
        self.covered_days = covered;
        self.coverage_ratio = if self.total_trading_days == 0 {
            0.0
        } else {
            covered as f64 / self.total_trading_days as f64
        };
    }
}

/// Merged series for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesResult {
    pub symbol: Symbol,
    pub points: Vec<TimeSeriesPoint>,
    pub report: CoverageReport,
}

/// Per-symbol mutex plus the number of callers holding or waiting on it.
struct LeaseSlot {
    mutex: Arc<AsyncMutex<()>>,
    holders: usize,
}

type LeaseTable = Mutex<HashMap<Symbol, LeaseSlot>>;

/// Registered before waiting, so a caller cancelled mid-wait still releases its slot.
struct SymbolLease<'a> {
    leases: &'a LeaseTable,
    symbol: Symbol,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SymbolLease<'_> {
    fn drop(&mut self) {
        self.guard.take();
        if let Ok(mut leases) = self.leases.lock() {
            let idle = leases.get_mut(&self.symbol).is_some_and(|slot| {
                slot.holders = slot.holders.saturating_sub(1);
                slot.holders == 0
            });
            if idle {
                leases.remove(&self.symbol);
            }
        }
    }
}

/// Orchestrates calendar, store and upstream for range queries.
pub struct CoverageCoordinator {
    calendar: Arc<TradingCalendar>,
    store: Arc<dyn SeriesStore>,
    upstream: Arc<UpstreamAdapter>,
    clock: Arc<dyn Clock>,
    leases: LeaseTable,
}

impl CoverageCoordinator {
    pub fn new(
        calendar: Arc<TradingCalendar>,
        store: Arc<dyn SeriesStore>,
        upstream: Arc<UpstreamAdapter>,
    ) -> Self {
        Self {
            calendar,
            store,
            upstream,
            clock: Arc::new(SystemClock),
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the time source that decides which sessions can have data.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Current calendar date on the exchange.
    pub fn today(&self) -> Date {
        self.clock.now().to_offset(EXCHANGE_OFFSET).date()
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    /// Symbols currently being filled or waited on.
    pub fn in_flight(&self) -> usize {
        self.leases
            .lock()
            .expect("lease table lock is not poisoned")
            .len()
    }

    /// Points for `symbol` in `[start, end]` plus how they were obtained.
    pub async fn get_series(
        &self,
        symbol: &Symbol,
        start: Date,
        end: Date,
        options: FetchOptions,
    ) -> SeriesResult {
        let mut report = CoverageReport::new(self.calendar.is_degraded());
        let empty = |report: CoverageReport| SeriesResult {
            symbol: symbol.clone(),
            points: Vec::new(),
            report,
        };

        if start > end {
            tracing::debug!(%symbol, %start, %end, "inverted range, returning empty series");
            return empty(report);
        }

        let horizon = end.min(self.today());
        let required = if start > horizon {
            Vec::new()
        } else {
            self.calendar.trading_days_between(start, horizon)
        };
        report.total_trading_days = required.len();
        if required.is_empty() {
            tracing::debug!(%symbol, %start, %end, %horizon, "no elapsed trading days in range");
            return empty(report);
        }

        let (persisted, _) = self.read(symbol, start, end).await;
        let missing = missing_days(&required, &persisted);
        if missing.is_empty() {
            return self.cache_hit(symbol, persisted, report);
        }

        let _lease = self.acquire(symbol).await;

        // Another caller may have filled the gap while we waited.
        let (persisted, read_failed) = self.read(symbol, start, end).await;
        let missing = missing_days(&required, &persisted);
        if missing.is_empty() {
            return self.cache_hit(symbol, persisted, report);
        }

        report.record_coverage(required.len() - missing.len());
        report.persist_failed = read_failed;
        let (Some(&gap_start), Some(&gap_end)) = (missing.first(), missing.last()) else {
            return self.cache_hit(symbol, persisted, report);
        };
        report.gap = Some(DateSpan {
            start: gap_start,
            end: gap_end,
        });
        tracing::debug!(
            %symbol,
            required = required.len(),
            covered = report.covered_days,
            missing = missing.len(),
            %gap_start,
            %gap_end,
            "coverage gap"
        );

        report.upstream_called = true;
        let points = match self.upstream.fetch(symbol, gap_start, gap_end, options).await {
            Ok(fetched) => {
                report.provider = Some(fetched.provider);
                report.fetched_rows = fetched.points.len();
                let meta = IngestMeta {
                    provider: fetched.provider,
                    request_id: report.request_id.clone(),
                    latency_ms: fetched.latency_ms,
                };
                match self
                    .persist_and_reread(symbol, start, end, meta, fetched.points.clone())
                    .await
                {
                    Ok(points) => {
                        tracing::info!(
                            %symbol,
                            provider = %fetched.provider,
                            fetched = fetched.points.len(),
                            returned = points.len(),
                            "gap filled"
                        );
                        points
                    }
                    Err(error) => {
                        tracing::warn!(%symbol, %error, "persisting fetched rows failed; serving them uncached");
                        report.persist_failed = true;
                        let mut merged = persisted;
                        merged.extend(fetched.points);
                        sort_and_dedupe(merged)
                    }
                }
            }
            Err(error) => {
                tracing::warn!(%symbol, %error, "upstream unavailable; serving persisted rows");
                report.upstream_error = Some(error.to_string());
                persisted
            }
        };

        SeriesResult {
            symbol: symbol.clone(),
            points,
            report,
        }
    }

    fn cache_hit(
        &self,
        symbol: &Symbol,
        persisted: Vec<TimeSeriesPoint>,
        mut report: CoverageReport,
    ) -> SeriesResult {
        report.cache_hit = true;
        report.record_coverage(report.total_trading_days);
        tracing::debug!(%symbol, rows = persisted.len(), "coverage cache hit");
        SeriesResult {
            symbol: symbol.clone(),
            points: persisted,
            report,
        }
    }

    async fn acquire(&self, symbol: &Symbol) -> SymbolLease<'_> {
        let mutex = {
            let mut leases = self
                .leases
                .lock()
                .expect("lease table lock is not poisoned");
            let slot = leases.entry(symbol.clone()).or_insert_with(|| LeaseSlot {
                mutex: Arc::new(AsyncMutex::new(())),
                holders: 0,
            });
            slot.holders += 1;
            Arc::clone(&slot.mutex)
        };
        let mut lease = SymbolLease {
            leases: &self.leases,
            symbol: symbol.clone(),
            guard: None,
        };
        lease.guard = Some(mutex.lock_owned().await);
        lease
    }

    /// Persisted rows, or an empty set plus `true` when the store is unreadable.
    async fn read(&self, symbol: &Symbol, start: Date, end: Date) -> (Vec<TimeSeriesPoint>, bool) {
        let store = Arc::clone(&self.store);
        let owned = symbol.clone();
        let result = tokio::task::spawn_blocking(move || store.query(&owned, start, end))
            .await
            .map_err(|error| StoreError::Task(error.to_string()))
            .and_then(|result| result);

        match result {
            Ok(points) => (sort_and_dedupe(points), false),
            Err(error) => {
                tracing::warn!(%symbol, %error, "store read failed; treating range as uncovered");
                (Vec::new(), true)
            }
        }
    }

    async fn persist_and_reread(
        &self,
        symbol: &Symbol,
        start: Date,
        end: Date,
        meta: IngestMeta,
        points: Vec<TimeSeriesPoint>,
    ) -> Result<Vec<TimeSeriesPoint>, StoreError> {
        let store = Arc::clone(&self.store);
        let owned = symbol.clone();
        let merged = tokio::task::spawn_blocking(move || {
            store.upsert(&meta, &points)?;
            store.query(&owned, start, end)
        })
        .await
        .map_err(|error| StoreError::Task(error.to_string()))??;
        Ok(sort_and_dedupe(merged))
    }
}

/// Required sessions with no persisted point, ascending.
fn missing_days(required: &[Date], persisted: &[TimeSeriesPoint]) -> Vec<Date> {
    let covered = persisted
        .iter()
        .map(|point| point.date)
        .collect::<BTreeSet<_>>();
    required
        .iter()
        .copied()
        .filter(|date| !covered.contains(date))
        .collect()
}
