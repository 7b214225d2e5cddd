//! Service facade used by the serving layer and the CLI.
//!
//! Resolves the instrument master record, delegates range queries to the
//! [`CoverageCoordinator`], and owns the ancillary cached artifacts (symbol
//! listing) whose trust is decided by the [`FreshnessTracker`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use time::Date;
use tickvault_warehouse::{BlobCache, CacheStats, Warehouse, WarehouseError};

use crate::calendar::{CalendarConfig, IndexHistoryCalendarSource, TradingCalendar};
use crate::coverage::{CoverageCoordinator, CoverageReport, DateSpan};
use crate::freshness::{Clock, FreshnessRequirement, FreshnessStatus, FreshnessTracker, SystemClock};
use crate::store::{SeriesStore, StoreError};
use crate::upstream::{UpstreamAdapter, UpstreamError};
use crate::{FetchOptions, Instrument, Listing, Symbol, TimeSeriesPoint, ValidationError};

/// Blob cache and freshness key of the exchange-wide symbol listing.
pub const SYMBOL_LISTING_KEY: &str = "symbols:all";
const LISTING_REFRESH_PRIORITY: i32 = 10;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<WarehouseError> for ServiceError {
    fn from(error: WarehouseError) -> Self {
        Self::Store(StoreError::Warehouse(error))
    }
}

/// Service tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Age after which an instrument's display name is re-fetched.
    pub instrument_ttl: Duration,
    /// Lifetime of the cached symbol listing.
    pub listing_ttl: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            instrument_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            listing_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesResponse {
    pub instrument: Instrument,
    pub points: Vec<TimeSeriesPoint>,
    pub report: CoverageReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolListing {
    pub symbols: Vec<Listing>,
    pub freshness: FreshnessStatus,
    /// Served from cache although not `Fresh`; a refresh has been scheduled.
    pub served_stale: bool,
    pub refreshed: bool,
}

/// Persisted extent of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageSummary {
    pub symbol: Symbol,
    pub range: Option<DateSpan>,
    pub persisted_rows: usize,
    pub expected_trading_days: usize,
    pub coverage_ratio: f64,
}

/// Result of refreshing one scheduled key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub key: String,
    pub refreshed: bool,
    pub error: Option<String>,
}

pub struct StockDataService {
    warehouse: Warehouse,
    blob_cache: BlobCache,
    calendar: Arc<TradingCalendar>,
    upstream: Arc<UpstreamAdapter>,
    coordinator: CoverageCoordinator,
    freshness: Arc<FreshnessTracker>,
    clock: Arc<dyn Clock>,
    config: ServiceConfig,
}

impl StockDataService {
    pub fn new(
        warehouse: Warehouse,
        calendar: Arc<TradingCalendar>,
        upstream: Arc<UpstreamAdapter>,
        config: ServiceConfig,
    ) -> Self {
        let store: Arc<dyn SeriesStore> = Arc::new(warehouse.clone());
        let coordinator =
            CoverageCoordinator::new(Arc::clone(&calendar), store, Arc::clone(&upstream));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            blob_cache: warehouse.blob_cache(),
            warehouse,
            calendar,
            upstream,
            coordinator,
            freshness: Arc::new(FreshnessTracker::new(Arc::clone(&clock))),
            clock,
            config,
        }
    }

    /// Load the trading calendar under the warehouse home, then build the service.
    pub async fn bootstrap(
        warehouse: Warehouse,
        upstream: Arc<UpstreamAdapter>,
        config: ServiceConfig,
    ) -> Self {
        let source = IndexHistoryCalendarSource::new(Arc::clone(&upstream));
        let calendar_config = CalendarConfig::at_home(warehouse.home());
        let calendar = TradingCalendar::load(&source, &calendar_config).await;
        Self::new(warehouse, Arc::new(calendar), upstream, config)
    }

    /// Replace the time source. Resets freshness bookkeeping.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.freshness = Arc::new(FreshnessTracker::new(Arc::clone(&clock)));
        self.coordinator = self.coordinator.with_clock(Arc::clone(&clock));
        self.clock = clock;
        self
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    pub fn freshness(&self) -> &FreshnessTracker {
        &self.freshness
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    pub fn upstream(&self) -> &UpstreamAdapter {
        &self.upstream
    }

    /// Daily points for `symbol` in `[start, end]` with coverage metrics.
    ///
    /// Only malformed symbols and instrument-kind conflicts are errors; store and
    /// upstream trouble shows up in the report instead.
    pub async fn get_series(
        &self,
        symbol: &str,
        start: Date,
        end: Date,
        options: FetchOptions,
    ) -> Result<SeriesResponse, ServiceError> {
        let symbol = Symbol::parse(symbol)?;
        let instrument = self.resolve_instrument(&symbol, options).await?;
        let result = self
            .coordinator
            .get_series(&symbol, start, end, options)
            .await;

        Ok(SeriesResponse {
            instrument,
            points: result.points,
            report: result.report,
        })
    }

    /// Existing master record, created on first sight and renamed when older than the TTL.
    async fn resolve_instrument(
        &self,
        symbol: &Symbol,
        options: FetchOptions,
    ) -> Result<Instrument, ServiceError> {
        let now_ms = self.clock.now_ms();
        let ttl_ms = i64::try_from(self.config.instrument_ttl.as_millis()).unwrap_or(i64::MAX);

        let warehouse = self.warehouse.clone();
        let code = symbol.to_string();
        let existing = run_blocking(move || Ok(warehouse.get_instrument(&code)?))
            .await
            .and_then(|record| {
                record
                    .map(Instrument::try_from)
                    .transpose()
                    .map_err(|error| StoreError::Corrupt(error.to_string()))
            });

        let mut instrument = match existing {
            Ok(Some(instrument)) => {
                if instrument.kind != options.kind {
                    return Err(ValidationError::KindMismatch {
                        symbol: symbol.to_string(),
                        stored: instrument.kind.as_str(),
                        requested: options.kind.as_str(),
                    }
                    .into());
                }
                if now_ms.saturating_sub(instrument.updated_at_ms) < ttl_ms {
                    return Ok(instrument);
                }
                instrument
            }
            Ok(None) => {
                tracing::info!(%symbol, kind = options.kind.as_str(), "registering instrument");
                Instrument::new(symbol.clone(), options.kind, now_ms)
            }
            Err(error) => {
                tracing::warn!(%symbol, %error, "instrument lookup failed; using transient record");
                return Ok(Instrument::new(symbol.clone(), options.kind, now_ms));
            }
        };

        if let Some(name) = self.upstream.profile(symbol, options).await {
            instrument.name = Some(name);
        }
        instrument.updated_at_ms = now_ms;

        let warehouse = self.warehouse.clone();
        let record = instrument.to_record();
        if let Err(error) = run_blocking(move || Ok(warehouse.put_instrument(&record)?)).await {
            tracing::warn!(%symbol, %error, "failed to persist instrument");
        }
        Ok(instrument)
    }

    /// Exchange-wide listing, served from cache when `requirement` accepts it.
    ///
    /// A non-fresh listing that is still served gets a refresh scheduled. When
    /// upstream fails, any stored listing is returned regardless of status.
    ///
    /// Once the tracker knows the key it alone decides expiry; the stored
    /// entry's own TTL only applies to a listing cached by an earlier process.
    pub async fn list_symbols(
        &self,
        requirement: FreshnessRequirement,
    ) -> Result<SymbolListing, ServiceError> {
        let status = self.freshness.status(SYMBOL_LISTING_KEY);
        let cached = if self.freshness.is_fresh(SYMBOL_LISTING_KEY, requirement) {
            let cache = self.blob_cache.clone();
            let tracked = status != FreshnessStatus::Unknown;
            run_blocking(move || {
                Ok(if tracked {
                    cache.get_ignoring_ttl::<Vec<Listing>>(SYMBOL_LISTING_KEY)?
                } else {
                    cache.get::<Vec<Listing>>(SYMBOL_LISTING_KEY)?
                })
            })
            .await
            .unwrap_or_else(|error| {
                tracing::warn!(%error, "symbol listing cache read failed");
                None
            })
        } else {
            None
        };

        if let Some(symbols) = cached {
            let served_stale = status != FreshnessStatus::Fresh;
            if served_stale {
                self.freshness
                    .schedule_update(SYMBOL_LISTING_KEY, LISTING_REFRESH_PRIORITY);
            }
            return Ok(SymbolListing {
                symbols,
                freshness: status,
                served_stale,
                refreshed: false,
            });
        }

        match self.refresh_listing().await {
            Ok(symbols) => Ok(SymbolListing {
                symbols,
                freshness: FreshnessStatus::Fresh,
                served_stale: false,
                refreshed: true,
            }),
            Err(error) => {
                let Some(symbols) = self.stored_listing().await else {
                    return Err(error);
                };
                tracing::warn!(%error, "listing refresh failed; serving stored copy");
                self.freshness
                    .schedule_update(SYMBOL_LISTING_KEY, LISTING_REFRESH_PRIORITY);
                Ok(SymbolListing {
                    symbols,
                    freshness: self.freshness.status(SYMBOL_LISTING_KEY),
                    served_stale: true,
                    refreshed: false,
                })
            }
        }
    }

    async fn refresh_listing(&self) -> Result<Vec<Listing>, ServiceError> {
        let symbols = self.upstream.listing().await?;

        let cache = self.blob_cache.clone();
        let stored = symbols.clone();
        let ttl = self.config.listing_ttl;
        if let Err(error) =
            run_blocking(move || Ok(cache.set(SYMBOL_LISTING_KEY, &stored, Some(ttl))?)).await
        {
            tracing::warn!(%error, "failed to cache symbol listing");
        }
        self.freshness
            .mark_updated(SYMBOL_LISTING_KEY, Some(self.config.listing_ttl));
        Ok(symbols)
    }

    /// Stored listing ignoring status and expiry.
    async fn stored_listing(&self) -> Option<Vec<Listing>> {
        let cache = self.blob_cache.clone();
        let entry = run_blocking(move || Ok(cache.entry(SYMBOL_LISTING_KEY)?))
            .await
            .ok()
            .flatten()?;
        serde_json::from_str(&entry.value).ok()
    }

    /// Refresh every key queued by `schedule_update`, highest priority first.
    pub async fn drain_scheduled_updates(&self) -> Vec<RefreshOutcome> {
        let mut outcomes = Vec::new();
        for key in self.freshness.drain_scheduled() {
            if key != SYMBOL_LISTING_KEY {
                outcomes.push(RefreshOutcome {
                    error: Some(format!("no refresher registered for '{key}'")),
                    key,
                    refreshed: false,
                });
                continue;
            }

            match self.refresh_listing().await {
                Ok(_) => outcomes.push(RefreshOutcome {
                    key,
                    refreshed: true,
                    error: None,
                }),
                Err(error) => {
                    tracing::warn!(%key, %error, "scheduled refresh failed");
                    outcomes.push(RefreshOutcome {
                        key,
                        refreshed: false,
                        error: Some(error.to_string()),
                    });
                }
            }
        }
        outcomes
    }

    /// Persisted extent of `symbol` against the calendar.
    pub async fn coverage(&self, symbol: &str) -> Result<CoverageSummary, ServiceError> {
        let symbol = Symbol::parse(symbol)?;
        let warehouse = self.warehouse.clone();
        let owned = symbol.clone();
        let (range, persisted_rows) = run_blocking(move || {
            let range = warehouse.date_range(&owned)?;
            let rows = warehouse.count_points(owned.as_str())?;
            Ok((range, rows))
        })
        .await?;

        let expected_trading_days = range.map_or(0, |(first, last)| {
            self.calendar.trading_days_between(first, last).len()
        });
        let coverage_ratio = if expected_trading_days == 0 {
            0.0
        } else {
            (persisted_rows as f64 / expected_trading_days as f64).min(1.0)
        };

        Ok(CoverageSummary {
            symbol,
            range: range.map(|(start, end)| DateSpan { start, end }),
            persisted_rows,
            expected_trading_days,
            coverage_ratio,
        })
    }

    pub async fn cache_stats(&self) -> Result<CacheStats, ServiceError> {
        let cache = self.blob_cache.clone();
        Ok(run_blocking(move || Ok(cache.stats()?)).await?)
    }

    /// Invalidate `key` in the blob cache and expire it in the tracker.
    pub async fn invalidate(&self, key: &str) -> Result<bool, ServiceError> {
        let cache = self.blob_cache.clone();
        let owned = key.to_string();
        let found = run_blocking(move || Ok(cache.invalidate(&owned)?)).await?;
        self.freshness.mark_expired(key);
        tracing::info!(key, found, "cache entry invalidated");
        Ok(found)
    }

    /// Empty the blob cache and forget all freshness state. Series rows are kept.
    pub async fn clear_cache(&self) -> Result<usize, ServiceError> {
        let cache = self.blob_cache.clone();
        let removed = run_blocking(move || Ok(cache.clear()?)).await?;
        self.freshness.clear();
        tracing::info!(removed, "blob cache cleared");
        Ok(removed)
    }
}

async fn run_blocking<T, F>(task: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|error| StoreError::Task(error.to_string()))?
}
