//! # Tickvault Core
//!
//! Incremental coverage cache for daily market data.
//!
//! ## Overview
//!
//! Answers "give me symbol X between A and B" from the warehouse whenever the
//! rows already exist, and fetches only the missing span from upstream
//! otherwise:
//!
//! - **Trading calendar** deciding which dates a complete range must contain
//! - **Coverage coordinator** diffing the calendar against persisted rows and
//!   filling the gap with one upstream call per request
//! - **Upstream adapter** with an ordered provider list, retries, circuit
//!   breakers, rate budgets and schema normalization
//! - **Freshness tracker** deciding when cached artifacts may be trusted
//! - **Service facade** tying it together with the instrument master record
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`calendar`] | Trading calendar with snapshot file and weekday fallback |
//! | [`circuit_breaker`] | Per-provider circuit breaker |
//! | [`coverage`] | Gap computation and single-flight fill |
//! | [`domain`] | Symbol, points, instruments, date parsing |
//! | [`error`] | Validation errors |
//! | [`freshness`] | Staleness state machine and clocks |
//! | [`http_client`] | HTTP client abstraction |
//! | [`normalize`] | Provider tables to canonical points |
//! | [`provider`] | Provider contract and error model |
//! | [`provider_policy`] | Per-provider rate budgets |
//! | [`providers`] | Eastmoney, Tencent and synthetic providers |
//! | [`retry`] | Retry policy value object |
//! | [`service`] | `StockDataService` facade |
//! | [`store`] | Persisted series store seam |
//! | [`throttling`] | Rate limiting |
//! | [`upstream`] | Retry-and-fallback adapter |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tickvault_core::{
//!     FetchOptions, ServiceConfig, StockDataService, UpstreamAdapterBuilder, Warehouse,
//! };
//! use time::macros::date;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open_default()?;
//!     let upstream = Arc::new(UpstreamAdapterBuilder::from_env().build()?);
//!     let service = StockDataService::bootstrap(warehouse, upstream, ServiceConfig::default()).await;
//!
//!     let response = service
//!         .get_series("000001", date!(2023 - 01 - 01), date!(2023 - 01 - 31), FetchOptions::default())
//!         .await?;
//!     println!(
//!         "{} rows, cache_hit={}",
//!         response.points.len(),
//!         response.report.cache_hit
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ StockDataService │──── instrument master, symbol listing
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌─────────────────────┐     ┌──────────────────┐
//! │ CoverageCoordinator │────▶│ TradingCalendar  │
//! └────────┬────────────┘     └──────────────────┘
//!          │
//!          ├──────────────▶ SeriesStore (warehouse)
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ UpstreamAdapter │────▶│ Circuit breaker  │
//! └────────┬────────┘     │ Throttling       │
//!          │              └──────────────────┘
//!          ▼
//! ┌─────────────────┐
//! │ SeriesProvider  │──── HttpClient
//! └─────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Provider errors never leave the upstream adapter; callers see
//! [`UpstreamError`] only. The coordinator never fails: store and upstream
//! trouble is reported through [`CoverageReport`].
//!
//! ```rust
//! use tickvault_core::{ProviderError, ProviderErrorKind};
//!
//! fn should_fall_back(error: &ProviderError) -> bool {
//!     match error.kind() {
//!         ProviderErrorKind::Empty | ProviderErrorKind::InvalidResponse => true,
//!         _ => !error.retryable(),
//!     }
//! }
//! ```

pub mod calendar;
pub mod circuit_breaker;
pub mod coverage;
pub mod domain;
pub mod error;
pub mod freshness;
pub mod http_client;
pub mod normalize;
pub mod provider;
pub mod provider_policy;
pub mod providers;
pub mod retry;
pub mod service;
pub mod store;
pub mod throttling;
pub mod upstream;

// Re-export commonly used types at crate root for convenience

// Calendar
pub use calendar::{
    CalendarConfig, CalendarError, CalendarSource, IndexHistoryCalendarSource, TradingCalendar,
};

// Circuit breaker
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

// Coverage
pub use coverage::{CoverageCoordinator, CoverageReport, DateSpan, SeriesResult};

// Domain models
pub use domain::{
    format_date, parse_date, sort_and_dedupe, Instrument, InstrumentKind, Listing, Market, Symbol,
    TimeSeriesPoint,
};

// Error types
pub use error::ValidationError;

// Freshness
pub use freshness::{
    Clock, FreshnessRecord, FreshnessRequirement, FreshnessStatus, FreshnessTracker, ManualClock,
    SystemClock,
};

// HTTP client types
pub use http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};

// Provider contract
pub use provider::{
    Adjust, DailyRequest, FetchOptions, ProviderError, ProviderErrorKind, ProviderFuture,
    ProviderId, RawTable, SeriesProvider,
};
pub use provider_policy::ProviderPolicy;
pub use providers::{EastmoneyProvider, SyntheticProvider, TencentProvider};

// Retry logic
pub use retry::{Backoff, RetryConfig};

// Service facade
pub use service::{
    CoverageSummary, RefreshOutcome, SeriesResponse, ServiceConfig, ServiceError,
    StockDataService, SymbolListing, SYMBOL_LISTING_KEY,
};

// Store seam
pub use store::{IngestMeta, SeriesStore, StoreError};

// Throttling
pub use throttling::ThrottlingQueue;

// Upstream adapter
pub use upstream::{
    AttemptSummary, FetchedSeries, UpstreamAdapter, UpstreamAdapterBuilder, UpstreamError,
};

// Warehouse (re-exported from tickvault-warehouse)
pub use tickvault_warehouse::{
    BlobCache, CacheEntry, CacheStats, DbLocation, EntryStatus, Warehouse, WarehouseConfig,
    WarehouseError,
};
