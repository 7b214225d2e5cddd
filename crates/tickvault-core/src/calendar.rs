//! Trading calendar.
//!
//! The session set is bulk-loaded from a [`CalendarSource`] and kept in a JSON
//! snapshot with a validity window. When neither the source nor a snapshot is
//! available the calendar degrades to "every weekday trades", which
//! misclassifies exchange holidays; [`TradingCalendar::is_degraded`] reports it.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::macros::date;
use time::{Date, OffsetDateTime, Weekday};

use crate::domain::{format_date, parse_date};
use crate::upstream::{UpstreamAdapter, UpstreamError};
use crate::{FetchOptions, Symbol};

/// First session of the Shanghai exchange.
const FIRST_SESSION: Date = date!(1990 - 12 - 19);
const CALENDAR_INDEX: &str = "000001";

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("calendar snapshot i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("calendar snapshot is unreadable: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("calendar data is invalid: {0}")]
    Invalid(String),

    #[error("calendar source returned no sessions")]
    Empty,
}

pub type CalendarFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<Date>, CalendarError>> + Send + 'a>>;

/// Bulk supplier of trading sessions.
pub trait CalendarSource: Send + Sync {
    fn trading_days<'a>(&'a self) -> CalendarFuture<'a>;
}

/// Sessions derived from the SSE Composite daily history: every bar is a session.
pub struct IndexHistoryCalendarSource {
    upstream: Arc<UpstreamAdapter>,
}

impl IndexHistoryCalendarSource {
    pub fn new(upstream: Arc<UpstreamAdapter>) -> Self {
        Self { upstream }
    }

    async fn load(&self) -> Result<Vec<Date>, CalendarError> {
        let symbol = Symbol::parse(CALENDAR_INDEX)
            .map_err(|error| CalendarError::Invalid(error.to_string()))?;
        let today = OffsetDateTime::now_utc().date();
        let fetched = self
            .upstream
            .fetch(&symbol, FIRST_SESSION, today, FetchOptions::index())
            .await?;
        Ok(fetched.points.into_iter().map(|point| point.date).collect())
    }
}

impl CalendarSource for IndexHistoryCalendarSource {
    fn trading_days<'a>(&'a self) -> CalendarFuture<'a> {
        Box::pin(self.load())
    }
}

/// Where the snapshot lives and how long it is trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarConfig {
    pub cache_path: PathBuf,
    pub validity: Duration,
}

impl CalendarConfig {
    /// Snapshot at `<home>/cache/trading_calendar.json`, valid for 7 days.
    pub fn at_home(home: &Path) -> Self {
        Self {
            cache_path: home.join("cache").join("trading_calendar.json"),
            validity: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CalendarSnapshot {
    refreshed_at_ms: i64,
    days: Vec<String>,
}

impl CalendarSnapshot {
    fn age(&self, now_ms: i64) -> Duration {
        let age_ms = now_ms.saturating_sub(self.refreshed_at_ms).max(0);
        Duration::from_millis(u64::try_from(age_ms).unwrap_or_default())
    }

    fn dates(&self) -> Result<Vec<Date>, CalendarError> {
        self.days
            .iter()
            .map(|day| parse_date(day).map_err(|error| CalendarError::Invalid(error.to_string())))
            .collect()
    }
}

/// Loaded trading-day set for one market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingCalendar {
    days: BTreeSet<Date>,
    degraded: bool,
}

impl TradingCalendar {
    /// Calendar over an explicit session set. Dates outside its span use the weekday rule.
    pub fn from_days(days: impl IntoIterator<Item = Date>) -> Self {
        Self {
            days: days.into_iter().collect(),
            degraded: false,
        }
    }

    /// Weekday heuristic only; flagged as degraded.
    pub fn weekday_only() -> Self {
        Self {
            days: BTreeSet::new(),
            degraded: true,
        }
    }

    /// Snapshot if still valid, else the source, else a stale snapshot, else weekdays.
    ///
    /// Never fails; the last resort is [`TradingCalendar::weekday_only`].
    pub async fn load(source: &dyn CalendarSource, config: &CalendarConfig) -> Self {
        let snapshot = match read_snapshot(&config.cache_path).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::warn!(path = %config.cache_path.display(), %error, "ignoring calendar snapshot");
                None
            }
        };

        if let Some(snapshot) = &snapshot {
            if snapshot.age(now_ms()) < config.validity {
                match snapshot.dates() {
                    Ok(days) if !days.is_empty() => {
                        tracing::debug!(sessions = days.len(), "trading calendar loaded from snapshot");
                        return Self::from_days(days);
                    }
                    Ok(_) => {}
                    Err(error) => tracing::warn!(%error, "calendar snapshot has bad dates"),
                }
            }
        }

        match Self::refresh(source, config).await {
            Ok(calendar) => return calendar,
            Err(error) => tracing::warn!(%error, "trading calendar refresh failed"),
        }

        if let Some(days) = snapshot
            .and_then(|snapshot| snapshot.dates().ok())
            .filter(|days| !days.is_empty())
        {
            tracing::warn!(sessions = days.len(), "using stale trading calendar snapshot");
            return Self::from_days(days);
        }

        tracing::warn!("trading calendar degraded to weekday heuristic; holidays will count as sessions");
        Self::weekday_only()
    }

    /// Fetch from `source` and rewrite the snapshot. A failed write is logged, not returned.
    pub async fn refresh(
        source: &dyn CalendarSource,
        config: &CalendarConfig,
    ) -> Result<Self, CalendarError> {
        let days = source.trading_days().await?;
        if days.is_empty() {
            return Err(CalendarError::Empty);
        }

        let calendar = Self::from_days(days);
        if let Err(error) = calendar.write_snapshot(&config.cache_path).await {
            tracing::warn!(path = %config.cache_path.display(), %error, "failed to write calendar snapshot");
        }
        tracing::info!(sessions = calendar.days.len(), "trading calendar refreshed");
        Ok(calendar)
    }

    async fn write_snapshot(&self, path: &Path) -> Result<(), CalendarError> {
        let snapshot = CalendarSnapshot {
            refreshed_at_ms: now_ms(),
            days: self.days.iter().copied().map(format_date).collect(),
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec(&snapshot)?;
        tokio::fs::write(path, body).await?;
        Ok(())
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// First and last session of the loaded snapshot.
    pub fn bounds(&self) -> Option<(Date, Date)> {
        self.days.first().copied().zip(self.days.last().copied())
    }

    pub fn session_count(&self) -> usize {
        self.days.len()
    }

    pub fn is_trading_day(&self, date: Date) -> bool {
        match self.bounds() {
            Some((first, last)) if first <= date && date <= last => self.days.contains(&date),
            _ => is_weekday(date),
        }
    }

    /// Sessions in `[start, end]`, ascending; empty when `start > end`.
    pub fn trading_days_between(&self, start: Date, end: Date) -> Vec<Date> {
        let mut days = Vec::new();
        let mut current = Some(start);
        while let Some(date) = current.filter(|date| *date <= end) {
            if self.is_trading_day(date) {
                days.push(date);
            }
            current = date.next_day();
        }
        days
    }
}

fn is_weekday(date: Date) -> bool {
    !matches!(date.weekday(), Weekday::Saturday | Weekday::Sunday)
}

fn now_ms() -> i64 {
    i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

async fn read_snapshot(path: &Path) -> Result<Option<CalendarSnapshot>, CalendarError> {
    match tokio::fs::read(path).await {
        Ok(body) => Ok(Some(serde_json::from_slice(&body)?)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedSource {
        days: Option<Vec<Date>>,
        calls: AtomicU32,
    }

    impl FixedSource {
        fn new(days: Option<Vec<Date>>) -> Self {
            Self {
                days,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl CalendarSource for FixedSource {
        fn trading_days<'a>(&'a self) -> CalendarFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let days = self.days.clone();
            Box::pin(async move { days.ok_or(CalendarError::Empty) })
        }
    }

    fn sessions() -> Vec<Date> {
        vec![
            date!(2023 - 01 - 03),
            date!(2023 - 01 - 04),
            date!(2023 - 01 - 05),
            date!(2023 - 01 - 06),
            date!(2023 - 01 - 09),
        ]
    }

    fn config(dir: &tempfile::TempDir) -> CalendarConfig {
        CalendarConfig::at_home(dir.path())
    }

    #[test]
    fn range_queries_are_inclusive_and_ordered() {
        let calendar = TradingCalendar::from_days(sessions());

        assert_eq!(
            calendar.trading_days_between(date!(2023 - 01 - 04), date!(2023 - 01 - 09)),
            vec![
                date!(2023 - 01 - 04),
                date!(2023 - 01 - 05),
                date!(2023 - 01 - 06),
                date!(2023 - 01 - 09)
            ]
        );
        assert!(calendar
            .trading_days_between(date!(2023 - 01 - 09), date!(2023 - 01 - 03))
            .is_empty());
    }

    #[test]
    fn dates_outside_snapshot_fall_back_to_weekdays() {
        let calendar = TradingCalendar::from_days(sessions());
        // Inside the snapshot a weekday can still be a holiday.
        assert!(!calendar.is_trading_day(date!(2023 - 01 - 02)));
        assert!(calendar.is_trading_day(date!(2023 - 01 - 10)));
        assert!(!calendar.is_trading_day(date!(2023 - 01 - 14)));
    }

    #[tokio::test]
    async fn load_writes_snapshot_and_reuses_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = FixedSource::new(Some(sessions()));

        let first = TradingCalendar::load(&source, &config(&dir)).await;
        assert!(!first.is_degraded());
        assert!(config(&dir).cache_path.exists());

        let second = TradingCalendar::load(&source, &config(&dir)).await;
        assert_eq!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_snapshot_is_refreshed_and_kept_on_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(&dir);
        std::fs::create_dir_all(config.cache_path.parent().expect("parent")).expect("mkdir");
        std::fs::write(
            &config.cache_path,
            r#"{"refreshed_at_ms":0,"days":["2023-01-03","2023-01-05"]}"#,
        )
        .expect("write snapshot");

        let failing = FixedSource::new(None);
        let calendar = TradingCalendar::load(&failing, &config).await;
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert!(!calendar.is_degraded());
        assert!(!calendar.is_trading_day(date!(2023 - 01 - 04)));

        let working = FixedSource::new(Some(sessions()));
        let calendar = TradingCalendar::load(&working, &config).await;
        assert!(calendar.is_trading_day(date!(2023 - 01 - 04)));
    }

    #[tokio::test]
    async fn missing_source_and_snapshot_degrades() {
        let dir = tempfile::tempdir().expect("tempdir");
        let calendar = TradingCalendar::load(&FixedSource::new(None), &config(&dir)).await;

        assert!(calendar.is_degraded());
        assert_eq!(
            calendar
                .trading_days_between(date!(2023 - 01 - 01), date!(2023 - 01 - 10))
                .len(),
            7
        );
    }
}
