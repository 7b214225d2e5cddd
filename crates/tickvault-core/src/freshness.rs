//! Per-key staleness state machine for cached artifacts.
//!
//! Keys with no record are `Unknown`. `mark_updated` makes a key `Fresh` until
//! its TTL runs out; reads after that see it as `Expired` without any sweep.
//! Explicit `mark_expired` is remembered separately from natural expiry
//! because relaxed readers accept the latter but not the former.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::ValidationError;

/// Time source, injectable so tests can move time by hand.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;

    fn now_ms(&self) -> i64 {
        let nanos = self.now().unix_timestamp_nanos() / 1_000_000;
        i64::try_from(nanos).unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("manual clock lock is not poisoned");
        *now += by;
    }

    pub fn set(&self, to: OffsetDateTime) {
        *self.now.lock().expect("manual clock lock is not poisoned") = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().expect("manual clock lock is not poisoned")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessStatus {
    Fresh,
    Stale,
    Expired,
    Unknown,
}

impl FreshnessStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        }
    }
}

impl Display for FreshnessStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-selected strictness for [`FreshnessTracker::is_fresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessRequirement {
    /// Only `Fresh`.
    Strict,
    /// `Fresh`, `Stale` or `Unknown`.
    #[default]
    Normal,
    /// Anything except an explicit expiry.
    Relaxed,
}

impl FromStr for FreshnessRequirement {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "normal" | "default" => Ok(Self::Normal),
            "relaxed" => Ok(Self::Relaxed),
            _ => Err(ValidationError::InvalidRequirement {
                value: value.to_string(),
            }),
        }
    }
}

/// Snapshot of one key's freshness bookkeeping, with expiry already applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessRecord {
    pub key: String,
    pub status: FreshnessStatus,
    pub last_updated: Option<OffsetDateTime>,
    pub expires_at: Option<OffsetDateTime>,
    pub update_scheduled: bool,
    pub update_priority: i32,
}

#[derive(Debug, Clone)]
struct Entry {
    status: FreshnessStatus,
    last_updated: Option<OffsetDateTime>,
    expires_at: Option<OffsetDateTime>,
    update_scheduled: bool,
    update_priority: i32,
}

impl Entry {
    fn unknown() -> Self {
        Self {
            status: FreshnessStatus::Unknown,
            last_updated: None,
            expires_at: None,
            update_scheduled: false,
            update_priority: 0,
        }
    }

    /// Effective status at `now`, and whether an `Expired` result came from the TTL.
    fn evaluate(&self, now: OffsetDateTime) -> (FreshnessStatus, bool) {
        match self.status {
            FreshnessStatus::Fresh if self.expires_at.is_some_and(|expires| expires < now) => {
                (FreshnessStatus::Expired, true)
            }
            status => (status, false),
        }
    }
}

/// Thread-safe freshness state machine.
pub struct FreshnessTracker {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for FreshnessTracker {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl FreshnessTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn with_entries<R>(&self, apply: impl FnOnce(&mut HashMap<String, Entry>) -> R) -> R {
        let mut entries = self
            .entries
            .lock()
            .expect("freshness lock is not poisoned");
        apply(&mut entries)
    }

    /// Mark `key` fresh. `ttl = None` never expires. Clears any scheduled update.
    pub fn mark_updated(&self, key: &str, ttl: Option<Duration>) {
        let now = self.clock.now();
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    status: FreshnessStatus::Fresh,
                    last_updated: Some(now),
                    expires_at: ttl.map(|ttl| now + ttl),
                    update_scheduled: false,
                    update_priority: 0,
                },
            );
        });
        tracing::debug!(key, ?ttl, "marked fresh");
    }

    /// Soft invalidation: still usable under normal requirements.
    pub fn mark_stale(&self, key: &str) {
        self.set_status(key, FreshnessStatus::Stale);
    }

    /// Hard invalidation: rejected under every requirement.
    pub fn mark_expired(&self, key: &str) {
        self.set_status(key, FreshnessStatus::Expired);
    }

    fn set_status(&self, key: &str, status: FreshnessStatus) {
        self.with_entries(|entries| {
            entries
                .entry(key.to_string())
                .or_insert_with(Entry::unknown)
                .status = status;
        });
        tracing::debug!(key, %status, "freshness changed");
    }

    pub fn status(&self, key: &str) -> FreshnessStatus {
        let now = self.clock.now();
        self.with_entries(|entries| {
            entries
                .get(key)
                .map_or(FreshnessStatus::Unknown, |entry| entry.evaluate(now).0)
        })
    }

    pub fn is_fresh(&self, key: &str, requirement: FreshnessRequirement) -> bool {
        let now = self.clock.now();
        let (status, natural) = self.with_entries(|entries| {
            entries
                .get(key)
                .map_or((FreshnessStatus::Unknown, false), |entry| entry.evaluate(now))
        });

        match status {
            FreshnessStatus::Fresh => true,
            FreshnessStatus::Stale | FreshnessStatus::Unknown => {
                requirement != FreshnessRequirement::Strict
            }
            FreshnessStatus::Expired => natural && requirement == FreshnessRequirement::Relaxed,
        }
    }

    pub fn record(&self, key: &str) -> Option<FreshnessRecord> {
        let now = self.clock.now();
        self.with_entries(|entries| {
            entries.get(key).map(|entry| FreshnessRecord {
                key: key.to_string(),
                status: entry.evaluate(now).0,
                last_updated: entry.last_updated,
                expires_at: entry.expires_at,
                update_scheduled: entry.update_scheduled,
                update_priority: entry.update_priority,
            })
        })
    }

    /// Queue `key` for a proactive refresh. Bookkeeping only; nothing is fetched.
    ///
    /// Re-scheduling keeps the higher of the two priorities.
    pub fn schedule_update(&self, key: &str, priority: i32) {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(Entry::unknown);
            entry.update_priority = if entry.update_scheduled {
                entry.update_priority.max(priority)
            } else {
                priority
            };
            entry.update_scheduled = true;
        });
    }

    /// Returns whether an update was scheduled.
    pub fn cancel_update(&self, key: &str) -> bool {
        self.with_entries(|entries| match entries.get_mut(key) {
            Some(entry) if entry.update_scheduled => {
                entry.update_scheduled = false;
                entry.update_priority = 0;
                true
            }
            _ => false,
        })
    }

    /// Scheduled keys, highest priority first.
    pub fn scheduled_updates(&self) -> Vec<(String, i32)> {
        let mut scheduled = self.with_entries(|entries| {
            entries
                .iter()
                .filter(|(_, entry)| entry.update_scheduled)
                .map(|(key, entry)| (key.clone(), entry.update_priority))
                .collect::<Vec<_>>()
        });
        scheduled.sort_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(&right.0)));
        scheduled
    }

    /// Take every scheduled key off the queue, highest priority first.
    pub fn drain_scheduled(&self) -> Vec<String> {
        let drained = self.scheduled_updates();
        self.with_entries(|entries| {
            for (key, _) in &drained {
                if let Some(entry) = entries.get_mut(key) {
                    entry.update_scheduled = false;
                    entry.update_priority = 0;
                }
            }
        });
        drained.into_iter().map(|(key, _)| key).collect()
    }

    /// Drop all bookkeeping for `key`; it reads as `Unknown` afterwards.
    pub fn forget(&self, key: &str) -> bool {
        self.with_entries(|entries| entries.remove(key).is_some())
    }

    pub fn clear(&self) {
        self.with_entries(|entries| entries.clear());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn tracker() -> (FreshnessTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(datetime!(2024-03-01 09:30 UTC)));
        (FreshnessTracker::new(clock.clone()), clock)
    }

    fn acceptance(tracker: &FreshnessTracker, key: &str) -> [bool; 3] {
        [
            tracker.is_fresh(key, FreshnessRequirement::Strict),
            tracker.is_fresh(key, FreshnessRequirement::Normal),
            tracker.is_fresh(key, FreshnessRequirement::Relaxed),
        ]
    }

    #[test]
    fn truth_table_matches_each_state() {
        let (tracker, clock) = tracker();

        assert_eq!(acceptance(&tracker, "unknown"), [false, true, true]);

        tracker.mark_updated("fresh", None);
        assert_eq!(acceptance(&tracker, "fresh"), [true, true, true]);

        tracker.mark_updated("stale", None);
        tracker.mark_stale("stale");
        assert_eq!(acceptance(&tracker, "stale"), [false, true, true]);

        tracker.mark_updated("natural", Some(Duration::from_secs(1)));
        clock.advance(Duration::from_secs(2));
        assert_eq!(tracker.status("natural"), FreshnessStatus::Expired);
        assert_eq!(acceptance(&tracker, "natural"), [false, false, true]);

        tracker.mark_updated("explicit", None);
        tracker.mark_expired("explicit");
        assert_eq!(acceptance(&tracker, "explicit"), [false, false, false]);
    }

    #[test]
    fn mark_updated_clears_scheduled_update() {
        let (tracker, _) = tracker();
        tracker.schedule_update("symbols:all", 5);
        assert_eq!(
            tracker.record("symbols:all").map(|record| record.update_scheduled),
            Some(true)
        );

        tracker.mark_updated("symbols:all", Some(Duration::from_secs(60)));
        let record = tracker.record("symbols:all").expect("record");
        assert_eq!(record.status, FreshnessStatus::Fresh);
        assert!(!record.update_scheduled);
        assert!(tracker.scheduled_updates().is_empty());
    }

    #[test]
    fn drain_orders_by_priority_then_key() {
        let (tracker, _) = tracker();
        tracker.schedule_update("b", 1);
        tracker.schedule_update("a", 1);
        tracker.schedule_update("c", 9);
        tracker.schedule_update("d", 3);
        assert!(tracker.cancel_update("d"));
        assert!(!tracker.cancel_update("d"));

        assert_eq!(tracker.drain_scheduled(), vec!["c", "a", "b"]);
        assert!(tracker.drain_scheduled().is_empty());
    }

    #[test]
    fn rescheduling_keeps_higher_priority() {
        let (tracker, _) = tracker();
        tracker.schedule_update("key", 7);
        tracker.schedule_update("key", 2);
        assert_eq!(tracker.scheduled_updates(), vec![(String::from("key"), 7)]);
    }

    #[test]
    fn forget_returns_key_to_unknown() {
        let (tracker, _) = tracker();
        tracker.mark_expired("key");
        assert!(tracker.forget("key"));
        assert_eq!(tracker.status("key"), FreshnessStatus::Unknown);
    }

    #[test]
    fn requirement_parses_cli_spelling() {
        assert_eq!("STRICT".parse::<FreshnessRequirement>(), Ok(FreshnessRequirement::Strict));
        assert_eq!("default".parse::<FreshnessRequirement>(), Ok(FreshnessRequirement::Normal));
        assert!("eventually".parse::<FreshnessRequirement>().is_err());
    }
}
