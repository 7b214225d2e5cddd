//! Durable key/value cache for artifacts that are not time-series rows.
//!
//! Values are stored as JSON text with full entry metadata. Reads only return
//! entries that are `VALID` and not past `expires_at`; invalidation flips the
//! status and keeps the row for auditing.

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ::duckdb::ToSql;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::duckdb::DuckDbConnectionManager;
use crate::WarehouseError;

const HOT_KEY_LIMIT: usize = 10;

/// Lifecycle status of a cache row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryStatus {
    Valid,
    Invalid,
}

impl EntryStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::Invalid => "INVALID",
        }
    }

    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("VALID") {
            Self::Valid
        } else {
            Self::Invalid
        }
    }
}

impl Display for EntryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored cache row with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub expires_at_ms: Option<i64>,
    pub access_count: u64,
    pub last_accessed_at_ms: Option<i64>,
    pub size_bytes: u64,
    pub status: EntryStatus,
}

impl CacheEntry {
    /// True when the entry has an expiry that lies before `now_ms`.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|expires_at| expires_at < now_ms)
    }
}

/// Frequently read key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotKey {
    pub key: String,
    pub access_count: u64,
}

/// Operational snapshot of the cache. Never consulted for correctness.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub valid_entries: usize,
    pub invalid_entries: usize,
    pub expired_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub expiration_ratio: f64,
    pub hot_keys: Vec<HotKey>,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Generic TTL cache backed by the `cache_entries` table.
#[derive(Clone)]
pub struct BlobCache {
    manager: DuckDbConnectionManager,
    counters: Arc<Counters>,
}

impl BlobCache {
    pub fn new(manager: DuckDbConnectionManager) -> Self {
        Self {
            manager,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Serialize and store `value` under `key`.
    ///
    /// `ttl = None` stores an entry that never expires. Overwriting an existing
    /// key keeps its `created_at` and access history and re-validates it.
    pub fn set<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), WarehouseError>
    where
        T: Serialize + ?Sized,
    {
        if key.trim().is_empty() {
            return Err(WarehouseError::Rejected(String::from(
                "cache key must not be empty",
            )));
        }

        let body = serde_json::to_string(value)?;
        let now = now_ms();
        let expires_at = ttl.map(|ttl| now.saturating_add(duration_ms(ttl)));
        let size = i64::try_from(body.len()).unwrap_or(i64::MAX);

        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 6] = [&key, &body, &now, &now, &expires_at, &size];
        connection.execute(
            "INSERT INTO cache_entries \
             (key, value, created_at_ms, updated_at_ms, expires_at_ms, access_count, \
              last_accessed_at_ms, size_bytes, status) \
             VALUES (?, ?, ?, ?, ?, 0, NULL, ?, 'VALID') \
             ON CONFLICT (key) DO UPDATE SET \
               value = excluded.value, \
               updated_at_ms = excluded.updated_at_ms, \
               expires_at_ms = excluded.expires_at_ms, \
               size_bytes = excluded.size_bytes, \
               status = 'VALID'",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Fetch and deserialize the value for `key`.
    ///
    /// Returns `None` (and records a miss) when the key is absent, invalidated,
    /// or expired. Hits bump `access_count` and `last_accessed_at`.
    pub fn get<T>(&self, key: &str) -> Result<Option<T>, WarehouseError>
    where
        T: DeserializeOwned,
    {
        self.lookup(key, true)
    }

    /// Like [`BlobCache::get`] but leaves expiry to the caller, for keys whose
    /// lifetime is tracked elsewhere. Invalidated entries still miss.
    pub fn get_ignoring_ttl<T>(&self, key: &str) -> Result<Option<T>, WarehouseError>
    where
        T: DeserializeOwned,
    {
        self.lookup(key, false)
    }

    fn lookup<T>(&self, key: &str, check_expiry: bool) -> Result<Option<T>, WarehouseError>
    where
        T: DeserializeOwned,
    {
        let now = now_ms();
        let Some(entry) = self.entry(key)? else {
            self.record_miss();
            return Ok(None);
        };

        if entry.status != EntryStatus::Valid || (check_expiry && entry.is_expired_at(now)) {
            self.record_miss();
            return Ok(None);
        }

        let value = serde_json::from_str(&entry.value)?;

        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 2] = [&now, &key];
        connection.execute(
            "UPDATE cache_entries \
             SET access_count = access_count + 1, last_accessed_at_ms = ? \
             WHERE key = ?",
            params.as_slice(),
        )?;
        self.counters.hits.fetch_add(1, Ordering::Relaxed);

        Ok(Some(value))
    }

    /// Raw entry inspection, ignoring status and expiry. Does not count as an access.
    pub fn entry(&self, key: &str) -> Result<Option<CacheEntry>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(
            "SELECT key, value, created_at_ms, updated_at_ms, expires_at_ms, access_count, \
                    last_accessed_at_ms, size_bytes, status \
             FROM cache_entries WHERE key = ?",
        )?;
        let mut rows = statement.query([key])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let access_count: i64 = row.get(5)?;
        let size_bytes: i64 = row.get(7)?;
        let status: String = row.get(8)?;
        Ok(Some(CacheEntry {
            key: row.get(0)?,
            value: row.get(1)?,
            created_at_ms: row.get(2)?,
            updated_at_ms: row.get(3)?,
            expires_at_ms: row.get(4)?,
            access_count: u64::try_from(access_count).unwrap_or_default(),
            last_accessed_at_ms: row.get(6)?,
            size_bytes: u64::try_from(size_bytes).unwrap_or_default(),
            status: EntryStatus::parse(&status),
        }))
    }

    /// Flip `key` to `INVALID` without deleting it. Returns whether a row changed.
    pub fn invalidate(&self, key: &str) -> Result<bool, WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 2] = [&now_ms(), &key];
        let changed = connection.execute(
            "UPDATE cache_entries SET status = 'INVALID', updated_at_ms = ? WHERE key = ?",
            params.as_slice(),
        )?;
        Ok(changed > 0)
    }

    /// Remove `key` entirely. Returns whether a row was deleted.
    pub fn delete(&self, key: &str) -> Result<bool, WarehouseError> {
        let connection = self.manager.acquire()?;
        let deleted = connection.execute("DELETE FROM cache_entries WHERE key = ?", [key])?;
        Ok(deleted > 0)
    }

    /// Empty the store and reset hit/miss counters. Returns the number of rows removed.
    pub fn clear(&self) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let deleted = connection.execute("DELETE FROM cache_entries", [])?;
        self.counters.hits.store(0, Ordering::Relaxed);
        self.counters.misses.store(0, Ordering::Relaxed);
        Ok(deleted)
    }

    pub fn stats(&self) -> Result<CacheStats, WarehouseError> {
        let now = now_ms();
        let connection = self.manager.acquire()?;

        let (total, size, valid, invalid, expired): (i64, Option<i64>, i64, i64, i64) = connection
            .query_row(
                "SELECT COUNT(*), SUM(size_bytes), \
                        COUNT(*) FILTER (WHERE status = 'VALID'), \
                        COUNT(*) FILTER (WHERE status <> 'VALID'), \
                        COUNT(*) FILTER (WHERE expires_at_ms IS NOT NULL AND expires_at_ms < ?) \
                 FROM cache_entries",
                [now],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )?;

        let mut statement = connection.prepare(
            "SELECT key, access_count FROM cache_entries \
             WHERE access_count > 0 ORDER BY access_count DESC, key ASC LIMIT ?",
        )?;
        let hot_keys = statement
            .query_map([HOT_KEY_LIMIT as i64], |row| {
                let access_count: i64 = row.get(1)?;
                Ok(HotKey {
                    key: row.get(0)?,
                    access_count: u64::try_from(access_count).unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let total_entries = usize::try_from(total).unwrap_or_default();

        Ok(CacheStats {
            total_entries,
            total_size_bytes: u64::try_from(size.unwrap_or_default()).unwrap_or_default(),
            valid_entries: usize::try_from(valid).unwrap_or_default(),
            invalid_entries: usize::try_from(invalid).unwrap_or_default(),
            expired_entries: usize::try_from(expired).unwrap_or_default(),
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            expiration_ratio: if total_entries == 0 {
                0.0
            } else {
                expired as f64 / total_entries as f64
            },
            hot_keys,
        })
    }

    fn record_miss(&self) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
    }
}

fn now_ms() -> i64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    duration_ms(elapsed)
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
