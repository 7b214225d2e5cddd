//! `DuckDB` connection pool management.
//!
//! All pooled connections are cloned from a single root [`Connection`], so
//! every handle shares one database instance. Opening the same file twice in
//! one process would otherwise fight over the file lock.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ::duckdb::Connection;

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    /// On-disk database file.
    File(PathBuf),
    /// Private in-memory database, dropped with the pool.
    InMemory,
}

struct PoolInner {
    location: DbLocation,
    max_pool_size: usize,
    root: Mutex<Connection>,
    idle: Mutex<Vec<Connection>>,
}

/// A connection pool manager for `DuckDB` connections.
#[derive(Clone)]
pub struct DuckDbConnectionManager {
    inner: Arc<PoolInner>,
}

impl DuckDbConnectionManager {
    /// Open the database and create a pool around it.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or configured.
    pub fn open(location: DbLocation, max_pool_size: usize) -> Result<Self, ::duckdb::Error> {
        let root = match &location {
            DbLocation::File(path) => Connection::open(path)?,
            DbLocation::InMemory => Connection::open_in_memory()?,
        };
        configure_connection(&root)?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                location,
                max_pool_size: max_pool_size.max(1),
                root: Mutex::new(root),
                idle: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Acquire a connection from the pool.
    ///
    /// # Errors
    /// Returns an error if a fresh connection cannot be cloned from the root.
    ///
    /// # Panics
    /// Panics if a pool mutex is poisoned.
    pub fn acquire(&self) -> Result<PooledConnection, ::duckdb::Error> {
        let idle = self
            .inner
            .idle
            .lock()
            .expect("duckdb connection pool mutex poisoned")
            .pop();

        let connection = match idle {
            Some(connection) => connection,
            None => {
                let root = self
                    .inner
                    .root
                    .lock()
                    .expect("duckdb root connection mutex poisoned");
                let connection = root.try_clone()?;
                configure_connection(&connection)?;
                connection
            }
        };

        Ok(PooledConnection {
            pool: Arc::clone(&self.inner),
            connection: Some(connection),
        })
    }

    /// Path to the database file, `None` for in-memory databases.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        match &self.inner.location {
            DbLocation::File(path) => Some(path.as_path()),
            DbLocation::InMemory => None,
        }
    }

    /// Number of idle connections currently parked in the pool.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.inner
            .idle
            .lock()
            .expect("duckdb connection pool mutex poisoned")
            .len()
    }
}

/// A pooled connection that returns to the pool when dropped.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("pooled connection unexpectedly missing")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("pooled connection unexpectedly missing")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let mut idle = self
            .pool
            .idle
            .lock()
            .expect("duckdb connection pool mutex poisoned");
        if idle.len() < self.pool.max_pool_size {
            idle.push(connection);
        }
    }
}

fn configure_connection(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch("PRAGMA disable_progress_bar;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connections_share_one_database() {
        let manager = DuckDbConnectionManager::open(DbLocation::InMemory, 2).expect("open");

        let first = manager.acquire().expect("first");
        first
            .execute_batch("CREATE TABLE shared (id INTEGER); INSERT INTO shared VALUES (7);")
            .expect("create");

        let second = manager.acquire().expect("second");
        let value: i32 = second
            .query_row("SELECT id FROM shared", [], |row| row.get(0))
            .expect("read from clone");
        assert_eq!(value, 7);
    }

    #[test]
    fn dropped_connections_are_reused_up_to_capacity() {
        let manager = DuckDbConnectionManager::open(DbLocation::InMemory, 1).expect("open");

        let a = manager.acquire().expect("a");
        let b = manager.acquire().expect("b");
        drop(a);
        drop(b);

        assert_eq!(manager.idle_count(), 1);
        assert!(manager.db_path().is_none());
    }
}
