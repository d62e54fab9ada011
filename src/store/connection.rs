//! Store handle and SQLite connection management
//!
//! A single connection behind a mutex serializes all writes. Readers take
//! the same lock for the duration of one statement, so a read never
//! observes a half-written record and never waits longer than the commit
//! of a single record.

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::migrations::run_migrations;
use crate::error::{ChronicleError, Result};

/// Durable record store wrapping SQLite
pub struct Store {
    db_path: String,
    conn: Arc<Mutex<Connection>>,
    write_lock_timeout: Duration,
}

impl Store {
    /// Open or create a store at `db_path` (`":memory:"` for tests)
    pub fn open(db_path: &str, write_lock_timeout: Duration) -> Result<Self> {
        let conn = Self::create_connection(db_path)?;
        run_migrations(&conn)?;

        Ok(Self {
            db_path: db_path.to_string(),
            conn: Arc::new(Mutex::new(conn)),
            write_lock_timeout,
        })
    }

    /// Open an in-memory store with default lock timeout
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:", Duration::from_secs(5))
    }

    fn create_connection(db_path: &str) -> Result<Connection> {
        let conn = if db_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(db_path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            Connection::open_with_flags(db_path, flags)?
        };

        // WAL keeps readers off the writer's back; NORMAL sync is durable
        // enough under WAL for a single local store.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=5000;
            PRAGMA cache_size=-32000;
            PRAGMA temp_store=MEMORY;
            PRAGMA foreign_keys=ON;
            "#,
        )?;

        Ok(conn)
    }

    /// Execute a read against the connection
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Execute a write inside a transaction
    ///
    /// At most one write is in flight at a time; contention past the
    /// configured timeout surfaces as `StoreBusy` rather than interleaved
    /// partial writes.
    pub fn with_write<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .try_lock_for(self.write_lock_timeout)
            .ok_or(ChronicleError::StoreBusy)?;
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Checkpoint the WAL file
    pub fn checkpoint(&self) -> Result<()> {
        if self.db_path != ":memory:" {
            let conn = self.conn.lock();
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        }
        Ok(())
    }

    /// Database size in bytes
    pub fn db_size(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let size: i64 = conn.query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get(0),
        )?;
        Ok(size)
    }

    /// Store file path
    pub fn db_path(&self) -> &str {
        &self.db_path
    }
}

impl Clone for Store {
    fn clone(&self) -> Self {
        Self {
            db_path: self.db_path.clone(),
            conn: self.conn.clone(),
            write_lock_timeout: self.write_lock_timeout,
        }
    }
}
