//! Embedded SQLite engine with synchronous transactional adapters
//!
//! All writes go through [`StorageEngine::transaction`]; the connection is
//! guarded by a mutex so there is exactly one writer. Guards are never held
//! across await points.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Params, Row, Transaction};

use crate::utils::error::{Result, WatcherError};

/// File name of the embedded database inside the data directory
pub const DATABASE_FILE: &str = "uptime-watcher.sqlite";

pub struct StorageEngine {
    conn: Mutex<Connection>,
    data_dir: Option<PathBuf>,
}

impl StorageEngine {
    /// Open (or create) the database inside an existing absolute data directory
    pub fn open(data_dir: &Path) -> Result<Self> {
        if !data_dir.is_absolute() {
            return Err(WatcherError::Configuration(format!(
                "data directory must be an absolute path, got: {}",
                data_dir.display()
            )));
        }
        if !data_dir.is_dir() {
            return Err(WatcherError::Configuration(format!(
                "data directory does not exist: {}",
                data_dir.display()
            )));
        }

        let db_path = data_dir.join(DATABASE_FILE);
        let conn = Connection::open(&db_path)?;
        Self::apply_pragmas(&conn)?;

        tracing::info!("Database opened at {}", db_path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            data_dir: Some(data_dir.to_path_buf()),
        })
    }

    /// Ephemeral in-memory database, used by tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self {
            conn: Mutex::new(conn),
            data_dir: None,
        })
    }

    fn apply_pragmas(conn: &Connection) -> Result<()> {
        // journal_mode returns the resulting mode as a row
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(())
    }

    #[must_use]
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Execute a single statement, returning the number of affected rows
    pub fn run<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute(sql, params).map_err(Into::into)
    }

    /// Fetch at most one row
    pub fn get<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.conn.lock();
        conn.query_row(sql, params, f).optional().map_err(Into::into)
    }

    /// Fetch all matching rows
    pub fn all<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, f)?;
        rows.collect::<rusqlite::Result<Vec<T>>>().map_err(Into::into)
    }

    /// Execute a batch of statements without parameters
    pub fn exec(&self, sql: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(sql).map_err(Into::into)
    }

    /// Run `f` inside a transaction; commit on `Ok`, roll back on `Err`
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("data_dir", &self.data_dir)
            .finish_non_exhaustive()
    }
}
