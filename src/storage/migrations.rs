//! Linear schema migrations
//!
//! Each migration records its version in `schema_migrations`; only pending
//! versions run, each inside its own transaction. A failure is fatal and
//! aborts startup.

use chrono::Utc;
use rusqlite::params;

use crate::storage::engine::StorageEngine;
use crate::utils::error::{Result, WatcherError};

struct Migration {
    version: i64,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: "
            CREATE TABLE IF NOT EXISTS sites (
                identifier TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                monitoring INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS monitors (
                id TEXT PRIMARY KEY,
                site_identifier TEXT NOT NULL REFERENCES sites(identifier) ON DELETE CASCADE,
                type TEXT NOT NULL,
                monitoring INTEGER NOT NULL DEFAULT 1,
                status TEXT NOT NULL DEFAULT 'pending',
                check_interval INTEGER NOT NULL,
                timeout INTEGER NOT NULL,
                retry_attempts INTEGER NOT NULL DEFAULT 0,
                response_time INTEGER,
                last_checked INTEGER,
                active_operations TEXT NOT NULL DEFAULT '[]',
                probe TEXT NOT NULL,
                position INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS history (
                monitor_id TEXT NOT NULL REFERENCES monitors(id) ON DELETE CASCADE,
                timestamp INTEGER NOT NULL,
                status TEXT NOT NULL,
                response_time INTEGER NOT NULL DEFAULT 0,
                details TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_monitors_site ON monitors(site_identifier);
        ",
    },
    Migration {
        version: 2,
        sql: "
            CREATE INDEX IF NOT EXISTS idx_history_monitor_ts
                ON history(monitor_id, timestamp DESC);
        ",
    },
];

/// Version the schema reaches once all migrations have applied
pub const SCHEMA_VERSION: i64 = 2;

/// Apply all pending migrations in order
pub fn apply_migrations(engine: &StorageEngine) -> Result<()> {
    engine.exec(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
    )?;

    for migration in MIGRATIONS {
        let already_applied: Option<i64> = engine.get(
            "SELECT version FROM schema_migrations WHERE version = ?1",
            params![migration.version],
            |row| row.get(0),
        )?;
        if already_applied.is_some() {
            continue;
        }

        tracing::info!("Applying schema migration v{}", migration.version);
        engine
            .transaction(|tx| {
                tx.execute_batch(migration.sql)?;
                tx.execute(
                    "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                    params![migration.version, Utc::now().timestamp_millis()],
                )?;
                Ok(())
            })
            .map_err(|e| WatcherError::Migration {
                version: migration.version,
                message: e.to_string(),
            })?;
    }

    Ok(())
}

/// Highest migration version currently recorded in the database
pub fn current_version(engine: &StorageEngine) -> Result<i64> {
    // MAX() yields a single row whose value is NULL on an empty table
    let version: Option<Option<i64>> = engine.get(
        "SELECT MAX(version) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version.flatten().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_apply_cleanly() {
        let engine = StorageEngine::open_in_memory().unwrap();
        apply_migrations(&engine).unwrap();
        assert_eq!(current_version(&engine).unwrap(), SCHEMA_VERSION);

        // All tables exist
        for table in ["sites", "monitors", "history", "settings"] {
            let found: Option<String> = engine
                .get(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    params![table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(found.as_deref(), Some(table), "missing table {table}");
        }
    }

    #[test]
    fn test_migrations_are_idempotent_on_retry() {
        let engine = StorageEngine::open_in_memory().unwrap();
        apply_migrations(&engine).unwrap();
        apply_migrations(&engine).unwrap();

        let applied: Vec<i64> = engine
            .all(
                "SELECT version FROM schema_migrations ORDER BY version",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(applied, vec![1, 2]);
    }

    #[test]
    fn test_current_version_on_fresh_database() {
        let engine = StorageEngine::open_in_memory().unwrap();
        engine
            .exec(
                "CREATE TABLE schema_migrations (version INTEGER PRIMARY KEY, applied_at INTEGER NOT NULL)",
            )
            .unwrap();
        assert_eq!(current_version(&engine).unwrap(), 0);
    }
}
