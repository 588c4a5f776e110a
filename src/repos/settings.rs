//! Key/value settings persistence for cross-session state

use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, params};

use crate::config::DEFAULT_HISTORY_LIMIT;
use crate::domain::history::normalize_history_limit;
use crate::storage::engine::StorageEngine;
use crate::utils::error::Result;

pub const KEY_HISTORY_LIMIT: &str = "historyLimit";
pub const KEY_MUTED_SITES: &str = "mutedSites";

#[derive(Clone)]
pub struct SettingsRepository {
    engine: Arc<StorageEngine>,
}

impl SettingsRepository {
    #[must_use]
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        Self { engine }
    }

    // ------------------------------------------------------------------
    // Transactional adapter flavor
    // ------------------------------------------------------------------

    pub fn get_tx(conn: &Connection, key: &str) -> Result<Option<String>> {
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn set_tx(conn: &Connection, key: &str, value: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_all_tx(conn: &Connection) -> Result<usize> {
        conn.execute("DELETE FROM settings", []).map_err(Into::into)
    }

    // ------------------------------------------------------------------
    // Standalone flavor
    // ------------------------------------------------------------------

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.engine.transaction(|tx| Self::get_tx(tx, key))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.engine.transaction(|tx| Self::set_tx(tx, key, value))
    }

    /// Drop every persisted setting (factory reset)
    pub fn reset(&self) -> Result<usize> {
        self.engine.transaction(|tx| Self::delete_all_tx(tx))
    }

    /// Current history retention, already normalized
    pub fn history_limit(&self) -> Result<u64> {
        let stored = self.get(KEY_HISTORY_LIMIT)?;
        Ok(match stored {
            Some(value) => value
                .parse::<f64>()
                .map_or(DEFAULT_HISTORY_LIMIT, normalize_history_limit),
            None => DEFAULT_HISTORY_LIMIT,
        })
    }

    pub fn set_history_limit(&self, limit: u64) -> Result<()> {
        self.set(KEY_HISTORY_LIMIT, &limit.to_string())
    }

    /// Site identifiers whose notifications are muted; parsed defensively
    pub fn muted_sites(&self) -> Result<Vec<String>> {
        let stored = self.get(KEY_MUTED_SITES)?;
        Ok(match stored {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("Corrupt {KEY_MUTED_SITES} setting: {e}. Substituting empty list.");
                Vec::new()
            }),
            None => Vec::new(),
        })
    }

    pub fn set_muted_sites(&self, identifiers: &[String]) -> Result<()> {
        self.set(KEY_MUTED_SITES, &serde_json::to_string(identifiers)?)
    }
}
