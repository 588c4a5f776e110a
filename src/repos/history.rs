//! Append-only history access with bounded retention

use std::str::FromStr;
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, params};

use crate::domain::history::{HistoryEntry, HistoryStatus};
use crate::repos::mapper;
use crate::storage::engine::StorageEngine;
use crate::utils::error::Result;

fn read_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, i64, String, i64, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn hydrate(raw: (String, i64, String, i64, String)) -> HistoryEntry {
    let (monitor_id, timestamp, status, response_time, details) = raw;
    let status = HistoryStatus::from_str(&status).unwrap_or_else(|_| {
        tracing::warn!("Unknown history status '{status}' for monitor {monitor_id}; coercing to down");
        HistoryStatus::Down
    });
    HistoryEntry {
        response_time: mapper::safe_u64(response_time, 0),
        monitor_id,
        timestamp,
        status,
        details,
    }
}

#[derive(Clone)]
pub struct HistoryRepository {
    engine: Arc<StorageEngine>,
}

impl HistoryRepository {
    #[must_use]
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        Self { engine }
    }

    // ------------------------------------------------------------------
    // Transactional adapter flavor
    // ------------------------------------------------------------------

    pub fn add_entry_tx(conn: &Connection, entry: &HistoryEntry) -> Result<()> {
        conn.execute(
            "INSERT INTO history (monitor_id, timestamp, status, response_time, details) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.monitor_id,
                entry.timestamp,
                entry.status.to_string(),
                entry.response_time as i64,
                entry.details,
            ],
        )?;
        Ok(())
    }

    pub fn count_tx(conn: &Connection, monitor_id: &str) -> Result<u64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM history WHERE monitor_id = ?1",
            params![monitor_id],
            |row| row.get(0),
        )?;
        Ok(mapper::safe_u64(count, 0))
    }

    /// Drop the oldest rows beyond `limit`, returning how many were removed.
    /// A limit of zero disables pruning.
    pub fn prune_tx(conn: &Connection, monitor_id: &str, limit: u64) -> Result<usize> {
        if limit == 0 {
            return Ok(0);
        }
        conn.execute(
            "DELETE FROM history WHERE monitor_id = ?1 AND rowid NOT IN ( \
                 SELECT rowid FROM history WHERE monitor_id = ?1 \
                 ORDER BY timestamp DESC, rowid DESC LIMIT ?2)",
            params![monitor_id, limit as i64],
        )
        .map_err(Into::into)
    }

    pub fn delete_by_monitor_tx(conn: &Connection, monitor_id: &str) -> Result<usize> {
        conn.execute(
            "DELETE FROM history WHERE monitor_id = ?1",
            params![monitor_id],
        )
        .map_err(Into::into)
    }

    pub fn delete_all_tx(conn: &Connection) -> Result<usize> {
        conn.execute("DELETE FROM history", []).map_err(Into::into)
    }

    pub fn latest_tx(conn: &Connection, monitor_id: &str) -> Result<Option<HistoryEntry>> {
        let raw = conn
            .query_row(
                "SELECT monitor_id, timestamp, status, response_time, details FROM history \
                 WHERE monitor_id = ?1 ORDER BY timestamp DESC, rowid DESC LIMIT 1",
                params![monitor_id],
                read_entry,
            )
            .optional()?;
        Ok(raw.map(hydrate))
    }

    // ------------------------------------------------------------------
    // Standalone flavor
    // ------------------------------------------------------------------

    pub fn add_entry(&self, entry: &HistoryEntry) -> Result<()> {
        self.engine.transaction(|tx| Self::add_entry_tx(tx, entry))
    }

    /// History for a monitor in ascending timestamp order; with a limit the
    /// most recent rows are returned, still ascending
    pub fn find_by_monitor(
        &self,
        monitor_id: &str,
        limit: Option<u64>,
    ) -> Result<Vec<HistoryEntry>> {
        let raw = match limit {
            Some(limit) => self.engine.all(
                "SELECT monitor_id, timestamp, status, response_time, details FROM ( \
                     SELECT rowid, monitor_id, timestamp, status, response_time, details \
                     FROM history WHERE monitor_id = ?1 \
                     ORDER BY timestamp DESC, rowid DESC LIMIT ?2) \
                 ORDER BY timestamp ASC, rowid ASC",
                params![monitor_id, limit as i64],
                read_entry,
            )?,
            None => self.engine.all(
                "SELECT monitor_id, timestamp, status, response_time, details FROM history \
                 WHERE monitor_id = ?1 ORDER BY timestamp ASC, rowid ASC",
                params![monitor_id],
                read_entry,
            )?,
        };
        Ok(raw.into_iter().map(hydrate).collect())
    }

    pub fn count(&self, monitor_id: &str) -> Result<u64> {
        self.engine.transaction(|tx| Self::count_tx(tx, monitor_id))
    }

    pub fn latest(&self, monitor_id: &str) -> Result<Option<HistoryEntry>> {
        self.engine.transaction(|tx| Self::latest_tx(tx, monitor_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::apply_migrations;

    fn engine_with_monitor() -> Arc<StorageEngine> {
        let engine = Arc::new(StorageEngine::open_in_memory().unwrap());
        apply_migrations(&engine).unwrap();
        engine
            .exec(
                "INSERT INTO sites (identifier, name, monitoring) VALUES ('s1', '', 1); \
                 INSERT INTO monitors (id, site_identifier, type, check_interval, timeout, probe) \
                     VALUES ('m1', 's1', 'ping', 60000, 5000, '{\"type\":\"ping\",\"host\":\"h\"}');",
            )
            .unwrap();
        engine
    }

    fn entry(timestamp: i64, status: HistoryStatus) -> HistoryEntry {
        HistoryEntry {
            monitor_id: "m1".into(),
            timestamp,
            status,
            response_time: 10,
            details: "test".into(),
        }
    }

    #[test]
    fn test_entries_round_trip_in_ascending_order() {
        let engine = engine_with_monitor();
        let repo = HistoryRepository::new(engine);

        repo.add_entry(&entry(300, HistoryStatus::Up)).unwrap();
        repo.add_entry(&entry(100, HistoryStatus::Down)).unwrap();
        repo.add_entry(&entry(200, HistoryStatus::Degraded)).unwrap();

        let all = repo.find_by_monitor("m1", None).unwrap();
        let timestamps: Vec<i64> = all.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![100, 200, 300]);
    }

    #[test]
    fn test_limited_fetch_returns_most_recent_ascending() {
        let engine = engine_with_monitor();
        let repo = HistoryRepository::new(engine);
        for ts in 1..=5 {
            repo.add_entry(&entry(ts, HistoryStatus::Up)).unwrap();
        }

        let limited = repo.find_by_monitor("m1", Some(2)).unwrap();
        let timestamps: Vec<i64> = limited.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![4, 5]);
    }

    #[test]
    fn test_prune_keeps_newest_rows() {
        let engine = engine_with_monitor();
        let repo = HistoryRepository::new(engine.clone());
        for ts in 1..=100 {
            repo.add_entry(&entry(ts, HistoryStatus::Up)).unwrap();
        }

        let removed = engine
            .transaction(|tx| HistoryRepository::prune_tx(tx, "m1", 50))
            .unwrap();
        assert_eq!(removed, 50);

        let remaining = repo.find_by_monitor("m1", None).unwrap();
        assert_eq!(remaining.len(), 50);
        assert_eq!(remaining.first().unwrap().timestamp, 51);
        assert_eq!(remaining.last().unwrap().timestamp, 100);
    }

    #[test]
    fn test_prune_zero_limit_is_disabled() {
        let engine = engine_with_monitor();
        let repo = HistoryRepository::new(engine.clone());
        for ts in 1..=10 {
            repo.add_entry(&entry(ts, HistoryStatus::Up)).unwrap();
        }

        let removed = engine
            .transaction(|tx| HistoryRepository::prune_tx(tx, "m1", 0))
            .unwrap();
        assert_eq!(removed, 0);
        assert_eq!(repo.count("m1").unwrap(), 10);
    }

    #[test]
    fn test_latest_entry() {
        let engine = engine_with_monitor();
        let repo = HistoryRepository::new(engine);
        assert!(repo.latest("m1").unwrap().is_none());

        repo.add_entry(&entry(100, HistoryStatus::Down)).unwrap();
        repo.add_entry(&entry(200, HistoryStatus::Up)).unwrap();

        let latest = repo.latest("m1").unwrap().unwrap();
        assert_eq!(latest.timestamp, 200);
        assert_eq!(latest.status, HistoryStatus::Up);
    }
}
