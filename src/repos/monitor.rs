//! Monitor row access
//!
//! `*_tx` methods run inside a caller-provided transaction (any
//! `&Connection`, which a `Transaction` derefs to); the inherent methods
//! open their own.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::domain::monitor::{Monitor, MonitorStatus};
use crate::repos::mapper;
use crate::storage::engine::StorageEngine;
use crate::utils::error::{Result, WatcherError};

/// Raw column projection used by every monitor query
const MONITOR_COLUMNS: &str = "id, site_identifier, monitoring, status, check_interval, timeout, \
     retry_attempts, response_time, last_checked, active_operations, probe";

struct MonitorRow {
    id: String,
    monitoring: i64,
    status: String,
    check_interval: i64,
    timeout: i64,
    retry_attempts: i64,
    response_time: Option<i64>,
    last_checked: Option<i64>,
    active_operations: String,
    probe: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MonitorRow> {
    Ok(MonitorRow {
        id: row.get(0)?,
        monitoring: row.get(2)?,
        status: row.get(3)?,
        check_interval: row.get(4)?,
        timeout: row.get(5)?,
        retry_attempts: row.get(6)?,
        response_time: row.get(7)?,
        last_checked: row.get(8)?,
        active_operations: row.get(9)?,
        probe: row.get(10)?,
    })
}

fn hydrate(raw: MonitorRow) -> Option<Monitor> {
    let probe = mapper::parse_probe(&raw.probe, &raw.id)?;
    Some(Monitor {
        status: mapper::parse_status(&raw.status, &raw.id),
        monitoring: raw.monitoring != 0,
        check_interval: mapper::safe_u64(raw.check_interval, 0),
        timeout: mapper::safe_u64(raw.timeout, 0),
        retry_attempts: mapper::safe_u64(raw.retry_attempts, 0) as u32,
        response_time: raw.response_time.and_then(|v| u64::try_from(v).ok()),
        last_checked: raw
            .last_checked
            .and_then(DateTime::<Utc>::from_timestamp_millis),
        active_operations: mapper::parse_active_operations(&raw.active_operations, &raw.id),
        probe,
        id: raw.id,
    })
}

#[derive(Clone)]
pub struct MonitorRepository {
    engine: Arc<StorageEngine>,
}

impl MonitorRepository {
    #[must_use]
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        Self { engine }
    }

    // ------------------------------------------------------------------
    // Transactional adapter flavor
    // ------------------------------------------------------------------

    pub fn find_by_site_tx(conn: &Connection, site_identifier: &str) -> Result<Vec<Monitor>> {
        let sql = format!(
            "SELECT {MONITOR_COLUMNS} FROM monitors WHERE site_identifier = ?1 \
             ORDER BY position, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![site_identifier], read_row)?;
        let raw: Vec<MonitorRow> = rows.collect::<rusqlite::Result<_>>()?;
        Ok(raw.into_iter().filter_map(hydrate).collect())
    }

    pub fn find_by_id_tx(conn: &Connection, monitor_id: &str) -> Result<Option<Monitor>> {
        let sql = format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![monitor_id], read_row)?;
        match rows.next() {
            Some(raw) => Ok(hydrate(raw?)),
            None => Ok(None),
        }
    }

    /// Insert or update a monitor, assigning an id when missing.
    /// Returns the stored id.
    pub fn upsert_tx(
        conn: &Connection,
        site_identifier: &str,
        monitor: &Monitor,
        position: i64,
    ) -> Result<String> {
        let id = if monitor.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            monitor.id.clone()
        };

        let probe_json = serde_json::to_string(&monitor.probe)?;
        let operations_json = serde_json::to_string(&monitor.active_operations)?;

        conn.execute(
            "INSERT INTO monitors (id, site_identifier, type, monitoring, status, \
                 check_interval, timeout, retry_attempts, response_time, last_checked, \
                 active_operations, probe, position) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13) \
             ON CONFLICT(id) DO UPDATE SET \
                 site_identifier = excluded.site_identifier, \
                 type = excluded.type, \
                 monitoring = excluded.monitoring, \
                 status = excluded.status, \
                 check_interval = excluded.check_interval, \
                 timeout = excluded.timeout, \
                 retry_attempts = excluded.retry_attempts, \
                 response_time = excluded.response_time, \
                 last_checked = excluded.last_checked, \
                 active_operations = excluded.active_operations, \
                 probe = excluded.probe, \
                 position = excluded.position",
            params![
                id,
                site_identifier,
                monitor.monitor_type().to_string(),
                i64::from(monitor.monitoring),
                monitor.status.to_string(),
                monitor.check_interval as i64,
                monitor.timeout as i64,
                i64::from(monitor.retry_attempts),
                monitor.response_time.map(|v| v as i64),
                monitor.last_checked.map(|ts| ts.timestamp_millis()),
                operations_json,
                probe_json,
                position,
            ],
        )?;
        Ok(id)
    }

    pub fn delete_tx(conn: &Connection, monitor_id: &str) -> Result<bool> {
        let affected = conn.execute("DELETE FROM monitors WHERE id = ?1", params![monitor_id])?;
        Ok(affected > 0)
    }

    pub fn delete_by_site_tx(conn: &Connection, site_identifier: &str) -> Result<usize> {
        conn.execute(
            "DELETE FROM monitors WHERE site_identifier = ?1",
            params![site_identifier],
        )
        .map_err(Into::into)
    }

    pub fn delete_all_tx(conn: &Connection) -> Result<usize> {
        conn.execute("DELETE FROM monitors", []).map_err(Into::into)
    }

    /// Persist the outcome of a completed check and release its operation
    pub fn apply_check_result_tx(
        conn: &Connection,
        monitor_id: &str,
        status: MonitorStatus,
        response_time: Option<u64>,
        checked_at_ms: i64,
        operation_id: &str,
    ) -> Result<()> {
        let current: Option<String> = conn
            .query_row(
                "SELECT active_operations FROM monitors WHERE id = ?1",
                params![monitor_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Err(WatcherError::not_found("monitor", monitor_id));
        };
        let mut operations = mapper::parse_active_operations(&current, monitor_id);
        operations.retain(|op| op != operation_id);
        let operations_json = serde_json::to_string(&operations)?;

        conn.execute(
            "UPDATE monitors SET status = ?2, response_time = ?3, last_checked = ?4, \
                 active_operations = ?5 WHERE id = ?1",
            params![
                monitor_id,
                status.to_string(),
                response_time.map(|v| v as i64),
                checked_at_ms,
                operations_json,
            ],
        )?;
        Ok(())
    }

    /// Record a newly begun operation in `active_operations`
    pub fn add_active_operation_tx(
        conn: &Connection,
        monitor_id: &str,
        operation_id: &str,
    ) -> Result<()> {
        let current: String = conn.query_row(
            "SELECT active_operations FROM monitors WHERE id = ?1",
            params![monitor_id],
            |row| row.get(0),
        )?;
        let mut operations = mapper::parse_active_operations(&current, monitor_id);
        if !operations.iter().any(|op| op == operation_id) {
            operations.push(operation_id.to_string());
        }
        conn.execute(
            "UPDATE monitors SET active_operations = ?2 WHERE id = ?1",
            params![monitor_id, serde_json::to_string(&operations)?],
        )?;
        Ok(())
    }

    /// Remove an operation without touching the check columns (abandoned runs)
    pub fn remove_active_operation_tx(
        conn: &Connection,
        monitor_id: &str,
        operation_id: &str,
    ) -> Result<()> {
        let current: String = conn.query_row(
            "SELECT active_operations FROM monitors WHERE id = ?1",
            params![monitor_id],
            |row| row.get(0),
        )?;
        let mut operations = mapper::parse_active_operations(&current, monitor_id);
        operations.retain(|op| op != operation_id);
        conn.execute(
            "UPDATE monitors SET active_operations = ?2 WHERE id = ?1",
            params![monitor_id, serde_json::to_string(&operations)?],
        )?;
        Ok(())
    }

    /// Startup sanitization: no operation survives a restart
    pub fn clear_all_active_operations_tx(conn: &Connection) -> Result<usize> {
        conn.execute(
            "UPDATE monitors SET active_operations = '[]' WHERE active_operations != '[]'",
            [],
        )
        .map_err(Into::into)
    }

    /// Flip the monitoring flag, reconciling the status with it
    pub fn set_monitoring_tx(conn: &Connection, monitor_id: &str, monitoring: bool) -> Result<bool> {
        let status_sql = if monitoring {
            // Leaving pause: the next completed check decides the real status
            "UPDATE monitors SET monitoring = 1, \
                 status = CASE WHEN status = 'paused' THEN 'pending' ELSE status END \
             WHERE id = ?1"
        } else {
            "UPDATE monitors SET monitoring = 0, status = 'paused' WHERE id = ?1"
        };
        let affected = conn.execute(status_sql, params![monitor_id])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Standalone flavor
    // ------------------------------------------------------------------

    pub fn find_by_id(&self, monitor_id: &str) -> Result<Option<Monitor>> {
        self.engine
            .transaction(|tx| Self::find_by_id_tx(tx, monitor_id))
    }

    pub fn find_by_site(&self, site_identifier: &str) -> Result<Vec<Monitor>> {
        self.engine
            .transaction(|tx| Self::find_by_site_tx(tx, site_identifier))
    }

    pub fn delete(&self, monitor_id: &str) -> Result<bool> {
        self.engine.transaction(|tx| Self::delete_tx(tx, monitor_id))
    }

    pub fn clear_all_active_operations(&self) -> Result<usize> {
        self.engine
            .transaction(|tx| Self::clear_all_active_operations_tx(tx))
    }
}
