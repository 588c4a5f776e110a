//! Site row access and hydration

use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, params};

use crate::domain::site::{Site, sanitize_sites, validate_identifier};
use crate::repos::monitor::MonitorRepository;
use crate::storage::engine::StorageEngine;
use crate::utils::error::Result;

#[derive(Clone)]
pub struct SiteRepository {
    engine: Arc<StorageEngine>,
}

impl SiteRepository {
    #[must_use]
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        Self { engine }
    }

    // ------------------------------------------------------------------
    // Transactional adapter flavor
    // ------------------------------------------------------------------

    /// All sites with their monitors hydrated, duplicates dropped
    pub fn find_all_tx(conn: &Connection) -> Result<Vec<Site>> {
        let mut stmt =
            conn.prepare("SELECT identifier, name, monitoring FROM sites ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut sites = Vec::new();
        for row in rows {
            let (identifier, name, monitoring) = row?;
            if let Err(e) = validate_identifier(&identifier) {
                tracing::warn!("Dropping site with invalid identifier on load: {e}");
                continue;
            }
            let monitors = MonitorRepository::find_by_site_tx(conn, &identifier)?;
            sites.push(Site {
                identifier,
                name,
                monitoring: monitoring != 0,
                monitors,
            });
        }
        Ok(sanitize_sites(sites))
    }

    pub fn find_by_identifier_tx(conn: &Connection, identifier: &str) -> Result<Option<Site>> {
        let row: Option<(String, String, i64)> = conn
            .query_row(
                "SELECT identifier, name, monitoring FROM sites WHERE identifier = ?1",
                params![identifier],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((identifier, name, monitoring)) = row else {
            return Ok(None);
        };
        let monitors = MonitorRepository::find_by_site_tx(conn, &identifier)?;
        Ok(Some(Site {
            identifier,
            name,
            monitoring: monitoring != 0,
            monitors,
        }))
    }

    pub fn exists_tx(conn: &Connection, identifier: &str) -> Result<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM sites WHERE identifier = ?1",
                params![identifier],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert or update the site row itself; monitors are written separately
    pub fn upsert_tx(conn: &Connection, site: &Site) -> Result<()> {
        validate_identifier(&site.identifier)?;
        conn.execute(
            "INSERT INTO sites (identifier, name, monitoring) VALUES (?1, ?2, ?3) \
             ON CONFLICT(identifier) DO UPDATE SET \
                 name = excluded.name, monitoring = excluded.monitoring",
            params![site.identifier, site.name, i64::from(site.monitoring)],
        )?;
        Ok(())
    }

    /// Flip the site-level monitoring flag; returns false when missing
    pub fn set_monitoring_tx(conn: &Connection, identifier: &str, monitoring: bool) -> Result<bool> {
        let affected = conn.execute(
            "UPDATE sites SET monitoring = ?2 WHERE identifier = ?1",
            params![identifier, i64::from(monitoring)],
        )?;
        Ok(affected > 0)
    }

    /// Delete a site row; monitor and history rows are removed by the caller
    /// in the same transaction (the schema cascades as a safety net)
    pub fn delete_tx(conn: &Connection, identifier: &str) -> Result<bool> {
        let affected = conn.execute(
            "DELETE FROM sites WHERE identifier = ?1",
            params![identifier],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_all_tx(conn: &Connection) -> Result<usize> {
        conn.execute("DELETE FROM sites", []).map_err(Into::into)
    }

    /// Replace-style import helper: inserts sites with their monitors
    pub fn bulk_insert_tx(conn: &Connection, sites: &[Site]) -> Result<()> {
        for site in sites {
            Self::upsert_tx(conn, site)?;
            for (position, monitor) in site.monitors.iter().enumerate() {
                MonitorRepository::upsert_tx(conn, &site.identifier, monitor, position as i64)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Standalone flavor
    // ------------------------------------------------------------------

    pub fn find_all(&self) -> Result<Vec<Site>> {
        self.engine.transaction(|tx| Self::find_all_tx(tx))
    }

    pub fn find_by_identifier(&self, identifier: &str) -> Result<Option<Site>> {
        self.engine
            .transaction(|tx| Self::find_by_identifier_tx(tx, identifier))
    }

    pub fn delete(&self, identifier: &str) -> Result<bool> {
        self.engine.transaction(|tx| Self::delete_tx(tx, identifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::monitor::{Monitor, MonitorStatus, ProbeConfig};
    use crate::storage::migrations::apply_migrations;

    fn engine() -> Arc<StorageEngine> {
        let engine = Arc::new(StorageEngine::open_in_memory().unwrap());
        apply_migrations(&engine).unwrap();
        engine
    }

    fn site_with_monitor(identifier: &str) -> Site {
        Site {
            identifier: identifier.into(),
            name: "Example".into(),
            monitoring: true,
            monitors: vec![Monitor {
                id: format!("{identifier}-m1"),
                monitoring: true,
                status: MonitorStatus::Pending,
                check_interval: 60_000,
                timeout: 5_000,
                retry_attempts: 0,
                response_time: None,
                last_checked: None,
                active_operations: vec![],
                probe: ProbeConfig::Http {
                    url: "https://example.com".into(),
                },
            }],
        }
    }

    #[test]
    fn test_bulk_insert_and_find_all() {
        let engine = engine();
        let repo = SiteRepository::new(engine.clone());

        engine
            .transaction(|tx| {
                SiteRepository::bulk_insert_tx(
                    tx,
                    &[site_with_monitor("s1"), site_with_monitor("s2")],
                )
            })
            .unwrap();

        let sites = repo.find_all().unwrap();
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].identifier, "s1");
        assert_eq!(sites[0].monitors.len(), 1);
        assert_eq!(sites[1].identifier, "s2");
    }

    #[test]
    fn test_find_by_identifier_hydrates_monitors() {
        let engine = engine();
        engine
            .transaction(|tx| SiteRepository::bulk_insert_tx(tx, &[site_with_monitor("s1")]))
            .unwrap();

        let repo = SiteRepository::new(engine);
        let site = repo.find_by_identifier("s1").unwrap().unwrap();
        assert_eq!(site.monitors.len(), 1);
        assert_eq!(site.monitors[0].id, "s1-m1");

        assert!(repo.find_by_identifier("missing").unwrap().is_none());
    }

    #[test]
    fn test_upsert_updates_in_place() {
        let engine = engine();
        let repo = SiteRepository::new(engine.clone());

        let mut site = site_with_monitor("s1");
        site.monitors.clear();
        engine
            .transaction(|tx| SiteRepository::upsert_tx(tx, &site))
            .unwrap();

        site.name = "Renamed".into();
        site.monitoring = false;
        engine
            .transaction(|tx| SiteRepository::upsert_tx(tx, &site))
            .unwrap();

        let stored = repo.find_by_identifier("s1").unwrap().unwrap();
        assert_eq!(stored.name, "Renamed");
        assert!(!stored.monitoring);
    }

    #[test]
    fn test_upsert_rejects_invalid_identifier() {
        let engine = engine();
        let mut site = site_with_monitor("s1");
        site.identifier = "bad\nid".into();
        let result = engine.transaction(|tx| SiteRepository::upsert_tx(tx, &site));
        assert!(result.is_err());
    }

    #[test]
    fn test_delete_cascades_to_monitors() {
        let engine = engine();
        engine
            .transaction(|tx| SiteRepository::bulk_insert_tx(tx, &[site_with_monitor("s1")]))
            .unwrap();

        let deleted = SiteRepository::new(engine.clone()).delete("s1").unwrap();
        assert!(deleted);

        let monitor_count: Option<i64> = engine
            .get("SELECT COUNT(*) FROM monitors", [], |row| row.get(0))
            .unwrap();
        assert_eq!(monitor_count, Some(0));
    }
}
