//! Snapshot backups of the embedded database
//!
//! `VACUUM INTO` produces a consistent copy without blocking the writer
//! for the duration of the file write.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ts_rs::TS;

use crate::config::BACKUP_RETENTION_HINT_DAYS;
use crate::storage::engine::StorageEngine;
use crate::storage::migrations;
use crate::utils::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, rename_all = "camelCase")]
pub struct BackupMetadata {
    pub app_version: String,
    /// Hex-encoded SHA-256 of the backup bytes
    pub checksum: String,
    pub schema_version: i64,
    pub size_bytes: u64,
    pub retention_hint_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, rename_all = "camelCase")]
pub struct BackupPayload {
    pub buffer: Vec<u8>,
    pub file_name: String,
    pub metadata: BackupMetadata,
}

/// Produce a consistent snapshot of the database as raw bytes
pub fn create_backup(engine: &StorageEngine) -> Result<BackupPayload> {
    let scratch_dir = engine
        .data_dir()
        .map_or_else(std::env::temp_dir, std::path::Path::to_path_buf);
    let scratch_path = scratch_dir.join(format!("backup-{}.sqlite.tmp", uuid::Uuid::new_v4()));
    let scratch_str = scratch_path.to_string_lossy().to_string();

    engine.run("VACUUM INTO ?1", [scratch_str.as_str()])?;

    let buffer = std::fs::read(&scratch_path)?;
    if let Err(e) = std::fs::remove_file(&scratch_path) {
        tracing::warn!("Failed to remove backup scratch file: {e}");
    }

    let checksum = format!("{:x}", Sha256::digest(&buffer));
    let schema_version = migrations::current_version(engine)?;
    let size_bytes = buffer.len() as u64;
    let file_name = format!(
        "uptime-watcher-backup-{}.sqlite",
        Utc::now().format("%Y%m%d-%H%M%S")
    );

    tracing::info!("Created database backup ({size_bytes} bytes)");

    Ok(BackupPayload {
        buffer,
        file_name,
        metadata: BackupMetadata {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            checksum,
            schema_version,
            size_bytes,
            retention_hint_days: BACKUP_RETENTION_HINT_DAYS,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    #[test]
    fn test_backup_round_trips_through_sqlite() {
        let engine = StorageEngine::open_in_memory().unwrap();
        migrations::apply_migrations(&engine).unwrap();
        engine
            .run(
                "INSERT INTO sites (identifier, name, monitoring) VALUES (?1, ?2, 1)",
                params!["s1", "Example"],
            )
            .unwrap();

        let payload = create_backup(&engine).unwrap();
        assert!(!payload.buffer.is_empty());
        assert_eq!(payload.metadata.size_bytes, payload.buffer.len() as u64);
        assert_eq!(payload.metadata.schema_version, migrations::SCHEMA_VERSION);
        assert!(payload.file_name.starts_with("uptime-watcher-backup-"));

        // Checksum matches the bytes
        let recomputed = format!("{:x}", Sha256::digest(&payload.buffer));
        assert_eq!(payload.metadata.checksum, recomputed);

        // The buffer is a readable database containing the same rows
        let dir = tempfile::tempdir().unwrap();
        let restored_path = dir.path().join("restored.sqlite");
        std::fs::write(&restored_path, &payload.buffer).unwrap();
        let restored = rusqlite::Connection::open(&restored_path).unwrap();
        let name: String = restored
            .query_row(
                "SELECT name FROM sites WHERE identifier = 's1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(name, "Example");
    }
}
