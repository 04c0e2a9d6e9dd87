//! Mapping Store - Durable record of "legacy id -> target id" per kind
//!
//! This is the idempotency foundation of the pipeline: the executor
//! consults it before any write to the target store, and re-runs skip
//! everything already recorded here. Backed by a local SQLite file so the
//! state survives crashes of either the source or target connection and
//! stays queryable when neither database is reachable.

use crate::error::{MigrateError, Result};
use crate::model::{EntityKind, MappingRecord};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

/// Single-writer, many-reader local store of mapping records.
///
/// One table per entity kind, primary-keyed by the legacy numeric id.
pub struct MappingStore {
    path: PathBuf,
    db: Mutex<Connection>,
}

impl MappingStore {
    /// Open (or create) the mapping store under the given directory
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;

        let db_path = path.join("mappings.db");
        let db = Connection::open(&db_path)
            .map_err(|e| MigrateError::Mapping(format!("Failed to open database: {}", e)))?;

        let store = Self {
            path,
            db: Mutex::new(db),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let db = self.db.lock().unwrap();
        for kind in EntityKind::ordered() {
            db.execute(
                &format!(
                    r#"
                    CREATE TABLE IF NOT EXISTS {} (
                        legacy_id INTEGER PRIMARY KEY,
                        target_id TEXT NOT NULL,
                        legacy_slug TEXT,
                        legacy_title TEXT,
                        created_at TEXT NOT NULL
                    )
                    "#,
                    kind.mapping_table()
                ),
                [],
            )
            .map_err(|e| MigrateError::Mapping(format!("Failed to create table: {}", e)))?;
        }
        Ok(())
    }

    /// Look up the target id for a legacy record, if it was migrated
    pub fn get(&self, kind: EntityKind, legacy_id: i64) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        let result = db.query_row(
            &format!(
                "SELECT target_id FROM {} WHERE legacy_id = ?1",
                kind.mapping_table()
            ),
            params![legacy_id],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(target_id) => Ok(Some(target_id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(MigrateError::Mapping(format!(
                "Failed to read mapping ({}, {}): {}",
                kind, legacy_id, e
            ))),
        }
    }

    /// Record a successful migration.
    ///
    /// Idempotent: re-putting the same `(kind, legacy_id)` with the same
    /// target id is a no-op. A different target id overwrites the row and
    /// is logged as a correction (the target record was recreated).
    pub fn put(&self, record: &MappingRecord) -> Result<()> {
        let existing = self.get(record.kind, record.legacy_id)?;

        match existing {
            Some(ref current) if current == &record.target_id => Ok(()),
            Some(current) => {
                warn!(
                    "Correcting mapping ({}, {}): {} -> {}",
                    record.kind, record.legacy_id, current, record.target_id
                );
                let db = self.db.lock().unwrap();
                db.execute(
                    &format!(
                        "UPDATE {} SET target_id = ?2, legacy_slug = ?3, legacy_title = ?4, created_at = ?5 WHERE legacy_id = ?1",
                        record.kind.mapping_table()
                    ),
                    params![
                        record.legacy_id,
                        record.target_id,
                        record.legacy_slug,
                        record.legacy_title,
                        record.created_at.to_rfc3339(),
                    ],
                )
                .map_err(|e| MigrateError::Mapping(format!("Failed to correct mapping: {}", e)))?;
                Ok(())
            }
            None => {
                let db = self.db.lock().unwrap();
                db.execute(
                    &format!(
                        r#"
                        INSERT INTO {} (legacy_id, target_id, legacy_slug, legacy_title, created_at)
                        VALUES (?1, ?2, ?3, ?4, ?5)
                        "#,
                        record.kind.mapping_table()
                    ),
                    params![
                        record.legacy_id,
                        record.target_id,
                        record.legacy_slug,
                        record.legacy_title,
                        record.created_at.to_rfc3339(),
                    ],
                )
                .map_err(|e| MigrateError::Mapping(format!("Failed to insert mapping: {}", e)))?;
                info!(
                    "Recorded mapping ({}, {}) -> {}",
                    record.kind, record.legacy_id, record.target_id
                );
                Ok(())
            }
        }
    }

    /// Number of migrated records for a kind
    pub fn count(&self, kind: EntityKind) -> Result<u64> {
        let db = self.db.lock().unwrap();
        let count: i64 = db
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", kind.mapping_table()),
                [],
                |row| row.get(0),
            )
            .map_err(|e| MigrateError::Mapping(format!("Failed to count mappings: {}", e)))?;
        Ok(count as u64)
    }

    /// All mapping records for a kind, for audits and reconciliation
    pub fn all(&self, kind: EntityKind) -> Result<Vec<MappingRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            r#"
            SELECT legacy_id, target_id, legacy_slug, legacy_title, created_at
            FROM {}
            ORDER BY legacy_id
            "#,
            kind.mapping_table()
        ))?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (legacy_id, target_id, legacy_slug, legacy_title, created_at) = row?;
            records.push(MappingRecord {
                kind,
                legacy_id,
                target_id,
                legacy_slug,
                legacy_title,
                created_at: created_at
                    .parse::<DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now()),
            });
        }
        Ok(records)
    }

    /// Directory the store lives in
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(kind: EntityKind, legacy_id: i64, target_id: &str) -> MappingRecord {
        MappingRecord {
            kind,
            legacy_id,
            target_id: target_id.to_string(),
            legacy_slug: Some("react".to_string()),
            legacy_title: Some("React".to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_put_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = MappingStore::open(temp_dir.path()).unwrap();

        assert_eq!(store.get(EntityKind::Tag, 42).unwrap(), None);
        store.put(&record(EntityKind::Tag, 42, "T-1")).unwrap();
        assert_eq!(
            store.get(EntityKind::Tag, 42).unwrap(),
            Some("T-1".to_string())
        );
        assert_eq!(store.count(EntityKind::Tag).unwrap(), 1);
        // Same kind id in another kind's namespace is independent
        assert_eq!(store.get(EntityKind::Course, 42).unwrap(), None);
    }

    #[test]
    fn test_put_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = MappingStore::open(temp_dir.path()).unwrap();

        store.put(&record(EntityKind::Tag, 42, "T-1")).unwrap();
        store.put(&record(EntityKind::Tag, 42, "T-1")).unwrap();
        assert_eq!(store.count(EntityKind::Tag).unwrap(), 1);
    }

    #[test]
    fn test_put_with_new_target_is_a_correction() {
        let temp_dir = TempDir::new().unwrap();
        let store = MappingStore::open(temp_dir.path()).unwrap();

        store.put(&record(EntityKind::Lesson, 7, "T-old")).unwrap();
        store.put(&record(EntityKind::Lesson, 7, "T-new")).unwrap();
        assert_eq!(
            store.get(EntityKind::Lesson, 7).unwrap(),
            Some("T-new".to_string())
        );
        assert_eq!(store.count(EntityKind::Lesson).unwrap(), 1);
    }

    #[test]
    fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = MappingStore::open(temp_dir.path()).unwrap();
            store.put(&record(EntityKind::Video, 9, "V-1")).unwrap();
        }
        let store = MappingStore::open(temp_dir.path()).unwrap();
        assert_eq!(
            store.get(EntityKind::Video, 9).unwrap(),
            Some("V-1".to_string())
        );
    }
}
