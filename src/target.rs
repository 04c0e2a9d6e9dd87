//! Target content-resource store
//!
//! Generic records keyed by an opaque id with a `kind` discriminator and
//! an open JSON field bag, plus a link table for ordered parent->child
//! relationships. Both inserts are idempotent (`ON CONFLICT DO NOTHING`)
//! so re-running a partially-failed batch never duplicates rows.

use crate::error::{MigrateError, Result};
use crate::model::{EntityKind, TargetLink, TargetRecord};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;

/// Write-side view of the new content-resource store
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn insert_record(&self, record: &TargetRecord) -> Result<()>;

    /// Which record, if any, currently holds this slug in the target
    /// namespace. Used by the cross-kind duplicate guard.
    async fn find_by_slug(&self, slug: &str) -> Result<Option<(String, EntityKind)>>;

    /// Record an ordered parent->child relationship; idempotent
    async fn link(&self, link: &TargetLink) -> Result<()>;

    async fn count(&self, kind: EntityKind) -> Result<u64>;
}

/// Target store backed by the new PostgreSQL database
pub struct PostgresTarget {
    pool: PgPool,
}

impl PostgresTarget {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }

    fn parse_kind(raw: &str) -> Result<EntityKind> {
        match raw {
            "tag" => Ok(EntityKind::Tag),
            "course" => Ok(EntityKind::Course),
            "lesson" => Ok(EntityKind::Lesson),
            "video" => Ok(EntityKind::Video),
            other => Err(MigrateError::Target(format!("Unknown kind: {}", other))),
        }
    }
}

#[async_trait]
impl TargetStore for PostgresTarget {
    async fn insert_record(&self, record: &TargetRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO content_resources (id, kind, fields, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(record.kind.as_str())
        .bind(serde_json::Value::Object(record.fields.clone()))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| MigrateError::Target(format!("Failed to insert {}: {}", record.id, e)))?;
        Ok(())
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<(String, EntityKind)>> {
        let row = sqlx::query(
            "SELECT id, kind FROM content_resources WHERE fields->>'slug' = $1 LIMIT 1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MigrateError::Target(format!("Slug lookup failed: {}", e)))?;

        match row {
            Some(row) => {
                let id: String = row.try_get("id").unwrap_or_default();
                let kind: String = row.try_get("kind").unwrap_or_default();
                Ok(Some((id, Self::parse_kind(&kind)?)))
            }
            None => Ok(None),
        }
    }

    async fn link(&self, link: &TargetLink) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO content_links (parent_id, child_id, "position")
            VALUES ($1, $2, $3)
            ON CONFLICT (parent_id, child_id) DO NOTHING
            "#,
        )
        .bind(&link.parent_id)
        .bind(&link.child_id)
        .bind(link.position)
        .execute(&self.pool)
        .await
        .map_err(|e| MigrateError::Target(format!("Failed to link {} -> {}: {}", link.parent_id, link.child_id, e)))?;
        Ok(())
    }

    async fn count(&self, kind: EntityKind) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM content_resources WHERE kind = $1")
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigrateError::Target(format!("Count failed: {}", e)))?;
        let n: i64 = row.try_get("n").unwrap_or_default();
        Ok(n as u64)
    }
}
