//! Legacy source system access
//!
//! The executor only sees the `LegacySource` trait; the Postgres
//! implementation below holds all the legacy SQL. Records come back in
//! the source system's natural ordering (primary key), which is the only
//! within-kind ordering the pipeline relies on.

use crate::error::{MigrateError, Result};
use crate::model::{
    EntityKind, LegacyCourse, LegacyLesson, LegacyRecord, LegacyTag, LegacyVideo,
    SelectionCandidate,
};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::collections::BTreeSet;
use std::time::Duration;

/// Read-only view of the legacy relational system
#[async_trait]
pub trait LegacySource: Send + Sync {
    /// All records of one kind, in natural source order
    async fn fetch_records(&self, kind: EntityKind) -> Result<Vec<LegacyRecord>>;

    /// Course-like groupings available for staged selection
    async fn fetch_selection_candidates(&self) -> Result<Vec<SelectionCandidate>>;
}

/// Legacy source backed by the old PostgreSQL database
pub struct PostgresSource {
    pool: PgPool,
}

impl PostgresSource {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;

        // Test the connection
        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }

    async fn fetch_tags(&self) -> Result<Vec<LegacyRecord>> {
        let rows = sqlx::query("SELECT id, name, slug FROM tags ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrateError::Source(format!("Failed to load tags: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                LegacyRecord::Tag(LegacyTag {
                    id: row.try_get("id").unwrap_or_default(),
                    name: row.try_get("name").unwrap_or_default(),
                    slug: row.try_get("slug").unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn fetch_courses(&self) -> Result<Vec<LegacyRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.title, c.slug, c.instructor_id, c.access_level,
                   COALESCE(array_agg(ct.tag_id) FILTER (WHERE ct.tag_id IS NOT NULL), '{}') AS tag_ids
            FROM courses c
            LEFT JOIN course_tags ct ON ct.course_id = c.id
            GROUP BY c.id
            ORDER BY c.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MigrateError::Source(format!("Failed to load courses: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                LegacyRecord::Course(LegacyCourse {
                    id: row.try_get("id").unwrap_or_default(),
                    title: row.try_get("title").unwrap_or_default(),
                    slug: row.try_get("slug").unwrap_or_default(),
                    instructor_id: row.try_get("instructor_id").unwrap_or_default(),
                    access_level: row.try_get::<Option<String>, _>("access_level").ok().flatten(),
                    tag_ids: row.try_get::<Vec<i64>, _>("tag_ids").unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn fetch_lessons(&self) -> Result<Vec<LegacyRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, slug, course_id, video_id, access_level, "position"
            FROM lessons
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MigrateError::Source(format!("Failed to load lessons: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                LegacyRecord::Lesson(LegacyLesson {
                    id: row.try_get("id").unwrap_or_default(),
                    title: row.try_get("title").unwrap_or_default(),
                    slug: row.try_get("slug").unwrap_or_default(),
                    course_id: row.try_get("course_id").unwrap_or_default(),
                    video_id: row.try_get::<Option<i64>, _>("video_id").ok().flatten(),
                    access_level: row.try_get::<Option<String>, _>("access_level").ok().flatten(),
                    position: row.try_get("position").unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn fetch_videos(&self) -> Result<Vec<LegacyRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, duration_seconds, playback_id
            FROM videos
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MigrateError::Source(format!("Failed to load videos: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                LegacyRecord::Video(LegacyVideo {
                    id: row.try_get("id").unwrap_or_default(),
                    title: row.try_get("title").unwrap_or_default(),
                    duration_seconds: row.try_get::<Option<i64>, _>("duration_seconds").ok().flatten(),
                    playback_id: row.try_get::<Option<String>, _>("playback_id").ok().flatten(),
                })
            })
            .collect())
    }
}

#[async_trait]
impl LegacySource for PostgresSource {
    async fn fetch_records(&self, kind: EntityKind) -> Result<Vec<LegacyRecord>> {
        match kind {
            EntityKind::Tag => self.fetch_tags().await,
            EntityKind::Course => self.fetch_courses().await,
            EntityKind::Lesson => self.fetch_lessons().await,
            EntityKind::Video => self.fetch_videos().await,
        }
    }

    async fn fetch_selection_candidates(&self) -> Result<Vec<SelectionCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT c.slug AS legacy_slug,
                   c.instructor_id AS owner_id,
                   COUNT(l.id) AS item_count,
                   COALESCE(MIN(l.id), 0) AS min_item_id,
                   COALESCE(MAX(l.id), 0) AS max_item_id,
                   COALESCE(array_agg(DISTINCT t.slug) FILTER (WHERE t.slug IS NOT NULL), '{}') AS tags
            FROM courses c
            LEFT JOIN lessons l ON l.course_id = c.id
            LEFT JOIN course_tags ct ON ct.course_id = c.id
            LEFT JOIN tags t ON t.id = ct.tag_id
            GROUP BY c.id
            ORDER BY c.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MigrateError::Source(format!("Failed to load selection candidates: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|row| SelectionCandidate {
                legacy_slug: row.try_get("legacy_slug").unwrap_or_default(),
                owner_id: row.try_get("owner_id").unwrap_or_default(),
                item_count: row.try_get::<i64, _>("item_count").unwrap_or_default() as u32,
                min_item_id: row.try_get("min_item_id").unwrap_or_default(),
                max_item_id: row.try_get("max_item_id").unwrap_or_default(),
                tags: row
                    .try_get::<Vec<String>, _>("tags")
                    .unwrap_or_default()
                    .into_iter()
                    .collect::<BTreeSet<_>>(),
            })
            .collect())
    }
}
