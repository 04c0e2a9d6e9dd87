//! Migration Executor - drives entity kinds through the pipeline
//!
//! One kind at a time, in dependency order. Per record: consult the
//! mapping store (re-runs skip anything already migrated), check the
//! cross-kind slug guard, map, write the target record and its links,
//! record the mapping, emit an event. One bad record never aborts the
//! batch; transport failure (source, target, or event log for lifecycle
//! events) is fatal for the run but leaves written mappings intact.

use crate::error::Result;
use crate::mapper::{map_course, map_lesson, map_tag, map_video, MapContext};
use crate::mapping_store::MappingStore;
use crate::model::{EntityKind, LegacyRecord, MappingRecord, TargetLink};
use crate::source::LegacySource;
use crate::stream::event::MigrationEvent;
use crate::stream::writer::EventLogWriter;
use crate::target::TargetStore;
use async_trait::async_trait;
use chrono::Utc;
use std::time::Instant;
use tracing::{info, warn};

/// Records per progress event; bounds event volume on large kinds
pub const PROGRESS_BATCH: usize = 25;

/// Where the executor's lifecycle events go.
///
/// `emit` is synchronous (acknowledged before the caller proceeds) and
/// used for start/error/complete; `emit_batch` is best-effort and used
/// for high-frequency progress/success events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &MigrationEvent) -> Result<()>;
    async fn emit_batch(&self, events: &[MigrationEvent]) -> Result<()>;
}

/// Event sink writing to a run stream on the event-log transport
pub struct StreamSink {
    writer: EventLogWriter,
    run_id: String,
}

impl StreamSink {
    pub fn new(writer: EventLogWriter, run_id: impl Into<String>) -> Self {
        Self {
            writer,
            run_id: run_id.into(),
        }
    }
}

#[async_trait]
impl EventSink for StreamSink {
    async fn emit(&self, event: &MigrationEvent) -> Result<()> {
        self.writer.append(&self.run_id, event).await
    }

    async fn emit_batch(&self, events: &[MigrationEvent]) -> Result<()> {
        self.writer.append_batch(&self.run_id, events).await
    }
}

/// Aggregate result of one kind's pass
#[derive(Debug, Clone)]
pub struct KindSummary {
    pub kind: EntityKind,
    pub migrated: u64,
    pub failed: u64,
    pub skipped_conflicts: u64,
    pub duration_ms: u64,
}

enum RecordOutcome {
    Migrated(String),
    AlreadyMigrated(String),
    SlugConflict,
}

pub struct MigrationExecutor<'a> {
    source: &'a dyn LegacySource,
    target: &'a dyn TargetStore,
    mappings: &'a MappingStore,
    events: &'a dyn EventSink,
}

impl<'a> MigrationExecutor<'a> {
    pub fn new(
        source: &'a dyn LegacySource,
        target: &'a dyn TargetStore,
        mappings: &'a MappingStore,
        events: &'a dyn EventSink,
    ) -> Self {
        Self {
            source,
            target,
            mappings,
            events,
        }
    }

    /// Migrate every kind in dependency order
    pub async fn run(&self) -> Result<Vec<KindSummary>> {
        let mut summaries = Vec::new();
        for kind in EntityKind::ordered() {
            summaries.push(self.run_kind(kind).await?);
        }
        Ok(summaries)
    }

    /// Migrate one kind end to end
    pub async fn run_kind(&self, kind: EntityKind) -> Result<KindSummary> {
        let records = self.source.fetch_records(kind).await?;
        let total = records.len() as u64;
        info!("Migrating {} {} records", total, kind);

        self.events.emit(&MigrationEvent::start(kind, total)).await?;

        let ctx = self.context_for(kind)?;
        let started = Instant::now();
        let mut migrated = 0u64;
        let mut failed = 0u64;
        let mut skipped_conflicts = 0u64;
        let mut pending: Vec<MigrationEvent> = Vec::new();

        for (index, record) in records.iter().enumerate() {
            match self.migrate_record(kind, record, &ctx).await {
                Ok(RecordOutcome::Migrated(target_id)) => {
                    migrated += 1;
                    pending.push(MigrationEvent::success(kind, record.legacy_id(), target_id));
                }
                Ok(RecordOutcome::AlreadyMigrated(target_id)) => {
                    // Re-emitted for observability; nothing was written
                    migrated += 1;
                    pending.push(MigrationEvent::success(kind, record.legacy_id(), target_id));
                }
                Ok(RecordOutcome::SlugConflict) => {
                    skipped_conflicts += 1;
                }
                Err(e) => {
                    warn!("Failed to migrate ({}, {}): {}", kind, record.legacy_id(), e);
                    failed += 1;
                    // Per-record failures must reach the operator
                    self.events
                        .emit(&MigrationEvent::error(kind, record.legacy_id(), e.to_string()))
                        .await?;
                }
            }

            if (index + 1) % PROGRESS_BATCH == 0 {
                pending.push(MigrationEvent::progress(kind, (index + 1) as u64, total));
                self.flush_best_effort(&mut pending).await;
            }
        }

        pending.push(MigrationEvent::progress(kind, total, total));
        self.flush_best_effort(&mut pending).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        // Acknowledged before returning: completion must be visible to
        // readers even if the process exits right after
        self.events
            .emit(&MigrationEvent::complete(kind, migrated, failed, duration_ms))
            .await?;

        info!(
            "Completed {}: {} migrated, {} failed, {} slug conflicts in {}ms",
            kind, migrated, failed, skipped_conflicts, duration_ms
        );
        Ok(KindSummary {
            kind,
            migrated,
            failed,
            skipped_conflicts,
            duration_ms,
        })
    }

    /// Resolve the cross-entity references a kind's mapper needs from
    /// mappings written by earlier passes
    fn context_for(&self, kind: EntityKind) -> Result<MapContext> {
        let mut ctx = MapContext::default();
        match kind {
            EntityKind::Tag | EntityKind::Video => {}
            EntityKind::Course => {
                for m in self.mappings.all(EntityKind::Tag)? {
                    ctx.tag_targets.insert(m.legacy_id, m.target_id);
                }
            }
            EntityKind::Lesson => {
                for m in self.mappings.all(EntityKind::Course)? {
                    ctx.course_targets.insert(m.legacy_id, m.target_id);
                }
                for m in self.mappings.all(EntityKind::Video)? {
                    ctx.video_targets.insert(m.legacy_id, m.target_id);
                }
            }
        }
        Ok(ctx)
    }

    async fn migrate_record(
        &self,
        kind: EntityKind,
        record: &LegacyRecord,
        ctx: &MapContext,
    ) -> Result<RecordOutcome> {
        let legacy_id = record.legacy_id();

        // Idempotency guard: the mapping store is the system of record
        // for "already migrated"
        if let Some(existing) = self.mappings.get(kind, legacy_id)? {
            return Ok(RecordOutcome::AlreadyMigrated(existing));
        }

        // Cross-kind duplicate guard: a competing kind already holding
        // this slug is authoritative, first-writer-wins by priority
        if let Some(slug) = record.slug() {
            if let Some((occupant_id, occupant_kind)) = self.target.find_by_slug(slug).await? {
                if occupant_kind != kind && occupant_kind.priority() < kind.priority() {
                    warn!(
                        "Slug '{}' already held by {} {}, skipping {} {}",
                        slug, occupant_kind, occupant_id, kind, legacy_id
                    );
                    return Ok(RecordOutcome::SlugConflict);
                }
            }
        }

        let target_record = match record {
            LegacyRecord::Tag(tag) => map_tag(tag, ctx),
            LegacyRecord::Course(course) => map_course(course, ctx),
            LegacyRecord::Lesson(lesson) => map_lesson(lesson, ctx),
            LegacyRecord::Video(video) => map_video(video, ctx),
        };
        let target_id = target_record.id.clone();
        self.target.insert_record(&target_record).await?;

        // Ordered parent->child links; lessons hang off their course and
        // reference their video
        if let LegacyRecord::Lesson(lesson) = record {
            if let Some(course_target) = ctx.course_targets.get(&lesson.course_id) {
                self.target
                    .link(&TargetLink {
                        parent_id: course_target.clone(),
                        child_id: target_id.clone(),
                        position: lesson.position,
                    })
                    .await?;
            }
            if let Some(video_target) = lesson
                .video_id
                .and_then(|id| ctx.video_targets.get(&id))
            {
                self.target
                    .link(&TargetLink {
                        parent_id: target_id.clone(),
                        child_id: video_target.clone(),
                        position: 0,
                    })
                    .await?;
            }
        }

        // Mapping write comes after the target write; a crash between
        // the two leaves a target without a mapping, detectable by
        // comparing per-kind counts
        self.mappings.put(&MappingRecord {
            kind,
            legacy_id,
            target_id: target_id.clone(),
            legacy_slug: record.slug().map(|s| s.to_string()),
            legacy_title: Some(record.title().to_string()),
            created_at: Utc::now(),
        })?;

        Ok(RecordOutcome::Migrated(target_id))
    }

    async fn flush_best_effort(&self, pending: &mut Vec<MigrationEvent>) {
        if pending.is_empty() {
            return;
        }
        if let Err(e) = self.events.emit_batch(pending).await {
            // Progress/success loss under transport trouble is accepted;
            // the complete event still carries authoritative counts
            warn!("Dropping {} progress events: {}", pending.len(), e);
        }
        pending.clear();
    }
}
