//! Entity Mapper - Pure legacy-record -> target-record transformations
//!
//! No I/O happens here. Cross-entity references (tag ids on a course,
//! course/video ids on a lesson) arrive pre-resolved in `MapContext`, so
//! each mapper is deterministic apart from fresh target-id generation and
//! timestamp capture. Missing optional fields never fail; they get the
//! documented defaults below.

use crate::model::{EntityKind, LegacyCourse, LegacyLesson, LegacyTag, LegacyVideo, TargetRecord};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Identifier of the source system recorded in provenance
pub const MIGRATED_FROM: &str = "legacy-lms";

/// Visibility assigned when the source access level is missing or
/// unrecognized
pub const DEFAULT_VISIBILITY: &str = "private";

/// Pre-resolved references for one mapping call
#[derive(Debug, Default, Clone)]
pub struct MapContext {
    /// Legacy tag id -> target tag id
    pub tag_targets: HashMap<i64, String>,
    /// Legacy course id -> target course id
    pub course_targets: HashMap<i64, String>,
    /// Legacy video id -> target video id; absent means the video did not
    /// migrate (no playable asset)
    pub video_targets: HashMap<i64, String>,
}

fn new_target_id(kind: EntityKind) -> String {
    format!("{}_{}", kind.as_str(), Uuid::new_v4().simple())
}

/// Visibility policy shared by courses and lessons: recognized source
/// access levels map through, anything else falls back to the default.
fn visibility_of(access_level: Option<&str>) -> &'static str {
    match access_level {
        Some("public") | Some("free") => "public",
        Some("members") | Some("subscriber") => "members",
        Some("private") | Some("draft") => "private",
        _ => DEFAULT_VISIBILITY,
    }
}

fn provenance(legacy_id: i64) -> Value {
    json!({
        "legacyId": legacy_id,
        "migratedFrom": MIGRATED_FROM,
        "migratedAt": Utc::now().timestamp_millis(),
    })
}

fn build_record(kind: EntityKind, legacy_id: i64, mut fields: Map<String, Value>) -> TargetRecord {
    let now = Utc::now();
    fields.insert("provenance".to_string(), provenance(legacy_id));
    TargetRecord {
        id: new_target_id(kind),
        kind,
        fields,
        created_at: now,
        updated_at: now,
    }
}

/// Map a legacy taxonomy tag
pub fn map_tag(tag: &LegacyTag, _ctx: &MapContext) -> TargetRecord {
    let mut fields = Map::new();
    fields.insert("legacyId".to_string(), json!(tag.id));
    fields.insert("name".to_string(), json!(tag.name));
    fields.insert("slug".to_string(), json!(tag.slug));
    build_record(EntityKind::Tag, tag.id, fields)
}

/// Map a legacy course. Tags that never migrated are dropped from the
/// reference list rather than failing the course.
pub fn map_course(course: &LegacyCourse, ctx: &MapContext) -> TargetRecord {
    let tag_resource_ids: Vec<&String> = course
        .tag_ids
        .iter()
        .filter_map(|id| ctx.tag_targets.get(id))
        .collect();

    let mut fields = Map::new();
    fields.insert("legacyId".to_string(), json!(course.id));
    fields.insert("title".to_string(), json!(course.title));
    fields.insert("slug".to_string(), json!(course.slug));
    fields.insert("instructorId".to_string(), json!(course.instructor_id));
    fields.insert(
        "visibility".to_string(),
        json!(visibility_of(course.access_level.as_deref())),
    );
    fields.insert("tagResourceIds".to_string(), json!(tag_resource_ids));
    fields.insert("state".to_string(), json!("active"));
    build_record(EntityKind::Course, course.id, fields)
}

/// Map a legacy lesson.
///
/// A lesson whose video cannot be resolved (no video id, or a video that
/// did not migrate) is marked terminal-`retired` with a null video
/// reference instead of being migrated as active.
pub fn map_lesson(lesson: &LegacyLesson, ctx: &MapContext) -> TargetRecord {
    let video_resource_id = lesson
        .video_id
        .and_then(|id| ctx.video_targets.get(&id).cloned());
    let course_resource_id = ctx.course_targets.get(&lesson.course_id).cloned();

    let mut fields = Map::new();
    fields.insert("legacyId".to_string(), json!(lesson.id));
    fields.insert("title".to_string(), json!(lesson.title));
    fields.insert("slug".to_string(), json!(lesson.slug));
    fields.insert("position".to_string(), json!(lesson.position));
    fields.insert(
        "visibility".to_string(),
        json!(visibility_of(lesson.access_level.as_deref())),
    );
    fields.insert(
        "courseResourceId".to_string(),
        course_resource_id.map(Value::from).unwrap_or(Value::Null),
    );
    match video_resource_id {
        Some(id) => {
            fields.insert("videoResourceId".to_string(), json!(id));
            fields.insert("state".to_string(), json!("active"));
        }
        None => {
            fields.insert("videoResourceId".to_string(), Value::Null);
            fields.insert("state".to_string(), json!("retired"));
        }
    }
    build_record(EntityKind::Lesson, lesson.id, fields)
}

/// Map a legacy video asset. Assets without a playback id migrate as
/// `retired` placeholders so lessons can still link their history.
pub fn map_video(video: &LegacyVideo, _ctx: &MapContext) -> TargetRecord {
    let mut fields = Map::new();
    fields.insert("legacyId".to_string(), json!(video.id));
    fields.insert("title".to_string(), json!(video.title));
    fields.insert(
        "durationSeconds".to_string(),
        video
            .duration_seconds
            .map(Value::from)
            .unwrap_or(Value::Null),
    );
    match &video.playback_id {
        Some(playback_id) => {
            fields.insert("playbackId".to_string(), json!(playback_id));
            fields.insert("state".to_string(), json!("active"));
        }
        None => {
            fields.insert("playbackId".to_string(), Value::Null);
            fields.insert("state".to_string(), json!("retired"));
        }
    }
    build_record(EntityKind::Video, video.id, fields)
}
