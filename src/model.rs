//! Core data model for the migration pipeline
//!
//! Legacy records are read-only snapshots of source rows. Target records
//! are the generic content-resource shape written to the new store. The
//! mapping record is the durable proof that a legacy row has been
//! migrated, and to which target id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Entity kinds handled by the pipeline, migrated in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Tag,
    Course,
    Lesson,
    Video,
}

impl EntityKind {
    /// Migration order: later kinds reference earlier kinds' target ids.
    /// Courses reference tags; lessons reference courses and videos, so
    /// video assets must exist before the lessons that link them.
    pub fn ordered() -> [EntityKind; 4] {
        [
            EntityKind::Tag,
            EntityKind::Course,
            EntityKind::Video,
            EntityKind::Lesson,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Tag => "tag",
            EntityKind::Course => "course",
            EntityKind::Lesson => "lesson",
            EntityKind::Video => "video",
        }
    }

    /// Mapping table backing this kind in the local store
    pub fn mapping_table(&self) -> &'static str {
        match self {
            EntityKind::Tag => "tag_mappings",
            EntityKind::Course => "course_mappings",
            EntityKind::Lesson => "lesson_mappings",
            EntityKind::Video => "video_mappings",
        }
    }

    /// Authority when two kinds compete for the same slug in the target
    /// namespace. Lower wins: an existing course keeps its slug against a
    /// lesson claiming the same one.
    pub fn priority(&self) -> u8 {
        match self {
            EntityKind::Tag => 0,
            EntityKind::Course => 1,
            EntityKind::Lesson => 2,
            EntityKind::Video => 3,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Legacy taxonomy tag row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyTag {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

/// Legacy course row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyCourse {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub instructor_id: i64,
    /// Source access-level enum, free-form string in the legacy schema
    pub access_level: Option<String>,
    pub tag_ids: Vec<i64>,
}

/// Legacy lesson row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyLesson {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub course_id: i64,
    /// Missing when the lesson never had a playable video
    pub video_id: Option<i64>,
    pub access_level: Option<String>,
    /// Position of the lesson within its course
    pub position: i32,
}

/// Legacy video asset row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyVideo {
    pub id: i64,
    pub title: String,
    pub duration_seconds: Option<i64>,
    /// Playback identifier at the video provider; absent means the asset
    /// is not playable
    pub playback_id: Option<String>,
}

/// A legacy record of any kind, carried through the generic executor path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LegacyRecord {
    Tag(LegacyTag),
    Course(LegacyCourse),
    Lesson(LegacyLesson),
    Video(LegacyVideo),
}

impl LegacyRecord {
    pub fn kind(&self) -> EntityKind {
        match self {
            LegacyRecord::Tag(_) => EntityKind::Tag,
            LegacyRecord::Course(_) => EntityKind::Course,
            LegacyRecord::Lesson(_) => EntityKind::Lesson,
            LegacyRecord::Video(_) => EntityKind::Video,
        }
    }

    pub fn legacy_id(&self) -> i64 {
        match self {
            LegacyRecord::Tag(t) => t.id,
            LegacyRecord::Course(c) => c.id,
            LegacyRecord::Lesson(l) => l.id,
            LegacyRecord::Video(v) => v.id,
        }
    }

    /// External identity in the target namespace; videos are addressed by
    /// playback id, not slug, so they never compete for slugs.
    pub fn slug(&self) -> Option<&str> {
        match self {
            LegacyRecord::Tag(t) => Some(&t.slug),
            LegacyRecord::Course(c) => Some(&c.slug),
            LegacyRecord::Lesson(l) => Some(&l.slug),
            LegacyRecord::Video(_) => None,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            LegacyRecord::Tag(t) => &t.name,
            LegacyRecord::Course(c) => &c.title,
            LegacyRecord::Lesson(l) => &l.title,
            LegacyRecord::Video(v) => &v.title,
        }
    }
}

/// Generic content resource written to the target store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRecord {
    /// Opaque id, generated once and never reused
    pub id: String,
    pub kind: EntityKind,
    /// Open field bag; always includes the provenance sub-record
    pub fields: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TargetRecord {
    /// Slug claimed by this record in the target namespace, if any
    pub fn slug(&self) -> Option<&str> {
        self.fields.get("slug").and_then(|v| v.as_str())
    }
}

/// Ordered parent→child relationship in the target store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetLink {
    pub parent_id: String,
    pub child_id: String,
    pub position: i32,
}

/// Durable proof that a legacy record has been migrated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingRecord {
    pub kind: EntityKind,
    pub legacy_id: i64,
    pub target_id: String,
    pub legacy_slug: Option<String>,
    pub legacy_title: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One course-like grouping available for staged selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionCandidate {
    pub legacy_slug: String,
    pub owner_id: i64,
    pub item_count: u32,
    pub min_item_id: i64,
    pub max_item_id: i64,
    pub tags: BTreeSet<String>,
}

/// Era of a candidate, derived from its item-id range against fixed
/// boundaries. Item ids grow monotonically in the source system, so the
/// id midpoint is a stable proxy for age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Era {
    Early,
    Middle,
    Recent,
}

impl Era {
    /// Item ids below this are Early
    pub const MIDDLE_BOUNDARY: i64 = 100_000;
    /// Item ids below this (and at or above MIDDLE_BOUNDARY) are Middle
    pub const RECENT_BOUNDARY: i64 = 400_000;

    pub fn of(candidate: &SelectionCandidate) -> Era {
        let midpoint = (candidate.min_item_id + candidate.max_item_id) / 2;
        if midpoint < Self::MIDDLE_BOUNDARY {
            Era::Early
        } else if midpoint < Self::RECENT_BOUNDARY {
            Era::Middle
        } else {
            Era::Recent
        }
    }
}

/// Declarative goal for one stage of staged selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConstraint {
    pub target_count: usize,
    pub min_owners: usize,
    pub min_tags: usize,
    /// Desired fraction of the selection per era; fractions need not sum
    /// to 1.0, unmentioned eras carry no bonus
    pub era_distribution: BTreeMap<Era, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_order_and_priority() {
        let order = EntityKind::ordered();
        assert_eq!(order[0], EntityKind::Tag);
        // Videos precede the lessons that reference them
        assert_eq!(order[2], EntityKind::Video);
        assert_eq!(order[3], EntityKind::Lesson);
        assert!(EntityKind::Course.priority() < EntityKind::Lesson.priority());
    }

    #[test]
    fn test_era_boundaries() {
        let mut c = SelectionCandidate {
            legacy_slug: "intro".to_string(),
            owner_id: 1,
            item_count: 10,
            min_item_id: 10,
            max_item_id: 20,
            tags: BTreeSet::new(),
        };
        assert_eq!(Era::of(&c), Era::Early);
        c.min_item_id = 200_000;
        c.max_item_id = 300_000;
        assert_eq!(Era::of(&c), Era::Middle);
        c.min_item_id = 500_000;
        c.max_item_id = 600_000;
        assert_eq!(Era::of(&c), Era::Recent);
    }
}
