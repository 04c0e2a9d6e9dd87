//! Migration Event - the closed sum type appended to run streams
//!
//! Wire format is newline-delimited JSON, one event per line, with a
//! `type` discriminator and an epoch-millisecond `timestamp`. The enum is
//! deliberately closed: every consumer matches exhaustively, never via a
//! free-form map.

use crate::error::Result;
use crate::model::EntityKind;
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MigrationEvent {
    /// A kind's migration began
    Start {
        entity: EntityKind,
        total: u64,
        timestamp: i64,
    },
    /// Periodic batch progress within a kind
    Progress {
        entity: EntityKind,
        current: u64,
        total: u64,
        timestamp: i64,
    },
    /// One record migrated (or found already migrated on a re-run)
    Success {
        entity: EntityKind,
        #[serde(rename = "legacyId")]
        legacy_id: i64,
        #[serde(rename = "newId")]
        new_id: String,
        timestamp: i64,
    },
    /// One record failed; the batch continues
    Error {
        entity: EntityKind,
        #[serde(rename = "legacyId")]
        legacy_id: i64,
        error: String,
        timestamp: i64,
    },
    /// A kind's migration finished
    Complete {
        entity: EntityKind,
        migrated: u64,
        failed: u64,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
        timestamp: i64,
    },
    /// Operator-written marker carrying an offset and opaque state
    Checkpoint {
        offset: u64,
        state: serde_json::Value,
        timestamp: i64,
    },
}

impl MigrationEvent {
    pub fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    pub fn start(entity: EntityKind, total: u64) -> Self {
        MigrationEvent::Start {
            entity,
            total,
            timestamp: Self::now_ms(),
        }
    }

    pub fn progress(entity: EntityKind, current: u64, total: u64) -> Self {
        MigrationEvent::Progress {
            entity,
            current,
            total,
            timestamp: Self::now_ms(),
        }
    }

    pub fn success(entity: EntityKind, legacy_id: i64, new_id: impl Into<String>) -> Self {
        MigrationEvent::Success {
            entity,
            legacy_id,
            new_id: new_id.into(),
            timestamp: Self::now_ms(),
        }
    }

    pub fn error(entity: EntityKind, legacy_id: i64, error: impl Into<String>) -> Self {
        MigrationEvent::Error {
            entity,
            legacy_id,
            error: error.into(),
            timestamp: Self::now_ms(),
        }
    }

    pub fn complete(entity: EntityKind, migrated: u64, failed: u64, duration_ms: u64) -> Self {
        MigrationEvent::Complete {
            entity,
            migrated,
            failed,
            duration_ms,
            timestamp: Self::now_ms(),
        }
    }

    /// Entity the event concerns, if any (checkpoints are stream-level)
    pub fn entity(&self) -> Option<EntityKind> {
        match self {
            MigrationEvent::Start { entity, .. }
            | MigrationEvent::Progress { entity, .. }
            | MigrationEvent::Success { entity, .. }
            | MigrationEvent::Error { entity, .. }
            | MigrationEvent::Complete { entity, .. } => Some(*entity),
            MigrationEvent::Checkpoint { .. } => None,
        }
    }

    /// Encode as one ndjson line (no trailing newline)
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode one ndjson line
    pub fn decode(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

/// Encode a batch as a self-delimiting ndjson body; partial reads stay
/// parseable line-by-line.
pub fn encode_batch(events: &[MigrationEvent]) -> Result<String> {
    let mut body = String::new();
    for event in events {
        body.push_str(&event.encode()?);
        body.push('\n');
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_discriminator_and_fields() {
        let event = MigrationEvent::success(EntityKind::Tag, 42, "T-1");
        let line = event.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "success");
        assert_eq!(value["entity"], "tag");
        assert_eq!(value["legacyId"], 42);
        assert_eq!(value["newId"], "T-1");
        assert!(value["timestamp"].as_i64().unwrap() > 0);

        let decoded = MigrationEvent::decode(&line).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_complete_round_trip() {
        let event = MigrationEvent::complete(EntityKind::Lesson, 90, 3, 1234);
        let line = event.encode().unwrap();
        assert!(line.contains("\"durationMs\":1234"));
        assert_eq!(MigrationEvent::decode(&line).unwrap(), event);
    }

    #[test]
    fn test_batch_is_line_delimited() {
        let events = vec![
            MigrationEvent::start(EntityKind::Tag, 10),
            MigrationEvent::progress(EntityKind::Tag, 5, 10),
        ];
        let body = encode_batch(&events).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(MigrationEvent::decode(lines[0]).unwrap(), events[0]);
        assert_eq!(MigrationEvent::decode(lines[1]).unwrap(), events[1]);
    }
}
