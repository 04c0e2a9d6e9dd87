//! Progress Store - reactive projection of a run's event stream
//!
//! A pure reducer folds migration events into per-entity counters; the
//! store wraps it with per-offset idempotence (duplicate delivery of an
//! already-applied offset is a no-op) and subscriber fan-out so a
//! dashboard, a log tail, and a test can observe the same projection
//! without knowing about each other.

use crate::model::EntityKind;
use crate::stream::event::MigrationEvent;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Idle,
    Running,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityProgress {
    pub total: u64,
    pub current: u64,
    pub failed: u64,
    pub status: EntityStatus,
}

impl Default for EntityProgress {
    fn default() -> Self {
        Self {
            total: 0,
            current: 0,
            failed: 0,
            status: EntityStatus::Idle,
        }
    }
}

/// One per-record failure surfaced by the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub entity: EntityKind,
    pub legacy_id: i64,
    pub error: String,
    pub timestamp: i64,
}

/// Projection state: per-entity counters, accumulated errors, and the
/// last applied offset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressState {
    pub entities: BTreeMap<EntityKind, EntityProgress>,
    pub errors: Vec<ErrorRecord>,
    pub last_offset: Option<u64>,
}

impl ProgressState {
    /// Fold one event into the state. Pure with respect to the event;
    /// offset bookkeeping lives in `ProgressStore`.
    pub fn apply(&mut self, event: &MigrationEvent) {
        match event {
            MigrationEvent::Start { entity, total, .. } => {
                let p = self.entities.entry(*entity).or_default();
                p.total = *total;
                p.status = EntityStatus::Running;
            }
            MigrationEvent::Progress {
                entity, current, total, ..
            } => {
                let p = self.entities.entry(*entity).or_default();
                p.total = *total;
                // Progress snapshots are authoritative but never move
                // the counter backwards past successes already seen
                p.current = p.current.max(*current);
            }
            MigrationEvent::Success { entity, .. } => {
                let p = self.entities.entry(*entity).or_default();
                p.current += 1;
            }
            MigrationEvent::Error {
                entity,
                legacy_id,
                error,
                timestamp,
            } => {
                let p = self.entities.entry(*entity).or_default();
                p.failed += 1;
                self.errors.push(ErrorRecord {
                    entity: *entity,
                    legacy_id: *legacy_id,
                    error: error.clone(),
                    timestamp: *timestamp,
                });
            }
            MigrationEvent::Complete {
                entity,
                migrated,
                failed,
                ..
            } => {
                let p = self.entities.entry(*entity).or_default();
                p.current = *migrated;
                p.failed = *failed;
                p.status = EntityStatus::Complete;
            }
            // Operator markers; counters are unaffected
            MigrationEvent::Checkpoint { .. } => {}
        }
    }

    pub fn entity(&self, kind: EntityKind) -> EntityProgress {
        self.entities.get(&kind).cloned().unwrap_or_default()
    }
}

pub type SubscriptionId = usize;

type Subscriber = Box<dyn Fn(&ProgressState) + Send + Sync>;

/// Shared projection with offset idempotence and subscriber fan-out
pub struct ProgressStore {
    state: Mutex<ProgressState>,
    subscribers: Mutex<HashMap<SubscriptionId, Subscriber>>,
    next_subscription: AtomicUsize,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProgressState::default()),
            subscribers: Mutex::new(HashMap::new()),
            next_subscription: AtomicUsize::new(1),
        }
    }

    /// Apply the event at the given stream offset. Offsets at or below
    /// the last applied one are duplicates and leave state unchanged.
    /// Returns whether the event was applied.
    pub fn apply_at(&self, offset: u64, event: &MigrationEvent) -> bool {
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            if state.last_offset.map(|last| offset <= last).unwrap_or(false) {
                return false;
            }
            state.apply(event);
            state.last_offset = Some(offset);
            state.clone()
        };
        let subscribers = self.subscribers.lock().unwrap();
        for subscriber in subscribers.values() {
            subscriber(&snapshot);
        }
        true
    }

    pub fn snapshot(&self) -> ProgressState {
        self.state.lock().unwrap().clone()
    }

    /// Register an observer called with a snapshot after every applied
    /// event
    pub fn subscribe(&self, subscriber: impl Fn(&ProgressState) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap()
            .insert(id, Box::new(subscriber));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().unwrap().remove(&id);
    }
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    #[test]
    fn test_reducer_counts_lifecycle() {
        let mut state = ProgressState::default();
        state.apply(&MigrationEvent::start(EntityKind::Tag, 3));
        state.apply(&MigrationEvent::success(EntityKind::Tag, 1, "T-1"));
        state.apply(&MigrationEvent::success(EntityKind::Tag, 2, "T-2"));
        state.apply(&MigrationEvent::error(EntityKind::Tag, 3, "boom"));
        state.apply(&MigrationEvent::complete(EntityKind::Tag, 2, 1, 50));

        let p = state.entity(EntityKind::Tag);
        assert_eq!(p.total, 3);
        assert_eq!(p.current, 2);
        assert_eq!(p.failed, 1);
        assert_eq!(p.status, EntityStatus::Complete);
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.errors[0].legacy_id, 3);
    }

    #[test]
    fn test_duplicate_offset_is_ignored() {
        let store = ProgressStore::new();
        let event = MigrationEvent::success(EntityKind::Tag, 1, "T-1");

        assert!(store.apply_at(0, &MigrationEvent::start(EntityKind::Tag, 2)));
        assert!(store.apply_at(1, &event));
        // Duplicate delivery of offset 1 must not double-count
        assert!(!store.apply_at(1, &event));
        assert!(!store.apply_at(0, &MigrationEvent::start(EntityKind::Tag, 2)));

        assert_eq!(store.snapshot().entity(EntityKind::Tag).current, 1);
        assert_eq!(store.snapshot().last_offset, Some(1));
    }

    #[test]
    fn test_subscribers_observe_applied_events() {
        let store = ProgressStore::new();
        let seen = Arc::new(AtomicU64::new(0));

        let seen_clone = seen.clone();
        let id = store.subscribe(move |state| {
            seen_clone.store(state.entity(EntityKind::Course).current, Ordering::SeqCst);
        });

        store.apply_at(0, &MigrationEvent::success(EntityKind::Course, 1, "C-1"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        store.unsubscribe(id);
        store.apply_at(1, &MigrationEvent::success(EntityKind::Course, 2, "C-2"));
        // Unsubscribed: no further notifications
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_progress_snapshot_never_regresses() {
        let mut state = ProgressState::default();
        for i in 0..5 {
            state.apply(&MigrationEvent::success(EntityKind::Lesson, i, "L"));
        }
        state.apply(&MigrationEvent::progress(EntityKind::Lesson, 3, 10));
        assert_eq!(state.entity(EntityKind::Lesson).current, 5);
        state.apply(&MigrationEvent::progress(EntityKind::Lesson, 8, 10));
        assert_eq!(state.entity(EntityKind::Lesson).current, 8);
    }
}
