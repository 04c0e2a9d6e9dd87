//! Selection Engine - staged, diversity-maximizing test-corpus growth
//!
//! Each phase selects exactly `target_count` candidates as a strict
//! superset of the previous phase, so a corpus can grow without ever
//! losing an item already staged. The greedy pass scores every remaining
//! candidate against what the selection still lacks (unrepresented
//! owners, unrepresented tags, under-target eras, extreme sizes) and
//! takes the best; ties resolve to input order, so the result is fully
//! deterministic.

use crate::error::{MigrateError, Result};
use crate::model::{Era, PhaseConstraint, SelectionCandidate};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Item counts at or below this score the small-extreme bonus
pub const SMALL_ITEM_COUNT: u32 = 3;
/// Item counts at or above this score the large-extreme bonus
pub const LARGE_ITEM_COUNT: u32 = 30;

const OWNER_BONUS: i64 = 10;
const TAG_BONUS: i64 = 1;
const ERA_BONUS: i64 = 5;
const EXTREME_SIZE_BONUS: i64 = 3;

/// Result of one phase: candidate indices in selection order (previous
/// phase first), plus the diversity reached
#[derive(Debug, Clone)]
pub struct Selection {
    pub indices: Vec<usize>,
    pub distinct_owners: usize,
    pub distinct_tags: usize,
    pub era_counts: HashMap<Era, usize>,
}

struct Coverage {
    owners: HashSet<i64>,
    tags: HashSet<String>,
    era_counts: HashMap<Era, usize>,
    selected_count: usize,
}

impl Coverage {
    fn new() -> Self {
        Self {
            owners: HashSet::new(),
            tags: HashSet::new(),
            era_counts: HashMap::new(),
            selected_count: 0,
        }
    }

    fn admit(&mut self, candidate: &SelectionCandidate) {
        self.owners.insert(candidate.owner_id);
        for tag in &candidate.tags {
            self.tags.insert(tag.clone());
        }
        *self.era_counts.entry(Era::of(candidate)).or_insert(0) += 1;
        self.selected_count += 1;
    }

    fn score(&self, candidate: &SelectionCandidate, constraint: &PhaseConstraint) -> i64 {
        let mut score = 0;

        if !self.owners.contains(&candidate.owner_id) {
            score += OWNER_BONUS;
        }
        score += candidate
            .tags
            .iter()
            .filter(|tag| !self.tags.contains(*tag))
            .count() as i64
            * TAG_BONUS;

        let era = Era::of(candidate);
        if let Some(target_fraction) = constraint.era_distribution.get(&era) {
            let have = *self.era_counts.get(&era).unwrap_or(&0) as f64;
            if have < target_fraction * self.selected_count as f64 {
                score += ERA_BONUS;
            }
        }

        if candidate.item_count <= SMALL_ITEM_COUNT || candidate.item_count >= LARGE_ITEM_COUNT {
            score += EXTREME_SIZE_BONUS;
        }

        score
    }
}

/// Build one phase's selection.
///
/// `previous` holds the candidate indices of the prior phase (empty for
/// the first). The superset guarantee is hard: every previous index is
/// seeded into the result before any greedy pick happens. Exhausting the
/// candidate pool before reaching `target_count` is an error carrying
/// both counts, never a silent shortfall.
pub fn select_phase(
    candidates: &[SelectionCandidate],
    constraint: &PhaseConstraint,
    previous: &[usize],
) -> Result<Selection> {
    let mut coverage = Coverage::new();
    let mut selected: Vec<usize> = Vec::with_capacity(constraint.target_count);
    let mut in_selection = vec![false; candidates.len()];

    for &index in previous {
        if index >= candidates.len() || in_selection[index] {
            continue;
        }
        in_selection[index] = true;
        coverage.admit(&candidates[index]);
        selected.push(index);
    }
    if selected.len() > constraint.target_count {
        warn!(
            "Previous phase already holds {} items, above the target of {}",
            selected.len(),
            constraint.target_count
        );
    }

    while selected.len() < constraint.target_count {
        let mut best: Option<(usize, i64)> = None;
        for (index, candidate) in candidates.iter().enumerate() {
            if in_selection[index] {
                continue;
            }
            let score = coverage.score(candidate, constraint);
            // Strict comparison keeps the first maximal candidate, so
            // ties break deterministically by input order
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((index, score)),
            }
        }

        match best {
            Some((index, _)) => {
                in_selection[index] = true;
                coverage.admit(&candidates[index]);
                selected.push(index);
            }
            None => {
                return Err(MigrateError::SelectionExhausted {
                    wanted: constraint.target_count,
                    selected: selected.len(),
                });
            }
        }
    }

    if coverage.owners.len() < constraint.min_owners {
        warn!(
            "Selection reached only {} distinct owners (constraint asks {})",
            coverage.owners.len(),
            constraint.min_owners
        );
    }
    if coverage.tags.len() < constraint.min_tags {
        warn!(
            "Selection reached only {} distinct tags (constraint asks {})",
            coverage.tags.len(),
            constraint.min_tags
        );
    }

    Ok(Selection {
        indices: selected,
        distinct_owners: coverage.owners.len(),
        distinct_tags: coverage.tags.len(),
        era_counts: coverage.era_counts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn candidate(slug: &str, owner: i64, items: u32, min_id: i64, tags: &[&str]) -> SelectionCandidate {
        SelectionCandidate {
            legacy_slug: slug.to_string(),
            owner_id: owner,
            item_count: items,
            min_item_id: min_id,
            max_item_id: min_id + 100,
            tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
        }
    }

    fn constraint(target: usize) -> PhaseConstraint {
        PhaseConstraint {
            target_count: target,
            min_owners: 1,
            min_tags: 1,
            era_distribution: BTreeMap::new(),
        }
    }

    fn pool() -> Vec<SelectionCandidate> {
        (0..40)
            .map(|i| {
                candidate(
                    &format!("course-{}", i),
                    i % 7,
                    5 + (i as u32 % 10),
                    i * 15_000,
                    &[["rust", "react", "sql", "go"][i as usize % 4]],
                )
            })
            .collect()
    }

    #[test]
    fn test_exact_count_when_candidates_suffice() {
        let candidates = pool();
        let selection = select_phase(&candidates, &constraint(12), &[]).unwrap();
        assert_eq!(selection.indices.len(), 12);
        // No duplicates
        let unique: HashSet<_> = selection.indices.iter().collect();
        assert_eq!(unique.len(), 12);
    }

    #[test]
    fn test_superset_across_phases() {
        let candidates = pool();
        let phase1 = select_phase(&candidates, &constraint(5), &[]).unwrap();
        let phase2 = select_phase(&candidates, &constraint(20), &phase1.indices).unwrap();

        assert_eq!(phase2.indices.len(), 20);
        let phase2_set: HashSet<_> = phase2.indices.iter().collect();
        for index in &phase1.indices {
            assert!(phase2_set.contains(index));
        }
        // Seeds come first, in their original order
        assert_eq!(&phase2.indices[..5], &phase1.indices[..]);
    }

    #[test]
    fn test_owner_diversity_preferred() {
        let candidates = vec![
            candidate("a", 1, 10, 0, &["rust"]),
            candidate("b", 1, 10, 0, &["rust"]),
            candidate("c", 2, 10, 0, &["rust"]),
        ];
        let selection = select_phase(&candidates, &constraint(2), &[]).unwrap();
        // First pick is index 0 (tie broken by input order), second must
        // be the new owner at index 2
        assert_eq!(selection.indices, vec![0, 2]);
        assert_eq!(selection.distinct_owners, 2);
    }

    #[test]
    fn test_deterministic_on_ties() {
        let candidates = pool();
        let a = select_phase(&candidates, &constraint(15), &[]).unwrap();
        let b = select_phase(&candidates, &constraint(15), &[]).unwrap();
        assert_eq!(a.indices, b.indices);
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let candidates = vec![candidate("only", 1, 5, 0, &["rust"])];
        let err = select_phase(&candidates, &constraint(3), &[]).unwrap_err();
        match err {
            MigrateError::SelectionExhausted { wanted, selected } => {
                assert_eq!(wanted, 3);
                assert_eq!(selected, 1);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_extreme_sizes_attract() {
        let candidates = vec![
            candidate("mid", 1, 10, 0, &[]),
            candidate("tiny", 2, 2, 0, &[]),
            candidate("mid2", 3, 12, 0, &[]),
        ];
        let selection = select_phase(&candidates, &constraint(1), &[]).unwrap();
        // All are new owners with no tags; only "tiny" earns the extreme
        // size bonus
        assert_eq!(selection.indices, vec![1]);
    }

    #[test]
    fn test_era_bonus_pulls_under_target_era() {
        let mut era_distribution = BTreeMap::new();
        era_distribution.insert(Era::Recent, 0.5);
        let constraint = PhaseConstraint {
            target_count: 2,
            min_owners: 1,
            min_tags: 0,
            era_distribution,
        };
        // Same owner and tags so only era differentiates after the seed
        let candidates = vec![
            candidate("early-a", 1, 10, 0, &[]),
            candidate("early-b", 1, 10, 0, &[]),
            candidate("recent", 1, 10, 500_000, &[]),
        ];
        let selection = select_phase(&candidates, &constraint, &[0]).unwrap();
        assert_eq!(selection.indices, vec![0, 2]);
    }
}
