//! Execution planning: Kahn-style topological layering of a requested level
//! subset into maximal concurrent groups.
//!
//! Dependencies on levels outside the requested subset are treated as
//! already satisfied; the caller is responsible for requesting a
//! dependency-closed subset when it wants the full ordering. The simulation
//! levels are pinned to their own trailing single-level groups by explicit
//! scheduling policy, not by dependency shape.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use gantry_types::{GantryError, LevelId, Result};

use crate::registry::LevelRegistry;

/// A maximal set of levels whose dependencies are already satisfied and
/// which may therefore run concurrently. No internal ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionGroup {
    pub levels: Vec<LevelId>,
}

impl ExecutionGroup {
    pub fn new(mut levels: Vec<LevelId>) -> Self {
        levels.sort_unstable();
        Self { levels }
    }

    pub fn contains(&self, id: LevelId) -> bool {
        self.levels.contains(&id)
    }
}

/// An ordered sequence of execution groups. Built fresh per orchestration
/// run, never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub groups: Vec<ExecutionGroup>,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn level_count(&self) -> usize {
        self.groups.iter().map(|g| g.levels.len()).sum()
    }

    /// Index of the group a level belongs to, if planned.
    pub fn group_of(&self, id: LevelId) -> Option<usize> {
        self.groups.iter().position(|g| g.contains(id))
    }

    /// All planned level ids, in group order.
    pub fn all_levels(&self) -> Vec<LevelId> {
        self.groups
            .iter()
            .flat_map(|g| g.levels.iter().copied())
            .collect()
    }
}

/// Compile the requested subset into an ordered plan.
///
/// An empty subset yields a zero-group plan; the orchestrator short-circuits
/// that to an empty success.
pub fn build_plan(registry: &LevelRegistry, requested: &BTreeSet<LevelId>) -> Result<ExecutionPlan> {
    for &id in requested {
        if !registry.contains(id) {
            return Err(GantryError::UnknownLevel(id.get()));
        }
    }
    if requested.is_empty() {
        return Ok(ExecutionPlan { groups: Vec::new() });
    }

    // Scheduling policy: retryable simulation levels never share a group.
    // They are split off and appended as trailing single-level groups in id
    // order, regardless of what their dependency edges alone would allow.
    let mut pinned: Vec<LevelId> = Vec::new();
    let mut body: BTreeSet<LevelId> = BTreeSet::new();
    for &id in requested {
        if registry.level_by_id(id)?.retryable {
            pinned.push(id);
        } else {
            body.insert(id);
        }
    }
    pinned.sort_unstable();

    // Kahn layering over the body. In-degrees count only dependencies that
    // are themselves in the body; everything else is already satisfied.
    let mut remaining: HashMap<LevelId, usize> = HashMap::new();
    for &id in &body {
        let level = registry.level_by_id(id)?;
        let in_degree = level
            .dependency_ids()
            .filter(|dep| body.contains(dep))
            .count();
        remaining.insert(id, in_degree);
    }

    let mut groups: Vec<ExecutionGroup> = Vec::new();
    while !remaining.is_empty() {
        let ready: Vec<LevelId> = remaining
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();
        if ready.is_empty() {
            // Unreachable for a registry that passed cycle validation; kept
            // as a hard error rather than an infinite loop.
            let mut stuck: Vec<u8> = remaining.keys().map(|id| id.get()).collect();
            stuck.sort_unstable();
            return Err(GantryError::DependencyCycle { levels: stuck });
        }
        for id in &ready {
            remaining.remove(id);
        }
        for (&id, degree) in remaining.iter_mut() {
            let level = registry.level_by_id(id)?;
            let satisfied = level
                .dependency_ids()
                .filter(|dep| ready.contains(dep))
                .count();
            *degree -= satisfied;
        }
        groups.push(ExecutionGroup::new(ready));
    }

    for id in pinned {
        groups.push(ExecutionGroup::new(vec![id]));
    }

    Ok(ExecutionPlan { groups })
}
