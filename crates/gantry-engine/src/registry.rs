//! The static catalogue of validation levels.
//!
//! Levels are defined once at registry construction and never mutated at
//! runtime. Construction validates the dependency declarations: a cycle or a
//! reference to a non-existent id is a fatal configuration error, not a
//! runtime validation failure.

use std::collections::{BTreeSet, HashMap, VecDeque};

use gantry_types::{Category, GantryError, LevelId, Result};

/// One validation level: identity, classification axis, and scheduling
/// metadata. `retryable` is true only for the two simulation levels.
#[derive(Debug, Clone)]
pub struct ValidationLevel {
    pub id: LevelId,
    pub name: &'static str,
    pub mandatory: bool,
    pub depends_on: &'static [u8],
    pub retryable: bool,
    pub category: Category,
}

impl ValidationLevel {
    pub fn dependency_ids(&self) -> impl Iterator<Item = LevelId> + '_ {
        self.depends_on.iter().map(|&id| LevelId::new(id))
    }
}

/// The built-in ten-level catalogue. Levels 1-8 are static inspections over
/// the document set; levels 9-10 spawn the scheduling and release
/// simulations and are the only levels permitted to be non-deterministic.
const BUILTIN_LEVELS: &[ValidationLevel] = &[
    ValidationLevel {
        id: LevelId::new(1),
        name: "document-syntax",
        mandatory: true,
        depends_on: &[],
        retryable: false,
        category: Category::Syntax,
    },
    ValidationLevel {
        id: LevelId::new(2),
        name: "access-permissions",
        mandatory: true,
        depends_on: &[],
        retryable: false,
        category: Category::Permissions,
    },
    ValidationLevel {
        id: LevelId::new(3),
        name: "required-fields",
        mandatory: true,
        depends_on: &[1],
        retryable: false,
        category: Category::Syntax,
    },
    ValidationLevel {
        id: LevelId::new(4),
        name: "job-references",
        mandatory: true,
        depends_on: &[3],
        retryable: false,
        category: Category::Logic,
    },
    ValidationLevel {
        id: LevelId::new(5),
        name: "trigger-rules",
        mandatory: false,
        depends_on: &[3],
        retryable: false,
        category: Category::Logic,
    },
    ValidationLevel {
        id: LevelId::new(6),
        name: "resource-limits",
        mandatory: true,
        depends_on: &[3],
        retryable: false,
        category: Category::Resource,
    },
    ValidationLevel {
        id: LevelId::new(7),
        name: "artifact-cache",
        mandatory: false,
        depends_on: &[6],
        retryable: false,
        category: Category::Resource,
    },
    ValidationLevel {
        id: LevelId::new(8),
        name: "secret-bindings",
        mandatory: true,
        depends_on: &[2],
        retryable: false,
        category: Category::Permissions,
    },
    ValidationLevel {
        id: LevelId::new(9),
        name: "pipeline-simulation",
        mandatory: true,
        depends_on: &[1, 2, 3, 4, 6, 8],
        retryable: true,
        category: Category::Integration,
    },
    ValidationLevel {
        id: LevelId::new(10),
        name: "release-rehearsal",
        mandatory: true,
        depends_on: &[9],
        retryable: true,
        category: Category::Integration,
    },
];

/// Immutable catalogue of validation levels, keyed by id.
#[derive(Debug)]
pub struct LevelRegistry {
    levels: Vec<ValidationLevel>,
    by_id: HashMap<LevelId, usize>,
}

impl LevelRegistry {
    /// The built-in ten-level registry. Infallible for the shipped table;
    /// the same validation runs as for any other level set.
    pub fn builtin() -> Self {
        Self::from_levels(BUILTIN_LEVELS.to_vec())
            .expect("built-in level table is statically valid")
    }

    /// Build a registry from an explicit level table, rejecting duplicate
    /// ids, dependencies on non-existent ids, and dependency cycles.
    pub fn from_levels(levels: Vec<ValidationLevel>) -> Result<Self> {
        let mut by_id = HashMap::new();
        for (idx, level) in levels.iter().enumerate() {
            if by_id.insert(level.id, idx).is_some() {
                return Err(GantryError::Registry(format!(
                    "duplicate level id {}",
                    level.id
                )));
            }
        }
        for level in &levels {
            for dep in level.dependency_ids() {
                if !by_id.contains_key(&dep) {
                    return Err(GantryError::UnknownDependency {
                        level: level.id.get(),
                        dependency: dep.get(),
                    });
                }
                if dep == level.id {
                    return Err(GantryError::DependencyCycle {
                        levels: vec![level.id.get()],
                    });
                }
            }
        }

        let registry = Self { levels, by_id };
        registry.reject_cycles()?;
        Ok(registry)
    }

    /// Kahn elimination over the full table; whatever cannot be eliminated
    /// is part of a cycle.
    fn reject_cycles(&self) -> Result<()> {
        let mut in_degree: HashMap<LevelId, usize> = self
            .levels
            .iter()
            .map(|l| (l.id, l.depends_on.len()))
            .collect();
        let mut queue: VecDeque<LevelId> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut eliminated = 0usize;
        while let Some(id) = queue.pop_front() {
            eliminated += 1;
            for level in &self.levels {
                if level.dependency_ids().any(|d| d == id) {
                    let entry = in_degree.get_mut(&level.id).expect("known level");
                    *entry -= 1;
                    if *entry == 0 {
                        queue.push_back(level.id);
                    }
                }
            }
        }

        if eliminated < self.levels.len() {
            let mut stuck: Vec<u8> = in_degree
                .iter()
                .filter(|(_, &d)| d > 0)
                .map(|(id, _)| id.get())
                .collect();
            stuck.sort_unstable();
            return Err(GantryError::DependencyCycle { levels: stuck });
        }
        Ok(())
    }

    pub fn all_levels(&self) -> &[ValidationLevel] {
        &self.levels
    }

    pub fn level_by_id(&self, id: LevelId) -> Result<&ValidationLevel> {
        self.by_id
            .get(&id)
            .map(|&idx| &self.levels[idx])
            .ok_or(GantryError::UnknownLevel(id.get()))
    }

    pub fn contains(&self, id: LevelId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn mandatory_levels(&self) -> Vec<&ValidationLevel> {
        self.levels.iter().filter(|l| l.mandatory).collect()
    }

    /// All level ids as an ordered set.
    pub fn all_ids(&self) -> BTreeSet<LevelId> {
        self.levels.iter().map(|l| l.id).collect()
    }
}
