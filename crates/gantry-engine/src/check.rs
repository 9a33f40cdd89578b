//! The check executable contract and the registry of per-level executables.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use gantry_manifest::DocumentSet;
use gantry_types::{GantryError, LevelId, RawOutcome, Result};

/// The uniform interface every validation level satisfies: given the
/// document set under validation, produce a raw `(exit_status, message)`
/// signal. The executable does not know about the taxonomy; classification
/// happens downstream from the level's declared category.
///
/// Levels 1-8 must be read-only over the document set. Levels 9-10 (the
/// simulation levels) are the only ones permitted to be non-deterministic.
#[async_trait]
pub trait CheckExecutable: Send + Sync + std::fmt::Debug {
    /// The level this executable implements.
    fn level_id(&self) -> LevelId;

    /// Run the check. A returned `Err` means the check itself broke; the
    /// executor folds it into a failing raw outcome so every invocation
    /// still classifies.
    async fn run(&self, docs: &DocumentSet) -> Result<RawOutcome>;
}

/// Shared handle to a check executable, cloneable into execution tasks.
pub type DynCheck = Arc<dyn CheckExecutable>;

/// Fixed table of check executables keyed by level id.
pub struct CheckRegistry {
    checks: HashMap<LevelId, DynCheck>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self {
            checks: HashMap::new(),
        }
    }

    /// Registry wired with the ten built-in executables.
    pub fn builtin() -> Self {
        let mut reg = Self::new();
        for check in crate::checks::builtin_checks() {
            reg.register(check);
        }
        reg
    }

    pub fn register(&mut self, check: DynCheck) {
        self.checks.insert(check.level_id(), check);
    }

    pub fn get(&self, id: LevelId) -> Result<DynCheck> {
        self.checks
            .get(&id)
            .cloned()
            .ok_or(GantryError::MissingExecutable(id.get()))
    }

    pub fn has(&self, id: LevelId) -> bool {
        self.checks.contains_key(&id)
    }
}

impl Default for CheckRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NoopCheck(u8);

    #[async_trait]
    impl CheckExecutable for NoopCheck {
        fn level_id(&self) -> LevelId {
            LevelId::new(self.0)
        }

        async fn run(&self, _docs: &DocumentSet) -> Result<RawOutcome> {
            Ok(RawOutcome::success("noop"))
        }
    }

    #[test]
    fn register_and_get() {
        let mut reg = CheckRegistry::new();
        reg.register(Arc::new(NoopCheck(3)));
        assert!(reg.has(LevelId::new(3)));
        assert!(reg.get(LevelId::new(3)).is_ok());
        let err = reg.get(LevelId::new(4)).unwrap_err();
        assert!(matches!(err, GantryError::MissingExecutable(4)));
    }

    #[test]
    fn builtin_registry_covers_all_ten_levels() {
        let reg = CheckRegistry::builtin();
        for id in 1..=10u8 {
            assert!(reg.has(LevelId::new(id)), "missing executable for level {id}");
        }
    }

    #[test]
    fn register_replaces_existing_level() {
        let mut reg = CheckRegistry::new();
        reg.register(Arc::new(NoopCheck(5)));
        reg.register(Arc::new(NoopCheck(5)));
        assert!(reg.has(LevelId::new(5)));
        assert_eq!(reg.checks.len(), 1);
    }
}
