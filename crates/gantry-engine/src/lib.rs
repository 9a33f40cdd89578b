//! Staged validation engine for CI/CD pipeline-definition documents.
//!
//! This crate implements the core gantry engine: the ten-level registry,
//! Kahn-layered execution planning, the group-barrier parallel executor with
//! per-level timeouts, taxonomy classification, the append-only trace
//! collector, auto-remediation, robustness scoring, and the five-mode
//! orchestrator.

pub mod check;
pub mod checks;
pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod plan;
pub mod registry;
pub mod remediation;
pub mod retry;
pub mod scorer;
pub mod taxonomy;
pub mod trace;

pub use check::{CheckExecutable, CheckRegistry, DynCheck};
pub use checks::builtin_checks;
pub use events::{EngineEvent, EventEmitter, Phase};
pub use executor::{EngineConfig, Executor};
pub use orchestrator::{Mode, ModeConfig, OrchestrationContext, Orchestrator, RunReport};
pub use plan::{build_plan, ExecutionGroup, ExecutionPlan};
pub use registry::{LevelRegistry, ValidationLevel};
pub use remediation::attempt_fix;
pub use retry::{BackoffPolicy, RetrySchedule, RetryState};
pub use scorer::{Fixture, RobustnessScorer};
pub use taxonomy::classify;
pub use trace::TraceCollector;
