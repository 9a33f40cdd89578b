//! The workflow orchestrator: five operational modes over the engine.
//!
//! Each mode is a strategy over `(requested levels, fail_fast,
//! continue_on_failure, retry_enabled)`. The lifecycle is
//! `Idle → Planning → Executing → (Remediating)* → Reporting → Terminal`,
//! surfaced through engine events. All run state travels in an explicit
//! [`OrchestrationContext`] value; there is no process-wide mutable
//! singleton.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

use uuid::Uuid;

use gantry_manifest::DocumentSet;
use gantry_types::{ExecutionResult, GantryError, LevelId, Result, TaxonomyKind};

use crate::check::CheckRegistry;
use crate::events::{EngineEvent, EventEmitter, Phase};
use crate::executor::{EngineConfig, Executor};
use crate::plan::{build_plan, ExecutionPlan};
use crate::registry::LevelRegistry;
use crate::trace::TraceCollector;

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

/// The five operational modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Quick,
    Standard,
    Full,
    Custom,
    Incremental,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Quick => "quick",
            Mode::Standard => "standard",
            Mode::Full => "full",
            Mode::Custom => "custom",
            Mode::Incremental => "incremental",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = GantryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "quick" => Ok(Mode::Quick),
            "standard" => Ok(Mode::Standard),
            "full" => Ok(Mode::Full),
            "custom" => Ok(Mode::Custom),
            "incremental" => Ok(Mode::Incremental),
            other => Err(GantryError::Other(format!(
                "unknown mode '{other}' (expected quick|standard|full|custom|incremental)"
            ))),
        }
    }
}

fn id_range(from: u8, to: u8) -> BTreeSet<LevelId> {
    (from..=to).map(LevelId::new).collect()
}

/// A mode resolved to its concrete strategy.
#[derive(Debug, Clone)]
pub struct ModeConfig {
    pub mode: Mode,
    pub levels: BTreeSet<LevelId>,
    pub fail_fast: bool,
    pub continue_on_failure: bool,
    pub retry_enabled: bool,
}

impl ModeConfig {
    pub fn quick() -> Self {
        Self {
            mode: Mode::Quick,
            levels: id_range(1, 2),
            fail_fast: true,
            continue_on_failure: false,
            retry_enabled: false,
        }
    }

    pub fn standard() -> Self {
        Self {
            mode: Mode::Standard,
            levels: id_range(1, 8),
            fail_fast: true,
            continue_on_failure: false,
            retry_enabled: false,
        }
    }

    pub fn full() -> Self {
        Self {
            mode: Mode::Full,
            levels: id_range(1, 10),
            fail_fast: true,
            continue_on_failure: false,
            retry_enabled: true,
        }
    }

    pub fn custom(levels: BTreeSet<LevelId>) -> Self {
        Self {
            mode: Mode::Custom,
            levels,
            fail_fast: true,
            continue_on_failure: false,
            retry_enabled: false,
        }
    }

    pub fn incremental(levels: Option<BTreeSet<LevelId>>) -> Self {
        Self {
            mode: Mode::Incremental,
            levels: levels.unwrap_or_else(|| id_range(1, 10)),
            fail_fast: false,
            continue_on_failure: true,
            retry_enabled: false,
        }
    }

    /// Resolve a mode name plus an optional user-specified level list. Only
    /// `custom` and `incremental` accept a list; `custom` requires one.
    pub fn resolve(mode: Mode, user_levels: Option<BTreeSet<LevelId>>) -> Result<Self> {
        match (mode, user_levels) {
            (Mode::Quick, None) => Ok(Self::quick()),
            (Mode::Standard, None) => Ok(Self::standard()),
            (Mode::Full, None) => Ok(Self::full()),
            (Mode::Custom, Some(levels)) if !levels.is_empty() => Ok(Self::custom(levels)),
            (Mode::Custom, _) => Err(GantryError::Other(
                "custom mode requires a non-empty level list".into(),
            )),
            (Mode::Incremental, levels) => Ok(Self::incremental(levels)),
            (mode, Some(_)) => Err(GantryError::Other(format!(
                "{mode} mode does not accept a level list"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// OrchestrationContext
// ---------------------------------------------------------------------------

/// The explicit, passed-down value carrying one run's state: identity, mode
/// strategy, the plan, the trace collector handle, and the event emitter.
pub struct OrchestrationContext {
    pub run_id: Uuid,
    pub mode: ModeConfig,
    pub plan: ExecutionPlan,
    pub trace: TraceCollector,
    pub events: EventEmitter,
}

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

/// Terminal report of one orchestration run. Counts reflect each level's
/// final verdict (the last record per level); `results` keeps the complete
/// attempt history.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: Mode,
    pub total_run: usize,
    pub passed: usize,
    pub failed: usize,
    pub failed_by_kind: BTreeMap<TaxonomyKind, usize>,
    pub skipped: usize,
    pub wall_time: Duration,
    pub results: Vec<ExecutionResult>,
}

impl RunReport {
    fn from_results(
        run_id: Uuid,
        mode: Mode,
        results: Vec<ExecutionResult>,
        wall_time: Duration,
    ) -> Self {
        // Later records overwrite earlier ones, leaving the final verdict
        // per level.
        let finals: BTreeMap<LevelId, &ExecutionResult> =
            results.iter().map(|r| (r.level, r)).collect();

        let mut passed = 0;
        let mut skipped = 0;
        let mut failed_by_kind: BTreeMap<TaxonomyKind, usize> = BTreeMap::new();
        for record in finals.values() {
            match record.verdict.kind() {
                None => skipped += 1,
                Some(TaxonomyKind::Success) => passed += 1,
                Some(kind) => *failed_by_kind.entry(kind).or_insert(0) += 1,
            }
        }
        let failed: usize = failed_by_kind.values().sum();

        Self {
            run_id,
            mode,
            total_run: passed + failed,
            passed,
            failed,
            failed_by_kind,
            skipped,
            wall_time,
            results,
        }
    }

    /// Final verdict per level, in level order.
    pub fn final_results(&self) -> Vec<&ExecutionResult> {
        let finals: BTreeMap<LevelId, &ExecutionResult> =
            self.results.iter().map(|r| (r.level, r)).collect();
        finals.into_values().collect()
    }

    /// Process exit code: the highest-severity taxonomy exit code among
    /// non-skipped final results that were not eventually resolved to
    /// success. 0 when everything passed or was successfully remediated.
    pub fn exit_code(&self) -> i32 {
        self.final_results()
            .iter()
            .filter(|r| r.verdict.is_failure())
            .map(|r| r.exit_code)
            .max()
            .unwrap_or(0)
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == 0
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Top-level supervisor: resolves a mode, builds the plan, drives the
/// executor, and aggregates the terminal report.
pub struct Orchestrator {
    registry: LevelRegistry,
    executor: Executor,
    events: EventEmitter,
}

impl Orchestrator {
    /// Orchestrator over the built-in levels and checks.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let events = EventEmitter::new(config.event_capacity);
        Self {
            registry: LevelRegistry::builtin(),
            executor: Executor::with_builtin_checks(config),
            events,
        }
    }

    /// Orchestrator over explicit parts, for embedding custom level tables
    /// and check executables.
    pub fn with_parts(registry: LevelRegistry, checks: CheckRegistry, config: EngineConfig) -> Self {
        let events = EventEmitter::new(config.event_capacity);
        Self {
            registry,
            executor: Executor::new(checks, config),
            events,
        }
    }

    pub fn registry(&self) -> &LevelRegistry {
        &self.registry
    }

    /// Subscribe to engine events before starting a run.
    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Run one orchestration. A fresh trace log is created per invocation;
    /// pass `trace_sink` to also stream NDJSON records to a file.
    pub async fn run(
        &self,
        mode: ModeConfig,
        docs: &DocumentSet,
        trace_sink: Option<&Path>,
    ) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();

        self.events.emit(EngineEvent::RunStarted {
            run_id: run_id.to_string(),
            mode: mode.mode.to_string(),
            level_count: mode.levels.len(),
        });
        self.events.emit(EngineEvent::PhaseChanged {
            phase: Phase::Planning,
        });
        tracing::info!(
            run_id = %run_id,
            mode = %mode.mode,
            levels = mode.levels.len(),
            "Orchestration started"
        );

        let plan = build_plan(&self.registry, &mode.levels)?;
        self.events.emit(EngineEvent::PlanBuilt {
            groups: plan
                .groups
                .iter()
                .map(|g| g.levels.iter().map(|id| id.get()).collect())
                .collect(),
        });

        let trace = match trace_sink {
            Some(path) => TraceCollector::with_sink(path)?,
            None => TraceCollector::new(),
        };
        let ctx = OrchestrationContext {
            run_id,
            mode: mode.clone(),
            plan,
            trace,
            events: self.events.clone(),
        };

        self.events.emit(EngineEvent::PhaseChanged {
            phase: Phase::Executing,
        });
        let results = self.executor.execute(&self.registry, docs, &ctx).await?;

        self.events.emit(EngineEvent::PhaseChanged {
            phase: Phase::Reporting,
        });
        let report = RunReport::from_results(run_id, mode.mode, results, started.elapsed());
        self.events.emit(EngineEvent::RunCompleted {
            run_id: run_id.to_string(),
            passed: report.passed,
            failed: report.failed,
            skipped: report.skipped,
            duration_ms: report.wall_time.as_millis() as u64,
        });
        self.events.emit(EngineEvent::PhaseChanged {
            phase: Phase::Terminal,
        });
        tracing::info!(
            run_id = %run_id,
            passed = report.passed,
            failed = report.failed,
            skipped = report.skipped,
            exit_code = report.exit_code(),
            "Orchestration finished"
        );
        Ok(report)
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}
