//! Shared types for the gantry validation engine.
//!
//! This crate provides the foundational types used across all other gantry crates:
//! - `GantryError` — unified error type
//! - `LevelId` / `Category` — validation level identity and classification axis
//! - `TaxonomyKind` — the closed six-kind outcome taxonomy with fixed exit codes
//! - `ExecutionResult` — one record per check invocation, append-only once traced
//! - `RemediationAction` / `RobustnessMetrics` — remediation and scoring records

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unified error type for all gantry subsystems.
#[derive(Debug, thiserror::Error)]
pub enum GantryError {
    // === Registry / plan errors (fatal configuration, not runtime failures) ===
    #[error("Registry configuration error: {0}")]
    Registry(String),

    #[error("Level {level} declares a dependency on unknown level {dependency}")]
    UnknownDependency { level: u8, dependency: u8 },

    #[error("Dependency cycle among levels {levels:?}")]
    DependencyCycle { levels: Vec<u8> },

    #[error("Unknown level id {0} (valid ids are 1-10)")]
    UnknownLevel(u8),

    #[error("No check executable registered for level {0}")]
    MissingExecutable(u8),

    // === Document errors ===
    #[error("Document '{path}': {message}")]
    Document { path: String, message: String },

    #[error("No pipeline-definition documents found under '{0}'")]
    EmptyDocumentSet(String),

    // === Execution errors ===
    #[error("Execution task aborted: {0}")]
    TaskAborted(String),

    #[error("Fixture '{name}': {message}")]
    Fixture { name: String, message: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl GantryError {
    /// Returns `true` for errors that indicate a broken configuration rather
    /// than a failing validation run. These are never retried or remediated.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            GantryError::Registry(_)
                | GantryError::UnknownDependency { .. }
                | GantryError::DependencyCycle { .. }
                | GantryError::UnknownLevel(_)
                | GantryError::MissingExecutable(_)
        )
    }
}

/// A convenience alias for `Result<T, GantryError>`.
pub type Result<T> = std::result::Result<T, GantryError>;

// ---------------------------------------------------------------------------
// LevelId — identity of a validation level
// ---------------------------------------------------------------------------

/// Identifier of a validation level (1-10 in the built-in registry).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LevelId(pub u8);

impl LevelId {
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for LevelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u8> for LevelId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Category — the classification axis declared per level at registry time
// ---------------------------------------------------------------------------

/// The failure classification a level is declared with. The taxonomy mapper
/// never inspects message text; a non-zero raw exit maps to the level's
/// category, fixed at registry construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Syntax,
    Permissions,
    Resource,
    Logic,
    Integration,
}

impl Category {
    /// The taxonomy kind a failure of this category maps to.
    pub fn failure_kind(self) -> TaxonomyKind {
        match self {
            Category::Syntax => TaxonomyKind::Syntax,
            Category::Permissions => TaxonomyKind::Permissions,
            Category::Resource => TaxonomyKind::Resource,
            Category::Logic => TaxonomyKind::Logic,
            Category::Integration => TaxonomyKind::Integration,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Syntax => "syntax",
            Category::Permissions => "permissions",
            Category::Resource => "resource",
            Category::Logic => "logic",
            Category::Integration => "integration",
        };
        f.pad(s)
    }
}

// ---------------------------------------------------------------------------
// TaxonomyKind — the closed six-kind outcome taxonomy
// ---------------------------------------------------------------------------

/// Every check invocation resolves to exactly one of these six kinds.
/// Exit codes are fixed: Success=0, Syntax=1, Permissions=2, Resource=3,
/// Logic=4, Integration=5.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaxonomyKind {
    Success,
    Syntax,
    Permissions,
    Resource,
    Logic,
    Integration,
}

/// Whether a failure kind admits a deterministic corrective patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fixability {
    AutoFixable,
    ManualOnly,
}

impl TaxonomyKind {
    /// The fixed numeric exit code for this kind.
    pub fn exit_code(self) -> i32 {
        match self {
            TaxonomyKind::Success => 0,
            TaxonomyKind::Syntax => 1,
            TaxonomyKind::Permissions => 2,
            TaxonomyKind::Resource => 3,
            TaxonomyKind::Logic => 4,
            TaxonomyKind::Integration => 5,
        }
    }

    /// Fixability of this kind; `None` for `Success`.
    pub fn fixability(self) -> Option<Fixability> {
        match self {
            TaxonomyKind::Success => None,
            TaxonomyKind::Syntax | TaxonomyKind::Resource => Some(Fixability::AutoFixable),
            TaxonomyKind::Permissions | TaxonomyKind::Logic | TaxonomyKind::Integration => {
                Some(Fixability::ManualOnly)
            }
        }
    }

    pub fn is_success(self) -> bool {
        self == TaxonomyKind::Success
    }

    pub fn is_auto_fixable(self) -> bool {
        self.fixability() == Some(Fixability::AutoFixable)
    }

    /// All six kinds, in exit-code order.
    pub const ALL: [TaxonomyKind; 6] = [
        TaxonomyKind::Success,
        TaxonomyKind::Syntax,
        TaxonomyKind::Permissions,
        TaxonomyKind::Resource,
        TaxonomyKind::Logic,
        TaxonomyKind::Integration,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaxonomyKind::Success => "success",
            TaxonomyKind::Syntax => "syntax",
            TaxonomyKind::Permissions => "permissions",
            TaxonomyKind::Resource => "resource",
            TaxonomyKind::Logic => "logic",
            TaxonomyKind::Integration => "integration",
        }
    }
}

impl fmt::Display for TaxonomyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TaxonomyKind {
    type Err = GantryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "success" => Ok(TaxonomyKind::Success),
            "syntax" => Ok(TaxonomyKind::Syntax),
            "permissions" => Ok(TaxonomyKind::Permissions),
            "resource" => Ok(TaxonomyKind::Resource),
            "logic" => Ok(TaxonomyKind::Logic),
            "integration" => Ok(TaxonomyKind::Integration),
            other => Err(GantryError::Other(format!(
                "unknown taxonomy kind '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// RawOutcome — the untranslated signal a check executable emits
// ---------------------------------------------------------------------------

/// The raw `(exit_status, message)` pair a check executable returns. The
/// executable does not know about the taxonomy; mapping happens downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOutcome {
    pub exit_status: i32,
    pub message: String,
}

impl RawOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_status: 0,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            exit_status: 1,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_status == 0
    }
}

// ---------------------------------------------------------------------------
// Verdict / ExecutionResult — one record per check invocation
// ---------------------------------------------------------------------------

/// Terminal state of a level within one orchestration run. `Skipped` is
/// distinct from any classified outcome: a skipped level's executable was
/// never invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "kind", rename_all = "snake_case")]
pub enum Verdict {
    Classified(TaxonomyKind),
    Skipped,
}

impl Verdict {
    pub fn is_success(self) -> bool {
        matches!(self, Verdict::Classified(TaxonomyKind::Success))
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Verdict::Classified(k) if k != TaxonomyKind::Success)
    }

    pub fn is_skipped(self) -> bool {
        matches!(self, Verdict::Skipped)
    }

    /// The classified kind, if the level actually ran.
    pub fn kind(self) -> Option<TaxonomyKind> {
        match self {
            Verdict::Classified(k) => Some(k),
            Verdict::Skipped => None,
        }
    }

    /// String form used in trace records: the kind name, or `"skipped"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Classified(k) => k.as_str(),
            Verdict::Skipped => "skipped",
        }
    }
}

/// One record per check executable invocation (or per skip decision).
/// Immutable once appended to the trace collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub level: LevelId,
    /// 1-based attempt number; 0 for skipped records (nothing was attempted).
    pub attempt: u32,
    /// Raw exit status from the executable; absent for skipped records.
    pub raw_exit: Option<i32>,
    pub verdict: Verdict,
    /// Taxonomy exit code (0 for skipped records, which never carry failure).
    pub exit_code: i32,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub message: String,
    pub remediation_attempted: bool,
}

impl ExecutionResult {
    /// Record for a level that ran to a classified outcome.
    pub fn classified(
        level: LevelId,
        attempt: u32,
        raw_exit: i32,
        kind: TaxonomyKind,
        duration: Duration,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            attempt,
            raw_exit: Some(raw_exit),
            verdict: Verdict::Classified(kind),
            exit_code: kind.exit_code(),
            duration,
            timestamp: chrono::Utc::now(),
            message: message.into(),
            remediation_attempted: false,
        }
    }

    /// Record for a level whose executable exceeded the hard timeout. The
    /// executable produced no raw signal; the kind is forced to
    /// `Integration` regardless of the level's own category.
    pub fn forced_timeout(
        level: LevelId,
        attempt: u32,
        duration: Duration,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            attempt,
            raw_exit: None,
            verdict: Verdict::Classified(TaxonomyKind::Integration),
            exit_code: TaxonomyKind::Integration.exit_code(),
            duration,
            timestamp: chrono::Utc::now(),
            message: message.into(),
            remediation_attempted: false,
        }
    }

    /// Record for a level whose executable was never invoked (fail-fast skip).
    pub fn skipped(level: LevelId, message: impl Into<String>) -> Self {
        Self {
            level,
            attempt: 0,
            raw_exit: None,
            verdict: Verdict::Skipped,
            exit_code: 0,
            duration: Duration::ZERO,
            timestamp: chrono::Utc::now(),
            message: message.into(),
            remediation_attempted: false,
        }
    }

    pub fn with_remediation_attempted(mut self) -> Self {
        self.remediation_attempted = true;
        self
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

// ---------------------------------------------------------------------------
// RemediationAction — terminal record of one auto-fix attempt
// ---------------------------------------------------------------------------

/// Created by the remediation engine for an auto-fixable failure. Terminal
/// after the single post-fix re-run; never retried for the same failure
/// instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationAction {
    pub level: LevelId,
    /// Name of the patched pipeline-definition document.
    pub document: String,
    /// Human-readable description of the patch.
    pub description: String,
    /// `false` when the target condition already held and nothing changed.
    pub applied: bool,
}

// ---------------------------------------------------------------------------
// RobustnessMetrics — composite score over repeated fixture runs
// ---------------------------------------------------------------------------

/// Sub-metric weights for the composite robustness score.
pub const WEIGHT_CONSISTENCY: f64 = 0.50;
pub const WEIGHT_RELIABILITY: f64 = 0.25;
pub const WEIGHT_COVERAGE: f64 = 0.15;
pub const WEIGHT_LATENCY: f64 = 0.10;

/// Derived, read-only aggregate over N repeated execution result sets for
/// the same fixtures. Each sub-metric lies in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RobustnessMetrics {
    /// Fraction of runs producing the modal taxonomy outcome, per fixture.
    pub consistency: f64,
    /// Fraction of runs whose exit code matches the fixture's known-correct one.
    pub reliability: f64,
    /// Fraction of the six taxonomy kinds observed across all fixtures.
    pub coverage: f64,
    /// 1 minus the normalized variance of duration across runs.
    pub latency: f64,
}

impl RobustnessMetrics {
    /// Weighted composite in `[0.0, 1.0]`.
    pub fn overall(&self) -> f64 {
        WEIGHT_CONSISTENCY * self.consistency
            + WEIGHT_RELIABILITY * self.reliability
            + WEIGHT_COVERAGE * self.coverage
            + WEIGHT_LATENCY * self.latency
    }

    /// Composite as a 0-100 percentage.
    pub fn overall_percent(&self) -> f64 {
        self.overall() * 100.0
    }
}
