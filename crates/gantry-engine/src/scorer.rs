//! Robustness scoring: repeated fixture runs reduced to a composite score.
//!
//! The scorer is a batch consumer separate from the live orchestration path.
//! It executes one level against fixtures with known-correct classifications
//! `runs_per_fixture` times each and accumulates four sub-metrics:
//! consistency, reliability, coverage, and latency stability. Fixtures are
//! never mutated.

use std::collections::BTreeSet;
use std::path::Path;

use gantry_manifest::DocumentSet;
use gantry_types::{GantryError, Result, RobustnessMetrics, TaxonomyKind};

use crate::check::CheckRegistry;
use crate::executor::{run_level, EngineConfig};
use crate::registry::ValidationLevel;

/// A document set with its known-correct taxonomy outcome for one level.
#[derive(Debug)]
pub struct Fixture {
    pub name: String,
    pub docs: DocumentSet,
    pub expected: TaxonomyKind,
}

impl Fixture {
    /// Load one fixture directory: its YAML documents plus an `expected.txt`
    /// naming the known-correct taxonomy kind.
    pub fn load(dir: &Path) -> Result<Self> {
        let name = dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        let expected_path = dir.join("expected.txt");
        let expected_raw =
            std::fs::read_to_string(&expected_path).map_err(|e| GantryError::Fixture {
                name: name.clone(),
                message: format!("cannot read {}: {e}", expected_path.display()),
            })?;
        let expected = expected_raw
            .trim()
            .parse::<TaxonomyKind>()
            .map_err(|e| GantryError::Fixture {
                name: name.clone(),
                message: e.to_string(),
            })?;
        let docs = DocumentSet::load(dir)?;
        Ok(Self {
            name,
            docs,
            expected,
        })
    }

    /// Load every subdirectory of `parent` as a fixture, in name order.
    pub fn load_all(parent: &Path) -> Result<Vec<Self>> {
        let mut dirs: Vec<_> = std::fs::read_dir(parent)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();
        if dirs.is_empty() {
            return Err(GantryError::Fixture {
                name: parent.display().to_string(),
                message: "no fixture subdirectories found".into(),
            });
        }
        dirs.iter().map(|d| Self::load(d)).collect()
    }
}

/// Runs levels against fixtures and reduces the observations to a
/// [`RobustnessMetrics`].
pub struct RobustnessScorer {
    checks: CheckRegistry,
    config: EngineConfig,
}

impl RobustnessScorer {
    pub fn new(checks: CheckRegistry, config: EngineConfig) -> Self {
        Self { checks, config }
    }

    pub fn with_builtin_checks(config: EngineConfig) -> Self {
        Self::new(CheckRegistry::builtin(), config)
    }

    /// Execute `level` against each fixture `runs_per_fixture` times and
    /// compute the composite metrics.
    pub async fn score(
        &self,
        level: &ValidationLevel,
        fixtures: &[Fixture],
        runs_per_fixture: usize,
    ) -> Result<RobustnessMetrics> {
        if fixtures.is_empty() || runs_per_fixture == 0 {
            return Err(GantryError::Fixture {
                name: level.name.to_string(),
                message: "scoring needs at least one fixture and one run".into(),
            });
        }

        let check = self.checks.get(level.id)?;
        let mut per_fixture_kinds: Vec<Vec<TaxonomyKind>> = Vec::with_capacity(fixtures.len());
        let mut matching_runs = 0usize;
        let mut total_runs = 0usize;
        let mut durations: Vec<f64> = Vec::new();

        for fixture in fixtures {
            let mut kinds = Vec::with_capacity(runs_per_fixture);
            for attempt in 1..=runs_per_fixture {
                let record = run_level(
                    check.clone(),
                    level.clone(),
                    fixture.docs.clone(),
                    self.config.level_timeout,
                    attempt as u32,
                )
                .await;
                let kind = record
                    .verdict
                    .kind()
                    .expect("run_level always classifies");
                if record.exit_code == fixture.expected.exit_code() {
                    matching_runs += 1;
                }
                total_runs += 1;
                durations.push(record.duration.as_secs_f64());
                kinds.push(kind);
            }
            tracing::debug!(
                level = %level.id,
                fixture = %fixture.name,
                expected = %fixture.expected,
                observed = ?kinds,
                "Scored fixture"
            );
            per_fixture_kinds.push(kinds);
        }

        let consistency = per_fixture_kinds
            .iter()
            .map(|kinds| modal_share(kinds))
            .sum::<f64>()
            / per_fixture_kinds.len() as f64;
        let reliability = matching_runs as f64 / total_runs as f64;
        let observed: BTreeSet<TaxonomyKind> =
            per_fixture_kinds.iter().flatten().copied().collect();
        let coverage = observed.len() as f64 / TaxonomyKind::ALL.len() as f64;
        let latency = latency_stability(&durations);

        Ok(RobustnessMetrics {
            consistency,
            reliability,
            coverage,
            latency,
        })
    }
}

/// Share of runs that produced the modal outcome: 1.0 when every run agrees.
fn modal_share(kinds: &[TaxonomyKind]) -> f64 {
    if kinds.is_empty() {
        return 0.0;
    }
    let max_count = TaxonomyKind::ALL
        .iter()
        .map(|k| kinds.iter().filter(|observed| *observed == k).count())
        .max()
        .unwrap_or(0);
    max_count as f64 / kinds.len() as f64
}

/// 1 minus the normalized variance of durations (variance over squared
/// mean, clamped to [0, 1]). Identical durations score 1.0; jitter pulls
/// the score strictly below 1.0.
fn latency_stability(durations: &[f64]) -> f64 {
    if durations.len() < 2 {
        return 1.0;
    }
    let n = durations.len() as f64;
    let mean = durations.iter().sum::<f64>() / n;
    if mean <= f64::EPSILON {
        return 1.0;
    }
    let variance = durations.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
    let normalized = (variance / (mean * mean)).clamp(0.0, 1.0);
    1.0 - normalized
}
