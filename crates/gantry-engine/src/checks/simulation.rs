//! The two simulation levels (9 and 10).
//!
//! These are the only levels permitted to spawn behavioral simulations and
//! to be non-deterministic; the built-in implementations replay the job
//! graph deterministically but are still scheduled, retried, and classified
//! as integration checks.

use std::collections::HashMap;

use async_trait::async_trait;

use gantry_manifest::{DocumentSet, ManifestDoc};
use gantry_types::{LevelId, RawOutcome, Result};

use crate::check::CheckExecutable;
use crate::checks::topo_order_jobs;

// ---------------------------------------------------------------------------
// Level 9: pipeline-simulation
// ---------------------------------------------------------------------------

/// Replays the job graph end to end: jobs start as soon as their `needs` are
/// done, so the simulated wall-clock is the critical path through the
/// per-job estimates. A pipeline whose critical path exceeds its declared
/// budget is behaviorally broken.
#[derive(Debug)]
pub struct PipelineSimulationCheck;

impl PipelineSimulationCheck {
    /// Critical-path length in minutes, or the job names stuck in a cycle.
    fn critical_path_minutes(doc: &ManifestDoc) -> std::result::Result<u64, Vec<String>> {
        let order = topo_order_jobs(doc)?;
        let mut finish: HashMap<String, u64> = HashMap::new();
        for name in &order {
            let job = doc.job(name).expect("job from topo order");
            let ready = job
                .needs()
                .iter()
                .filter_map(|n| finish.get(*n))
                .max()
                .copied()
                .unwrap_or(0);
            finish.insert(name.clone(), ready + job.estimated_minutes());
        }
        Ok(finish.values().max().copied().unwrap_or(0))
    }
}

#[async_trait]
impl CheckExecutable for PipelineSimulationCheck {
    fn level_id(&self) -> LevelId {
        LevelId::new(9)
    }

    async fn run(&self, docs: &DocumentSet) -> Result<RawOutcome> {
        let docs = docs.snapshot().await;
        let mut violations = Vec::new();
        let mut simulated = Vec::new();
        for doc in docs.iter().filter(|d| d.is_well_formed()) {
            match Self::critical_path_minutes(doc) {
                Err(cycle) => violations.push(format!(
                    "{}: simulation cannot schedule jobs {:?}",
                    doc.name(),
                    cycle
                )),
                Ok(minutes) => {
                    let budget = doc.max_minutes();
                    tracing::debug!(
                        doc = doc.name(),
                        critical_path_minutes = minutes,
                        budget_minutes = budget,
                        "Simulated pipeline run"
                    );
                    if minutes > budget {
                        violations.push(format!(
                            "{}: simulated run takes {minutes}m, over the {budget}m budget",
                            doc.name()
                        ));
                    } else {
                        simulated.push(format!("{}={minutes}m", doc.name()));
                    }
                }
            }
        }
        Ok(if violations.is_empty() {
            RawOutcome::success(format!("simulated within budget: {}", simulated.join(", ")))
        } else {
            RawOutcome::failure(violations.join("; "))
        })
    }
}

// ---------------------------------------------------------------------------
// Level 10: release-rehearsal
// ---------------------------------------------------------------------------

/// Rehearses the release stage: every job tagged `stage: release` must sit
/// downstream of every job tagged `stage: test`, so nothing ships without
/// the full test surface having run first.
#[derive(Debug)]
pub struct ReleaseRehearsalCheck;

impl ReleaseRehearsalCheck {
    /// Transitive closure of `needs` for one job.
    fn upstream_of(doc: &ManifestDoc, name: &str) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        let mut stack: Vec<String> = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            let Some(job) = doc.job(&current) else {
                continue;
            };
            for need in job.needs() {
                if !seen.iter().any(|s| s == need) {
                    seen.push(need.to_string());
                    stack.push(need.to_string());
                }
            }
        }
        seen
    }
}

#[async_trait]
impl CheckExecutable for ReleaseRehearsalCheck {
    fn level_id(&self) -> LevelId {
        LevelId::new(10)
    }

    async fn run(&self, docs: &DocumentSet) -> Result<RawOutcome> {
        let docs = docs.snapshot().await;
        let mut violations = Vec::new();
        let mut rehearsed = 0usize;
        for doc in docs.iter().filter(|d| d.is_well_formed()) {
            let jobs = doc.jobs();
            let test_jobs: Vec<&str> = jobs
                .iter()
                .filter(|j| j.stage() == Some("test"))
                .map(|j| j.name)
                .collect();
            for release in jobs.iter().filter(|j| j.stage() == Some("release")) {
                rehearsed += 1;
                let upstream = Self::upstream_of(doc, release.name);
                for test in &test_jobs {
                    if !upstream.iter().any(|u| u == test) {
                        violations.push(format!(
                            "{}: release job '{}' does not wait for test job '{test}'",
                            doc.name(),
                            release.name
                        ));
                    }
                }
            }
        }
        Ok(if violations.is_empty() {
            RawOutcome::success(format!("{rehearsed} release jobs rehearsed"))
        } else {
            RawOutcome::failure(violations.join("; "))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(raw: &str) -> DocumentSet {
        DocumentSet::from_docs(vec![ManifestDoc::from_raw("pipeline", raw)])
    }

    #[tokio::test]
    async fn simulation_within_budget_passes() {
        let docs = set_of(
            r#"
name: p
version: 1
max_minutes: 30
jobs:
  build:
    steps: []
    estimated_minutes: 10
  test:
    needs: [build]
    steps: []
    estimated_minutes: 10
  lint:
    needs: [build]
    steps: []
    estimated_minutes: 15
"#,
        );
        let raw = PipelineSimulationCheck.run(&docs).await.unwrap();
        // Critical path: build(10) + lint(15) = 25m <= 30m.
        assert!(raw.is_success(), "{}", raw.message);
        assert!(raw.message.contains("pipeline=25m"));
    }

    #[tokio::test]
    async fn simulation_over_budget_fails() {
        let docs = set_of(
            "name: p\nversion: 1\nmax_minutes: 10\njobs:\n  build:\n    steps: []\n    estimated_minutes: 20\n",
        );
        let raw = PipelineSimulationCheck.run(&docs).await.unwrap();
        assert!(!raw.is_success());
        assert!(raw.message.contains("takes 20m, over the 10m budget"));
    }

    #[tokio::test]
    async fn simulation_cannot_schedule_cyclic_jobs() {
        let docs = set_of(
            "name: p\nversion: 1\njobs:\n  a:\n    needs: [b]\n    steps: []\n  b:\n    needs: [a]\n    steps: []\n",
        );
        let raw = PipelineSimulationCheck.run(&docs).await.unwrap();
        assert!(!raw.is_success());
        assert!(raw.message.contains("cannot schedule"));
    }

    #[tokio::test]
    async fn default_budget_is_sixty_minutes() {
        let docs = set_of(
            "name: p\nversion: 1\njobs:\n  slow:\n    steps: []\n    estimated_minutes: 61\n",
        );
        let raw = PipelineSimulationCheck.run(&docs).await.unwrap();
        assert!(!raw.is_success());
        assert!(raw.message.contains("over the 60m budget"));
    }

    #[tokio::test]
    async fn rehearsal_passes_when_release_waits_for_tests() {
        let docs = set_of(
            r#"
name: p
version: 1
jobs:
  unit:
    stage: test
    steps: []
  integration:
    stage: test
    steps: []
  package:
    needs: [unit, integration]
    steps: []
  ship:
    stage: release
    needs: [package]
    steps: []
"#,
        );
        let raw = ReleaseRehearsalCheck.run(&docs).await.unwrap();
        assert!(raw.is_success(), "{}", raw.message);
        assert!(raw.message.contains("1 release jobs rehearsed"));
    }

    #[tokio::test]
    async fn rehearsal_fails_when_release_skips_a_test() {
        let docs = set_of(
            r#"
name: p
version: 1
jobs:
  unit:
    stage: test
    steps: []
  integration:
    stage: test
    steps: []
  ship:
    stage: release
    needs: [unit]
    steps: []
"#,
        );
        let raw = ReleaseRehearsalCheck.run(&docs).await.unwrap();
        assert!(!raw.is_success());
        assert!(raw
            .message
            .contains("release job 'ship' does not wait for test job 'integration'"));
    }

    #[tokio::test]
    async fn rehearsal_trivially_passes_without_release_stage() {
        let docs = set_of("name: p\nversion: 1\njobs:\n  build:\n    steps: []\n");
        let raw = ReleaseRehearsalCheck.run(&docs).await.unwrap();
        assert!(raw.is_success());
        assert!(raw.message.contains("0 release jobs"));
    }
}
