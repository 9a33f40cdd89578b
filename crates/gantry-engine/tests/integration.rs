//! End-to-end tests over the public engine API: full orchestration runs
//! against documents on disk, exercising planning, parallel execution,
//! classification, remediation, retry, and reporting together.

use std::collections::BTreeSet;
use std::time::Duration;

use gantry_engine::retry::BackoffPolicy;
use gantry_engine::{EngineConfig, Mode, ModeConfig, Orchestrator, RetrySchedule};
use gantry_manifest::DocumentSet;
use gantry_types::{LevelId, TaxonomyKind, Verdict};

fn write_docs(dir: &std::path::Path, files: &[(&str, &str)]) -> DocumentSet {
    for (name, content) in files {
        std::fs::write(dir.join(name), content).unwrap();
    }
    DocumentSet::load(dir).unwrap()
}

fn fast_orchestrator() -> Orchestrator {
    Orchestrator::with_config(EngineConfig {
        level_timeout: Duration::from_secs(5),
        retry_schedule: RetrySchedule::new(3, BackoffPolicy::None),
        event_capacity: 256,
    })
}

const CLEAN_PIPELINE: &str = r#"
name: billing-ci
version: 1
max_minutes: 60
secrets: [DEPLOY_KEY]
triggers:
  - push
jobs:
  build:
    steps: [{run: cargo build}]
    resources: {cpu: "2", memory: 1Gi}
    estimated_minutes: 10
  unit:
    stage: test
    needs: [build]
    steps: [{run: cargo test}]
    resources: {cpu: "2", memory: 1Gi}
    estimated_minutes: 10
  ship:
    stage: release
    needs: [unit]
    steps: [{run: cargo publish}]
    resources: {cpu: "1", memory: 512Mi}
    secrets: [DEPLOY_KEY]
    estimated_minutes: 5
"#;

// Scenario: a clean document set passes all ten levels under full mode.
#[tokio::test]
async fn full_mode_passes_clean_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let docs = write_docs(dir.path(), &[("billing.yml", CLEAN_PIPELINE)]);

    let report = fast_orchestrator()
        .run(ModeConfig::full(), &docs, None)
        .await
        .unwrap();

    assert_eq!(report.mode, Mode::Full);
    assert_eq!(report.total_run, 10);
    assert_eq!(report.passed, 10);
    assert_eq!(report.failed, 0);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.exit_code(), 0);
}

// Scenario 1 from the design notes: document missing a required top-level
// field fails level 1 as Syntax, is auto-remediated, re-runs to success, and
// the final exit code is 0.
#[tokio::test]
async fn missing_top_level_field_is_remediated_to_success() {
    let dir = tempfile::tempdir().unwrap();
    // No `name` and no `version`.
    let docs = write_docs(
        dir.path(),
        &[("pipeline.yml", "jobs:\n  build:\n    steps: []\n")],
    );

    let report = fast_orchestrator()
        .run(
            ModeConfig::resolve(Mode::Custom, Some([LevelId::new(1)].into_iter().collect()))
                .unwrap(),
            &docs,
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.exit_code(), 0);
    // Two records for level 1: the Syntax failure, then the remediated pass.
    assert_eq!(report.results.len(), 2);
    assert_eq!(
        report.results[0].verdict,
        Verdict::Classified(TaxonomyKind::Syntax)
    );
    assert_eq!(report.results[0].exit_code, 1);
    assert!(report.results[1].verdict.is_success());
    assert!(report.results[1].remediation_attempted);

    // The documented defaults landed on disk.
    let patched = std::fs::read_to_string(dir.path().join("pipeline.yml")).unwrap();
    assert!(patched.contains("name: pipeline"));
    assert!(patched.contains("version: 1"));
}

// Scenario 2: a job missing its resource bounds fails level 6 as Resource,
// is auto-fixed with the category defaults, and the re-run succeeds.
#[tokio::test]
async fn missing_resource_limits_are_remediated() {
    let dir = tempfile::tempdir().unwrap();
    let docs = write_docs(
        dir.path(),
        &[(
            "pipeline.yml",
            "name: p\nversion: 1\njobs:\n  build:\n    steps: [{run: make}]\n",
        )],
    );

    let report = fast_orchestrator()
        .run(
            ModeConfig::resolve(Mode::Custom, Some([LevelId::new(6)].into_iter().collect()))
                .unwrap(),
            &docs,
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.exit_code(), 0);
    assert_eq!(
        report.results[0].verdict,
        Verdict::Classified(TaxonomyKind::Resource)
    );
    assert_eq!(report.results[0].exit_code, 3);
    assert!(report.results[1].verdict.is_success());

    let patched = std::fs::read_to_string(dir.path().join("pipeline.yml")).unwrap();
    assert!(patched.contains("cpu: '1'") || patched.contains("cpu: \"1\""));
    assert!(patched.contains("memory: 512Mi"));
}

// Scenario 3: a job dependency cycle fails level 4 as Logic; no remediation
// is attempted and the final exit code is 4.
#[tokio::test]
async fn job_cycle_is_logic_failure_without_remediation() {
    let dir = tempfile::tempdir().unwrap();
    let docs = write_docs(
        dir.path(),
        &[(
            "pipeline.yml",
            "name: p\nversion: 1\njobs:\n  a:\n    needs: [b]\n    steps: []\n  b:\n    needs: [a]\n    steps: []\n",
        )],
    );

    let report = fast_orchestrator()
        .run(
            ModeConfig::resolve(Mode::Custom, Some([LevelId::new(4)].into_iter().collect()))
                .unwrap(),
            &docs,
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.exit_code(), 4);
    assert_eq!(report.results.len(), 1, "logic failures are never re-run");
    assert!(!report.results[0].remediation_attempted);
    assert_eq!(
        report.failed_by_kind.get(&TaxonomyKind::Logic),
        Some(&1usize)
    );
}

// Scenario 4: quick mode on a document failing level 2 halts with level 2's
// exit code.
#[tokio::test]
async fn quick_mode_reports_permission_failure() {
    let dir = tempfile::tempdir().unwrap();
    let docs = write_docs(
        dir.path(),
        &[(
            "pipeline.yml",
            "name: p\nversion: 1\njobs:\n  build:\n    steps: []\n    permissions:\n      contents: admin\n",
        )],
    );

    let report = fast_orchestrator()
        .run(ModeConfig::quick(), &docs, None)
        .await
        .unwrap();

    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.total_run, 2);
    assert_eq!(report.passed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 0, "quick mode requests no further groups");
}

// Scenario 5: incremental mode over levels 1-3 with level 2 failing reports
// passed=2, failed=1, skipped=0.
#[tokio::test]
async fn incremental_counts_pass_fail_without_skips() {
    let dir = tempfile::tempdir().unwrap();
    let docs = write_docs(
        dir.path(),
        &[(
            "pipeline.yml",
            "name: p\nversion: 1\njobs:\n  build:\n    steps: []\n    permissions:\n      contents: admin\n",
        )],
    );

    let levels: BTreeSet<LevelId> = [1, 2, 3].into_iter().map(LevelId::new).collect();
    let report = fast_orchestrator()
        .run(
            ModeConfig::resolve(Mode::Incremental, Some(levels)).unwrap(),
            &docs,
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.passed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 0);
    assert_eq!(
        report.failed_by_kind.get(&TaxonomyKind::Permissions),
        Some(&1usize)
    );
    assert_eq!(report.exit_code(), 2);
}

// Fail-fast vs incremental over the same failing fixture: standard mode
// skips the groups after the mandatory Logic failure, incremental runs
// everything to completion.
#[tokio::test]
async fn fail_fast_and_incremental_differ_on_skips() {
    let cyclic = "name: p\nversion: 1\njobs:\n  a:\n    needs: [b]\n    steps: []\n  b:\n    needs: [a]\n    steps: []\n";

    let dir = tempfile::tempdir().unwrap();
    let docs = write_docs(dir.path(), &[("pipeline.yml", cyclic)]);
    let standard = fast_orchestrator()
        .run(ModeConfig::standard(), &docs, None)
        .await
        .unwrap();

    // Level 4 fails in its group; level 7's group never starts.
    assert!(standard.failed >= 1);
    let skipped: Vec<u8> = standard
        .final_results()
        .iter()
        .filter(|r| r.verdict.is_skipped())
        .map(|r| r.level.get())
        .collect();
    assert_eq!(skipped, vec![7]);
    assert_eq!(standard.exit_code(), 4);

    let dir2 = tempfile::tempdir().unwrap();
    let docs2 = write_docs(dir2.path(), &[("pipeline.yml", cyclic)]);
    let incremental = fast_orchestrator()
        .run(ModeConfig::incremental(None), &docs2, None)
        .await
        .unwrap();

    assert_eq!(incremental.skipped, 0, "incremental never fail-fast-cancels");
    // Levels 4 (cycle) and 9 (simulation cannot schedule) fail on their own
    // terms; every other level, level 7 included, still runs.
    assert_eq!(incremental.total_run, 10);
}

// Full-mode retry: a pipeline whose simulated critical path exceeds its
// budget fails level 9 three times (retry budget exhausted) and the final
// exit code is Integration's.
#[tokio::test]
async fn full_mode_retries_simulation_until_budget_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let docs = write_docs(
        dir.path(),
        &[(
            "pipeline.yml",
            r#"
name: p
version: 1
max_minutes: 10
jobs:
  build:
    steps: [{run: make}]
    resources: {cpu: "1", memory: 512Mi}
    estimated_minutes: 45
"#,
        )],
    );

    let report = fast_orchestrator()
        .run(ModeConfig::full(), &docs, None)
        .await
        .unwrap();

    let level9: Vec<_> = report
        .results
        .iter()
        .filter(|r| r.level == LevelId::new(9))
        .collect();
    assert_eq!(level9.len(), 3, "three total attempts under full mode");
    assert_eq!(
        level9.iter().map(|r| r.attempt).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(level9.iter().all(|r| r.verdict.is_failure()));

    // Level 10 sits in a later group and is skipped by fail-fast.
    let level10 = report
        .final_results()
        .into_iter()
        .find(|r| r.level == LevelId::new(10))
        .unwrap()
        .clone();
    assert!(level10.verdict.is_skipped());
    assert_eq!(report.exit_code(), 5);
}

// The NDJSON trace sink records every attempt, including remediation
// re-runs and skips, one record per line.
#[tokio::test]
async fn trace_sink_records_full_history() {
    let dir = tempfile::tempdir().unwrap();
    let docs = write_docs(
        dir.path(),
        &[(
            "pipeline.yml",
            "name: p\nversion: 1\njobs:\n  a:\n    needs: [b]\n    steps: []\n  b:\n    needs: [a]\n    steps: []\n",
        )],
    );
    let trace_path = dir.path().join("trace.ndjson");

    let report = fast_orchestrator()
        .run(ModeConfig::standard(), &docs, Some(&trace_path))
        .await
        .unwrap();

    let content = std::fs::read_to_string(&trace_path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), report.results.len());

    let kinds: Vec<String> = lines
        .iter()
        .map(|line| {
            serde_json::from_str::<serde_json::Value>(line).unwrap()["kind"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect();
    assert!(kinds.iter().any(|k| k == "logic"));
    assert!(kinds.iter().any(|k| k == "skipped"));
}

// Determinism: running a non-integration level twice over an unmodified
// document set yields identical taxonomy kind and exit code.
#[tokio::test]
async fn non_integration_levels_are_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let docs = write_docs(dir.path(), &[("billing.yml", CLEAN_PIPELINE)]);

    let levels: BTreeSet<LevelId> = (1..=8).map(LevelId::new).collect();
    let orchestrator = fast_orchestrator();
    let first = orchestrator
        .run(
            ModeConfig::resolve(Mode::Incremental, Some(levels.clone())).unwrap(),
            &docs,
            None,
        )
        .await
        .unwrap();
    let second = orchestrator
        .run(
            ModeConfig::resolve(Mode::Incremental, Some(levels)).unwrap(),
            &docs,
            None,
        )
        .await
        .unwrap();

    let verdicts = |report: &gantry_engine::RunReport| {
        report
            .final_results()
            .iter()
            .map(|r| (r.level, r.verdict, r.exit_code))
            .collect::<Vec<_>>()
    };
    assert_eq!(verdicts(&first), verdicts(&second));
}
