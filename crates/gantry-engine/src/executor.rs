//! The parallel execution engine.
//!
//! Executes an [`ExecutionPlan`] one group at a time: every level in the
//! current group is dispatched concurrently in a `JoinSet`, and the next
//! group does not start until every unit in the current one has reached a
//! terminal state (the group barrier). A hard per-level timeout is always
//! enforced, independent of the failure policy. Remediation runs strictly
//! between the barrier and the next group, one level at a time, so its
//! document patch is never concurrent with any sibling's read.

use std::time::{Duration, Instant};

use tokio::task::JoinSet;

use gantry_manifest::DocumentSet;
use gantry_types::{ExecutionResult, GantryError, RawOutcome, Result};

use crate::check::{CheckRegistry, DynCheck};
use crate::events::{EngineEvent, Phase};
use crate::orchestrator::OrchestrationContext;
use crate::registry::{LevelRegistry, ValidationLevel};
use crate::remediation;
use crate::retry::{RetrySchedule, RetryState};
use crate::taxonomy;

/// Engine-wide constants. Deliberately not user-tunable per call: the
/// per-level timeout is a configuration constant of the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard wall-clock budget for a single check invocation.
    pub level_timeout: Duration,
    /// Retry budget granted to retryable levels under retry-enabled modes.
    pub retry_schedule: RetrySchedule,
    /// Broadcast capacity for the event channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            level_timeout: Duration::from_secs(30),
            retry_schedule: RetrySchedule::simulation(),
            event_capacity: 256,
        }
    }
}

/// Executes plans against a document set using the registered check
/// executables.
pub struct Executor {
    checks: CheckRegistry,
    config: EngineConfig,
}

impl Executor {
    pub fn new(checks: CheckRegistry, config: EngineConfig) -> Self {
        Self { checks, config }
    }

    pub fn with_builtin_checks(config: EngineConfig) -> Self {
        Self::new(CheckRegistry::builtin(), config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run every group of the context's plan. Returns every record produced,
    /// in append order: one per attempt, plus one per skipped level. The
    /// same records land in the context's trace collector.
    pub async fn execute(
        &self,
        registry: &LevelRegistry,
        docs: &DocumentSet,
        ctx: &OrchestrationContext,
    ) -> Result<Vec<ExecutionResult>> {
        let plan = &ctx.plan;
        let fail_fast = ctx.mode.fail_fast;
        let mut all: Vec<ExecutionResult> = Vec::new();
        let mut aborted = false;

        for (index, group) in plan.groups.iter().enumerate() {
            if aborted {
                // Fail-fast cancellation: not-yet-started groups are marked
                // Skipped without invoking their executables at all.
                for &id in &group.levels {
                    let record =
                        ExecutionResult::skipped(id, "skipped: fail-fast abort after mandatory failure");
                    ctx.trace.append(record.clone())?;
                    ctx.events.emit(EngineEvent::LevelSkipped { level: id });
                    all.push(record);
                }
                continue;
            }

            ctx.events.emit(EngineEvent::GroupStarted {
                index,
                levels: group.levels.iter().map(|id| id.get()).collect(),
            });
            tracing::debug!(group = index, levels = ?group.levels, "Group started");

            let mut finals: Vec<ExecutionResult> = Vec::new();
            let single_retryable = group.levels.len() == 1
                && registry.level_by_id(group.levels[0])?.retryable
                && ctx.mode.retry_enabled;

            if single_retryable {
                let level = registry.level_by_id(group.levels[0])?.clone();
                let final_result = self.run_with_retry(&level, docs, ctx, &mut all).await?;
                finals.push(final_result);
            } else {
                let mut join = JoinSet::new();
                for &id in &group.levels {
                    let level = registry.level_by_id(id)?.clone();
                    let check = self.checks.get(id)?;
                    let docs = docs.clone();
                    let timeout = self.config.level_timeout;
                    ctx.events.emit(EngineEvent::LevelStarted {
                        level: id,
                        attempt: 1,
                    });
                    join.spawn(async move { run_level(check, level, docs, timeout, 1).await });
                }
                // Barrier: every unit reaches a terminal state before the
                // next group may start.
                while let Some(joined) = join.join_next().await {
                    let record = joined.map_err(|e| GantryError::TaskAborted(e.to_string()))?;
                    ctx.trace.append(record.clone())?;
                    emit_completed(ctx, &record);
                    all.push(record.clone());
                    finals.push(record);
                }
            }

            // Post-barrier remediation: single re-run per auto-fixable
            // failure, strictly between two sequential executions of that
            // one level.
            self.remediate_group(registry, docs, ctx, &mut finals, &mut all)
                .await?;

            if fail_fast {
                let mandatory_failure = finals.iter().any(|r| {
                    r.verdict.is_failure()
                        && registry
                            .level_by_id(r.level)
                            .map(|l| l.mandatory)
                            .unwrap_or(false)
                });
                if mandatory_failure {
                    tracing::warn!(group = index, "Mandatory failure; skipping remaining groups");
                    aborted = true;
                }
            }
        }

        Ok(all)
    }

    /// Attempt remediation for the group's auto-fixable failures and re-run
    /// each affected level exactly once. The re-run's verdict replaces the
    /// level's final verdict for the fail-fast decision; the original record
    /// stays in the trace.
    async fn remediate_group(
        &self,
        registry: &LevelRegistry,
        docs: &DocumentSet,
        ctx: &OrchestrationContext,
        finals: &mut [ExecutionResult],
        all: &mut Vec<ExecutionResult>,
    ) -> Result<()> {
        for final_result in finals.iter_mut() {
            let Some(kind) = final_result.verdict.kind() else {
                continue;
            };
            if !kind.is_auto_fixable() || final_result.remediation_attempted {
                continue;
            }
            let level = registry.level_by_id(final_result.level)?.clone();

            ctx.events.emit(EngineEvent::PhaseChanged {
                phase: Phase::Remediating,
            });
            let Some(action) = remediation::attempt_fix(&level, kind, docs).await? else {
                continue;
            };
            ctx.events.emit(EngineEvent::RemediationAttempted {
                level: level.id,
                document: action.document.clone(),
                description: action.description.clone(),
                applied: action.applied,
            });

            if action.applied {
                // Exactly one re-run; a remediated re-run never gets backoff
                // retries on top.
                let attempt = final_result.attempt + 1;
                let check = self.checks.get(level.id)?;
                ctx.events.emit(EngineEvent::LevelStarted {
                    level: level.id,
                    attempt,
                });
                let rerun = run_level(
                    check,
                    level.clone(),
                    docs.clone(),
                    self.config.level_timeout,
                    attempt,
                )
                .await
                .with_remediation_attempted();
                ctx.trace.append(rerun.clone())?;
                emit_completed(ctx, &rerun);
                all.push(rerun.clone());
                *final_result = rerun;
            }
            ctx.events.emit(EngineEvent::PhaseChanged {
                phase: Phase::Executing,
            });
        }
        Ok(())
    }

    /// Drive the retry state machine for one retryable level. Every attempt
    /// is recorded; the final attempt's record is returned.
    async fn run_with_retry(
        &self,
        level: &ValidationLevel,
        docs: &DocumentSet,
        ctx: &OrchestrationContext,
        all: &mut Vec<ExecutionResult>,
    ) -> Result<ExecutionResult> {
        let schedule = self.config.retry_schedule.clone();
        let mut state = schedule.start();
        let mut last: Option<ExecutionResult> = None;

        loop {
            match state {
                RetryState::Attempting(attempt) => {
                    let check = self.checks.get(level.id)?;
                    ctx.events.emit(EngineEvent::LevelStarted {
                        level: level.id,
                        attempt,
                    });
                    let record = run_level(
                        check,
                        level.clone(),
                        docs.clone(),
                        self.config.level_timeout,
                        attempt,
                    )
                    .await;
                    ctx.trace.append(record.clone())?;
                    emit_completed(ctx, &record);
                    all.push(record.clone());
                    let succeeded = record.verdict.is_success();
                    state = schedule.after_attempt(attempt, succeeded);
                    last = Some(record);
                }
                RetryState::Waiting {
                    next_attempt,
                    delay,
                } => {
                    ctx.events.emit(EngineEvent::LevelRetrying {
                        level: level.id,
                        next_attempt,
                        delay_ms: delay.as_millis() as u64,
                    });
                    tracing::info!(
                        level = %level.id,
                        next_attempt,
                        delay_ms = %delay.as_millis(),
                        "Retrying flaky level after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    state = RetryState::Attempting(next_attempt);
                }
                RetryState::Final { attempts, .. } => {
                    return last.ok_or_else(|| {
                        GantryError::TaskAborted(format!(
                            "retry machine for level {} finalized after {attempts} attempts with no record",
                            level.id
                        ))
                    });
                }
            }
        }
    }
}

fn emit_completed(ctx: &OrchestrationContext, record: &ExecutionResult) {
    if let Some(kind) = record.verdict.kind() {
        ctx.events.emit(EngineEvent::LevelCompleted {
            level: record.level,
            attempt: record.attempt,
            kind,
            exit_code: record.exit_code,
            duration_ms: record.duration.as_millis() as u64,
        });
    }
}

/// Run one check invocation under the hard timeout and classify it. A check
/// that returns `Err` is folded into a failing raw outcome so every
/// invocation still maps to exactly one taxonomy kind; a timed-out check is
/// forced to an integration failure.
pub(crate) async fn run_level(
    check: DynCheck,
    level: ValidationLevel,
    docs: DocumentSet,
    timeout: Duration,
    attempt: u32,
) -> ExecutionResult {
    let started = Instant::now();
    match tokio::time::timeout(timeout, check.run(&docs)).await {
        Ok(run_result) => {
            let raw = match run_result {
                Ok(raw) => raw,
                Err(e) => RawOutcome::failure(format!("check executable error: {e}")),
            };
            let kind = taxonomy::classify(&level, &raw);
            ExecutionResult::classified(
                level.id,
                attempt,
                raw.exit_status,
                kind,
                started.elapsed(),
                raw.message,
            )
        }
        Err(_elapsed) => {
            tracing::warn!(level = %level.id, timeout_ms = %timeout.as_millis(), "Check timed out");
            ExecutionResult::forced_timeout(
                level.id,
                attempt,
                started.elapsed(),
                taxonomy::timeout_message(timeout),
            )
        }
    }
}
