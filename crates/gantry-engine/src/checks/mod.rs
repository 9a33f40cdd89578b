//! Built-in check executables for the static inspection levels (1-8).
//!
//! Each check is read-only over the document set and reports a raw
//! pass/fail signal with a diagnostic message; it knows nothing about the
//! taxonomy. Documents that never parsed are level 1's concern and are
//! passed over by the other static levels.

pub mod simulation;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;

use gantry_manifest::{
    DocumentSet, ManifestDoc, VALID_PERMISSION_VALUES, VALID_TRIGGER_TYPES,
};
use gantry_types::{LevelId, RawOutcome, Result};

use crate::check::{CheckExecutable, DynCheck};

/// All ten built-in executables, in level order.
pub fn builtin_checks() -> Vec<DynCheck> {
    vec![
        Arc::new(DocumentSyntaxCheck),
        Arc::new(AccessPermissionsCheck),
        Arc::new(RequiredFieldsCheck),
        Arc::new(JobReferencesCheck),
        Arc::new(TriggerRulesCheck),
        Arc::new(ResourceLimitsCheck),
        Arc::new(ArtifactCacheCheck),
        Arc::new(SecretBindingsCheck),
        Arc::new(simulation::PipelineSimulationCheck),
        Arc::new(simulation::ReleaseRehearsalCheck),
    ]
}

fn outcome_from(violations: Vec<String>, clean_message: impl Into<String>) -> RawOutcome {
    if violations.is_empty() {
        RawOutcome::success(clean_message)
    } else {
        RawOutcome::failure(violations.join("; "))
    }
}

/// Topologically order job names by their `needs` edges. `Err` carries the
/// names stuck in a cycle, sorted.
pub(crate) fn topo_order_jobs(doc: &ManifestDoc) -> std::result::Result<Vec<String>, Vec<String>> {
    let jobs = doc.jobs();
    let known: HashMap<&str, Vec<&str>> = jobs
        .iter()
        .map(|j| {
            // Dedupe so a repeated `needs` entry cannot inflate in-degrees.
            let mut needs: Vec<&str> = j
                .needs()
                .into_iter()
                .filter(|n| jobs.iter().any(|other| other.name == *n))
                .collect();
            needs.sort_unstable();
            needs.dedup();
            (j.name, needs)
        })
        .collect();

    let mut in_degree: HashMap<&str, usize> =
        known.iter().map(|(&name, needs)| (name, needs.len())).collect();
    let mut queue: VecDeque<&str> = {
        let mut roots: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&n, _)| n)
            .collect();
        roots.sort_unstable();
        roots.into()
    };

    let mut order = Vec::with_capacity(known.len());
    while let Some(name) = queue.pop_front() {
        order.push(name.to_string());
        let mut unblocked: Vec<&str> = Vec::new();
        for (&dependent, needs) in &known {
            if needs.contains(&name) {
                let entry = in_degree.get_mut(dependent).expect("known job");
                *entry -= 1;
                if *entry == 0 {
                    unblocked.push(dependent);
                }
            }
        }
        unblocked.sort_unstable();
        queue.extend(unblocked);
    }

    if order.len() < known.len() {
        let mut stuck: Vec<String> = in_degree
            .iter()
            .filter(|(_, &d)| d > 0)
            .map(|(&n, _)| n.to_string())
            .collect();
        stuck.sort();
        Err(stuck)
    } else {
        Ok(order)
    }
}

// ---------------------------------------------------------------------------
// Level 1: document-syntax
// ---------------------------------------------------------------------------

/// Every document must parse, have a mapping root, and carry the required
/// top-level fields.
#[derive(Debug)]
pub struct DocumentSyntaxCheck;

#[async_trait]
impl CheckExecutable for DocumentSyntaxCheck {
    fn level_id(&self) -> LevelId {
        LevelId::new(1)
    }

    async fn run(&self, docs: &DocumentSet) -> Result<RawOutcome> {
        let docs = docs.snapshot().await;
        let mut violations = Vec::new();
        for doc in &docs {
            if let Some(err) = doc.parse_error() {
                violations.push(format!("{}: YAML parse error: {err}", doc.name()));
                continue;
            }
            if !doc.is_well_formed() {
                violations.push(format!("{}: root is not a mapping", doc.name()));
                continue;
            }
            for field in gantry_manifest::REQUIRED_TOP_LEVEL_FIELDS {
                if doc.top_level(field).is_none() {
                    violations.push(format!(
                        "{}: missing required top-level field '{field}'",
                        doc.name()
                    ));
                }
            }
        }
        Ok(outcome_from(
            violations,
            format!("{} documents well-formed", docs.len()),
        ))
    }
}

// ---------------------------------------------------------------------------
// Level 2: access-permissions
// ---------------------------------------------------------------------------

/// Permission scope values a job requests must come from the allowed set.
#[derive(Debug)]
pub struct AccessPermissionsCheck;

#[async_trait]
impl CheckExecutable for AccessPermissionsCheck {
    fn level_id(&self) -> LevelId {
        LevelId::new(2)
    }

    async fn run(&self, docs: &DocumentSet) -> Result<RawOutcome> {
        let docs = docs.snapshot().await;
        let mut violations = Vec::new();
        for doc in docs.iter().filter(|d| d.is_well_formed()) {
            for job in doc.jobs() {
                let Some(permissions) = job.permissions() else {
                    continue;
                };
                for (scope, value) in permissions {
                    let scope = scope.as_str().unwrap_or("?");
                    match value.as_str() {
                        Some(v) if VALID_PERMISSION_VALUES.contains(&v) => {}
                        Some(v) => violations.push(format!(
                            "{}/{}: permission '{scope}: {v}' is not one of {:?}",
                            doc.name(),
                            job.name,
                            VALID_PERMISSION_VALUES
                        )),
                        None => violations.push(format!(
                            "{}/{}: permission '{scope}' must be a string value",
                            doc.name(),
                            job.name
                        )),
                    }
                }
            }
        }
        Ok(outcome_from(violations, "permission grants within policy"))
    }
}

// ---------------------------------------------------------------------------
// Level 3: required-fields
// ---------------------------------------------------------------------------

/// Every job entry must be a mapping with a `steps` sequence.
#[derive(Debug)]
pub struct RequiredFieldsCheck;

#[async_trait]
impl CheckExecutable for RequiredFieldsCheck {
    fn level_id(&self) -> LevelId {
        LevelId::new(3)
    }

    async fn run(&self, docs: &DocumentSet) -> Result<RawOutcome> {
        let docs = docs.snapshot().await;
        let mut violations = Vec::new();
        for doc in docs.iter().filter(|d| d.is_well_formed()) {
            for job in doc.jobs() {
                if !job.is_mapping() {
                    violations.push(format!(
                        "{}/{}: job entry is not a mapping",
                        doc.name(),
                        job.name
                    ));
                } else if !job.has_steps() {
                    violations.push(format!(
                        "{}/{}: missing required field 'steps'",
                        doc.name(),
                        job.name
                    ));
                }
            }
        }
        Ok(outcome_from(violations, "all jobs carry required fields"))
    }
}

// ---------------------------------------------------------------------------
// Level 4: job-references
// ---------------------------------------------------------------------------

/// `needs` targets must exist and the per-document dependency declarations
/// must be acyclic.
#[derive(Debug)]
pub struct JobReferencesCheck;

#[async_trait]
impl CheckExecutable for JobReferencesCheck {
    fn level_id(&self) -> LevelId {
        LevelId::new(4)
    }

    async fn run(&self, docs: &DocumentSet) -> Result<RawOutcome> {
        let docs = docs.snapshot().await;
        let mut violations = Vec::new();
        for doc in docs.iter().filter(|d| d.is_well_formed()) {
            let jobs = doc.jobs();
            for job in &jobs {
                for need in job.needs() {
                    if !jobs.iter().any(|other| other.name == need) {
                        violations.push(format!(
                            "{}/{}: needs unknown job '{need}'",
                            doc.name(),
                            job.name
                        ));
                    }
                }
            }
            if let Err(cycle) = topo_order_jobs(doc) {
                violations.push(format!(
                    "{}: dependency cycle among jobs {:?}",
                    doc.name(),
                    cycle
                ));
            }
        }
        Ok(outcome_from(violations, "job references resolve acyclically"))
    }
}

// ---------------------------------------------------------------------------
// Level 5: trigger-rules
// ---------------------------------------------------------------------------

/// Trigger entries must name a known type; schedule triggers need a cron
/// expression.
#[derive(Debug)]
pub struct TriggerRulesCheck;

#[async_trait]
impl CheckExecutable for TriggerRulesCheck {
    fn level_id(&self) -> LevelId {
        LevelId::new(5)
    }

    async fn run(&self, docs: &DocumentSet) -> Result<RawOutcome> {
        let docs = docs.snapshot().await;
        let mut violations = Vec::new();
        for doc in docs.iter().filter(|d| d.is_well_formed()) {
            for (idx, trigger) in doc.triggers().iter().enumerate() {
                match trigger.kind {
                    Some(kind) if VALID_TRIGGER_TYPES.contains(&kind) => {
                        if kind == "schedule"
                            && trigger.cron.map_or(true, |c| c.trim().is_empty())
                        {
                            violations.push(format!(
                                "{}: schedule trigger #{idx} has no cron expression",
                                doc.name()
                            ));
                        }
                    }
                    Some(kind) => violations.push(format!(
                        "{}: trigger #{idx} has unknown type '{kind}'",
                        doc.name()
                    )),
                    None => violations.push(format!(
                        "{}: trigger #{idx} does not name a type",
                        doc.name()
                    )),
                }
            }
        }
        Ok(outcome_from(violations, "trigger rules valid"))
    }
}

// ---------------------------------------------------------------------------
// Level 6: resource-limits
// ---------------------------------------------------------------------------

/// Every job must declare a `resources` mapping bounding both cpu and memory.
#[derive(Debug)]
pub struct ResourceLimitsCheck;

#[async_trait]
impl CheckExecutable for ResourceLimitsCheck {
    fn level_id(&self) -> LevelId {
        LevelId::new(6)
    }

    async fn run(&self, docs: &DocumentSet) -> Result<RawOutcome> {
        let docs = docs.snapshot().await;
        let mut violations = Vec::new();
        for doc in docs.iter().filter(|d| d.is_well_formed()) {
            for job in doc.jobs() {
                if !job.is_mapping() {
                    continue; // level 3's concern
                }
                match job.resources() {
                    None => violations.push(format!(
                        "{}/{}: missing resource-limit field 'resources'",
                        doc.name(),
                        job.name
                    )),
                    Some(resources) => {
                        for key in ["cpu", "memory"] {
                            if resources.get(key).is_none() {
                                violations.push(format!(
                                    "{}/{}: resources missing '{key}' bound",
                                    doc.name(),
                                    job.name
                                ));
                            }
                        }
                    }
                }
            }
        }
        Ok(outcome_from(violations, "all jobs carry resource bounds"))
    }
}

// ---------------------------------------------------------------------------
// Level 7: artifact-cache
// ---------------------------------------------------------------------------

/// A job that opts into caching must give the cache a key and paths.
#[derive(Debug)]
pub struct ArtifactCacheCheck;

#[async_trait]
impl CheckExecutable for ArtifactCacheCheck {
    fn level_id(&self) -> LevelId {
        LevelId::new(7)
    }

    async fn run(&self, docs: &DocumentSet) -> Result<RawOutcome> {
        let docs = docs.snapshot().await;
        let mut violations = Vec::new();
        for doc in docs.iter().filter(|d| d.is_well_formed()) {
            for job in doc.jobs() {
                let Some(cache) = job.cache() else {
                    continue;
                };
                for key in ["key", "paths"] {
                    if cache.get(key).is_none() {
                        violations.push(format!(
                            "{}/{}: cache declaration missing '{key}'",
                            doc.name(),
                            job.name
                        ));
                    }
                }
            }
        }
        Ok(outcome_from(violations, "cache declarations complete"))
    }
}

// ---------------------------------------------------------------------------
// Level 8: secret-bindings
// ---------------------------------------------------------------------------

/// Every secret a job references must be declared at the top level.
#[derive(Debug)]
pub struct SecretBindingsCheck;

#[async_trait]
impl CheckExecutable for SecretBindingsCheck {
    fn level_id(&self) -> LevelId {
        LevelId::new(8)
    }

    async fn run(&self, docs: &DocumentSet) -> Result<RawOutcome> {
        let docs = docs.snapshot().await;
        let mut violations = Vec::new();
        for doc in docs.iter().filter(|d| d.is_well_formed()) {
            let declared = doc.declared_secrets();
            for job in doc.jobs() {
                for secret in job.secrets() {
                    if !declared.contains(&secret) {
                        violations.push(format!(
                            "{}/{}: references undeclared secret '{secret}'",
                            doc.name(),
                            job.name
                        ));
                    }
                }
            }
        }
        Ok(outcome_from(violations, "all secret references bound"))
    }
}
