//! Auto-remediation for the two auto-fixable taxonomy kinds.
//!
//! `Syntax` failures are repaired by inserting the missing required fields
//! with their documented defaults; `Resource` failures by inserting default
//! bounds. The engine checks whether the target condition already holds
//! before patching, so applying the same fix twice is a no-op: the second
//! action reports `applied: false` and the documents stay byte-identical.
//! The single post-fix re-run is driven by the executor; this module never
//! re-invokes anything itself.

use serde_yaml::{Mapping, Value};

use gantry_manifest::{DocumentSet, ManifestDoc};
use gantry_types::{RemediationAction, Result, TaxonomyKind};

use crate::registry::ValidationLevel;

/// Compute and apply the corrective patch for an auto-fixable failure.
///
/// Returns `None` when the failure kind admits no automatic fix. Otherwise
/// returns the terminal [`RemediationAction`]: `applied` is `false` when
/// every target condition already held and nothing was written.
pub async fn attempt_fix(
    level: &ValidationLevel,
    kind: TaxonomyKind,
    docs: &DocumentSet,
) -> Result<Option<RemediationAction>> {
    if !kind.is_auto_fixable() {
        return Ok(None);
    }

    let mut patched: Vec<String> = Vec::new();
    for name in docs.names().await {
        let changed = docs
            .update(&name, |doc| match kind {
                TaxonomyKind::Syntax => apply_syntax_defaults(doc),
                TaxonomyKind::Resource => apply_resource_defaults(doc),
                _ => false,
            })
            .await?;
        if changed {
            patched.push(name);
        }
    }

    let applied = !patched.is_empty();
    let action = RemediationAction {
        level: level.id,
        document: patched.join(", "),
        description: if applied {
            match kind {
                TaxonomyKind::Syntax => {
                    "inserted missing required fields with documented defaults".to_string()
                }
                _ => "inserted default resource bounds".to_string(),
            }
        } else {
            "target condition already holds; no patch applied".to_string()
        },
        applied,
    };
    tracing::info!(
        level = %level.id,
        kind = %kind,
        applied,
        documents = %action.document,
        "Remediation {}",
        if applied { "applied" } else { "not applicable" }
    );
    Ok(Some(action))
}

/// Insert the documented defaults for the required top-level fields and for
/// each job's `steps`. `name` defaults to the document's file stem,
/// `version` to 1, `jobs` to an empty mapping, `steps` to an empty sequence.
fn apply_syntax_defaults(doc: &mut ManifestDoc) -> bool {
    let stem = doc.name().to_string();
    let mut changed = doc.ensure_top_level_field("name", Value::String(stem));
    changed |= doc.ensure_top_level_field("version", Value::Number(1.into()));
    changed |= doc.ensure_top_level_field("jobs", Value::Mapping(Mapping::new()));

    let job_names: Vec<String> = doc.jobs().iter().map(|j| j.name.to_string()).collect();
    for job in &job_names {
        changed |= doc.ensure_job_field(job, "steps", Value::Sequence(Vec::new()));
    }
    changed
}

/// Insert the category-appropriate default bounds: cpu/memory limits for
/// every job, and key/paths for any cache declaration missing them.
fn apply_resource_defaults(doc: &mut ManifestDoc) -> bool {
    let job_names: Vec<String> = doc.jobs().iter().map(|j| j.name.to_string()).collect();
    let mut changed = false;
    for job in &job_names {
        changed |= doc.ensure_job_resources(job);
        changed |= doc.ensure_job_cache_fields(job);
    }
    changed
}
