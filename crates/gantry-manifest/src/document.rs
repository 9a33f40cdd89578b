//! A single pipeline-definition document: opaque YAML plus the narrow
//! accessors and patch primitives the validation levels rely on.

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use gantry_types::{GantryError, Result};

/// Top-level fields every pipeline definition must carry, with their
/// documented defaults. `name` defaults to the document's file stem.
pub const REQUIRED_TOP_LEVEL_FIELDS: &[&str] = &["name", "version", "jobs"];

/// Documented default resource bounds inserted for a job that declares none.
pub const DEFAULT_CPU_LIMIT: &str = "1";
pub const DEFAULT_MEMORY_LIMIT: &str = "512Mi";

/// Trigger types a pipeline definition may declare.
pub const VALID_TRIGGER_TYPES: &[&str] = &["push", "pull_request", "schedule", "manual"];

/// Permission scope values a job may request.
pub const VALID_PERMISSION_VALUES: &[&str] = &["read", "write", "none"];

/// One pipeline-definition document. The engine treats the body as opaque
/// structured text: parse failures are retained rather than raised, so the
/// syntax level can own that judgment.
#[derive(Debug, Clone)]
pub struct ManifestDoc {
    name: String,
    path: Option<PathBuf>,
    raw: String,
    root: Option<Value>,
    parse_error: Option<String>,
}

impl ManifestDoc {
    /// Read a document from disk. I/O failures are fatal; YAML failures are
    /// captured on the document itself.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mut doc = Self::from_raw(name, raw);
        doc.path = Some(path.to_path_buf());
        Ok(doc)
    }

    /// Build a document from in-memory YAML. Used by tests and fixtures.
    pub fn from_raw(name: impl Into<String>, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let (root, parse_error) = match serde_yaml::from_str::<Value>(&raw) {
            Ok(v) => (Some(v), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            name: name.into(),
            path: None,
            raw,
            root,
            parse_error,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn parse_error(&self) -> Option<&str> {
        self.parse_error.as_deref()
    }

    /// True when the document parsed and its root is a YAML mapping.
    pub fn is_well_formed(&self) -> bool {
        matches!(self.root, Some(Value::Mapping(_)))
    }

    // -- narrow read accessors --------------------------------------------

    pub fn top_level(&self, key: &str) -> Option<&Value> {
        self.root.as_ref()?.get(key)
    }

    pub fn top_level_str(&self, key: &str) -> Option<&str> {
        self.top_level(key).and_then(Value::as_str)
    }

    pub fn top_level_u64(&self, key: &str) -> Option<u64> {
        self.top_level(key).and_then(Value::as_u64)
    }

    /// The `jobs` mapping, as (name, body) views. Entries whose key is not a
    /// string are ignored; the reference checks report on what remains.
    pub fn jobs(&self) -> Vec<JobView<'_>> {
        let Some(Value::Mapping(jobs)) = self.top_level("jobs") else {
            return Vec::new();
        };
        jobs.iter()
            .filter_map(|(k, v)| {
                k.as_str().map(|name| JobView { name, body: v })
            })
            .collect()
    }

    pub fn job(&self, name: &str) -> Option<JobView<'_>> {
        self.jobs().into_iter().find(|j| j.name == name)
    }

    /// Secret names declared at the top level (`secrets: [a, b]`).
    pub fn declared_secrets(&self) -> Vec<&str> {
        match self.top_level("secrets") {
            Some(Value::Sequence(seq)) => seq.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Trigger entries: each is either a bare string (`push`) or a mapping
    /// with a `type` key (`{type: schedule, cron: "0 4 * * *"}`).
    pub fn triggers(&self) -> Vec<TriggerView<'_>> {
        match self.top_level("triggers") {
            Some(Value::Sequence(seq)) => seq
                .iter()
                .map(|v| TriggerView {
                    kind: v
                        .as_str()
                        .or_else(|| v.get("type").and_then(Value::as_str)),
                    cron: v.get("cron").and_then(Value::as_str),
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Wall-clock budget for the whole pipeline, in minutes.
    pub fn max_minutes(&self) -> u64 {
        self.top_level_u64("max_minutes").unwrap_or(60)
    }

    // -- patch primitives --------------------------------------------------

    /// Insert a top-level field when absent. Returns whether anything changed.
    pub fn ensure_top_level_field(&mut self, key: &str, default: Value) -> bool {
        let Some(Value::Mapping(root)) = self.root.as_mut() else {
            return false;
        };
        let key = Value::String(key.to_string());
        if root.contains_key(&key) {
            return false;
        }
        root.insert(key, default);
        true
    }

    /// Insert a field into one job's body when absent. Returns whether
    /// anything changed. A job whose body is not a mapping is left alone.
    pub fn ensure_job_field(&mut self, job: &str, key: &str, default: Value) -> bool {
        let Some(Value::Mapping(root)) = self.root.as_mut() else {
            return false;
        };
        let Some(Value::Mapping(jobs)) = root.get_mut("jobs") else {
            return false;
        };
        let Some(Value::Mapping(body)) = jobs.get_mut(job) else {
            return false;
        };
        let key = Value::String(key.to_string());
        if body.contains_key(&key) {
            return false;
        }
        body.insert(key, default);
        true
    }

    /// Insert missing keys into one job's `resources` mapping, creating the
    /// mapping if needed. Returns whether anything changed.
    pub fn ensure_job_resources(&mut self, job: &str) -> bool {
        let mut changed = self.ensure_job_field(job, "resources", Value::Mapping(Mapping::new()));
        let Some(Value::Mapping(root)) = self.root.as_mut() else {
            return changed;
        };
        let Some(Value::Mapping(jobs)) = root.get_mut("jobs") else {
            return changed;
        };
        let Some(Value::Mapping(body)) = jobs.get_mut(job) else {
            return changed;
        };
        let Some(Value::Mapping(resources)) = body.get_mut("resources") else {
            return changed;
        };
        for (key, default) in [("cpu", DEFAULT_CPU_LIMIT), ("memory", DEFAULT_MEMORY_LIMIT)] {
            let key = Value::String(key.to_string());
            if !resources.contains_key(&key) {
                resources.insert(key, Value::String(default.to_string()));
                changed = true;
            }
        }
        changed
    }

    /// Insert missing `key`/`paths` entries into one job's existing `cache`
    /// mapping. A job without a cache declaration is left alone: caching is
    /// opt-in. Returns whether anything changed.
    pub fn ensure_job_cache_fields(&mut self, job: &str) -> bool {
        let default_key = format!("{job}-cache");
        let Some(Value::Mapping(root)) = self.root.as_mut() else {
            return false;
        };
        let Some(Value::Mapping(jobs)) = root.get_mut("jobs") else {
            return false;
        };
        let Some(Value::Mapping(body)) = jobs.get_mut(job) else {
            return false;
        };
        let Some(Value::Mapping(cache)) = body.get_mut("cache") else {
            return false;
        };
        let mut changed = false;
        let key = Value::String("key".to_string());
        if !cache.contains_key(&key) {
            cache.insert(key, Value::String(default_key));
            changed = true;
        }
        let paths = Value::String("paths".to_string());
        if !cache.contains_key(&paths) {
            cache.insert(
                paths,
                Value::Sequence(vec![Value::String("target/".to_string())]),
            );
            changed = true;
        }
        changed
    }

    /// Serialize the (possibly patched) document back to its file. Writes a
    /// sibling temp file first and renames it over the original so a partial
    /// write can never be observed.
    pub fn save(&mut self) -> Result<()> {
        let Some(root) = self.root.as_ref() else {
            return Err(GantryError::Document {
                path: self.name.clone(),
                message: "cannot save a document that never parsed".into(),
            });
        };
        let rendered = serde_yaml::to_string(root).map_err(|e| GantryError::Document {
            path: self.name.clone(),
            message: e.to_string(),
        })?;
        if let Some(path) = &self.path {
            let tmp = path.with_extension("tmp");
            std::fs::write(&tmp, &rendered)?;
            std::fs::rename(&tmp, path)?;
        }
        self.raw = rendered;
        Ok(())
    }
}

/// Borrowed view of one job entry inside a document's `jobs` mapping.
#[derive(Debug, Clone, Copy)]
pub struct JobView<'a> {
    pub name: &'a str,
    pub body: &'a Value,
}

impl<'a> JobView<'a> {
    pub fn is_mapping(&self) -> bool {
        self.body.is_mapping()
    }

    /// Names of jobs this job declares it needs.
    pub fn needs(&self) -> Vec<&'a str> {
        match self.body.get("needs") {
            Some(Value::Sequence(seq)) => seq.iter().filter_map(Value::as_str).collect(),
            Some(Value::String(s)) => vec![s.as_str()],
            _ => Vec::new(),
        }
    }

    pub fn has_steps(&self) -> bool {
        matches!(self.body.get("steps"), Some(Value::Sequence(_)))
    }

    pub fn resources(&self) -> Option<&'a Mapping> {
        self.body.get("resources").and_then(Value::as_mapping)
    }

    pub fn resource_str(&self, key: &str) -> Option<&'a str> {
        self.resources()?.get(key).and_then(Value::as_str)
    }

    pub fn permissions(&self) -> Option<&'a Mapping> {
        self.body.get("permissions").and_then(Value::as_mapping)
    }

    /// Secret names this job references (`secrets: [DEPLOY_KEY]`).
    pub fn secrets(&self) -> Vec<&'a str> {
        match self.body.get("secrets") {
            Some(Value::Sequence(seq)) => seq.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn cache(&self) -> Option<&'a Mapping> {
        self.body.get("cache").and_then(Value::as_mapping)
    }

    /// Lifecycle stage tag, when declared (`stage: test`, `stage: release`).
    pub fn stage(&self) -> Option<&'a str> {
        self.body.get("stage").and_then(Value::as_str)
    }

    /// Scheduling weight used by the simulation levels, in minutes.
    pub fn estimated_minutes(&self) -> u64 {
        self.body
            .get("estimated_minutes")
            .and_then(Value::as_u64)
            .unwrap_or(5)
    }
}

/// Borrowed view of one trigger entry.
#[derive(Debug, Clone, Copy)]
pub struct TriggerView<'a> {
    pub kind: Option<&'a str>,
    pub cron: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: billing-ci
version: 1
max_minutes: 45
secrets:
  - DEPLOY_KEY
triggers:
  - push
  - type: schedule
    cron: "0 4 * * *"
jobs:
  build:
    steps:
      - run: cargo build
    resources:
      cpu: "2"
      memory: 1Gi
  test:
    needs: [build]
    stage: test
    steps:
      - run: cargo test
    secrets:
      - DEPLOY_KEY
    permissions:
      contents: read
"#;

    #[test]
    fn parses_well_formed_document() {
        let doc = ManifestDoc::from_raw("billing", SAMPLE);
        assert!(doc.is_well_formed());
        assert!(doc.parse_error().is_none());
        assert_eq!(doc.top_level_str("name"), Some("billing-ci"));
        assert_eq!(doc.top_level_u64("version"), Some(1));
        assert_eq!(doc.max_minutes(), 45);
    }

    #[test]
    fn parse_failure_is_retained_not_raised() {
        let doc = ManifestDoc::from_raw("broken", "jobs: [unclosed");
        assert!(!doc.is_well_formed());
        assert!(doc.parse_error().is_some());
        assert_eq!(doc.raw(), "jobs: [unclosed");
    }

    #[test]
    fn scalar_root_is_not_well_formed() {
        let doc = ManifestDoc::from_raw("scalar", "just a string");
        assert!(doc.parse_error().is_none());
        assert!(!doc.is_well_formed());
    }

    #[test]
    fn job_views_expose_narrow_fields() {
        let doc = ManifestDoc::from_raw("billing", SAMPLE);
        let jobs = doc.jobs();
        assert_eq!(jobs.len(), 2);

        let test = doc.job("test").unwrap();
        assert_eq!(test.needs(), vec!["build"]);
        assert!(test.has_steps());
        assert_eq!(test.stage(), Some("test"));
        assert_eq!(test.secrets(), vec!["DEPLOY_KEY"]);
        assert_eq!(
            test.permissions().unwrap().get("contents").unwrap().as_str(),
            Some("read")
        );
        assert!(test.resources().is_none());

        let build = doc.job("build").unwrap();
        assert_eq!(build.resource_str("cpu"), Some("2"));
        assert_eq!(build.estimated_minutes(), 5);
        assert!(build.needs().is_empty());
    }

    #[test]
    fn needs_accepts_bare_string() {
        let doc = ManifestDoc::from_raw(
            "d",
            "jobs:\n  deploy:\n    needs: test\n    steps: []\n",
        );
        assert_eq!(doc.job("deploy").unwrap().needs(), vec!["test"]);
    }

    #[test]
    fn triggers_mixed_forms() {
        let doc = ManifestDoc::from_raw("billing", SAMPLE);
        let triggers = doc.triggers();
        assert_eq!(triggers.len(), 2);
        assert_eq!(triggers[0].kind, Some("push"));
        assert_eq!(triggers[0].cron, None);
        assert_eq!(triggers[1].kind, Some("schedule"));
        assert_eq!(triggers[1].cron, Some("0 4 * * *"));
    }

    #[test]
    fn declared_secrets_listed() {
        let doc = ManifestDoc::from_raw("billing", SAMPLE);
        assert_eq!(doc.declared_secrets(), vec!["DEPLOY_KEY"]);
    }

    #[test]
    fn ensure_top_level_field_inserts_once() {
        let mut doc = ManifestDoc::from_raw("d", "jobs: {}\n");
        assert!(doc.ensure_top_level_field("version", Value::Number(1.into())));
        // Second application is a no-op.
        assert!(!doc.ensure_top_level_field("version", Value::Number(2.into())));
        assert_eq!(doc.top_level_u64("version"), Some(1));
    }

    #[test]
    fn ensure_job_resources_fills_missing_bounds() {
        let mut doc = ManifestDoc::from_raw(
            "d",
            "jobs:\n  build:\n    steps: []\n  test:\n    steps: []\n    resources:\n      cpu: \"4\"\n",
        );
        assert!(doc.ensure_job_resources("build"));
        assert_eq!(doc.job("build").unwrap().resource_str("cpu"), Some("1"));
        assert_eq!(
            doc.job("build").unwrap().resource_str("memory"),
            Some("512Mi")
        );

        // Existing cpu bound is preserved; only memory is filled in.
        assert!(doc.ensure_job_resources("test"));
        assert_eq!(doc.job("test").unwrap().resource_str("cpu"), Some("4"));

        // Fully bounded job: nothing to change.
        assert!(!doc.ensure_job_resources("test"));
    }

    #[test]
    fn ensure_job_cache_fields_only_touches_declared_caches() {
        let mut doc = ManifestDoc::from_raw(
            "d",
            "jobs:\n  build:\n    steps: []\n    cache:\n      key: deps-v1\n  test:\n    steps: []\n",
        );
        // Declared cache gains the missing paths; the existing key stays.
        assert!(doc.ensure_job_cache_fields("build"));
        let cache = doc.job("build").unwrap().cache().unwrap();
        assert_eq!(cache.get("key").unwrap().as_str(), Some("deps-v1"));
        assert!(cache.get("paths").unwrap().is_sequence());
        // No cache declared: nothing to patch.
        assert!(!doc.ensure_job_cache_fields("test"));
        // Already complete: no-op.
        assert!(!doc.ensure_job_cache_fields("build"));
    }

    #[test]
    fn ensure_on_unparsed_document_is_noop() {
        let mut doc = ManifestDoc::from_raw("broken", ": : :");
        assert!(!doc.ensure_top_level_field("name", Value::String("x".into())));
        assert!(!doc.ensure_job_resources("build"));
    }

    #[test]
    fn save_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yml");
        std::fs::write(&path, "jobs:\n  build:\n    steps: []\n").unwrap();

        let mut doc = ManifestDoc::from_path(&path).unwrap();
        assert!(doc.ensure_top_level_field("name", Value::String("pipeline".into())));
        doc.save().unwrap();

        let reloaded = ManifestDoc::from_path(&path).unwrap();
        assert_eq!(reloaded.top_level_str("name"), Some("pipeline"));
        assert!(reloaded.job("build").is_some());
        // No temp file left behind.
        assert!(!dir.path().join("pipeline.tmp").exists());
    }

    #[test]
    fn save_without_parse_is_an_error() {
        let mut doc = ManifestDoc::from_raw("broken", "{{nope");
        assert!(doc.save().is_err());
    }
}
