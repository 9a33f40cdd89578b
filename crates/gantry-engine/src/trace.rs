//! Append-only trace collector.
//!
//! One physical log per orchestration invocation. Entries are never
//! rewritten or deleted, even across retries; a retried level appends a
//! second record with an incremented attempt number. Appends are atomic
//! whole-record operations, so concurrently executing levels never
//! interleave partial records.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use gantry_types::{ExecutionResult, Result};

struct TraceInner {
    records: Vec<ExecutionResult>,
    sink: Option<std::io::BufWriter<std::fs::File>>,
}

/// Shared handle to the run's trace log. Cloning yields another handle to
/// the same log.
#[derive(Clone)]
pub struct TraceCollector {
    inner: Arc<Mutex<TraceInner>>,
}

impl TraceCollector {
    /// In-memory log only.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TraceInner {
                records: Vec::new(),
                sink: None,
            })),
        }
    }

    /// Log that also streams one NDJSON record per append to `path`. The
    /// file is truncated: a fresh log per invocation.
    pub fn with_sink(path: &Path) -> Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(TraceInner {
                records: Vec::new(),
                sink: Some(std::io::BufWriter::new(file)),
            })),
        })
    }

    /// Append one result. The in-memory push and the NDJSON line are written
    /// under the same lock, as a single unit.
    pub fn append(&self, result: ExecutionResult) -> Result<()> {
        let mut inner = self.inner.lock().expect("trace lock poisoned");
        if let Some(sink) = inner.sink.as_mut() {
            let line = serde_json::to_string(&trace_record(&result))?;
            writeln!(sink, "{line}")?;
            sink.flush()?;
        }
        inner.records.push(result);
        Ok(())
    }

    /// All records appended so far, in order.
    pub fn read_all(&self) -> Vec<ExecutionResult> {
        self.inner.lock().expect("trace lock poisoned").records.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("trace lock poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TraceCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// The flat NDJSON record shape downstream consumers depend on.
fn trace_record(result: &ExecutionResult) -> serde_json::Value {
    serde_json::json!({
        "timestamp": result.timestamp.to_rfc3339(),
        "level": result.level.get(),
        "attempt": result.attempt,
        "kind": result.verdict.as_str(),
        "exit_code": result.exit_code,
        "duration_ms": result.duration.as_millis() as u64,
        "message": result.message,
        "remediation_attempted": result.remediation_attempted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use gantry_types::{LevelId, TaxonomyKind};

    fn result(level: u8, attempt: u32, kind: TaxonomyKind) -> ExecutionResult {
        ExecutionResult::classified(
            LevelId::new(level),
            attempt,
            if kind.is_success() { 0 } else { 1 },
            kind,
            Duration::from_millis(10),
            "probe",
        )
    }

    #[test]
    fn append_preserves_order() {
        let trace = TraceCollector::new();
        trace.append(result(1, 1, TaxonomyKind::Success)).unwrap();
        trace.append(result(2, 1, TaxonomyKind::Permissions)).unwrap();
        trace.append(result(2, 2, TaxonomyKind::Success)).unwrap();

        let all = trace.read_all();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].level, LevelId::new(1));
        assert_eq!(all[1].attempt, 1);
        assert_eq!(all[2].attempt, 2);
    }

    #[test]
    fn retry_records_accumulate_never_rewrite() {
        let trace = TraceCollector::new();
        trace.append(result(9, 1, TaxonomyKind::Integration)).unwrap();
        trace.append(result(9, 2, TaxonomyKind::Integration)).unwrap();
        trace.append(result(9, 3, TaxonomyKind::Success)).unwrap();

        let attempts: Vec<u32> = trace.read_all().iter().map(|r| r.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[test]
    fn clones_share_the_same_log() {
        let trace = TraceCollector::new();
        let handle = trace.clone();
        handle.append(result(4, 1, TaxonomyKind::Logic)).unwrap();
        assert_eq!(trace.len(), 1);
    }

    #[test]
    fn concurrent_appends_never_interleave() {
        let trace = TraceCollector::new();
        let mut handles = Vec::new();
        for level in 1..=8u8 {
            let t = trace.clone();
            handles.push(std::thread::spawn(move || {
                for attempt in 1..=10u32 {
                    t.append(result(level, attempt, TaxonomyKind::Success)).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(trace.len(), 80);
        // Per-level attempt sequences stay ordered even under contention.
        for level in 1..=8u8 {
            let attempts: Vec<u32> = trace
                .read_all()
                .iter()
                .filter(|r| r.level == LevelId::new(level))
                .map(|r| r.attempt)
                .collect();
            assert_eq!(attempts, (1..=10).collect::<Vec<_>>());
        }
    }

    #[test]
    fn ndjson_sink_writes_contract_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.ndjson");
        let trace = TraceCollector::with_sink(&path).unwrap();
        trace.append(result(6, 1, TaxonomyKind::Resource)).unwrap();
        trace
            .append(ExecutionResult::skipped(LevelId::new(9), "skipped: fail-fast abort"))
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["level"], 6);
        assert_eq!(first["attempt"], 1);
        assert_eq!(first["kind"], "resource");
        assert_eq!(first["exit_code"], 3);
        assert_eq!(first["duration_ms"], 10);
        assert!(first["timestamp"].is_string());
        assert_eq!(first["remediation_attempted"], false);

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["kind"], "skipped");
        assert_eq!(second["exit_code"], 0);
    }
}
