//! Engine event system for observability.
//!
//! Emits [`EngineEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! external observers (loggers, reporters, dashboards) can follow a run
//! without coupling to the engine internals.

use serde::{Deserialize, Serialize};

use gantry_types::{LevelId, TaxonomyKind};

/// Orchestration lifecycle phases, surfaced through [`EngineEvent::PhaseChanged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Planning,
    Executing,
    Remediating,
    Reporting,
    Terminal,
}

/// Events emitted during an orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    RunStarted {
        run_id: String,
        mode: String,
        level_count: usize,
    },
    PhaseChanged {
        phase: Phase,
    },
    PlanBuilt {
        groups: Vec<Vec<u8>>,
    },
    GroupStarted {
        index: usize,
        levels: Vec<u8>,
    },
    LevelStarted {
        level: LevelId,
        attempt: u32,
    },
    LevelCompleted {
        level: LevelId,
        attempt: u32,
        kind: TaxonomyKind,
        exit_code: i32,
        duration_ms: u64,
    },
    LevelSkipped {
        level: LevelId,
    },
    LevelRetrying {
        level: LevelId,
        next_attempt: u32,
        delay_ms: u64,
    },
    RemediationAttempted {
        level: LevelId,
        document: String,
        description: String,
        applied: bool,
    },
    RunCompleted {
        run_id: String,
        passed: usize,
        failed: usize,
        skipped: usize,
        duration_ms: u64,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<EngineEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
