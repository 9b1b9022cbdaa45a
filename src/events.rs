//! Job progress events and the emitter that orders them.

use crate::models::{ComparativeVerdict, ConsistencyVerdict, GenerationResult, PerformanceVerdict};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

/// One line of the progress stream, `{"type": ..., "data": ...}` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum JobEvent {
    /// The entire generation batch, emitted once it has fully resolved
    GenerationAll(Vec<GenerationResult>),
    /// Up to one verdict per judge for a consistency task
    ConsistencyUpdate(Vec<ConsistencyVerdict>),
    PerformanceUpdate(PerformanceVerdict),
    ComparativeUpdate(ComparativeVerdict),
    Done {
        #[serde(rename = "savedPath")]
        saved_path: String,
    },
    Error(String),
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Done { .. } | JobEvent::Error(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::GenerationAll(_) => "generation_all",
            JobEvent::ConsistencyUpdate(_) => "consistency_update",
            JobEvent::PerformanceUpdate(_) => "performance_update",
            JobEvent::ComparativeUpdate(_) => "comparative_update",
            JobEvent::Done { .. } => "done",
            JobEvent::Error(_) => "error",
        }
    }

    /// Serialize as one NDJSON line, newline included
    pub fn to_ndjson(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Generating,
    Evaluating,
    Persisting,
    Done,
    Errored,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Errored)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Idle => "idle",
            JobState::Generating => "generating",
            JobState::Evaluating => "evaluating",
            JobState::Persisting => "persisting",
            JobState::Done => "done",
            JobState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Sending half of a job's event stream.
///
/// Tracks the job state so that exactly one terminal event is ever sent and
/// nothing follows it. Once the receiver is gone, events are dropped and the
/// runner abandons the job at its next phase or judge task.
pub struct ProgressEmitter {
    tx: mpsc::Sender<JobEvent>,
    state: Mutex<JobState>,
    detached: AtomicBool,
}

impl ProgressEmitter {
    pub fn new(tx: mpsc::Sender<JobEvent>) -> Self {
        Self {
            tx,
            state: Mutex::new(JobState::Idle),
            detached: AtomicBool::new(false),
        }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<JobEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }

    pub fn state(&self) -> JobState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once the receiving side has hung up
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst) || self.tx.is_closed()
    }

    /// Move to `next`; refused once the job has reached a terminal state
    pub fn enter(&self, next: JobState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_terminal() {
            debug!(from = %*state, to = %next, "state change after terminal state ignored");
            return false;
        }
        debug!(from = %*state, to = %next, "job state");
        *state = next;
        true
    }

    /// Send a progress event; dropped after a terminal event
    pub async fn emit(&self, event: JobEvent) {
        if event.is_terminal() {
            match event {
                JobEvent::Done { saved_path } => self.finish(saved_path).await,
                JobEvent::Error(message) => self.fail(message).await,
                _ => {}
            }
            return;
        }
        if self.state().is_terminal() {
            debug!(kind = event.kind(), "event after terminal event dropped");
            return;
        }
        self.send(event).await;
    }

    /// Terminal success carrying the report location
    pub async fn finish(&self, saved_path: String) {
        if self.enter(JobState::Done) {
            self.send(JobEvent::Done { saved_path }).await;
        }
    }

    /// Terminal failure carrying a human-readable message
    pub async fn fail(&self, message: String) {
        if self.enter(JobState::Errored) {
            self.send(JobEvent::Error(message)).await;
        }
    }

    async fn send(&self, event: JobEvent) {
        if self.is_detached() {
            debug!(kind = event.kind(), "receiver gone, event discarded");
            return;
        }
        let kind = event.kind();
        if self.tx.send(event).await.is_err() {
            self.detached.store(true, Ordering::SeqCst);
            debug!(kind, "receiver gone, event discarded");
        }
    }
}
