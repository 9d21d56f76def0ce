//! `TraceLog`: a per-node diagnostic record of agent invocations (spec §3.1).
//!
//! Never consulted by the scheduler: `StateManager`, `CycleManager`, and
//! `ExecutionEngine` decide purely from `TaskNode`/`TaskGraph` state. This
//! exists for observability and post-hoc debugging only.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One agent-invocation stage within a node's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub stage_name: String,
    pub started: DateTime<Utc>,
    pub completed: Option<DateTime<Utc>>,
    pub input_context: Option<Value>,
    pub llm_response: Option<Value>,
    pub additional_data: Value,
    pub error: Option<String>,
}

impl TraceEntry {
    fn open(stage_name: impl Into<String>, input_context: Option<Value>) -> Self {
        Self {
            stage_name: stage_name.into(),
            started: Utc::now(),
            completed: None,
            input_context,
            llm_response: None,
            additional_data: Value::Null,
            error: None,
        }
    }
}

/// An append-only sequence of `TraceEntry`, one per node.
#[derive(Default)]
pub struct TraceLog {
    entries: Mutex<Vec<TraceEntry>>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new stage and returns its index for use with `close_stage`.
    pub fn open_stage(&self, stage_name: impl Into<String>, input_context: Option<Value>) -> usize {
        let mut entries = self.entries.lock();
        entries.push(TraceEntry::open(stage_name, input_context));
        entries.len() - 1
    }

    /// Closes the stage at `index` with a success result.
    pub fn close_stage_ok(&self, index: usize, llm_response: Option<Value>, additional_data: Value) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(index) {
            entry.completed = Some(Utc::now());
            entry.llm_response = llm_response;
            entry.additional_data = additional_data;
        }
    }

    /// Closes the stage at `index` with an error.
    pub fn close_stage_err(&self, index: usize, error: impl Into<String>) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(index) {
            entry.completed = Some(Utc::now());
            entry.error = Some(error.into());
        }
    }

    pub fn entries(&self) -> Vec<TraceEntry> {
        self.entries.lock().clone()
    }
}
