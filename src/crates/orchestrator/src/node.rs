//! `TaskNode`: the atom of work (spec §3.1, §3.3).
//!
//! Mutable fields live behind a re-entrant mutex so that a single call path can
//! re-enter (e.g. a transition helper that itself logs through a method taking
//! the same lock) without deadlocking, mirroring `task_node.py`'s
//! `threading.RLock`. Identity fields (`task_id`, `layer`, `parent_node_id`) are
//! fixed at construction and need no lock.

use std::cell::RefCell;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OrchestratorError, Result};

/// Node lifecycle status (spec §3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    PlanDone,
    Aggregating,
    Done,
    Failed,
    NeedsReplan,
    Cancelled,
}

impl TaskStatus {
    pub const TERMINAL: [TaskStatus; 3] = [TaskStatus::Done, TaskStatus::Failed, TaskStatus::Cancelled];

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    /// The legal `(from, to)` table, spec §3.3.
    fn allowed_targets(self) -> &'static [TaskStatus] {
        use TaskStatus::*;
        match self {
            Pending => &[Ready, Running, Failed, Cancelled],
            Ready => &[Running, Failed, Cancelled],
            Running => &[Done, PlanDone, Failed, NeedsReplan, Cancelled],
            PlanDone => &[Aggregating, Failed, NeedsReplan, Done],
            Aggregating => &[Done, Failed, NeedsReplan],
            NeedsReplan => &[Ready, Running, Failed, Cancelled],
            Done => &[NeedsReplan],
            Failed => &[Ready, NeedsReplan],
            Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        self.allowed_targets().contains(&to)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// What a task *does* vs. what kind of work product it is (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    Write,
    Think,
    Search,
    Aggregate,
    CodeInterpret,
    ImageGeneration,
}

/// PLAN decomposes, EXECUTE acts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    Plan,
    Execute,
}

/// Carried when a node transitions to `NEEDS_REPLAN` (spec §3.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplanRequestDetails {
    pub reason: String,
    pub failed_child_ids: Vec<String>,
    pub user_modification_instructions: Option<String>,
}

/// The fields that change over a node's lifetime, guarded by `TaskNode::lock`.
#[derive(Debug, Clone)]
pub struct MutableState {
    pub status: TaskStatus,
    pub node_type: NodeType,
    pub goal: String,
    pub sub_graph_id: Option<String>,
    pub result: Option<Value>,
    pub output_summary: Option<String>,
    pub error: Option<String>,
    pub agent_name: Option<String>,
    pub input_payload: Option<Value>,
    pub planned_sub_task_ids: Vec<String>,
    pub replan_attempts: u32,
    pub replan_details: Option<ReplanRequestDetails>,
    pub aux_data: HashMap<String, Value>,
    pub updated: DateTime<Utc>,
    pub completed: Option<DateTime<Utc>>,
}

/// One unit of work. `root` is the reserved id for the top node (spec §3.1).
pub struct TaskNode {
    pub task_id: String,
    pub layer: u32,
    pub parent_node_id: Option<String>,
    pub overall_objective: String,
    pub task_type: TaskType,
    pub created: DateTime<Utc>,
    lock: ReentrantMutex<RefCell<MutableState>>,
}

impl std::fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.lock.lock();
        let state = guard.borrow();
        f.debug_struct("TaskNode")
            .field("task_id", &self.task_id)
            .field("layer", &self.layer)
            .field("parent_node_id", &self.parent_node_id)
            .field("status", &state.status)
            .field("node_type", &state.node_type)
            .finish()
    }
}

impl TaskNode {
    pub fn new(
        task_id: impl Into<String>,
        goal: impl Into<String>,
        overall_objective: impl Into<String>,
        task_type: TaskType,
        node_type: NodeType,
        layer: u32,
        parent_node_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            layer,
            parent_node_id,
            overall_objective: overall_objective.into(),
            task_type,
            created: now,
            lock: ReentrantMutex::new(RefCell::new(MutableState {
                status: TaskStatus::Pending,
                node_type,
                goal: goal.into(),
                sub_graph_id: None,
                result: None,
                output_summary: None,
                error: None,
                agent_name: None,
                input_payload: None,
                planned_sub_task_ids: Vec::new(),
                replan_attempts: 0,
                replan_details: None,
                aux_data: HashMap::new(),
                updated: now,
                completed: None,
            })),
        }
    }

    /// Snapshot the mutable state under the lock. Cheap: one clone, no I/O.
    pub fn snapshot(&self) -> MutableState {
        let guard = self.lock.lock();
        guard.borrow().clone()
    }

    pub fn status(&self) -> TaskStatus {
        let guard = self.lock.lock();
        guard.borrow().status
    }

    pub fn node_type(&self) -> NodeType {
        let guard = self.lock.lock();
        guard.borrow().node_type
    }

    pub fn sub_graph_id(&self) -> Option<String> {
        let guard = self.lock.lock();
        guard.borrow().sub_graph_id.clone()
    }

    pub fn goal(&self) -> String {
        let guard = self.lock.lock();
        guard.borrow().goal.clone()
    }

    /// Read-modify-write any mutable field under the node's lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut MutableState) -> R) -> R {
        let guard = self.lock.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    /// Validate and apply a status transition. Invalid transitions are refused
    /// (logged, node unchanged) rather than applied, per spec §3.3.
    pub fn transition(&self, to: TaskStatus) -> Result<()> {
        let guard = self.lock.lock();
        let mut state = guard.borrow_mut();
        if !state.status.can_transition_to(to) {
            tracing::warn!(
                node_id = %self.task_id,
                from = ?state.status,
                to = ?to,
                "refusing invalid status transition"
            );
            return Err(OrchestratorError::InvalidTransition {
                node_id: self.task_id.clone(),
                from: state.status,
                to,
            });
        }
        let from = state.status;
        state.status = to;
        state.updated = Utc::now();
        if to.is_terminal() {
            state.completed = Some(state.updated);
        }
        tracing::info!(node_id = %self.task_id, ?from, ?to, "status transition");
        Ok(())
    }

    /// Convenience used by recovery/failure paths: transition to FAILED,
    /// recording the error message. Any non-terminal status may fail (spec §4.2).
    pub fn fail_with_error(&self, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        self.with_state(|s| s.error = Some(message.clone()));
        self.transition(TaskStatus::Failed)
    }
}
