//! Crate-wide error type.
//!
//! One variant per error kind named in the core's error-handling design: adapter
//! failures, invalid state transitions, graph-integrity violations, HITL outcomes,
//! deadlock and timeout. `Io`/`Serialization`/`Config` round out the ambient
//! surface a config-loading, serializing crate needs but that isn't itself part
//! of the scheduler's error taxonomy.

use thiserror::Error;

use crate::node::TaskStatus;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// An adapter call failed; the owning node is transitioned to FAILED.
    #[error("adapter error for node {node_id}: {message}")]
    AdapterError { node_id: String, message: String },

    /// A status transition was attempted outside the legal table in §3.3.
    /// The node's status is left unchanged.
    #[error("invalid transition for node {node_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        node_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// A graph mutation was rejected: duplicate id, missing node, or an edge
    /// that would create a cycle.
    #[error("graph integrity error: {0}")]
    GraphIntegrity(String),

    /// A human reviewer chose to abort at a HITL checkpoint.
    #[error("HITL checkpoint '{checkpoint}' aborted by reviewer: {message}")]
    HitlAborted { checkpoint: String, message: String },

    /// A HITL checkpoint timed out waiting for a reviewer and the configured
    /// policy does not auto-approve.
    #[error("HITL checkpoint '{checkpoint}' timed out waiting for review")]
    HitlTimeout { checkpoint: String },

    /// The engine made no progress and recovery could not unstick the graph.
    #[error("deadlock: {0}")]
    Deadlock(String),

    /// The run's wall-clock budget was exceeded.
    #[error("execution timed out after {elapsed_seconds:.2}s (limit {limit_seconds:.2}s)")]
    Timeout { elapsed_seconds: f64, limit_seconds: f64 },

    /// A node or project id was referenced but does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
