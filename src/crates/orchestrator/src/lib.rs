//! Hierarchical task orchestration engine.
//!
//! A goal becomes a tree of `TaskNode`s: PLAN nodes decompose into a
//! dependency DAG of children, EXECUTE nodes act directly, and results
//! aggregate back up. `CycleManager` advances the whole graph one step at a
//! time; `ExecutionEngine` drives it to completion, gated by
//! `HitlCoordinator` review checkpoints and backed by a pluggable
//! `AgentAdapter` boundary for planning, atomization, execution, and
//! aggregation.
//!
//! The teacher's web server, database layer, gRPC service definitions, and
//! workflow-interpreter/pattern-library/LLM-routing modules belonged to its
//! request-routing service and have no counterpart in this crate's
//! task-orchestration scope; see DESIGN.md's Final Trim section for the full
//! list of what was removed.

pub mod adapter;
pub mod broadcaster;
pub mod config;
pub mod context;
pub mod cycle_manager;
pub mod error;
pub mod execution_engine;
pub mod graph;
pub mod hitl;
pub mod knowledge_store;
pub mod node;
pub mod node_processor;
pub mod project;
pub mod state_manager;
pub mod trace;
pub mod version;

pub use adapter::{AgentAdapter, AgentBlueprint, AgentRegistry};
pub use broadcaster::{ChannelBroadcaster, NoopBroadcaster, UpdateBroadcaster, UpdateEvent};
pub use config::ExecutionConfig;
pub use context::{AgentTaskInput, ContextResolver};
pub use cycle_manager::CycleManager;
pub use error::{OrchestratorError, Result};
pub use execution_engine::ExecutionEngine;
pub use graph::TaskGraph;
pub use hitl::{Checkpoint, HitlCoordinator, HitlOutcome, HitlTransport};
pub use knowledge_store::KnowledgeStore;
pub use node::{NodeType, TaskNode, TaskStatus, TaskType};
pub use node_processor::NodeProcessor;
pub use project::ProjectExecutionContext;
pub use state_manager::StateManager;
pub use trace::TraceLog;

/// Crate version, as reported in diagnostics and health checks.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
