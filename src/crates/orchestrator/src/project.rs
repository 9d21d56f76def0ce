//! `ProjectExecutionContext`: bundles one project's isolated graph, stores,
//! and scheduler so multiple projects can run independently in the same
//! process (spec §4.8; SPEC_FULL.md supplement — the original keeps this
//! isolation at the service layer instead of a reusable type).
//!
//! The "current project" is carried as an ambient `tracing` span field rather
//! than a side channel: `run` is `#[tracing::instrument]`-annotated with
//! `project_id`, grounded on
//! `langgraph-core/src/compiled/execution.rs`'s
//! `#[tracing::instrument(skip(self, input), fields(node_count = ...))]`
//! idiom, so every log line emitted by the graph/scheduler/adapters during a
//! run is attributed to its project without threading an id through every
//! call signature.

use std::sync::Arc;
use std::time::Duration;

use crate::adapter::AgentBlueprint;
use crate::broadcaster::{NoopBroadcaster, UpdateBroadcaster};
use crate::config::ExecutionConfig;
use crate::context::ContextResolver;
use crate::cycle_manager::CycleManager;
use crate::error::Result;
use crate::execution_engine::ExecutionEngine;
use crate::graph::TaskGraph;
use crate::hitl::{HitlCoordinator, HitlTransport};
use crate::knowledge_store::KnowledgeStore;
use crate::node::{NodeType, TaskNode, TaskType};
use crate::node_processor::NodeProcessor;
use crate::trace::TraceLog;

/// One project's isolated slice of orchestrator state. Nothing here is
/// shared across projects: each gets its own `TaskGraph`, `KnowledgeStore`,
/// and `TraceLog`, so a bug or a stuck run in one project cannot affect
/// another's.
pub struct ProjectExecutionContext {
    pub project_id: String,
    pub graph: Arc<TaskGraph>,
    pub knowledge_store: Arc<KnowledgeStore>,
    pub trace: Arc<TraceLog>,
    pub broadcaster: Arc<dyn UpdateBroadcaster>,
    pub hitl: Arc<HitlCoordinator>,
    pub config: ExecutionConfig,
    execution_engine: ExecutionEngine,
}

impl ProjectExecutionContext {
    pub fn new(
        project_id: impl Into<String>,
        blueprint: Arc<dyn AgentBlueprint>,
        hitl_transport: Box<dyn HitlTransport>,
        config: ExecutionConfig,
    ) -> Self {
        Self::with_broadcaster(project_id, blueprint, hitl_transport, config, Arc::new(NoopBroadcaster))
    }

    pub fn with_broadcaster(
        project_id: impl Into<String>,
        blueprint: Arc<dyn AgentBlueprint>,
        hitl_transport: Box<dyn HitlTransport>,
        config: ExecutionConfig,
        broadcaster: Arc<dyn UpdateBroadcaster>,
    ) -> Self {
        let project_id = project_id.into();
        let graph = Arc::new(TaskGraph::new());
        let knowledge_store = Arc::new(KnowledgeStore::new());
        let trace = Arc::new(TraceLog::new());
        let context_resolver = Arc::new(ContextResolver::new(graph.clone(), knowledge_store.clone()));
        let hitl = Arc::new(HitlCoordinator::new(hitl_transport, config.hitl.clone()));

        let node_processor = Arc::new(NodeProcessor::new(
            graph.clone(),
            knowledge_store.clone(),
            context_resolver,
            hitl.clone(),
            blueprint,
            trace.clone(),
            broadcaster.clone(),
            config.max_planning_layer,
        ));
        let cycle_manager = CycleManager::new(
            graph.clone(),
            knowledge_store.clone(),
            node_processor,
            broadcaster.clone(),
            config.max_concurrent_nodes,
        );
        let execution_engine = ExecutionEngine::new(
            graph.clone(),
            knowledge_store.clone(),
            cycle_manager,
            hitl.clone(),
            broadcaster.clone(),
            config.clone(),
        );

        Self {
            project_id,
            graph,
            knowledge_store,
            trace,
            broadcaster,
            hitl,
            config,
            execution_engine,
        }
    }

    /// Runs this project's root goal to completion. `max_steps`/`timeout`
    /// default to the project's `ExecutionConfig` if not overridden by the
    /// caller via [`Self::run_with_bounds`].
    pub async fn run(&self, root_goal: impl Into<String>, root_task_type: TaskType, root_node_type: NodeType) -> Result<Arc<TaskNode>> {
        let timeout = Duration::from_secs(self.config.max_steps as u64 * self.config.node_execution_timeout_seconds);
        self.run_with_bounds(root_goal, root_task_type, root_node_type, self.config.max_steps, timeout)
            .await
    }

    #[tracing::instrument(skip(self, root_goal), fields(project_id = %self.project_id))]
    pub async fn run_with_bounds(
        &self,
        root_goal: impl Into<String>,
        root_task_type: TaskType,
        root_node_type: NodeType,
        max_steps: usize,
        timeout: Duration,
    ) -> Result<Arc<TaskNode>> {
        self.execution_engine
            .run(root_goal.into(), root_task_type, root_node_type, max_steps, timeout)
            .await
    }
}
