//! `CycleManager`: advances the whole graph by exactly one scheduling step
//! (spec §4.6).
//!
//! Grounded on `cycle_manager.py::execute_step`'s fixed five-phase ordering:
//! promote PENDING to READY, drain one AGGREGATING node left over from the
//! previous step, fan out every READY node concurrently (bounded by
//! `max_concurrent_nodes`), resolve PLAN_DONE nodes (atomic bypass or
//! promotion to AGGREGATING), and finally drain one NEEDS_REPLAN node. Each
//! phase's transitions go through `TaskNode::transition` (and so the spec
//! §3.3 table) rather than writing `status` directly.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};

use crate::broadcaster::UpdateBroadcaster;
use crate::error::Result;
use crate::graph::TaskGraph;
use crate::knowledge_store::KnowledgeStore;
use crate::node::{NodeType, TaskNode, TaskStatus};
use crate::node_processor::NodeProcessor;
use crate::state_manager::StateManager;

pub struct CycleManager {
    graph: Arc<TaskGraph>,
    state_manager: StateManager,
    knowledge_store: Arc<KnowledgeStore>,
    node_processor: Arc<NodeProcessor>,
    broadcaster: Arc<dyn UpdateBroadcaster>,
    max_concurrent_nodes: usize,
}

impl CycleManager {
    pub fn new(
        graph: Arc<TaskGraph>,
        knowledge_store: Arc<KnowledgeStore>,
        node_processor: Arc<NodeProcessor>,
        broadcaster: Arc<dyn UpdateBroadcaster>,
        max_concurrent_nodes: usize,
    ) -> Self {
        let state_manager = StateManager::new(graph.clone());
        Self {
            graph,
            state_manager,
            knowledge_store,
            node_processor,
            broadcaster,
            max_concurrent_nodes,
        }
    }

    fn record_transition(&self, node: &TaskNode, old: TaskStatus) {
        self.knowledge_store.add_or_update_record_from_node(node);
        self.broadcaster.on_state_changed(&node.task_id, old, node.status());
    }

    /// Runs the phases in order, stopping after the first one that performs
    /// work (spec §4.6). Phase 1 always runs (it has no dispatch of its own
    /// to serialize against); phases 2 through 4 each return immediately if
    /// they changed anything, so only one of aggregation, READY fan-out, or
    /// PLAN_DONE resolution happens per step; phase 5 runs only when none of
    /// 2-4 did. Returns `true` iff any node's status changed during this step
    /// (used by `ExecutionEngine` to detect deadlock when a step changes
    /// nothing and no node is active).
    pub async fn step(&self) -> Result<bool> {
        let changed = self.promote_pending_nodes();

        if self.drain_one_aggregating_node().await {
            return Ok(true);
        }
        if self.dispatch_ready_nodes().await {
            return Ok(true);
        }
        if self.resolve_plan_done_nodes()? {
            return Ok(true);
        }

        Ok(changed | self.drain_one_needs_replan_node().await)
    }

    /// Phase 1: every PENDING node whose predicate now holds becomes READY.
    /// `TaskNode::transition` is the atomic test-and-set: a node already
    /// claimed (by a concurrent caller, in principle) simply fails the
    /// `status == Pending` check inside the lock and is skipped.
    fn promote_pending_nodes(&self) -> bool {
        let mut changed = false;
        for node in self.graph.get_all_nodes() {
            if node.status() == TaskStatus::Pending && self.state_manager.can_become_ready(&node) {
                let old = node.status();
                if node.transition(TaskStatus::Ready).is_ok() {
                    self.record_transition(&node, old);
                    changed = true;
                }
            }
        }
        changed
    }

    /// Phase 2: process at most one AGGREGATING node per step, mirroring the
    /// original's single-aggregation-in-flight design so aggregator calls
    /// never overlap on sibling plan nodes in the same cycle.
    async fn drain_one_aggregating_node(&self) -> bool {
        let target = self
            .graph
            .get_all_nodes()
            .into_iter()
            .find(|n| n.status() == TaskStatus::Aggregating);
        match target {
            Some(node) => {
                if let Err(e) = self.node_processor.aggregate(node).await {
                    tracing::error!(error = %e, "aggregation dispatch failed");
                }
                true
            }
            None => false,
        }
    }

    /// Phase 3: every READY node is dispatched concurrently, bounded by
    /// `max_concurrent_nodes` (spec §4.6, §4.7).
    async fn dispatch_ready_nodes(&self) -> bool {
        let ready: Vec<Arc<TaskNode>> = self
            .graph
            .get_all_nodes()
            .into_iter()
            .filter(|n| n.status() == TaskStatus::Ready)
            .collect();
        if ready.is_empty() {
            return false;
        }

        let mut in_flight = FuturesUnordered::new();
        let mut remaining = ready.into_iter();
        for node in remaining.by_ref().take(self.max_concurrent_nodes) {
            in_flight.push(self.node_processor.process(node));
        }
        while let Some(result) = in_flight.next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "node dispatch failed");
            }
            if let Some(node) = remaining.next() {
                in_flight.push(self.node_processor.process(node));
            }
        }
        true
    }

    /// Phase 4: resolve every PLAN_DONE node, either bypassing straight to
    /// DONE (atomic execution already ran, see DESIGN.md Open Question 1) or
    /// promoting to AGGREGATING once every child is terminal. Iterates to a
    /// fixed point within the step (bounded by the subgraph count, so it
    /// always terminates) since resolving one PLAN_DONE node can't unblock
    /// another PLAN_DONE node in the same step.
    fn resolve_plan_done_nodes(&self) -> Result<bool> {
        let mut changed = false;
        for node in self.graph.get_all_nodes() {
            if node.status() != TaskStatus::PlanDone || node.node_type() != NodeType::Plan {
                continue;
            }
            let was_executed_as_atomic = node
                .snapshot()
                .aux_data
                .get("was_executed_as_atomic")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if was_executed_as_atomic {
                let old = node.status();
                node.transition(TaskStatus::Done)?;
                self.record_transition(&node, old);
                changed = true;
            } else if self.state_manager.can_aggregate(&node) {
                let failed_child_ids = self.failed_children(&node);
                let old = node.status();
                if failed_child_ids.is_empty() {
                    node.transition(TaskStatus::Aggregating)?;
                } else {
                    tracing::warn!(node_id = %node.task_id, ?failed_child_ids, "child failure detected, forcing NEEDS_REPLAN instead of aggregating");
                    node.with_state(|s| {
                        s.replan_details = Some(crate::node::ReplanRequestDetails {
                            reason: format!("{} child task(s) failed", failed_child_ids.len()),
                            failed_child_ids: failed_child_ids.clone(),
                            user_modification_instructions: None,
                        });
                    });
                    node.transition(TaskStatus::NeedsReplan)?;
                }
                self.record_transition(&node, old);
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Task ids of any FAILED children in `node`'s sub-graph, so a fully
    /// terminal plan with a failure in it replans instead of aggregating
    /// over a gap.
    fn failed_children(&self, node: &TaskNode) -> Vec<String> {
        let Some(sub_graph_id) = node.sub_graph_id() else {
            return Vec::new();
        };
        self.graph
            .get_nodes_in_graph(&sub_graph_id)
            .into_iter()
            .filter(|n| n.status() == TaskStatus::Failed)
            .map(|n| n.task_id.clone())
            .collect()
    }

    /// Phase 5: process at most one NEEDS_REPLAN node per step, same
    /// single-in-flight rationale as aggregation. Re-dispatches it through
    /// the ordinary READY path (spec §4.2: NEEDS_REPLAN -> READY is legal).
    async fn drain_one_needs_replan_node(&self) -> bool {
        let target = self
            .graph
            .get_all_nodes()
            .into_iter()
            .find(|n| n.status() == TaskStatus::NeedsReplan);
        match target {
            Some(node) => {
                node.with_state(|s| s.replan_attempts += 1);
                let old = node.status();
                if node.transition(TaskStatus::Ready).is_err() {
                    return false;
                }
                self.record_transition(&node, old);
                if let Err(e) = self.node_processor.process(node).await {
                    tracing::error!(error = %e, "replan dispatch failed");
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterOutput, Action, AgentRegistry, ExecuteOutput};
    use crate::config::HitlConfig;
    use crate::context::ContextResolver;
    use crate::hitl::{AutoApproveTransport, HitlCoordinator};
    use crate::node::TaskType;
    use crate::trace::TraceLog;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoExecutor;

    #[async_trait]
    impl crate::adapter::AgentAdapter for EchoExecutor {
        async fn invoke(
            &self,
            action: Action,
            _node_id: &str,
            _input: crate::context::AgentTaskInput,
        ) -> Result<AdapterOutput> {
            assert_eq!(action, Action::Execute);
            Ok(AdapterOutput::Execute(ExecuteOutput {
                result: json!("done"),
                output_summary: "ok".to_string(),
            }))
        }
    }

    fn cycle_manager() -> (Arc<TaskGraph>, CycleManager) {
        let graph = Arc::new(TaskGraph::new());
        let knowledge_store = Arc::new(KnowledgeStore::new());
        let context_resolver = Arc::new(ContextResolver::new(graph.clone(), knowledge_store.clone()));
        let hitl = Arc::new(HitlCoordinator::new(Box::new(AutoApproveTransport), HitlConfig::default()));
        let mut registry = AgentRegistry::new();
        registry.set_default(Action::Execute, Arc::new(EchoExecutor));
        let trace = Arc::new(TraceLog::new());
        let (broadcaster, _rx) = crate::broadcaster::ChannelBroadcaster::new(16);
        let broadcaster: Arc<dyn UpdateBroadcaster> = Arc::new(broadcaster);
        let node_processor = Arc::new(NodeProcessor::new(
            graph.clone(),
            knowledge_store.clone(),
            context_resolver,
            hitl,
            Arc::new(registry),
            trace,
            broadcaster.clone(),
            5,
        ));
        let cycle_manager = CycleManager::new(graph.clone(), knowledge_store, node_processor, broadcaster, 4);
        (graph, cycle_manager)
    }

    #[tokio::test]
    async fn linear_pair_completes_over_two_steps() {
        let (graph, cm) = cycle_manager();
        graph.add_graph("root", true).unwrap();
        let a = Arc::new(TaskNode::new("a", "first", "first then second", TaskType::Write, NodeType::Execute, 0, None));
        let b = Arc::new(TaskNode::new("b", "second", "first then second", TaskType::Write, NodeType::Execute, 0, None));
        graph.add_node_to_graph("root", a.clone()).unwrap();
        graph.add_node_to_graph("root", b.clone()).unwrap();
        graph.add_edge("root", "a", "b").unwrap();

        assert!(cm.step().await.unwrap());
        assert_eq!(a.status(), TaskStatus::Done);
        assert_eq!(b.status(), TaskStatus::Pending);

        assert!(cm.step().await.unwrap());
        assert_eq!(b.status(), TaskStatus::Done);

        assert!(!cm.step().await.unwrap(), "a quiescent graph reports no change");
    }

    struct EchoAggregatorAndExecutor;

    #[async_trait]
    impl crate::adapter::AgentAdapter for EchoAggregatorAndExecutor {
        async fn invoke(
            &self,
            action: Action,
            _node_id: &str,
            input: crate::context::AgentTaskInput,
        ) -> Result<AdapterOutput> {
            match action {
                Action::Execute => Ok(AdapterOutput::Execute(ExecuteOutput {
                    result: json!("done"),
                    output_summary: "ok".to_string(),
                })),
                Action::Aggregate => Ok(AdapterOutput::Aggregate(crate::adapter::AggregateOutput {
                    result: json!(input.relevant_context_items.len()),
                    output_summary: "aggregated".to_string(),
                })),
                other => panic!("unexpected action in this test: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn step_processes_aggregating_node_alone_and_defers_unrelated_ready_node() {
        let graph = Arc::new(TaskGraph::new());
        let knowledge_store = Arc::new(KnowledgeStore::new());
        let context_resolver = Arc::new(ContextResolver::new(graph.clone(), knowledge_store.clone()));
        let hitl = Arc::new(HitlCoordinator::new(Box::new(AutoApproveTransport), HitlConfig::default()));
        let mut registry = AgentRegistry::new();
        registry.set_default(Action::Execute, Arc::new(EchoAggregatorAndExecutor));
        registry.set_default(Action::Aggregate, Arc::new(EchoAggregatorAndExecutor));
        let trace = Arc::new(TraceLog::new());
        let (broadcaster, _rx) = crate::broadcaster::ChannelBroadcaster::new(16);
        let broadcaster: Arc<dyn UpdateBroadcaster> = Arc::new(broadcaster);
        let node_processor = Arc::new(NodeProcessor::new(
            graph.clone(),
            knowledge_store.clone(),
            context_resolver,
            hitl,
            Arc::new(registry),
            trace,
            broadcaster.clone(),
            5,
        ));
        let cm = CycleManager::new(graph.clone(), knowledge_store, node_processor, broadcaster, 4);

        graph.add_graph("root", true).unwrap();

        // X is sitting in AGGREGATING (a plan node whose children are all
        // terminal already). Y is an unrelated, independent READY node.
        let x = Arc::new(TaskNode::new("x", "aggregate me", "aggregate me", TaskType::Write, NodeType::Plan, 0, None));
        graph.add_node_to_graph("root", x.clone()).unwrap();
        x.transition(TaskStatus::Ready).unwrap();
        x.with_state(|s| s.status = TaskStatus::Aggregating);

        let y = Arc::new(TaskNode::new("y", "unrelated", "unrelated", TaskType::Write, NodeType::Execute, 0, None));
        graph.add_node_to_graph("root", y.clone()).unwrap();
        y.transition(TaskStatus::Ready).unwrap();

        assert!(cm.step().await.unwrap());
        assert_eq!(x.status(), TaskStatus::Done, "x alone is processed by this step");
        assert_eq!(y.status(), TaskStatus::Ready, "y is deferred to the next step, not dispatched in the same one");

        assert!(cm.step().await.unwrap());
        assert_eq!(y.status(), TaskStatus::Done, "y runs on the following step");
    }

    #[tokio::test]
    async fn atomic_plan_node_bypasses_aggregating() {
        let (graph, cm) = cycle_manager();
        graph.add_graph("root", true).unwrap();
        let plan = Arc::new(TaskNode::new("p", "atomic goal", "atomic goal", TaskType::Write, NodeType::Plan, 0, None));
        graph.add_node_to_graph("root", plan.clone()).unwrap();
        plan.transition(TaskStatus::Ready).unwrap();
        plan.with_state(|s| s.aux_data.insert("was_executed_as_atomic".to_string(), json!(true)));
        plan.with_state(|s| s.status = TaskStatus::PlanDone);

        assert!(cm.step().await.unwrap());
        assert_eq!(plan.status(), TaskStatus::Done);
    }
}
