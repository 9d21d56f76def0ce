//! `StateManager`: pure predicates over the graph (spec §4.2). No side
//! effects; called by `CycleManager` before every transition.
//!
//! Directly grounded on
//! `hierarchical_agent_framework/graph/state_manager.py`: the container-graph
//! lookup tolerates the transient window where a parent has spawned children
//! but not yet recorded its own `sub_graph_id` (the "sync gap" of spec §3.2) by
//! falling back to a linear scan over all graphs.

use std::sync::Arc;

use crate::graph::TaskGraph;
use crate::node::{NodeType, TaskNode, TaskStatus};

pub struct StateManager {
    graph: Arc<TaskGraph>,
}

impl StateManager {
    pub fn new(graph: Arc<TaskGraph>) -> Self {
        Self { graph }
    }

    /// A node's container graph is its parent's `sub_graph_id`, or the root
    /// graph if it has no parent (spec §3.2).
    pub fn find_container_graph_id(&self, node: &TaskNode) -> Option<String> {
        if let Some(parent_id) = &node.parent_node_id {
            let parent = self.graph.get_node(parent_id)?;
            if let Some(sub_graph_id) = parent.sub_graph_id() {
                return Some(sub_graph_id);
            }
            tracing::debug!(
                node_id = %node.task_id,
                parent_id = %parent_id,
                "parent has no sub_graph_id yet, searching all graphs"
            );
            return self.graph.find_graph_containing(&node.task_id);
        }
        let root = self.graph.root_graph_id()?;
        if self
            .graph
            .get_nodes_in_graph(&root)
            .iter()
            .any(|n| n.task_id == node.task_id)
        {
            return Some(root);
        }
        self.graph.find_graph_containing(&node.task_id)
    }

    fn parent_conditions_met(&self, node: &TaskNode) -> bool {
        match &node.parent_node_id {
            None => true,
            Some(parent_id) => match self.graph.get_node(parent_id) {
                Some(parent) => matches!(
                    parent.status(),
                    TaskStatus::Running | TaskStatus::PlanDone | TaskStatus::Done | TaskStatus::Aggregating
                ),
                None => false,
            },
        }
    }

    fn predecessor_conditions_met(&self, node: &TaskNode, container_graph_id: &str) -> bool {
        let predecessors = self.graph.get_predecessors(container_graph_id, &node.task_id);
        predecessors.iter().all(|p| p.status() == TaskStatus::Done)
    }

    /// Spec §4.2: true iff PENDING, parent conditions hold, a container graph
    /// can be found, and every predecessor in it is DONE.
    pub fn can_become_ready(&self, node: &TaskNode) -> bool {
        if node.status() != TaskStatus::Pending {
            return false;
        }
        if !self.parent_conditions_met(node) {
            tracing::debug!(node_id = %node.task_id, "cannot become READY: parent conditions not met");
            return false;
        }
        let Some(container_graph_id) = self.find_container_graph_id(node) else {
            tracing::warn!(node_id = %node.task_id, "cannot become READY: container graph not found");
            return false;
        };
        self.predecessor_conditions_met(node, &container_graph_id)
    }

    /// Spec §4.2: true iff PLAN_DONE + PLAN type, `sub_graph_id` set, and
    /// every node in that subgraph is terminal (an empty subgraph counts as
    /// trivially aggregated).
    pub fn can_aggregate(&self, node: &TaskNode) -> bool {
        if node.status() != TaskStatus::PlanDone || node.node_type() != NodeType::Plan {
            return false;
        }
        let Some(sub_graph_id) = node.sub_graph_id() else {
            tracing::warn!(node_id = %node.task_id, "PLAN_DONE but no sub_graph_id");
            return false;
        };
        let sub_nodes = self.graph.get_nodes_in_graph(&sub_graph_id);
        if sub_nodes.is_empty() {
            tracing::debug!(node_id = %node.task_id, "empty sub-graph, trivially aggregatable");
            return true;
        }
        sub_nodes.iter().all(|n| n.status().is_terminal())
    }

    /// Spec §3.3: only RUNNING and AGGREGATING may transition to DONE through
    /// the ordinary (non-atomic-bypass) path; the atomic-bypass case is
    /// validated separately by the transition table itself (see DESIGN.md
    /// Open Question 1).
    pub fn can_transition_to_done(&self, node: &TaskNode) -> bool {
        matches!(node.status(), TaskStatus::Running | TaskStatus::Aggregating)
    }

    /// Spec §4.2: any non-terminal status may transition to FAILED.
    pub fn can_transition_to_failed(&self, node: &TaskNode) -> bool {
        !node.status().is_terminal()
    }
}
