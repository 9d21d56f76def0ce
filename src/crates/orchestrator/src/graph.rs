//! `TaskGraph`: nodes organized into nested per-subgraph dependency DAGs (spec
//! §3.1, §3.2, §4.1).
//!
//! Two coexisting relationships live on the same node set: hierarchy
//! (`parent_node_id`, a tree, carried on `TaskNode` itself) and dependency (a
//! DAG per `graph_id`, modeled here with `petgraph`). Structural mutation
//! (`add_graph`, `add_node_to_graph`, `add_edge`) is serialized by a single
//! mutex; node lookup by id is lock-free via `DashMap`, matching the teacher's
//! concurrent-map idiom used elsewhere in this crate (`KnowledgeStore`).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{OrchestratorError, Result};
use crate::node::TaskNode;

/// One subgraph: the dependency DAG created by a single PLAN node to hold its
/// children, or the root graph holding the root node.
#[derive(Default)]
struct SubGraph {
    graph: DiGraph<String, ()>,
    index_of: HashMap<String, NodeIndex>,
}

impl SubGraph {
    fn ensure_node(&mut self, task_id: &str) -> NodeIndex {
        if let Some(&idx) = self.index_of.get(task_id) {
            return idx;
        }
        let idx = self.graph.add_node(task_id.to_string());
        self.index_of.insert(task_id.to_string(), idx);
        idx
    }

    fn add_edge(&mut self, u: &str, v: &str) -> Result<()> {
        let u_idx = *self
            .index_of
            .get(u)
            .ok_or_else(|| OrchestratorError::GraphIntegrity(format!("node '{u}' not in graph")))?;
        let v_idx = *self
            .index_of
            .get(v)
            .ok_or_else(|| OrchestratorError::GraphIntegrity(format!("node '{v}' not in graph")))?;
        let edge = self.graph.add_edge(u_idx, v_idx, ());
        if is_cyclic_directed(&self.graph) {
            self.graph.remove_edge(edge);
            return Err(OrchestratorError::GraphIntegrity(format!(
                "edge {u} -> {v} would create a cycle"
            )));
        }
        Ok(())
    }

    fn node_ids(&self) -> Vec<String> {
        self.graph.node_weights().cloned().collect()
    }

    fn predecessors(&self, task_id: &str) -> Vec<String> {
        match self.index_of.get(task_id) {
            Some(&idx) => self
                .graph
                .neighbors_directed(idx, petgraph::Direction::Incoming)
                .map(|i| self.graph[i].clone())
                .collect(),
            None => Vec::new(),
        }
    }

    fn successors(&self, task_id: &str) -> Vec<String> {
        match self.index_of.get(task_id) {
            Some(&idx) => self
                .graph
                .neighbors_directed(idx, petgraph::Direction::Outgoing)
                .map(|i| self.graph[i].clone())
                .collect(),
            None => Vec::new(),
        }
    }
}

#[derive(Default)]
struct Structure {
    graphs: HashMap<String, SubGraph>,
    root_graph_id: Option<String>,
}

pub struct TaskGraph {
    nodes: DashMap<String, Arc<TaskNode>>,
    structure: Mutex<Structure>,
    pub overall_project_goal: RwLock<Option<String>>,
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGraph {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            structure: Mutex::new(Structure::default()),
            overall_project_goal: RwLock::new(None),
        }
    }

    pub fn root_graph_id(&self) -> Option<String> {
        self.structure.lock().root_graph_id.clone()
    }

    /// Creates an empty DAG. Fails if `graph_id` already exists, or if marking
    /// a second root (spec §4.1).
    pub fn add_graph(&self, graph_id: impl Into<String>, is_root: bool) -> Result<()> {
        let graph_id = graph_id.into();
        let mut structure = self.structure.lock();
        if structure.graphs.contains_key(&graph_id) {
            return Err(OrchestratorError::GraphIntegrity(format!(
                "graph '{graph_id}' already exists"
            )));
        }
        if is_root {
            if let Some(existing) = &structure.root_graph_id {
                if existing != &graph_id {
                    return Err(OrchestratorError::GraphIntegrity(format!(
                        "root graph already set to '{existing}'"
                    )));
                }
            }
            structure.root_graph_id = Some(graph_id.clone());
        }
        structure.graphs.insert(graph_id, SubGraph::default());
        Ok(())
    }

    /// Places a node in one DAG and the flat lookup. Fails on duplicate
    /// `task_id` (spec §4.1).
    pub fn add_node_to_graph(&self, graph_id: &str, node: Arc<TaskNode>) -> Result<()> {
        let task_id = node.task_id.clone();
        if self.nodes.contains_key(&task_id) {
            return Err(OrchestratorError::GraphIntegrity(format!(
                "node '{task_id}' already exists"
            )));
        }
        {
            let mut structure = self.structure.lock();
            let sub = structure
                .graphs
                .get_mut(graph_id)
                .ok_or_else(|| OrchestratorError::GraphIntegrity(format!("graph '{graph_id}' not found")))?;
            sub.ensure_node(&task_id);
        }
        self.nodes.insert(task_id, node);
        Ok(())
    }

    /// Records a dependency edge. Fails if either node is missing from that
    /// graph, or if the edge would create a cycle (spec §3.2, §4.1).
    pub fn add_edge(&self, graph_id: &str, u: &str, v: &str) -> Result<()> {
        let mut structure = self.structure.lock();
        let sub = structure
            .graphs
            .get_mut(graph_id)
            .ok_or_else(|| OrchestratorError::GraphIntegrity(format!("graph '{graph_id}' not found")))?;
        sub.add_edge(u, v)
    }

    pub fn get_node(&self, task_id: &str) -> Option<Arc<TaskNode>> {
        self.nodes.get(task_id).map(|e| e.value().clone())
    }

    pub fn get_all_nodes(&self) -> Vec<Arc<TaskNode>> {
        self.nodes.iter().map(|e| e.value().clone()).collect()
    }

    pub fn get_nodes_in_graph(&self, graph_id: &str) -> Vec<Arc<TaskNode>> {
        let ids = {
            let structure = self.structure.lock();
            match structure.graphs.get(graph_id) {
                Some(sub) => sub.node_ids(),
                None => return Vec::new(),
            }
        };
        ids.into_iter().filter_map(|id| self.get_node(&id)).collect()
    }

    pub fn get_predecessors(&self, graph_id: &str, task_id: &str) -> Vec<Arc<TaskNode>> {
        let ids = {
            let structure = self.structure.lock();
            match structure.graphs.get(graph_id) {
                Some(sub) => sub.predecessors(task_id),
                None => return Vec::new(),
            }
        };
        ids.into_iter().filter_map(|id| self.get_node(&id)).collect()
    }

    pub fn get_successors(&self, graph_id: &str, task_id: &str) -> Vec<Arc<TaskNode>> {
        let ids = {
            let structure = self.structure.lock();
            match structure.graphs.get(graph_id) {
                Some(sub) => sub.successors(task_id),
                None => return Vec::new(),
            }
        };
        ids.into_iter().filter_map(|id| self.get_node(&id)).collect()
    }

    /// Finds the graph_id that contains `task_id`, by linear scan. Used by
    /// `find_container_graph_id` as a fallback when parent linkage can't
    /// resolve it directly (the "sync gap" of spec §3.2).
    pub fn find_graph_containing(&self, task_id: &str) -> Option<String> {
        let structure = self.structure.lock();
        structure
            .graphs
            .iter()
            .find(|(_, sub)| sub.index_of.contains_key(task_id))
            .map(|(id, _)| id.clone())
    }
}
