//! `ContextResolver`: assembles a node's input payload immediately before
//! dispatch (spec §4.3).
//!
//! Redundancy pruning is grounded directly on
//! `hierarchical_agent_framework/node/dependency_utils.py`'s
//! `DependencyChainTracker`: a node's transitive dependency set is resolved by
//! walking `aux_data["depends_on_indices"]` against the parent's
//! `planned_sub_task_ids`, recursively, with a memoized `task_id -> Set<task_id>`
//! cache (`dashmap`) standing in for the Python dict-of-sets cache.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::TaskGraph;
use crate::knowledge_store::KnowledgeStore;
use crate::node::{TaskNode, TaskStatus};

/// One piece of context fed to an adapter: another node's contribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    pub source_task_id: String,
    pub source_task_goal: String,
    pub content_type_description: String,
    pub content: Value,
}

/// The payload built for a single adapter dispatch (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTaskInput {
    pub current_goal: String,
    pub overall_objective: String,
    pub relevant_context_items: Vec<ContextItem>,
}

/// Per-request memoization of transitive-dependency sets, keyed by `task_id`.
/// Cleared at the start of each `build_input` call so results never leak
/// across requests that might see a mutated graph (spec §4.3: "memoized per
/// request").
pub struct DependencyCache {
    cache: DashMap<String, HashSet<String>>,
}

impl DependencyCache {
    fn new() -> Self {
        Self { cache: DashMap::new() }
    }

    fn clear(&self) {
        self.cache.clear();
    }
}

pub struct ContextResolver {
    graph: Arc<TaskGraph>,
    knowledge_store: Arc<KnowledgeStore>,
    dependency_cache: DependencyCache,
}

impl ContextResolver {
    pub fn new(graph: Arc<TaskGraph>, knowledge_store: Arc<KnowledgeStore>) -> Self {
        Self {
            graph,
            knowledge_store,
            dependency_cache: DependencyCache::new(),
        }
    }

    /// Resolve the indices in `node.aux_data["depends_on_indices"]` against the
    /// parent's `planned_sub_task_ids`, then recurse into each dependency's own
    /// transitive set. Memoized per node per call to `build_input`.
    fn transitive_dependencies(&self, node: &Arc<TaskNode>) -> HashSet<String> {
        if let Some(cached) = self.dependency_cache.cache.get(&node.task_id) {
            return cached.clone();
        }

        let mut deps = HashSet::new();
        let snapshot = node.snapshot();
        let indices: Vec<usize> = snapshot
            .aux_data
            .get("depends_on_indices")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_u64()).map(|v| v as usize).collect())
            .unwrap_or_default();

        if !indices.is_empty() {
            if let Some(parent_id) = &node.parent_node_id {
                if let Some(parent) = self.graph.get_node(parent_id) {
                    let planned = parent.snapshot().planned_sub_task_ids;
                    for idx in indices {
                        if let Some(dep_id) = planned.get(idx) {
                            deps.insert(dep_id.clone());
                            if let Some(dep_node) = self.graph.get_node(dep_id) {
                                deps.extend(self.transitive_dependencies(&dep_node));
                            }
                        }
                    }
                }
            }
        }

        self.dependency_cache.cache.insert(node.task_id.clone(), deps.clone());
        deps
    }

    /// Filter out candidates whose transitive dependency set is a strict
    /// subset of another candidate's (within the same sibling group), unless
    /// that other candidate failed or was cancelled (spec §4.3 rule 4).
    ///
    /// Grounded on `filter_redundant_child_results`'s `consumed_by` map: a
    /// sibling is dropped as soon as any one consumer of its output (within
    /// the group) reached DONE — that consumer already carries the
    /// candidate's information forward, so the candidate itself is redundant.
    fn filter_redundant(&self, candidates: &[Arc<TaskNode>]) -> Vec<Arc<TaskNode>> {
        let sibling_ids: HashSet<&str> = candidates.iter().map(|n| n.task_id.as_str()).collect();
        let mut consumed_by: HashMap<String, HashSet<String>> = HashMap::new();

        for candidate in candidates {
            let deps = self.transitive_dependencies(candidate);
            for dep_id in deps {
                if sibling_ids.contains(dep_id.as_str()) {
                    consumed_by
                        .entry(dep_id)
                        .or_default()
                        .insert(candidate.task_id.clone());
                }
            }
        }

        let node_by_id: HashMap<&str, &Arc<TaskNode>> =
            candidates.iter().map(|n| (n.task_id.as_str(), n)).collect();

        candidates
            .iter()
            .filter(|candidate| match consumed_by.get(&candidate.task_id) {
                None => true,
                Some(consumers) => !consumers.iter().any(|consumer_id| {
                    matches!(
                        node_by_id.get(consumer_id.as_str()),
                        Some(consumer) if consumer.status() == TaskStatus::Done
                    )
                }),
            })
            .cloned()
            .collect()
    }

    fn context_item_for(&self, node: &Arc<TaskNode>, content_type: &str) -> ContextItem {
        let record = self.knowledge_store.get(&node.task_id);
        let snapshot = node.snapshot();
        let content = record
            .as_ref()
            .and_then(|r| r.output_summary.clone())
            .or_else(|| snapshot.output_summary.clone())
            .map(Value::String)
            .or_else(|| record.as_ref().and_then(|r| r.result.clone()))
            .or_else(|| snapshot.result.clone())
            .unwrap_or(Value::Null);

        ContextItem {
            source_task_id: node.task_id.clone(),
            source_task_goal: record.map(|r| r.goal).unwrap_or(snapshot.goal),
            content_type_description: content_type.to_string(),
            content,
        }
    }

    /// Build the `AgentTaskInput` for `node`, per spec §4.3's five assembly
    /// rules.
    pub fn build_input(&self, node: &Arc<TaskNode>) -> AgentTaskInput {
        self.dependency_cache.clear();

        let mut items: Vec<ContextItem> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        // Rule 1: predecessors in the container graph.
        if let Some(parent_id) = &node.parent_node_id {
            if let Some(parent) = self.graph.get_node(parent_id) {
                if let Some(container_graph_id) = parent.sub_graph_id() {
                    let predecessors = self.graph.get_predecessors(&container_graph_id, &node.task_id);
                    let pruned = self.filter_redundant(&predecessors);
                    for p in &pruned {
                        if seen.insert(p.task_id.clone()) {
                            items.push(self.context_item_for(p, "predecessor result"));
                        }
                    }
                }
            }
        }

        // Rule 2: walk ancestors up the hierarchy, collecting each ancestor's
        // goal plus that ancestor's own upstream siblings in its container
        // graph (the same predecessor walk rule 1 does for `node` itself, one
        // level higher each iteration).
        let mut ancestor_id = node.parent_node_id.clone();
        while let Some(pid) = ancestor_id {
            let Some(ancestor) = self.graph.get_node(&pid) else { break };
            if seen.insert(ancestor.task_id.clone()) {
                items.push(self.context_item_for(&ancestor, "ancestor goal"));
            }

            if let Some(grandparent_id) = &ancestor.parent_node_id {
                if let Some(grandparent) = self.graph.get_node(grandparent_id) {
                    if let Some(container_graph_id) = grandparent.sub_graph_id() {
                        let upstream_siblings = self.graph.get_predecessors(&container_graph_id, &ancestor.task_id);
                        let pruned = self.filter_redundant(&upstream_siblings);
                        for s in &pruned {
                            if seen.insert(s.task_id.clone()) {
                                items.push(self.context_item_for(s, "ancestor's upstream sibling"));
                            }
                        }
                    }
                }
            }

            ancestor_id = ancestor.parent_node_id.clone();
        }

        // Rule 3: for aggregation, the children's outputs.
        if let Some(sub_graph_id) = node.sub_graph_id() {
            let children = self.graph.get_nodes_in_graph(&sub_graph_id);
            let pruned = self.filter_redundant(&children);
            for c in &pruned {
                if seen.insert(c.task_id.clone()) {
                    items.push(self.context_item_for(c, "child result"));
                }
            }
        }

        AgentTaskInput {
            current_goal: node.goal(),
            overall_objective: node.overall_objective.clone(),
            relevant_context_items: items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeType, TaskType};
    use serde_json::json;

    fn node(id: &str, parent: Option<&str>) -> Arc<TaskNode> {
        Arc::new(TaskNode::new(
            id,
            format!("goal-{id}"),
            "objective",
            TaskType::Write,
            NodeType::Execute,
            1,
            parent.map(String::from),
        ))
    }

    #[test]
    fn redundant_predecessor_is_pruned_when_consumer_done() {
        let graph = Arc::new(TaskGraph::new());
        let ks = Arc::new(KnowledgeStore::new());
        graph.add_graph("sub", false).unwrap();

        // 0 depends on nothing, 1 depends on 0, 2 depends on 1 (so 2's
        // transitive deps are {0, 1}; 0 is redundant once 2 is present and DONE).
        let parent = node("parent", None);
        parent.with_state(|s| {
            s.node_type = NodeType::Plan;
            s.planned_sub_task_ids = vec!["n0".into(), "n1".into(), "n2".into()];
        });
        graph.add_graph("root", true).unwrap();
        graph.add_node_to_graph("root", parent.clone()).unwrap();
        parent.with_state(|s| s.sub_graph_id = Some("sub".to_string()));

        let n0 = node("n0", Some("parent"));
        let n1 = node("n1", Some("parent"));
        let n2 = node("n2", Some("parent"));
        n1.with_state(|s| {
            s.aux_data.insert("depends_on_indices".to_string(), json!([0]));
        });
        n2.with_state(|s| {
            s.aux_data.insert("depends_on_indices".to_string(), json!([1]));
        });
        for n in [&n0, &n1, &n2] {
            graph.add_node_to_graph("sub", n.clone()).unwrap();
        }
        graph.add_edge("sub", "n0", "n1").unwrap();
        graph.add_edge("sub", "n1", "n2").unwrap();

        for n in [&n0, &n1, &n2] {
            n.transition(TaskStatus::Ready).unwrap();
            n.transition(TaskStatus::Running).unwrap();
            n.transition(TaskStatus::Done).unwrap();
        }

        let resolver = ContextResolver::new(graph.clone(), ks);
        let pruned = resolver.filter_redundant(&[n0.clone(), n1.clone(), n2.clone()]);
        let ids: HashSet<_> = pruned.iter().map(|n| n.task_id.clone()).collect();
        assert!(!ids.contains("n0"), "n0 should be pruned: fully covered by n2");
        assert!(!ids.contains("n1"), "n1 should be pruned: fully covered by n2");
        assert!(ids.contains("n2"));
    }

    #[test]
    fn redundant_predecessor_kept_if_consumer_failed() {
        let graph = Arc::new(TaskGraph::new());
        let ks = Arc::new(KnowledgeStore::new());
        graph.add_graph("root", true).unwrap();
        graph.add_graph("sub", false).unwrap();

        let parent = node("parent", None);
        parent.with_state(|s| {
            s.node_type = NodeType::Plan;
            s.planned_sub_task_ids = vec!["n0".into(), "n1".into()];
        });
        graph.add_node_to_graph("root", parent.clone()).unwrap();
        parent.with_state(|s| s.sub_graph_id = Some("sub".to_string()));

        let n0 = node("n0", Some("parent"));
        let n1 = node("n1", Some("parent"));
        n1.with_state(|s| {
            s.aux_data.insert("depends_on_indices".to_string(), json!([0]));
        });
        graph.add_node_to_graph("sub", n0.clone()).unwrap();
        graph.add_node_to_graph("sub", n1.clone()).unwrap();
        graph.add_edge("sub", "n0", "n1").unwrap();

        n0.transition(TaskStatus::Ready).unwrap();
        n0.transition(TaskStatus::Running).unwrap();
        n0.transition(TaskStatus::Done).unwrap();
        n1.transition(TaskStatus::Ready).unwrap();
        n1.transition(TaskStatus::Running).unwrap();
        n1.fail_with_error("boom").unwrap();

        let resolver = ContextResolver::new(graph, ks);
        let pruned = resolver.filter_redundant(&[n0.clone(), n1.clone()]);
        let ids: HashSet<_> = pruned.iter().map(|n| n.task_id.clone()).collect();
        assert!(ids.contains("n0"), "n0 must be kept: its only consumer failed");
    }

    #[test]
    fn redundant_predecessor_dropped_if_any_consumer_done_even_if_another_failed() {
        let graph = Arc::new(TaskGraph::new());
        let ks = Arc::new(KnowledgeStore::new());
        graph.add_graph("root", true).unwrap();
        graph.add_graph("sub", false).unwrap();

        // A is depended on by both X and Y. X reaches DONE (it already carries
        // A's info forward), Y fails. A must be dropped regardless of Y.
        let parent = node("parent", None);
        parent.with_state(|s| {
            s.node_type = NodeType::Plan;
            s.planned_sub_task_ids = vec!["a".into(), "x".into(), "y".into()];
        });
        graph.add_node_to_graph("root", parent.clone()).unwrap();
        parent.with_state(|s| s.sub_graph_id = Some("sub".to_string()));

        let a = node("a", Some("parent"));
        let x = node("x", Some("parent"));
        let y = node("y", Some("parent"));
        x.with_state(|s| {
            s.aux_data.insert("depends_on_indices".to_string(), json!([0]));
        });
        y.with_state(|s| {
            s.aux_data.insert("depends_on_indices".to_string(), json!([0]));
        });
        for n in [&a, &x, &y] {
            graph.add_node_to_graph("sub", n.clone()).unwrap();
        }
        graph.add_edge("sub", "a", "x").unwrap();
        graph.add_edge("sub", "a", "y").unwrap();

        x.transition(TaskStatus::Ready).unwrap();
        x.transition(TaskStatus::Running).unwrap();
        x.transition(TaskStatus::Done).unwrap();
        y.transition(TaskStatus::Ready).unwrap();
        y.transition(TaskStatus::Running).unwrap();
        y.fail_with_error("boom").unwrap();

        let resolver = ContextResolver::new(graph, ks);
        let pruned = resolver.filter_redundant(&[a.clone(), x.clone(), y.clone()]);
        let ids: HashSet<_> = pruned.iter().map(|n| n.task_id.clone()).collect();
        assert!(!ids.contains("a"), "a must be dropped: x already consumed it and reached DONE");
    }
}
