//! `ExecutionEngine`: owns a single run from a root goal to a terminal root
//! node (spec §4.7).
//!
//! Grounded on `execution_engine.py`'s main loop: create and attach the root
//! node, run it through the supplemented root-goal HITL checkpoint
//! (`execution_engine.py::_perform_root_node_hitl`), then repeatedly call the
//! scheduler for one step each, escalating stuck-node recovery
//! (`_check_and_recover_stuck_nodes`) and detecting deadlock when a step
//! changes nothing while work remains.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;

use crate::broadcaster::UpdateBroadcaster;
use crate::config::ExecutionConfig;
use crate::cycle_manager::CycleManager;
use crate::error::{OrchestratorError, Result};
use crate::graph::TaskGraph;
use crate::hitl::{Checkpoint, HitlCoordinator, HitlOutcome};
use crate::knowledge_store::KnowledgeStore;
use crate::node::{NodeType, ReplanRequestDetails, TaskNode, TaskStatus, TaskType};

/// Consecutive no-progress steps tolerated, with active work remaining,
/// before a run is declared deadlocked. A single stall is routine (a node
/// mid-recovery needs a step to land); several in a row with no change means
/// nothing left in the graph can legally advance.
const STALL_LIMIT: u32 = 3;

pub struct ExecutionEngine {
    graph: Arc<TaskGraph>,
    knowledge_store: Arc<KnowledgeStore>,
    cycle_manager: CycleManager,
    hitl: Arc<HitlCoordinator>,
    broadcaster: Arc<dyn UpdateBroadcaster>,
    config: ExecutionConfig,
}

impl ExecutionEngine {
    pub fn new(
        graph: Arc<TaskGraph>,
        knowledge_store: Arc<KnowledgeStore>,
        cycle_manager: CycleManager,
        hitl: Arc<HitlCoordinator>,
        broadcaster: Arc<dyn UpdateBroadcaster>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            graph,
            knowledge_store,
            cycle_manager,
            hitl,
            broadcaster,
            config,
        }
    }

    fn record_transition(&self, node: &TaskNode, old: TaskStatus) {
        self.knowledge_store.add_or_update_record_from_node(node);
        self.broadcaster.on_state_changed(&node.task_id, old, node.status());
    }

    /// Runs a project to completion (or a terminal failure/cancellation).
    /// `max_steps`/`timeout` bound this run explicitly, overriding
    /// `ExecutionConfig::max_steps` as the caller's own ceiling (spec §4.7).
    pub async fn run(
        &self,
        root_goal: impl Into<String>,
        root_task_type: TaskType,
        root_node_type: NodeType,
        max_steps: usize,
        timeout: Duration,
    ) -> Result<Arc<TaskNode>> {
        let root_goal = root_goal.into();
        let root = Arc::new(TaskNode::new(
            "root",
            root_goal.clone(),
            root_goal.clone(),
            root_task_type,
            root_node_type,
            0,
            None,
        ));
        self.graph.add_graph("root", true)?;
        self.graph.add_node_to_graph("root", root.clone())?;
        *self.graph.overall_project_goal.write() = Some(root_goal.clone());
        self.knowledge_store.add_or_update_record_from_node(&root);
        self.broadcaster.on_graph_changed("root");

        if let ReviewResult::StopWith(result) = self.perform_root_review(&root, &root_goal).await? {
            return result;
        }

        let old = root.status();
        root.transition(TaskStatus::Ready)?;
        self.record_transition(&root, old);

        let start = Instant::now();
        let mut steps_taken: usize = 0;
        let mut consecutive_stalls: u32 = 0;

        loop {
            if root.status().is_terminal() {
                break;
            }
            if steps_taken >= max_steps {
                return Err(OrchestratorError::Deadlock(format!(
                    "max_steps ({max_steps}) exceeded without reaching a terminal root status"
                )));
            }
            let elapsed = start.elapsed();
            if elapsed > timeout {
                return Err(OrchestratorError::Timeout {
                    elapsed_seconds: elapsed.as_secs_f64(),
                    limit_seconds: timeout.as_secs_f64(),
                });
            }

            let changed = self.cycle_manager.step().await?;
            steps_taken += 1;
            self.recover_stuck_nodes();

            if changed {
                consecutive_stalls = 0;
                continue;
            }

            let any_active = self.graph.get_all_nodes().iter().any(|n| !n.status().is_terminal());
            if !any_active {
                break;
            }
            consecutive_stalls += 1;
            if consecutive_stalls >= STALL_LIMIT {
                return Err(OrchestratorError::Deadlock(
                    "no node changed status across repeated steps while active work remains".to_string(),
                ));
            }
        }

        Ok(root)
    }

    /// The root-goal review (spec's supplemented `RootGoalReview` checkpoint,
    /// SPEC_FULL.md §14). Returns `StopWith` if the run should end here
    /// (aborted before any work starts).
    async fn perform_root_review(&self, root: &Arc<TaskNode>, root_goal: &str) -> Result<ReviewResult> {
        let outcome = self
            .hitl
            .review(Checkpoint::RootGoalReview, &root.task_id, 0, root_goal, json!({"goal": root_goal}), 0)
            .await?;
        match outcome {
            HitlOutcome::Approved => Ok(ReviewResult::Proceed),
            HitlOutcome::ModificationRequested(revised_goal) => {
                root.with_state(|s| s.goal = revised_goal);
                Ok(ReviewResult::Proceed)
            }
            HitlOutcome::Aborted(reason) => {
                root.with_state(|s| s.error = Some(reason));
                root.transition(TaskStatus::Cancelled)?;
                self.record_transition(root, TaskStatus::Pending);
                Ok(ReviewResult::StopWith(Ok(root.clone())))
            }
        }
    }

    /// Escalation ladder for nodes that haven't progressed (spec §4.7):
    /// warn past `warning_threshold_seconds`, force NEEDS_REPLAN past
    /// `soft_timeout_seconds` (if the current status allows it and
    /// `max_recovery_attempts` isn't exhausted), force FAILED past
    /// `hard_timeout_seconds` regardless.
    ///
    /// Public so a caller running its own long-lived sweep (outside `run`'s
    /// own step loop, e.g. a periodic background task watching a project that
    /// spans multiple `run` calls) can invoke the same recovery pass.
    pub fn recover_stuck_nodes(&self) {
        let strategy = &self.config.timeout_strategy;
        let now = Utc::now();
        for node in self.graph.get_all_nodes() {
            let status = node.status();
            if status.is_terminal() {
                continue;
            }
            let snapshot = node.snapshot();
            let age_seconds = (now - snapshot.updated).num_seconds().max(0) as u64;

            if age_seconds >= strategy.hard_timeout_seconds {
                tracing::error!(node_id = %node.task_id, age_seconds, ?status, "hard timeout exceeded, forcing FAILED");
                let _ = node.fail_with_error(format!("stuck in {status:?} for {age_seconds}s (hard timeout)"));
                self.record_transition(&node, status);
            } else if age_seconds >= strategy.soft_timeout_seconds {
                if snapshot.replan_attempts >= strategy.max_recovery_attempts {
                    tracing::warn!(node_id = %node.task_id, age_seconds, "soft timeout exceeded but recovery attempts exhausted");
                    continue;
                }
                if !status.can_transition_to(TaskStatus::NeedsReplan) {
                    continue;
                }
                tracing::warn!(node_id = %node.task_id, age_seconds, ?status, "soft timeout exceeded, forcing NEEDS_REPLAN");
                node.with_state(|s| {
                    s.replan_details = Some(ReplanRequestDetails {
                        reason: format!("stuck in {status:?} for {age_seconds}s"),
                        failed_child_ids: Vec::new(),
                        user_modification_instructions: None,
                    });
                });
                if node.transition(TaskStatus::NeedsReplan).is_ok() {
                    self.record_transition(&node, status);
                }
            } else if age_seconds >= strategy.warning_threshold_seconds {
                tracing::warn!(node_id = %node.task_id, age_seconds, ?status, "node has not progressed past warning threshold");
            }
        }
    }
}

enum ReviewResult {
    Proceed,
    StopWith(Result<Arc<TaskNode>>),
}
