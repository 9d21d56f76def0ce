//! `NodeProcessor`: drives one node through a single dispatch (spec §4.5).
//!
//! For each READY node: assemble context, open a trace stage, transition to
//! RUNNING, call the right adapter(s) through the HITL gate, interpret the
//! result, transition to the next status, and update the knowledge store.
//! Adapter errors are caught here and turned into a FAILED transition; they
//! never propagate out of `process`/`aggregate` (spec §7: "a broken adapter
//! fails its node, not the run").
//!
//! Grounded on `cycle_manager.py`'s per-node action dispatch (the atomic
//! bypass: an atomic PLAN node is run through the Executor directly and
//! stamped `aux_data["was_executed_as_atomic"]`, left in PLAN_DONE for
//! `CycleManager`'s resolution loop to fast-path to DONE) and on
//! `execution_engine.py`'s `max_planning_layer` depth bound forcing atomic
//! atomization once a plan nests too deep.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::adapter::{AdapterOutput, Action, AgentBlueprint, AtomizeOutput, PlannedSubTask};
use crate::broadcaster::UpdateBroadcaster;
use crate::context::{AgentTaskInput, ContextResolver};
use crate::error::{OrchestratorError, Result};
use crate::graph::TaskGraph;
use crate::hitl::{Checkpoint, HitlCoordinator, HitlOutcome};
use crate::knowledge_store::KnowledgeStore;
use crate::node::{NodeType, TaskNode, TaskStatus};
use crate::trace::TraceLog;

/// How a HITL review should change the course of processing.
enum ReviewDecision {
    Proceed,
    Cancelled,
    Modified(String),
}

pub struct NodeProcessor {
    graph: Arc<TaskGraph>,
    knowledge_store: Arc<KnowledgeStore>,
    context_resolver: Arc<ContextResolver>,
    hitl: Arc<HitlCoordinator>,
    blueprint: Arc<dyn AgentBlueprint>,
    trace: Arc<TraceLog>,
    broadcaster: Arc<dyn UpdateBroadcaster>,
    max_planning_layer: u32,
}

impl NodeProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<TaskGraph>,
        knowledge_store: Arc<KnowledgeStore>,
        context_resolver: Arc<ContextResolver>,
        hitl: Arc<HitlCoordinator>,
        blueprint: Arc<dyn AgentBlueprint>,
        trace: Arc<TraceLog>,
        broadcaster: Arc<dyn UpdateBroadcaster>,
        max_planning_layer: u32,
    ) -> Self {
        Self {
            graph,
            knowledge_store,
            context_resolver,
            hitl,
            blueprint,
            trace,
            broadcaster,
            max_planning_layer,
        }
    }

    fn record(&self, node: &TaskNode, old: TaskStatus) {
        self.knowledge_store.add_or_update_record_from_node(node);
        self.broadcaster.on_state_changed(&node.task_id, old, node.status());
    }

    async fn decide(
        &self,
        checkpoint: Checkpoint,
        node: &TaskNode,
        context_message: &str,
        data: Value,
    ) -> Result<ReviewDecision> {
        let attempt = node.snapshot().replan_attempts;
        match self.hitl.review(checkpoint, &node.task_id, node.layer, context_message, data, attempt).await? {
            HitlOutcome::Approved => Ok(ReviewDecision::Proceed),
            HitlOutcome::ModificationRequested(text) => Ok(ReviewDecision::Modified(text)),
            HitlOutcome::Aborted(reason) => Ok(ReviewDecision::Cancelled.tap(|| {
                node.with_state(|s| s.error = Some(reason.clone()));
            })),
        }
    }

    fn cancel(&self, node: &TaskNode, stage: usize, reason: &str) -> Result<()> {
        let old = node.status();
        self.trace.close_stage_err(stage, reason);
        node.transition(TaskStatus::Cancelled)?;
        self.record(node, old);
        Ok(())
    }

    /// Drives a READY/RUNNING node (spec §4.5): PLAN nodes atomize then
    /// either execute directly (atomic) or decompose; EXECUTE nodes run
    /// straight through the Executor.
    pub async fn process(&self, node: Arc<TaskNode>) -> Result<()> {
        let input = self.context_resolver.build_input(&node);
        let stage = self.trace.open_stage(format!("{:?}", node.node_type()), serde_json::to_value(&input).ok());

        if let Err(e) = node.transition(TaskStatus::Running) {
            self.trace.close_stage_err(stage, e.to_string());
            return Err(e);
        }
        self.record(&node, TaskStatus::Ready);

        let outcome = match node.node_type() {
            NodeType::Plan => self.process_plan(&node, input, stage).await,
            NodeType::Execute => self.process_execute(&node, input, stage).await,
        };

        if let Err(e) = outcome {
            tracing::error!(node_id = %node.task_id, error = %e, "node processing failed");
            self.trace.close_stage_err(stage, e.to_string());
            let old = node.status();
            node.fail_with_error(e.to_string())?;
            self.record(&node, old);
        }
        Ok(())
    }

    async fn process_plan(&self, node: &Arc<TaskNode>, input: AgentTaskInput, stage: usize) -> Result<()> {
        if node.snapshot().replan_details.is_some() {
            return self.regenerate_plan_after_replan(node, input, stage).await;
        }
        let force_atomic = node.layer >= self.max_planning_layer;
        let mut atomize = if force_atomic {
            tracing::debug!(node_id = %node.task_id, layer = node.layer, "max planning layer reached, forcing atomic");
            AtomizeOutput { is_atomic: true, revised_goal: None }
        } else {
            let adapter = self.blueprint.select_adapter(Action::Atomize, node.task_type)?;
            match adapter.invoke(Action::Atomize, &node.task_id, input.clone()).await? {
                AdapterOutput::Atomize(out) => out,
                _ => {
                    return Err(OrchestratorError::AdapterError {
                        node_id: node.task_id.clone(),
                        message: "atomizer returned the wrong output variant".into(),
                    })
                }
            }
        };

        if !force_atomic {
            let data = serde_json::to_value(&atomize).unwrap_or(Value::Null);
            match self.decide(Checkpoint::AfterAtomizer, node, &node.goal(), data).await? {
                ReviewDecision::Cancelled => return self.cancel(node, stage, "aborted at atomizer review"),
                ReviewDecision::Modified(_text) => atomize.is_atomic = false,
                ReviewDecision::Proceed => {}
            }
        }

        if let Some(goal) = atomize.revised_goal {
            node.with_state(|s| s.goal = goal);
        }

        if atomize.is_atomic {
            self.execute_atomic(node, input, stage).await
        } else {
            self.generate_plan(node, input, stage).await
        }
    }

    async fn execute_atomic(&self, node: &Arc<TaskNode>, input: AgentTaskInput, stage: usize) -> Result<()> {
        let adapter = self.blueprint.select_adapter(Action::Execute, node.task_type)?;
        let out = match adapter.invoke(Action::Execute, &node.task_id, input).await? {
            AdapterOutput::Execute(out) => out,
            _ => {
                return Err(OrchestratorError::AdapterError {
                    node_id: node.task_id.clone(),
                    message: "executor returned the wrong output variant".into(),
                })
            }
        };

        node.with_state(|s| {
            s.result = Some(out.result.clone());
            s.output_summary = Some(out.output_summary.clone());
            s.aux_data.insert("was_executed_as_atomic".to_string(), json!(true));
        });
        self.trace.close_stage_ok(stage, Some(json!({"output_summary": out.output_summary})), Value::Null);
        let old = node.status();
        node.transition(TaskStatus::PlanDone)?;
        self.record(node, old);
        Ok(())
    }

    async fn generate_plan(&self, node: &Arc<TaskNode>, input: AgentTaskInput, stage: usize) -> Result<()> {
        let planner = self.blueprint.select_adapter(Action::Plan, node.task_type)?;
        let plan = match planner.invoke(Action::Plan, &node.task_id, input.clone()).await? {
            AdapterOutput::Plan(out) => out,
            _ => {
                return Err(OrchestratorError::AdapterError {
                    node_id: node.task_id.clone(),
                    message: "planner returned the wrong output variant".into(),
                })
            }
        };

        let data = serde_json::to_value(&plan).unwrap_or(Value::Null);
        let plan = match self.decide(Checkpoint::AfterPlanGeneration, node, &node.goal(), data).await? {
            ReviewDecision::Cancelled => return self.cancel(node, stage, "aborted at plan review"),
            ReviewDecision::Modified(instructions) => {
                self.rerun_planner_with_instructions(node, input, &instructions).await?
            }
            ReviewDecision::Proceed => plan,
        };

        self.attach_sub_graph(node, &plan.sub_tasks, node.snapshot().replan_attempts)?;
        self.trace.close_stage_ok(stage, Some(json!({"sub_task_count": plan.sub_tasks.len()})), Value::Null);
        let old = node.status();
        node.transition(TaskStatus::PlanDone)?;
        self.record(node, old);
        Ok(())
    }

    /// A PLAN node re-dispatched out of NEEDS_REPLAN (spec §4.6/§4.7): the
    /// node already carries `replan_details` (set either by a child-failure
    /// detection in `CycleManager` or by stuck-node recovery), so this skips
    /// the atomizer and goes straight to the PlanModifier with those details
    /// as context, rather than re-running the original Planner from scratch.
    async fn regenerate_plan_after_replan(&self, node: &Arc<TaskNode>, input: AgentTaskInput, stage: usize) -> Result<()> {
        let modifier = self.blueprint.select_adapter(Action::ModifyPlan, node.task_type)?;
        let plan = match modifier.invoke(Action::ModifyPlan, &node.task_id, input).await? {
            AdapterOutput::ModifyPlan(out) => out,
            _ => {
                return Err(OrchestratorError::AdapterError {
                    node_id: node.task_id.clone(),
                    message: "plan modifier returned the wrong output variant".into(),
                })
            }
        };

        let data = serde_json::to_value(&plan).unwrap_or(Value::Null);
        let plan = match self.decide(Checkpoint::AfterModifiedPlan, node, &node.goal(), data).await? {
            ReviewDecision::Cancelled => return self.cancel(node, stage, "aborted at replan review"),
            _ => plan,
        };

        self.attach_sub_graph(node, &plan.sub_tasks, node.snapshot().replan_attempts)?;
        self.trace.close_stage_ok(stage, Some(json!({"sub_task_count": plan.sub_tasks.len(), "replan": true})), Value::Null);
        let old = node.status();
        node.transition(TaskStatus::PlanDone)?;
        self.record(node, old);
        Ok(())
    }

    /// On a human-requested modification at `AfterPlanGeneration` (spec §4.4:
    /// "the caller re-runs the same stage with the modification instructions
    /// attached; loop with incremented attempt counter"), re-invokes the
    /// Planner itself — not the PlanModifier, which is reserved for the
    /// `NEEDS_REPLAN | PLAN` dispatch row (§4.5) driven by
    /// `regenerate_plan_after_replan` — with the instructions folded into its
    /// input context.
    async fn rerun_planner_with_instructions(
        &self,
        node: &Arc<TaskNode>,
        mut input: AgentTaskInput,
        instructions: &str,
    ) -> Result<crate::adapter::PlanOutput> {
        node.with_state(|s| s.replan_attempts += 1);
        input.relevant_context_items.push(crate::context::ContextItem {
            source_task_id: node.task_id.clone(),
            source_task_goal: node.goal(),
            content_type_description: "plan modification instructions".to_string(),
            content: Value::String(instructions.to_string()),
        });

        let planner = self.blueprint.select_adapter(Action::Plan, node.task_type)?;
        match planner.invoke(Action::Plan, &node.task_id, input).await? {
            AdapterOutput::Plan(out) => Ok(out),
            _ => Err(OrchestratorError::AdapterError {
                node_id: node.task_id.clone(),
                message: "planner returned the wrong output variant".into(),
            }),
        }
    }

    /// Attaches a fresh sub-graph of `sub_tasks` under `node`. `generation`
    /// disambiguates ids across replans (spec §4.5): a node's first plan uses
    /// generation 0, and each subsequent replan gets its own sub-graph and
    /// child ids rather than colliding with (or mutating) the previous
    /// generation's nodes, which stay in the graph as history.
    fn attach_sub_graph(&self, node: &Arc<TaskNode>, sub_tasks: &[PlannedSubTask], generation: u32) -> Result<()> {
        let sub_graph_id = format!("{}-sub-{generation}", node.task_id);
        self.graph.add_graph(&sub_graph_id, false)?;

        let mut child_ids = Vec::with_capacity(sub_tasks.len());
        for (i, sub_task) in sub_tasks.iter().enumerate() {
            let child_id = format!("{}-{generation}-{i}", node.task_id);
            let child = Arc::new(TaskNode::new(
                child_id.clone(),
                sub_task.goal.clone(),
                node.overall_objective.clone(),
                sub_task.task_type,
                sub_task.node_type,
                node.layer + 1,
                Some(node.task_id.clone()),
            ));
            child.with_state(|s| {
                s.aux_data.insert("depends_on_indices".to_string(), json!(sub_task.depends_on_indices));
            });
            self.graph.add_node_to_graph(&sub_graph_id, child.clone())?;
            child_ids.push(child_id);
        }
        for (i, sub_task) in sub_tasks.iter().enumerate() {
            for &dep_idx in &sub_task.depends_on_indices {
                if let Some(dep_id) = child_ids.get(dep_idx) {
                    self.graph.add_edge(&sub_graph_id, dep_id, &child_ids[i])?;
                }
            }
        }

        node.with_state(|s| {
            s.sub_graph_id = Some(sub_graph_id);
            s.planned_sub_task_ids = child_ids;
        });
        Ok(())
    }

    async fn process_execute(&self, node: &Arc<TaskNode>, input: AgentTaskInput, stage: usize) -> Result<()> {
        let data = serde_json::to_value(&input).unwrap_or(Value::Null);
        match self.decide(Checkpoint::BeforeExecute, node, &node.goal(), data).await? {
            ReviewDecision::Cancelled => return self.cancel(node, stage, "aborted before execute"),
            ReviewDecision::Modified(text) => {
                tracing::warn!(node_id = %node.task_id, "execute-stage modification requested but cannot be applied without a replan: {text}");
            }
            ReviewDecision::Proceed => {}
        }

        let adapter = self.blueprint.select_adapter(Action::Execute, node.task_type)?;
        let out = match adapter.invoke(Action::Execute, &node.task_id, input).await? {
            AdapterOutput::Execute(out) => out,
            _ => {
                return Err(OrchestratorError::AdapterError {
                    node_id: node.task_id.clone(),
                    message: "executor returned the wrong output variant".into(),
                })
            }
        };

        node.with_state(|s| {
            s.result = Some(out.result.clone());
            s.output_summary = Some(out.output_summary.clone());
        });
        self.trace.close_stage_ok(stage, Some(json!({"output_summary": out.output_summary})), Value::Null);
        let old = node.status();
        node.transition(TaskStatus::Done)?;
        self.record(node, old);
        Ok(())
    }

    /// Drives an AGGREGATING node (spec §4.5/§4.6): the children's outputs,
    /// already assembled by `ContextResolver`'s rule 3, are handed to the
    /// Aggregator.
    pub async fn aggregate(&self, node: Arc<TaskNode>) -> Result<()> {
        let input = self.context_resolver.build_input(&node);
        let stage = self.trace.open_stage("aggregate", serde_json::to_value(&input).ok());

        let adapter = self.blueprint.select_adapter(Action::Aggregate, node.task_type)?;
        let result = match adapter.invoke(Action::Aggregate, &node.task_id, input).await {
            Ok(AdapterOutput::Aggregate(out)) => Ok(out),
            Ok(_) => Err(OrchestratorError::AdapterError {
                node_id: node.task_id.clone(),
                message: "aggregator returned the wrong output variant".into(),
            }),
            Err(e) => Err(e),
        };

        match result {
            Ok(out) => {
                node.with_state(|s| {
                    s.result = Some(out.result.clone());
                    s.output_summary = Some(out.output_summary.clone());
                });
                self.trace.close_stage_ok(stage, Some(json!({"output_summary": out.output_summary})), Value::Null);
                let old = node.status();
                node.transition(TaskStatus::Done)?;
                self.record(&node, old);
            }
            Err(e) => {
                self.trace.close_stage_err(stage, e.to_string());
                let old = node.status();
                node.fail_with_error(e.to_string())?;
                self.record(&node, old);
            }
        }
        Ok(())
    }
}

impl ReviewDecision {
    fn tap(self, f: impl FnOnce()) -> Self {
        f();
        self
    }
}
