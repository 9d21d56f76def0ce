//! The external boundary between the orchestrator core and whatever actually
//! does planning, execution, and aggregation (spec §6).
//!
//! `AgentRegistry`'s `(action, task_type) -> adapter` resolution with
//! priority-ordered rules and a default fallback is grounded on
//! `router/supervisor.rs::Router::route`'s rule-then-default pattern.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::AgentTaskInput;
use crate::error::{OrchestratorError, Result};
use crate::node::TaskType;

/// Which of the five agent roles a dispatch is for (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Plan,
    Atomize,
    Execute,
    Aggregate,
    ModifyPlan,
}

/// One sub-task proposed by a Planner or PlanModifier, prior to becoming a
/// `TaskNode` (spec §3.1's `planned_sub_task_ids` is populated from these).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedSubTask {
    pub goal: String,
    pub task_type: TaskType,
    pub node_type: crate::node::NodeType,
    #[serde(default)]
    pub depends_on_indices: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanOutput {
    pub sub_tasks: Vec<PlannedSubTask>,
}

/// The Atomizer's verdict: can this goal be executed directly, or does it
/// need to be planned (decomposed) first (spec §4.5, §9 Open Question 1)?
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomizeOutput {
    pub is_atomic: bool,
    #[serde(default)]
    pub revised_goal: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteOutput {
    pub result: Value,
    pub output_summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateOutput {
    pub result: Value,
    pub output_summary: String,
}

/// The result of any one adapter dispatch.
#[derive(Debug, Clone)]
pub enum AdapterOutput {
    Plan(PlanOutput),
    Atomize(AtomizeOutput),
    Execute(ExecuteOutput),
    Aggregate(AggregateOutput),
    ModifyPlan(PlanOutput),
}

/// Implemented by whatever actually performs planning, atomization,
/// execution, aggregation, or plan modification. The core never inspects how;
/// it only calls `invoke` and interprets the returned `AdapterOutput` variant
/// matching the `Action` it asked for.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    async fn invoke(&self, action: Action, node_id: &str, input: AgentTaskInput) -> Result<AdapterOutput>;
}

/// One routing rule: an adapter selected for dispatches matching `action` and,
/// if set, a specific `task_type`.
struct Rule {
    action: Action,
    task_type: Option<TaskType>,
    adapter: Arc<dyn AgentAdapter>,
}

/// Resolves `(action, task_type)` to an adapter. A rule registered for the
/// exact `task_type` always wins over a wildcard rule for the same `action`,
/// regardless of registration order (mirroring `RouterConfig`'s
/// priority-then-default resolution); the first matching rule of the winning
/// specificity is used. Falls back to a named default adapter per action if
/// no rule matches at all.
pub struct AgentRegistry {
    rules: Vec<Rule>,
    defaults: HashMap<Action, Arc<dyn AgentAdapter>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            defaults: HashMap::new(),
        }
    }

    /// Registers an adapter for a specific `(action, task_type)` pair, tried
    /// before any wildcard rule or default for the same action.
    pub fn register(&mut self, action: Action, task_type: TaskType, adapter: Arc<dyn AgentAdapter>) {
        self.rules.push(Rule {
            action,
            task_type: Some(task_type),
            adapter,
        });
    }

    /// Registers an adapter for every `task_type` under `action`, tried after
    /// any more specific rule but before the default.
    pub fn register_wildcard(&mut self, action: Action, adapter: Arc<dyn AgentAdapter>) {
        self.rules.push(Rule {
            action,
            task_type: None,
            adapter,
        });
    }

    /// Sets the adapter used when no rule matches `action` at all.
    pub fn set_default(&mut self, action: Action, adapter: Arc<dyn AgentAdapter>) {
        self.defaults.insert(action, adapter);
    }

    pub fn resolve(&self, action: Action, task_type: TaskType) -> Result<Arc<dyn AgentAdapter>> {
        let matching = |want: Option<TaskType>| {
            self.rules
                .iter()
                .find(|r| r.action == action && r.task_type == want)
        };
        if let Some(rule) = matching(Some(task_type)) {
            return Ok(rule.adapter.clone());
        }
        if let Some(rule) = matching(None) {
            return Ok(rule.adapter.clone());
        }
        self.defaults
            .get(&action)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(format!("no adapter for {:?}/{:?}", action, task_type)))
    }
}

/// The opaque-to-the-core profile contract (spec §6): a blueprint exposes a
/// single entry point and may consult whatever external policy it likes to
/// answer it. `AgentRegistry` is one concrete implementation; a caller may
/// provide another (e.g. a remote profile service) without the core caring.
pub trait AgentBlueprint: Send + Sync {
    fn select_adapter(&self, action: Action, task_type: TaskType) -> Result<Arc<dyn AgentAdapter>>;
}

impl AgentBlueprint for AgentRegistry {
    fn select_adapter(&self, action: Action, task_type: TaskType) -> Result<Arc<dyn AgentAdapter>> {
        self.resolve(action, task_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubAdapter(&'static str);

    #[async_trait]
    impl AgentAdapter for StubAdapter {
        async fn invoke(&self, action: Action, _node_id: &str, _input: AgentTaskInput) -> Result<AdapterOutput> {
            match action {
                Action::Execute => Ok(AdapterOutput::Execute(ExecuteOutput {
                    result: Value::String(self.0.to_string()),
                    output_summary: self.0.to_string(),
                })),
                _ => unreachable!(),
            }
        }
    }

    #[test]
    fn specific_rule_wins_over_wildcard() {
        let mut registry = AgentRegistry::new();
        let wildcard: Arc<dyn AgentAdapter> = Arc::new(StubAdapter("wildcard"));
        let specific: Arc<dyn AgentAdapter> = Arc::new(StubAdapter("search-specific"));
        registry.register_wildcard(Action::Execute, wildcard.clone());
        registry.register(Action::Execute, TaskType::Search, specific.clone());

        let resolved = registry.resolve(Action::Execute, TaskType::Search).unwrap();
        assert!(Arc::ptr_eq(&resolved, &specific));

        let resolved_other = registry.resolve(Action::Execute, TaskType::Write).unwrap();
        assert!(Arc::ptr_eq(&resolved_other, &wildcard));
    }

    #[test]
    fn falls_back_to_default_when_no_rule_matches() {
        let mut registry = AgentRegistry::new();
        registry.set_default(Action::Execute, Arc::new(StubAdapter("default")));
        assert!(registry.resolve(Action::Execute, TaskType::Write).is_ok());
    }

    #[test]
    fn unresolvable_action_errors() {
        let registry = AgentRegistry::new();
        assert!(registry.resolve(Action::Plan, TaskType::Write).is_err());
    }
}
