//! Execution configuration: step bounds, stuck-node recovery thresholds, and
//! HITL checkpoint policy (spec §4.7, §4.4; SPEC_FULL.md §13).
//!
//! Grounded on `config/pattern.rs`'s serde-default idiom and on
//! `execution_engine.py::_check_and_recover_stuck_nodes`'s `timeout_config`
//! (an explicit `TimeoutStrategyConfig`) versus its fallback constants,
//! resolved per DESIGN.md Open Question 2: the fallback constants live only in
//! `TimeoutStrategyConfig::default()`.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::loader::load_yaml_config;
use crate::error::Result;

/// Top-level bounds on a single project run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_node_execution_timeout_seconds")]
    pub node_execution_timeout_seconds: u64,
    #[serde(default = "default_max_concurrent_nodes")]
    pub max_concurrent_nodes: usize,
    #[serde(default = "default_max_planning_layer")]
    pub max_planning_layer: u32,
    #[serde(default)]
    pub timeout_strategy: TimeoutStrategyConfig,
    #[serde(default)]
    pub hitl: HitlConfig,
}

fn default_max_steps() -> usize {
    500
}

fn default_node_execution_timeout_seconds() -> u64 {
    300
}

fn default_max_concurrent_nodes() -> usize {
    16
}

fn default_max_planning_layer() -> u32 {
    5
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            node_execution_timeout_seconds: default_node_execution_timeout_seconds(),
            max_concurrent_nodes: default_max_concurrent_nodes(),
            max_planning_layer: default_max_planning_layer(),
            timeout_strategy: TimeoutStrategyConfig::default(),
            hitl: HitlConfig::default(),
        }
    }
}

/// Escalation thresholds for stuck-node recovery (spec §4.7's "recovery
/// strategy"). Each threshold is a duration, in seconds, a node may sit in a
/// single status before the engine escalates. Defaults mirror the Python
/// fallback derived from `node_execution_timeout_seconds / 3` when no
/// explicit strategy is configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutStrategyConfig {
    #[serde(default = "default_warning_threshold_seconds")]
    pub warning_threshold_seconds: u64,
    #[serde(default = "default_soft_timeout_seconds")]
    pub soft_timeout_seconds: u64,
    #[serde(default = "default_hard_timeout_seconds")]
    pub hard_timeout_seconds: u64,
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,
    #[serde(default)]
    pub enable_aggressive_recovery: bool,
}

fn default_warning_threshold_seconds() -> u64 {
    100
}

fn default_soft_timeout_seconds() -> u64 {
    200
}

fn default_hard_timeout_seconds() -> u64 {
    300
}

fn default_max_recovery_attempts() -> u32 {
    3
}

impl Default for TimeoutStrategyConfig {
    fn default() -> Self {
        Self {
            warning_threshold_seconds: default_warning_threshold_seconds(),
            soft_timeout_seconds: default_soft_timeout_seconds(),
            hard_timeout_seconds: default_hard_timeout_seconds(),
            max_recovery_attempts: default_max_recovery_attempts(),
            enable_aggressive_recovery: false,
        }
    }
}

/// Which checkpoints pause for review, and what happens when nobody answers
/// (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlConfig {
    #[serde(default)]
    pub enabled_checkpoints: HashSet<String>,
    #[serde(default = "default_reviewer_timeout_seconds")]
    pub reviewer_timeout_seconds: u64,
    #[serde(default)]
    pub auto_approve_on_timeout: bool,
    /// Restricts `enabled_checkpoints` to layer-0 (root) nodes only. A scope
    /// modifier over the other four checkpoints, not a checkpoint of its own.
    #[serde(default)]
    pub root_plan_only: bool,
}

fn default_reviewer_timeout_seconds() -> u64 {
    120
}

impl Default for HitlConfig {
    fn default() -> Self {
        Self {
            enabled_checkpoints: HashSet::new(),
            reviewer_timeout_seconds: default_reviewer_timeout_seconds(),
            auto_approve_on_timeout: false,
            root_plan_only: false,
        }
    }
}

/// Loads an `ExecutionConfig` from a YAML file, applying the same
/// `$include`/`${VAR:default}` expansion as the rest of the crate's config
/// surface.
pub fn load(path: impl AsRef<Path>) -> Result<ExecutionConfig> {
    load_yaml_config(path.as_ref())
}
