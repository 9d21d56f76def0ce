//! Configuration module for the orchestrator
//!
//! Provides YAML configuration loading and parsing for:
//! - Execution bounds, stuck-node recovery thresholds, and HITL policy
//! - Environment variable expansion and file includes
//!
//! The teacher's `pattern`/`router`/`server`/`workflow` config modules
//! belonged to its request-routing and server-security surface and have no
//! counterpart here; only `loader` (generic YAML/include/env-var handling)
//! survives from that tree.

pub mod execution;
pub mod loader;

pub use execution::{load, ExecutionConfig, HitlConfig, TimeoutStrategyConfig};
pub use loader::{deep_merge, load_yaml_config, load_yaml_file};
