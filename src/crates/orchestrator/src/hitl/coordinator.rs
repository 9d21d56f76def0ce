//! `HITLCoordinator`: gates node processing on human review at configured
//! checkpoints (spec §4.4).
//!
//! Checkpoint names and the approve/modify/abort outcome vocabulary are
//! grounded on `hitl_utils.py::request_human_review` and
//! `async_human_confirmation_hook`. `RootGoalReview` is a supplemented
//! checkpoint (SPEC_FULL.md §14): the original runs it ad hoc in
//! `execution_engine.py::_perform_root_node_hitl`, restricted to the root
//! node only, which this type enforces structurally via `root_only`.

use std::time::Duration;

use serde_json::Value;

use crate::config::execution::HitlConfig;
use crate::error::{OrchestratorError, Result};
use crate::hitl::transport::{HitlOutcome, HitlTransport};

/// A point in a node's lifecycle where execution may pause for review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Checkpoint {
    AfterPlanGeneration,
    AfterModifiedPlan,
    AfterAtomizer,
    BeforeExecute,
    RootGoalReview,
}

impl Checkpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Checkpoint::AfterPlanGeneration => "after_plan_generation",
            Checkpoint::AfterModifiedPlan => "after_modified_plan",
            Checkpoint::AfterAtomizer => "after_atomizer",
            Checkpoint::BeforeExecute => "before_execute",
            Checkpoint::RootGoalReview => "root_goal_review",
        }
    }

    /// `RootGoalReview` only ever applies to the root node (layer 0).
    pub fn root_only(self) -> bool {
        matches!(self, Checkpoint::RootGoalReview)
    }
}

pub struct HitlCoordinator {
    transport: Box<dyn HitlTransport>,
    config: HitlConfig,
}

impl HitlCoordinator {
    pub fn new(transport: Box<dyn HitlTransport>, config: HitlConfig) -> Self {
        Self { transport, config }
    }

    /// Requests review at `checkpoint` for `node_id`, applying the configured
    /// enable-list, timeout, and auto-approve policy. Returns `Ok(Aborted(_))`
    /// on reviewer rejection: aborting is a legitimate outcome, not an error,
    /// and the caller (node processor / execution engine) decides what it
    /// means for the node.
    pub async fn review(
        &self,
        checkpoint: Checkpoint,
        node_id: &str,
        layer: u32,
        context_message: &str,
        data_for_review: Value,
        current_attempt: u32,
    ) -> Result<HitlOutcome> {
        if checkpoint.root_only() && layer != 0 {
            return Ok(HitlOutcome::Approved);
        }
        if self.config.root_plan_only && layer != 0 {
            tracing::debug!(node_id, checkpoint = checkpoint.as_str(), layer, "root_plan_only set, auto-approving non-root node");
            return Ok(HitlOutcome::Approved);
        }
        if !self.config.enabled_checkpoints.contains(checkpoint.as_str()) {
            tracing::debug!(node_id, checkpoint = checkpoint.as_str(), "checkpoint not enabled, auto-approving");
            return Ok(HitlOutcome::Approved);
        }

        tracing::info!(node_id, checkpoint = checkpoint.as_str(), current_attempt, "requesting human review");
        let timeout = Duration::from_secs(self.config.reviewer_timeout_seconds);
        match tokio::time::timeout(
            timeout,
            self.transport
                .request_review(checkpoint.as_str(), context_message, data_for_review, node_id, current_attempt),
        )
        .await
        {
            Ok(result) => result,
            Err(_elapsed) if self.config.auto_approve_on_timeout => {
                tracing::warn!(node_id, checkpoint = checkpoint.as_str(), "review timed out, auto-approving per policy");
                Ok(HitlOutcome::Approved)
            }
            Err(_elapsed) => Err(OrchestratorError::HitlTimeout {
                checkpoint: checkpoint.as_str().to_string(),
            }),
        }
    }
}
