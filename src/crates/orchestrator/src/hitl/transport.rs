//! Transport boundary for human review. The orchestrator core only knows it
//! asked a question and got an outcome back; how the question reaches a human
//! (websocket, CLI prompt, ticket queue) is entirely the transport's concern.
//!
//! Grounded on `hitl_utils.py::request_human_review`'s request/response shape
//! (`user_choice` in {approved, request_modification, aborted} plus an
//! optional `modification_instructions`).

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// A reviewer's decision at a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum HitlOutcome {
    Approved,
    ModificationRequested(String),
    Aborted(String),
}

/// Delivers a review request to a human and waits for their decision.
#[async_trait]
pub trait HitlTransport: Send + Sync {
    async fn request_review(
        &self,
        checkpoint: &str,
        context_message: &str,
        data_for_review: Value,
        node_id: &str,
        current_attempt: u32,
    ) -> Result<HitlOutcome>;
}

/// Approves everything without contacting anyone. Used when no checkpoints
/// are enabled, and as the default for tests.
pub struct AutoApproveTransport;

#[async_trait]
impl HitlTransport for AutoApproveTransport {
    async fn request_review(
        &self,
        checkpoint: &str,
        _context_message: &str,
        _data_for_review: Value,
        node_id: &str,
        _current_attempt: u32,
    ) -> Result<HitlOutcome> {
        tracing::debug!(node_id, checkpoint, "auto-approving (no transport configured)");
        Ok(HitlOutcome::Approved)
    }
}
