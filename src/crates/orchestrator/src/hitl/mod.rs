//! Human-in-the-loop review gate (spec §4.4).

pub mod coordinator;
pub mod transport;

pub use coordinator::{Checkpoint, HitlCoordinator};
pub use transport::{AutoApproveTransport, HitlOutcome, HitlTransport};
