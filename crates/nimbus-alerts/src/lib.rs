//! Alert notification pipeline for Nimbus
//!
//! Consumes fused alert sets from the orchestrator and emits rate-limited
//! notification events for the desktop collaborator.

pub mod pipeline;
pub mod state;

pub use pipeline::{AlertPipeline, Decision, NotificationEvent};
pub use state::{NotificationRecord, NotificationState};
