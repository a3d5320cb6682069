//! Fetch orchestration for Nimbus
//!
//! Ties the provider, cache, and alert crates together: coalesces
//! concurrent requests per fingerprint, runs the fetch cycle with
//! per-capability fallback, fuses results with provenance, enriches with
//! secondary fields, persists through the cache's compare-and-swap, and
//! forwards fused alerts to the notification pipeline.

pub mod coalescer;
pub mod fuse;
pub mod orchestrator;

pub use coalescer::Coalescer;
pub use orchestrator::Orchestrator;
