//! Observability
//!
//! Structured audit events and grading metrics.

pub mod audit;
pub mod metrics;
