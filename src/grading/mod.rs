//! Turning executions into verdicts
//!
//! - [`compare`]: expected/actual output comparison modes
//! - [`scoring`]: points from case results
//! - [`admission`]: bounded FIFO admission of grade requests
//! - [`engine`]: the per-submission grading pipeline

pub mod admission;
pub mod compare;
pub mod engine;
pub mod scoring;

pub use admission::{AdmissionController, AdmissionPermit};
pub use engine::{GradeOutcome, GradeRequest, GradingEngine};
pub use scoring::{policy_for, ScoringPolicy};
