//! gradebox: exercise execution and grading for interactive programming tutorials
//!
//! Learner code runs in a per-request sandbox, gets judged against authored
//! test cases, and the resulting verdicts drive lesson progress and
//! achievement unlocks.
//!
//! # Architecture
//!
//! ## Domain Model ([`model`])
//! - [`model::exercise`]: Exercises, test cases, typed payloads, comparison modes
//! - [`model::content`]: Read-only course, module and lesson catalogue
//! - [`model::verdict`]: Submissions, per-case results and verdicts
//!
//! ## Execution ([`judge`], [`sandbox`])
//! - [`judge::registry`]: Per-language build and run envelopes
//! - [`sandbox::process`]: Child-process backend with rlimits, optional namespaces and a watchdog
//! - [`sandbox::pool`]: Scratch slot pool, wiped between uses
//! - [`sandbox::output`]: Bounded stdout/stderr capture
//! - [`sandbox::cancel`]: Cancellation tokens
//!
//! ## Grading ([`grading`])
//! - [`grading::engine`]: Per-submission pipeline and verdict aggregation
//! - [`grading::compare`]: Exact, whitespace-normalized, deep-equal and tolerance comparison
//! - [`grading::scoring`]: Scoring policies
//! - [`grading::admission`]: Bounded FIFO admission with backpressure
//!
//! ## Derived State ([`ledger`], [`progress`], [`achievement`])
//! - [`ledger::ledger`]: Append-only attempt ledger, retry outbox and replay
//! - [`ledger::journal`]: JSON-lines persistence
//! - [`progress::aggregator`]: Monotonic lesson and course progress
//! - [`achievement::evaluator`]: Point-threshold achievements
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Structured audit events with correlation ids
//! - [`observability::metrics`]: Counters, gauges and a Prometheus export
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Shared types and the error taxonomy
//! - [`config::loader`]: gradebox.json loading and validation

// Domain model
pub mod model;

// Language adapters
pub mod judge;

// Execution sandbox
pub mod sandbox;

// Verdict production
pub mod grading;

// Attempt ledger and derived state
pub mod achievement;
pub mod ledger;
pub mod progress;

pub mod observability;

pub mod config;

// CLI entrypoint for the gradebox binary.
pub mod cli;

pub use config::types::*;
pub use grading::engine::{GradeOutcome, GradeRequest, GradingEngine};
pub use sandbox::{CancelToken, ProcessSandbox, Sandbox};
