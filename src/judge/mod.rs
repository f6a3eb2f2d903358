//! Judge adapters.
//!
//! The sandbox backend stays language-agnostic. Adapters define source file
//! naming, the optional build step, and the run envelope for each language.

pub mod adapter;
pub mod languages;
pub mod registry;

pub use adapter::{ExecutionProfile, JudgeAdapter};
pub use registry::adapter_for;
