//! Domain model
//!
//! Authored content (exercises, test cases, course hierarchy) and the
//! engine-owned submission/verdict records.

pub mod content;
pub mod exercise;
pub mod verdict;
