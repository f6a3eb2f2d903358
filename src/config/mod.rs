//! Configuration
//!
//! Shared types, the error taxonomy, and gradebox.json loading.

pub mod loader;
pub mod types;
