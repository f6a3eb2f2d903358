//! Execution sandbox.
//!
//! A [`Sandbox`] turns (code, language, stdin, limits) into an
//! [`ExecutionResult`]. Work is split in two so compiled languages build
//! once per submission: [`Sandbox::prepare`] yields a [`Program`] (or the
//! compiler diagnostics), and [`Sandbox::run`] executes it against one
//! input in a fresh slot. Every run ends with its process group killed and
//! its slot wiped, whatever the outcome.

pub mod cancel;
pub mod hygiene;
pub mod output;
pub mod pool;
pub mod process;
pub mod workspace;

use crate::config::types::{ExecutionLimits, ExecutionResult, LanguageId, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use cancel::CancelToken;
pub use process::ProcessSandbox;
use workspace::BuildDir;

/// Code ready to run: source plus any build artifacts.
#[derive(Debug)]
pub struct Program {
    language: LanguageId,
    source: String,
    build: Option<BuildDir>,
}

impl Program {
    /// Program without on-disk artifacts, for backends that run source directly
    pub fn from_source(language: LanguageId, source: impl Into<String>) -> Self {
        Self {
            language,
            source: source.into(),
            build: None,
        }
    }

    pub fn built(language: LanguageId, source: impl Into<String>, build: BuildDir) -> Self {
        Self {
            language,
            source: source.into(),
            build: Some(build),
        }
    }

    pub fn language(&self) -> &LanguageId {
        &self.language
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn build_dir(&self) -> Option<&Path> {
        self.build.as_ref().map(|b| b.path())
    }
}

/// Compiler rejection of the submitted code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileFailure {
    /// Compiler output with host paths replaced
    pub diagnostics: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

#[derive(Debug)]
pub enum Prepared {
    Ready(Program),
    CompileFailed(CompileFailure),
}

/// Result of a one-shot [`Sandbox::execute`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum RunOutcome {
    CompileError(CompileFailure),
    Completed(ExecutionResult),
}

/// Isolated execution backend.
///
/// Errors are infrastructure failures only. A program that crashes, times
/// out or exceeds memory still yields `Ok(ExecutionResult)` with the
/// corresponding flags set.
pub trait Sandbox: Send + Sync {
    fn supports(&self, language: &LanguageId) -> bool;

    fn prepare(&self, language: &LanguageId, code: &str, cancel: &CancelToken) -> Result<Prepared>;

    fn run(
        &self,
        program: &Program,
        stdin: &str,
        limits: &ExecutionLimits,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult>;

    /// Build (if needed) and run once
    fn execute(
        &self,
        code: &str,
        language: &LanguageId,
        stdin: &str,
        limits: &ExecutionLimits,
        cancel: &CancelToken,
    ) -> Result<RunOutcome> {
        limits.validate()?;
        match self.prepare(language, code, cancel)? {
            Prepared::Ready(program) => Ok(RunOutcome::Completed(
                self.run(&program, stdin, limits, cancel)?,
            )),
            Prepared::CompileFailed(failure) => Ok(RunOutcome::CompileError(failure)),
        }
    }
}
