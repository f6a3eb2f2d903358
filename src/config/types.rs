/// Core types shared across the sandbox, grading engine and ledger
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Default wall-clock limit applied when an exercise does not override it.
pub const DEFAULT_TIME_MS: u64 = 5_000;
/// Default memory ceiling applied when an exercise does not override it.
pub const DEFAULT_MEMORY_MB: u64 = 256;

/// Normalized language identifier.
///
/// Aliases collapse to one canonical name on construction so adapter lookup,
/// config overrides and ledger records all agree on spelling.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct LanguageId(String);

impl LanguageId {
    pub fn new(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        let canonical = match lowered.as_str() {
            "py" | "python3" => "python",
            "js" | "node" | "nodejs" => "javascript",
            "c++" | "cxx" | "cc" => "cpp",
            "bash" | "shell" => "sh",
            other => other,
        };
        Self(canonical.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LanguageId {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<&str> for LanguageId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<LanguageId> for String {
    fn from(value: LanguageId) -> Self {
        value.0
    }
}

impl fmt::Display for LanguageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resource envelope for one execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Hard wall-clock limit in milliseconds
    pub time_ms: u64,
    /// Resident memory ceiling in megabytes
    pub memory_mb: u64,
}

impl ExecutionLimits {
    pub fn new(time_ms: u64, memory_mb: u64) -> Self {
        Self { time_ms, memory_mb }
    }

    pub fn memory_bytes(&self) -> u64 {
        self.memory_mb * 1024 * 1024
    }

    pub fn validate(&self) -> Result<()> {
        if self.time_ms == 0 {
            return Err(GradeError::Configuration(
                "time limit must be greater than zero".to_string(),
            ));
        }
        if self.memory_mb == 0 {
            return Err(GradeError::Configuration(
                "memory limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            time_ms: DEFAULT_TIME_MS,
            memory_mb: DEFAULT_MEMORY_MB,
        }
    }
}

/// How the sandboxed process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExitStatus {
    Exited(i32),
    Signaled(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit code {}", code),
            ExitStatus::Signaled(sig) => write!(f, "signal {}", sig),
        }
    }
}

/// Outcome of one sandboxed run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Captured standard output (bounded, marker appended when truncated)
    pub stdout: String,
    /// Captured standard error (bounded, marker appended when truncated)
    pub stderr: String,
    pub exit_status: ExitStatus,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Killed by the wall-clock watchdog or the CPU rlimit
    pub timed_out: bool,
    /// Killed because resident memory crossed the ceiling
    pub memory_exceeded: bool,
    /// Peak resident set size observed, in kilobytes
    pub peak_memory_kb: u64,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

impl ExecutionResult {
    /// Clean exit with no limit violation.
    pub fn succeeded(&self) -> bool {
        self.exit_status.success() && !self.timed_out && !self.memory_exceeded
    }
}

/// Failure taxonomy surfaced to collaborators.
///
/// Learner-facing outcomes (wrong answer, runtime error, limits) are verdict
/// statuses, not errors, and therefore have no class here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Exercise or request is unusable; fails before any sandbox runs
    Configuration,
    /// Infrastructure failure after retries; not counted as an attempt
    System,
    /// Caller withdrew the request
    Cancelled,
    /// Admission queue is full
    Backpressure,
}

/// Engine error type
#[derive(Error, Debug)]
pub enum GradeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("System error after {attempts} attempt(s): {message}")]
    System { attempts: u32, message: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Grade request cancelled")]
    Cancelled,

    #[error("Admission queue full ({queue_depth} waiting)")]
    Backpressure { queue_depth: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GradeError {
    pub fn class(&self) -> FailureClass {
        match self {
            GradeError::Configuration(_) | GradeError::UnsupportedLanguage(_) => {
                FailureClass::Configuration
            }
            GradeError::Cancelled => FailureClass::Cancelled,
            GradeError::Backpressure { .. } => FailureClass::Backpressure,
            GradeError::Sandbox(_)
            | GradeError::System { .. }
            | GradeError::Persistence(_)
            | GradeError::Io(_)
            | GradeError::Serialization(_) => FailureClass::System,
        }
    }

    /// Transient infrastructure failures worth one more attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GradeError::Sandbox(_) | GradeError::Persistence(_) | GradeError::Io(_)
        )
    }
}

impl From<nix::errno::Errno> for GradeError {
    fn from(err: nix::errno::Errno) -> Self {
        GradeError::Sandbox(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GradeError>;

/// Poisoned locks mean a thread panicked while holding engine state.
pub(crate) fn poisoned<T>(_: std::sync::PoisonError<T>) -> GradeError {
    GradeError::System {
        attempts: 1,
        message: "internal lock poisoned".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_aliases_normalize() {
        assert_eq!(LanguageId::new("Py").as_str(), "python");
        assert_eq!(LanguageId::new("c++").as_str(), "cpp");
        assert_eq!(LanguageId::new("node").as_str(), "javascript");
        assert_eq!(LanguageId::new("bash").as_str(), "sh");
        assert_eq!(LanguageId::new("java").as_str(), "java");
    }

    #[test]
    fn test_language_deserializes_through_alias() {
        let lang: LanguageId = serde_json::from_str("\"Python3\"").unwrap();
        assert_eq!(lang, LanguageId::new("python"));
        assert_eq!(serde_json::to_string(&lang).unwrap(), "\"python\"");
    }

    #[test]
    fn test_default_limits() {
        let limits = ExecutionLimits::default();
        assert_eq!(limits.time_ms, 5000);
        assert_eq!(limits.memory_mb, 256);
        assert_eq!(limits.memory_bytes(), 256 * 1024 * 1024);
        assert!(limits.validate().is_ok());
        assert!(ExecutionLimits::new(0, 1).validate().is_err());
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(
            GradeError::Configuration("x".into()).class(),
            FailureClass::Configuration
        );
        assert_eq!(GradeError::Sandbox("x".into()).class(), FailureClass::System);
        assert!(GradeError::Sandbox("x".into()).is_retryable());
        assert!(!GradeError::Cancelled.is_retryable());
        assert_eq!(
            GradeError::Backpressure { queue_depth: 3 }.class(),
            FailureClass::Backpressure
        );
    }

    #[test]
    fn test_execution_result_success() {
        let mut result = ExecutionResult {
            stdout: String::new(),
            stderr: String::new(),
            exit_status: ExitStatus::Exited(0),
            duration_ms: 1,
            timed_out: false,
            memory_exceeded: false,
            peak_memory_kb: 0,
            stdout_truncated: false,
            stderr_truncated: false,
        };
        assert!(result.succeeded());
        result.timed_out = true;
        assert!(!result.succeeded());
    }
}
