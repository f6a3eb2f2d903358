/// Submissions and verdicts
use crate::config::types::LanguageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Which learner action produced a submission
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    /// Full grading against every case; feeds progress and achievements
    #[default]
    Grade,
    /// Editor "run": visible cases only, never counted towards progress
    Run,
}

/// One immutable attempt
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub exercise_id: String,
    pub user_id: String,
    pub language: LanguageId,
    pub submitted_code: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub kind: SubmissionKind,
}

impl Submission {
    pub fn new(
        exercise_id: &str,
        user_id: &str,
        language: LanguageId,
        code: &str,
        kind: SubmissionKind,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            exercise_id: exercise_id.to_string(),
            user_id: user_id.to_string(),
            language,
            submitted_code: code.to_string(),
            timestamp: Utc::now(),
            kind,
        }
    }

    /// SHA-256 of the submitted code, used in logs instead of the code itself
    pub fn code_digest(&self) -> String {
        code_digest(&self.submitted_code)
    }
}

pub fn code_digest(code: &str) -> String {
    format!("{:x}", Sha256::digest(code.as_bytes()))
}

/// Status of a single test case
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    /// Ran cleanly but output did not match
    Fail,
    /// Not executed because the build step failed
    CompileError,
    RuntimeError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
}

impl CaseStatus {
    pub fn is_pass(&self) -> bool {
        matches!(self, CaseStatus::Pass)
    }
}

/// Overall status of a verdict
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Pass,
    Fail,
    CompileError,
    RuntimeError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    /// Infrastructure failure; only ever reported, never recorded as an attempt
    SandboxError,
}

impl VerdictStatus {
    pub const ALL: [VerdictStatus; 7] = [
        VerdictStatus::Pass,
        VerdictStatus::Fail,
        VerdictStatus::CompileError,
        VerdictStatus::RuntimeError,
        VerdictStatus::TimeLimitExceeded,
        VerdictStatus::MemoryLimitExceeded,
        VerdictStatus::SandboxError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictStatus::Pass => "pass",
            VerdictStatus::Fail => "fail",
            VerdictStatus::CompileError => "compile_error",
            VerdictStatus::RuntimeError => "runtime_error",
            VerdictStatus::TimeLimitExceeded => "time_limit_exceeded",
            VerdictStatus::MemoryLimitExceeded => "memory_limit_exceeded",
            VerdictStatus::SandboxError => "sandbox_error",
        }
    }

    /// Resource violations get their own learner hint
    pub fn is_resource_limit(&self) -> bool {
        matches!(
            self,
            VerdictStatus::TimeLimitExceeded | VerdictStatus::MemoryLimitExceeded
        )
    }
}

impl From<CaseStatus> for VerdictStatus {
    fn from(status: CaseStatus) -> Self {
        match status {
            CaseStatus::Pass => VerdictStatus::Pass,
            CaseStatus::Fail => VerdictStatus::Fail,
            CaseStatus::CompileError => VerdictStatus::CompileError,
            CaseStatus::RuntimeError => VerdictStatus::RuntimeError,
            CaseStatus::TimeLimitExceeded => VerdictStatus::TimeLimitExceeded,
            CaseStatus::MemoryLimitExceeded => VerdictStatus::MemoryLimitExceeded,
        }
    }
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one test case
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub test_case_index: usize,
    pub status: CaseStatus,
    pub hidden: bool,
    /// False when the case was skipped (compile failure)
    pub executed: bool,
    /// Truncated stdout
    pub actual_output: Option<String>,
    /// Truncated, sanitized stderr
    pub stderr: Option<String>,
    pub duration_ms: u64,
}

impl CaseResult {
    pub fn not_run(index: usize, hidden: bool, status: CaseStatus) -> Self {
        Self {
            test_case_index: index,
            status,
            hidden,
            executed: false,
            actual_output: None,
            stderr: None,
            duration_ms: 0,
        }
    }
}

/// Complete grading outcome for one submission
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub submission_id: String,
    pub overall_status: VerdictStatus,
    pub per_case: Vec<CaseResult>,
    pub score_awarded: u32,
    /// Build diagnostics when overall_status is CompileError
    #[serde(default)]
    pub compile_output: Option<String>,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.overall_status == VerdictStatus::Pass
    }

    pub fn passed_cases(&self) -> usize {
        self.per_case.iter().filter(|c| c.status.is_pass()).count()
    }

    /// Copy safe to show the learner: hidden case output is removed.
    pub fn learner_view(&self) -> Verdict {
        let mut view = self.clone();
        for case in view.per_case.iter_mut().filter(|c| c.hidden) {
            case.actual_output = None;
            case.stderr = None;
        }
        view
    }

    /// Short hint for the learner-facing summary line
    pub fn hint(&self) -> &'static str {
        match self.overall_status {
            VerdictStatus::Pass => "All test cases passed",
            VerdictStatus::Fail => "Wrong answer",
            VerdictStatus::CompileError => "Your code did not compile",
            VerdictStatus::RuntimeError => "Your program crashed or exited with an error",
            VerdictStatus::TimeLimitExceeded => "Time limit exceeded (infinite loop?)",
            VerdictStatus::MemoryLimitExceeded => "Memory limit exceeded",
            VerdictStatus::SandboxError => "Grading is temporarily unavailable",
        }
    }
}
