/// Structured audit events for grading
///
/// Every event carries correlation ids tying it to one submission. Events
/// go to the `gradebox::audit` log target as JSON and, when configured, to
/// an append-only audit file. Submitted code is identified by digest only.
use crate::config::types::{GradeError, Result};
use crate::model::verdict::Submission;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const AUDIT_TARGET: &str = "gradebox::audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    GradeStarted,
    AdmissionQueued,
    CompileFailed,
    CaseFinished,
    LimitViolation,
    SandboxRetry,
    SystemFailure,
    GradeCancelled,
    VerdictRecorded,
    PersistenceQueued,
    AchievementUnlocked,
}

impl AuditEventType {
    pub fn default_severity(&self) -> AuditSeverity {
        match self {
            AuditEventType::SystemFailure => AuditSeverity::High,
            AuditEventType::SandboxRetry
            | AuditEventType::PersistenceQueued
            | AuditEventType::LimitViolation => AuditSeverity::Medium,
            _ => AuditSeverity::Low,
        }
    }
}

/// Identifiers linking an event to one grade request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationIds {
    pub submission_id: String,
    pub user_id: String,
    pub exercise_id: String,
    /// SHA-256 of the submitted code
    pub code_digest: String,
}

impl CorrelationIds {
    pub fn for_submission(submission: &Submission) -> Self {
        Self {
            submission_id: submission.id.clone(),
            user_id: submission.user_id.clone(),
            exercise_id: submission.exercise_id.clone(),
            code_digest: submission.code_digest(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    pub correlation: Option<CorrelationIds>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_case_index: Option<usize>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, details: impl Into<String>) -> Self {
        Self {
            event_type,
            severity: event_type.default_severity(),
            timestamp: Utc::now(),
            details: details.into(),
            correlation: None,
            test_case_index: None,
        }
    }

    pub fn with_correlation(mut self, correlation: &CorrelationIds) -> Self {
        self.correlation = Some(correlation.clone());
        self
    }

    pub fn with_case(mut self, index: usize) -> Self {
        self.test_case_index = Some(index);
        self
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// Audit sink: log target plus optional JSON-lines file
#[derive(Debug, Default)]
pub struct AuditLog {
    file: Option<Mutex<File>>,
    path: Option<PathBuf>,
}

impl AuditLog {
    /// Log-target only
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                GradeError::Configuration(format!("create audit log directory: {}", e))
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| GradeError::Configuration(format!("open audit log: {}", e)))?;
        Ok(Self {
            file: Some(Mutex::new(file)),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn emit(&self, event: AuditEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        match event.severity {
            AuditSeverity::High => error!(target: AUDIT_TARGET, "{}", line),
            AuditSeverity::Medium => warn!(target: AUDIT_TARGET, "{}", line),
            AuditSeverity::Low => info!(target: AUDIT_TARGET, "{}", line),
        }

        if let Some(file) = &self.file {
            match file.lock() {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
                        error!("Failed to write audit log: {}", e);
                    }
                }
                Err(_) => error!("Failed to acquire lock on audit file"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::LanguageId;
    use crate::model::verdict::SubmissionKind;

    #[test]
    fn test_correlation_uses_digest_not_code() {
        let submission = Submission::new(
            "ex-1",
            "user-1",
            LanguageId::new("python"),
            "print('secret answer')",
            SubmissionKind::Grade,
        );
        let ids = CorrelationIds::for_submission(&submission);
        assert_eq!(ids.code_digest.len(), 64);
        let json = serde_json::to_string(&AuditEvent::new(AuditEventType::GradeStarted, "start")
            .with_correlation(&ids))
        .unwrap();
        assert!(!json.contains("secret answer"));
        assert!(json.contains("grade_started"));
    }

    #[test]
    fn test_severity_defaults() {
        assert_eq!(
            AuditEventType::SystemFailure.default_severity(),
            AuditSeverity::High
        );
        assert_eq!(
            AuditEventType::CaseFinished.default_severity(),
            AuditSeverity::Low
        );
    }

    #[test]
    fn test_file_sink_appends_json_lines() {
        let path = std::env::temp_dir()
            .join(format!("gradebox-audit-{}", uuid::Uuid::new_v4()))
            .join("audit.log");
        let log = AuditLog::with_file(&path).unwrap();
        log.emit(AuditEvent::new(AuditEventType::SandboxRetry, "retry").with_case(2));
        log.emit(AuditEvent::new(AuditEventType::VerdictRecorded, "ok"));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AuditEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.test_case_index, Some(2));
        assert_eq!(first.severity, AuditSeverity::Medium);
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }
}
