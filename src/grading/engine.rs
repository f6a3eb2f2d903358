/// Grading engine
///
/// One grade request: validate, wait for admission, build once, fan the
/// test cases out over the sandbox, fold the case results into a verdict,
/// then hand the verdict to the ledger. Configuration problems fail before
/// admission; infrastructure failures surface as errors and are never
/// recorded as attempts.
use crate::config::loader::GradeboxConfig;
use crate::config::types::{
    poisoned, ExecutionLimits, ExecutionResult, GradeError, LanguageId, Result,
};
use crate::grading::admission::AdmissionController;
use crate::grading::compare::outputs_match;
use crate::grading::scoring::{policy_for, ScoringPolicy};
use crate::ledger::{Ledger, LedgerEntry, LedgerUpdate, Persistence};
use crate::model::content::ContentSource;
use crate::model::exercise::{DataFormat, Exercise, TestCase};
use crate::model::verdict::{
    CaseResult, CaseStatus, Submission, SubmissionKind, Verdict, VerdictStatus,
};
use crate::observability::audit::{AuditEvent, AuditEventType, AuditLog, CorrelationIds};
use crate::observability::metrics::GradingMetrics;
use crate::sandbox::{CancelToken, Prepared, Program, Sandbox};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

/// One learner action against one exercise
#[derive(Debug, Clone)]
pub struct GradeRequest {
    pub user_id: String,
    pub exercise: Arc<Exercise>,
    pub code: String,
    pub kind: SubmissionKind,
}

impl GradeRequest {
    pub fn grade(user_id: &str, exercise: Arc<Exercise>, code: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            exercise,
            code: code.to_string(),
            kind: SubmissionKind::Grade,
        }
    }

    /// Editor run: visible cases only, no progress
    pub fn run(user_id: &str, exercise: Arc<Exercise>, code: &str) -> Self {
        Self {
            kind: SubmissionKind::Run,
            ..Self::grade(user_id, exercise, code)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeOutcome {
    pub submission: Submission,
    pub verdict: Verdict,
    pub persistence: Persistence,
    /// Derived-state changes, present when the verdict was recorded
    pub update: Option<LedgerUpdate>,
}

/// Case status from one execution: limits first, then crash, then output.
pub fn judge_case(result: &ExecutionResult, case: &TestCase, format: DataFormat) -> CaseStatus {
    if result.memory_exceeded {
        CaseStatus::MemoryLimitExceeded
    } else if result.timed_out {
        CaseStatus::TimeLimitExceeded
    } else if !result.exit_status.success() {
        CaseStatus::RuntimeError
    } else if outputs_match(&result.stdout, &case.expected_output, case.comparison, format) {
        CaseStatus::Pass
    } else {
        CaseStatus::Fail
    }
}

/// First non-passing case in declared order, else Pass
pub fn overall_status(per_case: &[CaseResult]) -> VerdictStatus {
    per_case
        .iter()
        .find(|c| !c.status.is_pass())
        .map(|c| VerdictStatus::from(c.status))
        .unwrap_or(VerdictStatus::Pass)
}

fn truncate_display(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[truncated for display]", &text[..end])
}

pub struct GradingEngine {
    config: GradeboxConfig,
    sandbox: Arc<dyn Sandbox>,
    ledger: Arc<Ledger>,
    content: Option<Arc<dyn ContentSource>>,
    admission: AdmissionController,
    scoring: Box<dyn ScoringPolicy>,
    metrics: Arc<GradingMetrics>,
    audit: Arc<AuditLog>,
}

impl GradingEngine {
    pub fn new(config: GradeboxConfig, sandbox: Arc<dyn Sandbox>, ledger: Arc<Ledger>) -> Result<Self> {
        config.validate()?;
        let admission = AdmissionController::new(
            config.engine.global_concurrency,
            config.engine.queue_depth,
        );
        let scoring = policy_for(config.engine.scoring);
        Ok(Self {
            config,
            sandbox,
            ledger,
            content: None,
            admission,
            scoring,
            metrics: Arc::new(GradingMetrics::new()),
            audit: Arc::new(AuditLog::new()),
        })
    }

    pub fn with_content(mut self, content: Arc<dyn ContentSource>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<GradingMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_scoring(mut self, scoring: Box<dyn ScoringPolicy>) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn metrics(&self) -> &Arc<GradingMetrics> {
        &self.metrics
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// (in flight, queued)
    pub fn load(&self) -> (usize, usize) {
        self.admission.load()
    }

    /// Resolve the exercise through the content collaborator, then grade.
    pub fn grade_exercise(
        &self,
        exercise_id: &str,
        user_id: &str,
        code: &str,
        kind: SubmissionKind,
        cancel: &CancelToken,
    ) -> Result<GradeOutcome> {
        let content = self.content.as_ref().ok_or_else(|| {
            GradeError::Configuration("no content source configured".to_string())
        })?;
        let exercise = content.exercise(exercise_id).ok_or_else(|| {
            GradeError::Configuration(format!("unknown exercise '{}'", exercise_id))
        })?;
        self.grade(
            GradeRequest {
                user_id: user_id.to_string(),
                exercise,
                code: code.to_string(),
                kind,
            },
            cancel,
        )
    }

    pub fn grade(&self, request: GradeRequest, cancel: &CancelToken) -> Result<GradeOutcome> {
        let started = Instant::now();
        let (language, limits) = match self.check_request(&request) {
            Ok(checked) => checked,
            Err(e) => {
                self.metrics.configuration_failures.inc();
                log::warn!("Rejected grade request for '{}': {}", request.exercise.id, e);
                return Err(e);
            }
        };

        let exercise = request.exercise.as_ref();
        let submission = Submission::new(
            &exercise.id,
            &request.user_id,
            language,
            &request.code,
            request.kind,
        );
        let ids = CorrelationIds::for_submission(&submission);

        self.metrics.queued.inc();
        let admitted = self.admission.admit(cancel);
        self.metrics.queued.dec();
        let permit = match admitted {
            Ok(permit) => permit,
            Err(e) => {
                match e {
                    GradeError::Backpressure { .. } => self.metrics.backpressure_rejections.inc(),
                    GradeError::Cancelled => self.metrics.cancellations.inc(),
                    _ => {}
                }
                return Err(e);
            }
        };
        if permit.queued {
            self.audit.emit(
                AuditEvent::new(AuditEventType::AdmissionQueued, "waited for admission")
                    .with_correlation(&ids),
            );
        }

        self.metrics.in_flight.inc();
        let graded = self.grade_admitted(&submission, exercise, limits, cancel, &ids);
        self.metrics.in_flight.dec();
        drop(permit);

        let verdict = match graded {
            Ok(verdict) => verdict,
            Err(GradeError::Cancelled) => {
                self.metrics.cancellations.inc();
                self.audit.emit(
                    AuditEvent::new(AuditEventType::GradeCancelled, "cancelled by caller")
                        .with_correlation(&ids),
                );
                return Err(GradeError::Cancelled);
            }
            Err(e) => {
                self.metrics.system_failures.inc();
                self.audit.emit(
                    AuditEvent::new(AuditEventType::SystemFailure, e.to_string())
                        .with_correlation(&ids),
                );
                return Err(e);
            }
        };
        self.metrics
            .record_verdict(verdict.overall_status, started.elapsed());

        let entry = LedgerEntry {
            submission: submission.clone(),
            verdict: verdict.clone(),
            lesson_id: exercise.lesson_id.clone(),
            exercise_points: exercise.points,
        };
        let (persistence, update) = self.ledger.record_with_retry(&entry);
        match &persistence {
            Persistence::Recorded => self.audit.emit(
                AuditEvent::new(
                    AuditEventType::VerdictRecorded,
                    format!("{} score={}", verdict.overall_status, verdict.score_awarded),
                )
                .with_correlation(&ids),
            ),
            Persistence::Queued { reason } => {
                self.metrics.persistence_queued.inc();
                self.audit.emit(
                    AuditEvent::new(AuditEventType::PersistenceQueued, reason.clone())
                        .with_correlation(&ids),
                );
            }
        }
        if let Some(update) = &update {
            for unlock in &update.unlocked {
                self.metrics.achievements_unlocked.inc();
                self.audit.emit(
                    AuditEvent::new(AuditEventType::AchievementUnlocked, unlock.achievement_id.clone())
                        .with_correlation(&ids),
                );
            }
        }

        log::info!(
            "Graded submission {} for {}: {} ({}/{} cases, {} points) in {}ms",
            submission.id,
            exercise.id,
            verdict.overall_status,
            verdict.passed_cases(),
            verdict.per_case.len(),
            verdict.score_awarded,
            started.elapsed().as_millis()
        );

        Ok(GradeOutcome {
            submission,
            verdict,
            persistence,
            update,
        })
    }

    /// Configuration checks that must pass before any sandbox work
    fn check_request(&self, request: &GradeRequest) -> Result<(LanguageId, ExecutionLimits)> {
        let exercise = request.exercise.as_ref();
        exercise.validate()?;
        let language = exercise.language()?.clone();
        if !self.config.language_enabled(&language) || !self.sandbox.supports(&language) {
            return Err(GradeError::UnsupportedLanguage(language.to_string()));
        }
        if request.kind == SubmissionKind::Run && exercise.visible_case_count() == 0 {
            return Err(GradeError::Configuration(format!(
                "exercise '{}' has no visible test cases to run",
                exercise.id
            )));
        }
        let limits = exercise.effective_limits(self.config.limits_for(&language));
        limits.validate()?;
        Ok((language, limits))
    }

    fn grade_admitted(
        &self,
        submission: &Submission,
        exercise: &Exercise,
        limits: ExecutionLimits,
        cancel: &CancelToken,
        ids: &CorrelationIds,
    ) -> Result<Verdict> {
        self.audit.emit(
            AuditEvent::new(
                AuditEventType::GradeStarted,
                format!("{} via {:?}", submission.language, submission.kind),
            )
            .with_correlation(ids),
        );

        let cases: Vec<usize> = exercise
            .test_cases
            .iter()
            .enumerate()
            .filter(|(_, case)| submission.kind == SubmissionKind::Grade || !case.hidden)
            .map(|(index, _)| index)
            .collect();

        let prepared = self.with_retry(ids, None, || {
            self.sandbox
                .prepare(&submission.language, &submission.submitted_code, cancel)
        })?;
        let program = match prepared {
            Prepared::Ready(program) => program,
            Prepared::CompileFailed(failure) => {
                self.audit.emit(
                    AuditEvent::new(
                        AuditEventType::CompileFailed,
                        format!("build failed after {}ms", failure.duration_ms),
                    )
                    .with_correlation(ids),
                );
                let per_case = cases
                    .iter()
                    .map(|&index| {
                        CaseResult::not_run(
                            index,
                            exercise.test_cases[index].hidden,
                            CaseStatus::CompileError,
                        )
                    })
                    .collect();
                return Ok(Verdict {
                    submission_id: submission.id.clone(),
                    overall_status: VerdictStatus::CompileError,
                    per_case,
                    score_awarded: 0,
                    compile_output: Some(truncate_display(
                        &failure.diagnostics,
                        self.config.engine.display_output_bytes,
                    )),
                });
            }
        };

        let per_case = self.run_cases(&program, exercise, &cases, limits, cancel, ids)?;
        let overall_status = overall_status(&per_case);
        let score_awarded = match submission.kind {
            SubmissionKind::Grade => self.scoring.score(exercise.points, &per_case),
            SubmissionKind::Run => 0,
        };

        Ok(Verdict {
            submission_id: submission.id.clone(),
            overall_status,
            per_case,
            score_awarded,
            compile_output: None,
        })
    }

    /// Run the selected cases on up to `per_submission_concurrency` workers.
    ///
    /// Results are slotted by position so declared order survives any
    /// completion order. The first infrastructure failure cancels the
    /// remaining cases.
    fn run_cases(
        &self,
        program: &Program,
        exercise: &Exercise,
        cases: &[usize],
        limits: ExecutionLimits,
        cancel: &CancelToken,
        ids: &CorrelationIds,
    ) -> Result<Vec<CaseResult>> {
        let workers = self
            .config
            .engine
            .per_submission_concurrency
            .min(cases.len())
            .max(1);
        let next = AtomicUsize::new(0);
        let results: Mutex<Vec<Option<CaseResult>>> = Mutex::new(vec![None; cases.len()]);
        let failure: Mutex<Option<GradeError>> = Mutex::new(None);
        let siblings = cancel.child();

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if siblings.is_cancelled() {
                        break;
                    }
                    let position = next.fetch_add(1, Ordering::SeqCst);
                    let Some(&index) = cases.get(position) else {
                        break;
                    };
                    match self.run_case(program, exercise, index, limits, &siblings, ids) {
                        Ok(result) => match results.lock() {
                            Ok(mut slots) => slots[position] = Some(result),
                            Err(poison) => poison.into_inner()[position] = Some(result),
                        },
                        Err(e) => {
                            let mut first = match failure.lock() {
                                Ok(guard) => guard,
                                Err(poison) => poison.into_inner(),
                            };
                            if first.is_none() {
                                *first = Some(e);
                            }
                            siblings.cancel();
                            break;
                        }
                    }
                });
            }
        });

        if cancel.is_cancelled() {
            return Err(GradeError::Cancelled);
        }
        if let Some(e) = failure.into_inner().map_err(poisoned)? {
            return Err(e);
        }

        results
            .into_inner()
            .map_err(poisoned)?
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| GradeError::System {
                attempts: 1,
                message: "test case finished without a result".to_string(),
            })
    }

    fn run_case(
        &self,
        program: &Program,
        exercise: &Exercise,
        index: usize,
        limits: ExecutionLimits,
        cancel: &CancelToken,
        ids: &CorrelationIds,
    ) -> Result<CaseResult> {
        let case = &exercise.test_cases[index];
        let stdin = case.input.to_stdin();
        let result = self.with_retry(ids, Some(index), || {
            self.sandbox.run(program, &stdin, &limits, cancel)
        })?;
        self.metrics.cases_executed.inc();

        let status = judge_case(&result, case, exercise.data_format);
        if matches!(
            status,
            CaseStatus::TimeLimitExceeded | CaseStatus::MemoryLimitExceeded
        ) {
            self.audit.emit(
                AuditEvent::new(
                    AuditEventType::LimitViolation,
                    format!("{:?} after {}ms, peak {} KB", status, result.duration_ms, result.peak_memory_kb),
                )
                .with_correlation(ids)
                .with_case(index),
            );
        }
        self.audit.emit(
            AuditEvent::new(
                AuditEventType::CaseFinished,
                format!("{:?} in {}ms", status, result.duration_ms),
            )
            .with_correlation(ids)
            .with_case(index),
        );

        let display = self.config.engine.display_output_bytes;
        Ok(CaseResult {
            test_case_index: index,
            status,
            hidden: case.hidden,
            executed: true,
            actual_output: Some(truncate_display(&result.stdout, display)),
            stderr: (!result.stderr.is_empty()).then(|| truncate_display(&result.stderr, display)),
            duration_ms: result.duration_ms,
        })
    }

    /// Retry retryable sandbox failures; exhaustion becomes a system error.
    fn with_retry<T>(
        &self,
        ids: &CorrelationIds,
        case: Option<usize>,
        mut op: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        let retries = self.config.engine.sandbox_retries;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempts <= retries => {
                    self.metrics.sandbox_retries.inc();
                    let mut event = AuditEvent::new(AuditEventType::SandboxRetry, e.to_string())
                        .with_correlation(ids);
                    if let Some(index) = case {
                        event = event.with_case(index);
                    }
                    self.audit.emit(event);
                }
                Err(e) if e.is_retryable() => {
                    return Err(GradeError::System {
                        attempts,
                        message: e.to_string(),
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }
}
