// Real child processes through /bin/sh, in dev (non-strict) mode.

use gradebox::config::loader::GradeboxConfig;
use gradebox::ledger::Ledger;
use gradebox::model::exercise::Exercise;
use gradebox::model::verdict::VerdictStatus;
use gradebox::sandbox::RunOutcome;
use gradebox::{
    CancelToken, ExecutionLimits, ExecutionResult, ExitStatus, GradeRequest, GradingEngine,
    LanguageId, ProcessSandbox, Sandbox,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct Fixture {
    root: PathBuf,
    config: GradeboxConfig,
}

impl Fixture {
    fn new(slots: usize) -> Self {
        let root = std::env::temp_dir().join(format!("gradebox-it-{}", uuid::Uuid::new_v4()));
        let mut config = GradeboxConfig::default();
        config.sandbox.root_dir = root.clone();
        config.sandbox.slots = slots;
        config.sandbox.stdout_limit_bytes = 1024;
        Self { root, config }
    }

    fn sandbox(&self) -> ProcessSandbox {
        ProcessSandbox::new(&self.config).unwrap()
    }
}

impl Fixture {
    fn strict(slots: usize) -> Self {
        let mut fx = Self::new(slots);
        fx.config.sandbox.strict = true;
        fx
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn sh() -> LanguageId {
    LanguageId::new("sh")
}

fn run_sh(sandbox: &ProcessSandbox, code: &str, stdin: &str, limits: ExecutionLimits) -> ExecutionResult {
    match sandbox
        .execute(code, &sh(), stdin, &limits, &CancelToken::new())
        .unwrap()
    {
        RunOutcome::Completed(result) => result,
        other => panic!("shell scripts have no build step: {:?}", other),
    }
}

fn shell_exercise(cases: &[(&str, &str)], time_ms: u64) -> Arc<Exercise> {
    let test_cases: Vec<_> = cases
        .iter()
        .map(|(input, expected)| json!({ "input": input, "expected_output": expected }))
        .collect();
    Arc::new(
        serde_json::from_value(json!({
            "id": "double",
            "lesson_id": "arith",
            "language": "sh",
            "solution_code": "read n; echo $((n * 2))",
            "test_cases": test_cases,
            "limits": { "time_ms": time_ms },
        }))
        .unwrap(),
    )
}

#[test]
fn test_stdout_and_exit_status_captured() {
    let fx = Fixture::new(1);
    let sandbox = fx.sandbox();
    let result = run_sh(
        &sandbox,
        "read name; echo \"hello $name\"; echo warn >&2; exit 4",
        "gradebox\n",
        ExecutionLimits::new(2000, 64),
    );
    assert_eq!(result.stdout, "hello gradebox\n");
    assert_eq!(result.stderr, "warn\n");
    assert_eq!(result.exit_status, ExitStatus::Exited(4));
    assert!(!result.succeeded());
}

#[test]
fn test_scratch_state_does_not_leak_between_runs() {
    let fx = Fixture::new(1);
    let sandbox = fx.sandbox();
    let limits = ExecutionLimits::new(2000, 64);

    let first = run_sh(&sandbox, "echo secret > leftover.txt; ls", "", limits);
    assert!(first.stdout.contains("leftover.txt"));

    let second = run_sh(&sandbox, "cat leftover.txt 2>/dev/null || echo clean", "", limits);
    assert_eq!(second.stdout, "clean\n");
}

#[test]
fn test_environment_is_scrubbed() {
    std::env::set_var("GRADEBOX_HOST_SECRET", "hunter2");
    let fx = Fixture::new(1);
    let sandbox = fx.sandbox();
    let result = run_sh(&sandbox, "env", "", ExecutionLimits::new(2000, 64));
    assert!(!result.stdout.contains("hunter2"));
    assert!(result.stdout.contains("LC_ALL=C.UTF-8"));
}

#[test]
fn test_unbounded_output_is_truncated() {
    let fx = Fixture::new(1);
    let sandbox = fx.sandbox();
    let result = run_sh(
        &sandbox,
        "i=0; while [ $i -lt 2000 ]; do echo line-$i; i=$((i+1)); done",
        "",
        ExecutionLimits::new(5000, 64),
    );
    assert!(result.stdout_truncated);
    assert!(result.stdout.contains("[output truncated:"));
    assert!(result.stdout.starts_with("line-0\n"));
}

#[test]
fn test_infinite_loop_times_out_promptly() {
    let fx = Fixture::new(1);
    let sandbox = fx.sandbox();
    let started = Instant::now();
    let result = run_sh(&sandbox, "while :; do :; done", "", ExecutionLimits::new(300, 64));
    assert!(result.timed_out);
    assert!(!result.memory_exceeded);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_memory_ceiling_reported() {
    let fx = Fixture::new(1);
    let sandbox = fx.sandbox();
    let result = run_sh(
        &sandbox,
        "x=$(head -c 100000000 /dev/zero | tr '\\0' a); echo ${#x}",
        "",
        ExecutionLimits::new(10_000, 32),
    );
    assert!(result.memory_exceeded, "peak {} KB", result.peak_memory_kb);
    assert!(!result.succeeded());
}

#[test]
fn test_cancel_kills_running_program() {
    let fx = Fixture::new(1);
    let sandbox = fx.sandbox();
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        trigger.cancel();
    });

    let started = Instant::now();
    let result = sandbox.execute(
        "sleep 30",
        &sh(),
        "",
        &ExecutionLimits::new(60_000, 64),
        &cancel,
    );
    canceller.join().unwrap();

    assert!(matches!(result, Err(gradebox::GradeError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(sandbox.slots_available(), 1);
}

#[test]
fn test_engine_grades_shell_exercise_end_to_end() {
    let fx = Fixture::new(2);
    let sandbox: Arc<dyn Sandbox> = Arc::new(fx.sandbox());
    let ledger = Arc::new(Ledger::in_memory());
    let engine = GradingEngine::new(fx.config.clone(), sandbox, ledger.clone()).unwrap();
    let ex = shell_exercise(&[("2", "4"), ("21", "42"), ("0", "0")], 2000);

    let outcome = engine
        .grade(
            GradeRequest::grade("u1", ex.clone(), &ex.solution_code),
            &CancelToken::new(),
        )
        .unwrap();
    assert_eq!(outcome.verdict.overall_status, VerdictStatus::Pass);
    assert_eq!(outcome.verdict.score_awarded, 10);
    assert_eq!(ledger.total_points("u1").unwrap(), 10);

    let echo = engine
        .grade(GradeRequest::grade("u2", ex, "read n; echo $n"), &CancelToken::new())
        .unwrap();
    assert_eq!(echo.verdict.overall_status, VerdictStatus::Fail);
    assert!(echo.verdict.per_case[2].status.is_pass());
}

#[test]
fn test_engine_reports_time_limit_for_infinite_loop() {
    let fx = Fixture::new(2);
    let sandbox: Arc<dyn Sandbox> = Arc::new(fx.sandbox());
    let engine = GradingEngine::new(fx.config.clone(), sandbox, Arc::new(Ledger::in_memory())).unwrap();
    let ex = shell_exercise(&[("1", "2"), ("2", "4")], 300);

    let started = Instant::now();
    let outcome = engine
        .grade(
            GradeRequest::grade("u1", ex, "while :; do :; done"),
            &CancelToken::new(),
        )
        .unwrap();

    assert_eq!(outcome.verdict.overall_status, VerdictStatus::TimeLimitExceeded);
    assert_eq!(outcome.verdict.per_case.len(), 2);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
#[ignore = "needs root and mount namespaces"]
fn test_strict_run_cannot_reach_sibling_slots_or_builds() {
    if unsafe { libc::geteuid() } != 0 {
        return;
    }
    let fx = Fixture::strict(2);
    let sandbox = Arc::new(fx.sandbox());
    let root = fx.root.display().to_string();

    let victim = {
        let sandbox = Arc::clone(&sandbox);
        thread::spawn(move || {
            run_sh(
                &sandbox,
                "# SECRET_ANSWER=42\nsleep 1\nls -a",
                "",
                ExecutionLimits::new(5000, 64),
            )
        })
    };
    thread::sleep(Duration::from_millis(300));

    let intruder = run_sh(
        &sandbox,
        &format!(
            "id -u\n\
             ls {root} {root}/slots\n\
             cat {root}/builds/*/solution.sh {root}/slots/*/solution.sh /proc/*/cwd/solution.sh 2>/dev/null\n\
             for d in {root}/slots/slot-*; do touch \"$d/planted\" 2>/dev/null; done\n\
             true",
            root = root
        ),
        "",
        ExecutionLimits::new(2000, 64),
    );
    let victim = victim.join().unwrap();

    assert_ne!(intruder.stdout.lines().next(), Some("0"));
    assert!(!intruder.stdout.contains("SECRET_ANSWER"), "{}", intruder.stdout);
    assert!(!intruder.stdout.contains("builds"));
    assert_eq!(intruder.stdout.matches("slot-").count(), 1, "{}", intruder.stdout);
    assert!(!victim.stdout.contains("planted"), "{}", victim.stdout);
    assert!(victim.stdout.contains("solution.sh"));
}
