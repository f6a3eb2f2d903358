use crate::achievement::evaluator::AchievementEvaluator;
use crate::config::loader::GradeboxConfig;
use crate::config::types::{ExecutionLimits, FailureClass, GradeError, LanguageId};
use crate::grading::engine::{GradeOutcome, GradeRequest, GradingEngine};
use crate::ledger::{JournalStore, Ledger, MemoryStore, PersistenceStore};
use crate::model::content::ContentCatalog;
use crate::model::exercise::Exercise;
use crate::model::verdict::{SubmissionKind, VerdictStatus};
use crate::sandbox::{CancelToken, ProcessSandbox, Sandbox};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (falls back to $GRADEBOX_CONFIG, then ./gradebox.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade a submission against an exercise
    Grade {
        /// Exercise definition (JSON)
        #[arg(long, conflicts_with = "catalog")]
        exercise: Option<PathBuf>,
        /// Content catalogue (JSON); requires --exercise-id
        #[arg(long, requires = "exercise_id")]
        catalog: Option<PathBuf>,
        /// Exercise id to look up in the catalogue
        #[arg(long)]
        exercise_id: Option<String>,
        /// Submitted source file
        #[arg(long)]
        code: PathBuf,
        #[arg(long)]
        user: String,
        /// Ledger journal (JSON lines); in-memory when omitted
        #[arg(long)]
        ledger: Option<PathBuf>,
        /// Achievement definitions (JSON array)
        #[arg(long)]
        achievements: Option<PathBuf>,
        /// Editor run: visible cases only, no progress
        #[arg(long)]
        run: bool,
        /// Include hidden case output in the report
        #[arg(long)]
        show_hidden: bool,
    },
    /// Build and run code once, outside of any exercise
    Execute {
        #[arg(long)]
        language: String,
        /// Source file
        #[arg(long)]
        code: PathBuf,
        /// Input data to pass to stdin
        #[arg(long)]
        stdin: Option<String>,
        /// Wall-clock limit in milliseconds
        #[arg(long)]
        time_ms: Option<u64>,
        /// Memory limit in MB
        #[arg(long)]
        memory_mb: Option<u64>,
    },
    /// Print a user's verdicts for one exercise
    History {
        #[arg(long)]
        ledger: PathBuf,
        #[arg(long)]
        user: String,
        #[arg(long)]
        exercise: String,
    },
    /// Re-derive progress and unlocks from the verdict stream and compare
    Replay {
        #[arg(long)]
        ledger: PathBuf,
        #[arg(long)]
        user: String,
        #[arg(long)]
        achievements: Option<PathBuf>,
    },
    /// Check that every language toolchain is installed
    CheckDeps {
        /// Report the resolved binaries for healthy languages too
        #[arg(long)]
        verbose: bool,
    },
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn signal_handler(_sig: i32) {
    // Only an atomic store: anything else is not async-signal-safe.
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Install SIGINT/SIGTERM handlers that cancel the returned token.
fn cancel_on_signal() -> CancelToken {
    unsafe {
        libc::signal(libc::SIGTERM, signal_handler as usize);
        libc::signal(libc::SIGINT, signal_handler as usize);
    }
    let token = CancelToken::new();
    let watched = token.clone();
    std::thread::spawn(move || loop {
        if INTERRUPTED.load(Ordering::SeqCst) {
            log::warn!("Signal received, cancelling");
            watched.cancel();
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    });
    token
}

pub fn run() -> Result<()> {
    env_logger::init();

    if !cfg!(unix) {
        anyhow::bail!("gradebox requires a Unix-like system for process isolation");
    }

    let cli = Cli::parse();
    let config = GradeboxConfig::resolve(cli.config.as_deref())?;
    let cancel = cancel_on_signal();

    match cli.command {
        Commands::Grade {
            exercise,
            catalog,
            exercise_id,
            code,
            user,
            ledger,
            achievements,
            run,
            show_hidden,
        } => {
            let code = read_source(&code)?;
            let ledger = open_ledger(
                ledger.as_deref(),
                achievements.as_deref(),
                config.engine.ledger_retries,
            )?;
            let sandbox: Arc<dyn Sandbox> = Arc::new(ProcessSandbox::new(&config)?);
            let mut engine = GradingEngine::new(config, sandbox, ledger.clone())?;
            let kind = if run {
                SubmissionKind::Run
            } else {
                SubmissionKind::Grade
            };

            let graded = match (exercise, catalog, exercise_id) {
                (Some(path), _, _) => {
                    let exercise = load_exercise(&path)?;
                    let request = GradeRequest {
                        user_id: user,
                        exercise: Arc::new(exercise),
                        code,
                        kind,
                    };
                    engine.grade(request, &cancel)
                }
                (None, Some(catalog), Some(id)) => {
                    engine = engine.with_content(Arc::new(ContentCatalog::load_from_file(&catalog)?));
                    engine.grade_exercise(&id, &user, &code, kind, &cancel)
                }
                _ => anyhow::bail!("either --exercise or --catalog with --exercise-id is required"),
            };

            match graded {
                Ok(outcome) => {
                    if ledger.pending() > 0 {
                        if let Err(e) = ledger.flush_pending() {
                            log::error!("Ledger still unavailable, {} verdict(s) unsaved: {}", ledger.pending(), e);
                        }
                    }
                    println!("{}", grade_report(&outcome, show_hidden)?);
                    Ok(())
                }
                Err(e) => fail(e),
            }
        }
        Commands::Execute {
            language,
            code,
            stdin,
            time_ms,
            memory_mb,
        } => {
            let language = LanguageId::new(&language);
            let base = config.limits_for(&language);
            let limits = ExecutionLimits {
                time_ms: time_ms.unwrap_or(base.time_ms),
                memory_mb: memory_mb.unwrap_or(base.memory_mb),
            };
            let code = read_source(&code)?;
            let sandbox = ProcessSandbox::new(&config)?;
            match sandbox.execute(&code, &language, stdin.as_deref().unwrap_or(""), &limits, &cancel) {
                Ok(outcome) => {
                    println!("{}", serde_json::to_string_pretty(&outcome)?);
                    Ok(())
                }
                Err(e) => fail(e),
            }
        }
        Commands::History {
            ledger,
            user,
            exercise,
        } => {
            let ledger = open_ledger(Some(&ledger), None, config.engine.ledger_retries)?;
            let history: Vec<_> = ledger
                .history(&user, &exercise)?
                .iter()
                .map(|v| v.learner_view())
                .collect();
            println!("{}", serde_json::to_string_pretty(&history)?);
            Ok(())
        }
        Commands::Replay {
            ledger,
            user,
            achievements,
        } => {
            let ledger = open_ledger(
                Some(&ledger),
                achievements.as_deref(),
                config.engine.ledger_retries,
            )?;
            let report = ledger.audit(&user)?;
            if !report.consistent {
                log::warn!("Stored progress for {} differs from replayed verdicts", user);
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::CheckDeps { verbose } => check_language_dependencies(verbose),
    }
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading source {}", path.display()))
}

fn load_exercise(path: &Path) -> Result<Exercise> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading exercise {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing exercise {}", path.display()))
}

fn open_ledger(
    journal: Option<&Path>,
    achievements: Option<&Path>,
    retries: u32,
) -> Result<Arc<Ledger>> {
    let evaluator = match achievements {
        Some(path) => AchievementEvaluator::load_from_file(path)?,
        None => AchievementEvaluator::default(),
    };
    let store: Arc<dyn PersistenceStore> = match journal {
        Some(path) => Arc::new(JournalStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };
    Ok(Arc::new(Ledger::new(store, evaluator, retries)))
}

fn grade_report(outcome: &GradeOutcome, show_hidden: bool) -> Result<String> {
    let verdict = if show_hidden {
        outcome.verdict.clone()
    } else {
        outcome.verdict.learner_view()
    };
    let report = json!({
        "submission_id": outcome.submission.id,
        "exercise_id": outcome.submission.exercise_id,
        "status": verdict.overall_status,
        "hint": verdict.hint(),
        "passed": verdict.passed_cases(),
        "total": verdict.per_case.len(),
        "score": verdict.score_awarded,
        "verdict": verdict,
        "persistence": outcome.persistence,
        "update": outcome.update,
    });
    Ok(serde_json::to_string_pretty(&report)?)
}

/// Report an engine error as JSON and exit non-zero.
///
/// Infrastructure failures are shown with the sandbox-error status so
/// callers can tell them apart from anything the learner did.
fn fail(err: GradeError) -> Result<()> {
    let class = err.class();
    let status = match class {
        FailureClass::System => Some(VerdictStatus::SandboxError),
        _ => None,
    };
    let report = json!({
        "error": class,
        "status": status,
        "message": err.to_string(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    log::error!("{}", err);
    std::process::exit(match class {
        FailureClass::Configuration => 2,
        FailureClass::Cancelled => 130,
        FailureClass::System | FailureClass::Backpressure => 1,
    });
}

fn check_language_dependencies(verbose: bool) -> Result<()> {
    let mut report = Vec::new();
    let mut missing_languages = Vec::new();
    for (language, missing) in crate::judge::registry::missing_toolchains() {
        if missing.is_empty() {
            log::info!("{} toolchain OK", language);
        } else {
            log::warn!("{} toolchain missing: {}", language, missing.join(", "));
            missing_languages.push(language);
        }
        let mut entry = json!({ "language": language, "ok": missing.is_empty(), "missing": missing });
        if verbose {
            if let Ok(adapter) = crate::judge::registry::adapter_for(&LanguageId::new(language)) {
                let binaries: Vec<String> = adapter
                    .required_binaries()
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect();
                entry["binaries"] = json!(binaries);
            }
        }
        report.push(entry);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !missing_languages.is_empty() {
        log::error!("Missing toolchains: {}", missing_languages.join(", "));
        std::process::exit(1);
    }
    Ok(())
}
