/// Process-based sandbox backend
///
/// Each launch runs in its own session inside a pooled slot directory. A
/// watchdog polls the child for exit, wall-clock overrun, resident memory
/// and cancellation; any violation kills the whole process group. The group
/// is killed again after every run so no descendant outlives it.
use crate::config::loader::{GradeboxConfig, SandboxSettings};
use crate::config::types::{
    ExecutionLimits, ExecutionResult, ExitStatus, GradeError, LanguageId, Result,
};
use crate::judge::{adapter_for, ExecutionProfile, JudgeAdapter};
use crate::sandbox::cancel::CancelToken;
use crate::sandbox::hygiene::{sandbox_environment, Confinement, PreExecPlan};
use crate::sandbox::output::{OutputCollector, OutputLimits};
use crate::sandbox::pool::{SlotGuard, SlotPool};
use crate::sandbox::workspace::{copy_tree, io_error, sanitize_diagnostics, BuildDir};
use crate::sandbox::{CompileFailure, Prepared, Program, Sandbox};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const OUTPUT_COLLECTION_TIMEOUT_MS: u64 = 2000;

/// Why the watchdog stopped waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    Exited,
    WallClock,
    Memory,
    Cancelled,
}

struct Reaped {
    raw_status: libc::c_int,
    rusage: libc::rusage,
}

pub struct ProcessSandbox {
    settings: SandboxSettings,
    disabled: Vec<LanguageId>,
    pool: SlotPool,
    builds_dir: PathBuf,
}

impl ProcessSandbox {
    pub fn new(config: &GradeboxConfig) -> Result<Self> {
        let settings = config.sandbox.clone();
        if settings.strict && unsafe { libc::geteuid() } != 0 {
            return Err(GradeError::Configuration(
                "strict sandbox mode requires root privileges".to_string(),
            ));
        }
        if !settings.strict {
            log::warn!(
                "Sandbox running without namespaces or privilege drop; not safe for untrusted code"
            );
        }

        fs::create_dir_all(&settings.root_dir)
            .map_err(|e| io_error("create", &settings.root_dir, e))?;
        let builds_dir = settings.root_dir.join("builds");
        fs::create_dir_all(&builds_dir).map_err(|e| io_error("create", &builds_dir, e))?;
        fs::set_permissions(&builds_dir, fs::Permissions::from_mode(0o700))
            .map_err(|e| io_error("chmod", &builds_dir, e))?;

        let pool = SlotPool::new(&settings.root_dir, settings.slots, settings.strict)?;

        let disabled = config
            .languages
            .iter()
            .filter(|(_, lang)| !lang.enabled)
            .map(|(name, _)| LanguageId::new(name))
            .collect();

        Ok(Self {
            settings,
            disabled,
            pool,
            builds_dir,
        })
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    pub fn slots_available(&self) -> usize {
        self.pool.available()
    }

    fn adapter(&self, language: &LanguageId) -> Result<Box<dyn JudgeAdapter>> {
        if self.disabled.contains(language) {
            return Err(GradeError::UnsupportedLanguage(format!(
                "{} (disabled by configuration)",
                language
            )));
        }
        adapter_for(language)
    }

    fn output_limits(&self) -> OutputLimits {
        OutputLimits {
            stdout_limit: self.settings.stdout_limit_bytes,
            stderr_limit: self.settings.stderr_limit_bytes,
            collection_timeout_ms: OUTPUT_COLLECTION_TIMEOUT_MS,
        }
    }

    /// Strict-mode confinement to `slot`; None in dev mode
    fn confinement<'a>(&'a self, slot: &'a SlotGuard<'_>) -> Option<Confinement<'a>> {
        let identity = slot.owner()?;
        Some(Confinement {
            hidden_paths: &self.settings.hidden_paths,
            scratch_root: &self.settings.root_dir,
            workdir: slot.workdir(),
            identity,
        })
    }

    /// Spawn one profile in the slot and supervise it to completion.
    fn launch(
        &self,
        profile: &ExecutionProfile,
        slot: &SlotGuard<'_>,
        stdin: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult> {
        let program = profile
            .command
            .first()
            .ok_or_else(|| GradeError::Configuration("empty command".to_string()))?;
        let workdir = slot.workdir();
        let plan = PreExecPlan::new(profile, self.confinement(slot))?;

        let mut cmd = Command::new(program);
        cmd.args(&profile.command[1..])
            .current_dir(workdir)
            .env_clear()
            .envs(sandbox_environment(workdir, &profile.environment))
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        unsafe {
            cmd.pre_exec(move || plan.apply());
        }

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| GradeError::Sandbox(format!("spawn {}: {}", program, e)))?;
        let pid = child.id() as i32;

        // Writer is detached: it ends with EPIPE once the group is killed.
        if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
            let data = data.as_bytes().to_vec();
            thread::spawn(move || {
                let _ = pipe.write_all(&data);
            });
        }
        let pending = OutputCollector::new(self.output_limits())
            .start(child.stdout.take(), child.stderr.take());

        let watched = self.watch(pid, profile, started, cancel);
        let duration_ms = started.elapsed().as_millis() as u64;
        kill_group(pid);
        if watched.is_err() {
            let _ = child.kill();
            let _ = child.wait();
        }
        let output = pending.finish();
        let (reaped, termination, polled_peak_kb) = watched?;

        if termination == Termination::Cancelled {
            log::debug!("pid {} killed on cancellation", pid);
            return Err(GradeError::Cancelled);
        }

        let exit_status = decode_status(pid, reaped.raw_status)?;
        let cpu_secs = (reaped.rusage.ru_utime.tv_sec + reaped.rusage.ru_stime.tv_sec) as u64;
        let timed_out = termination == Termination::WallClock
            || exit_status == ExitStatus::Signaled(libc::SIGXCPU)
            || (exit_status == ExitStatus::Signaled(libc::SIGKILL)
                && cpu_secs >= profile.cpu_limit_secs());

        let peak_memory_kb = polled_peak_kb.max(reaped.rusage.ru_maxrss.max(0) as u64);
        let memory_exceeded = termination == Termination::Memory
            || (!timed_out && peak_memory_kb * 1024 > profile.memory_limit_bytes);

        let (stdout, stdout_truncated) = output.stdout.into_text();
        let (stderr, stderr_truncated) = output.stderr.into_text();

        log::debug!(
            "pid {} finished: {} in {}ms, peak {} KB{}{}",
            pid,
            exit_status,
            duration_ms,
            peak_memory_kb,
            if timed_out { ", timed out" } else { "" },
            if memory_exceeded { ", memory exceeded" } else { "" }
        );

        Ok(ExecutionResult {
            stdout,
            stderr,
            exit_status,
            duration_ms,
            timed_out,
            memory_exceeded,
            peak_memory_kb,
            stdout_truncated,
            stderr_truncated,
        })
    }

    fn watch(
        &self,
        pid: i32,
        profile: &ExecutionProfile,
        started: Instant,
        cancel: &CancelToken,
    ) -> Result<(Reaped, Termination, u64)> {
        let wall = Duration::from_millis(profile.wall_time_ms);
        let poll = Duration::from_millis(self.settings.poll_interval_ms.max(1));
        let mut peak_kb = 0u64;

        loop {
            if let Some(reaped) = reap(pid, false)? {
                return Ok((reaped, Termination::Exited, peak_kb));
            }
            if let Some(rss) = resident_kb(pid) {
                peak_kb = peak_kb.max(rss);
            }

            let termination = if cancel.is_cancelled() {
                Some(Termination::Cancelled)
            } else if started.elapsed() >= wall {
                Some(Termination::WallClock)
            } else if peak_kb * 1024 > profile.memory_limit_bytes {
                Some(Termination::Memory)
            } else {
                None
            };

            if let Some(termination) = termination {
                kill_group(pid);
                let reaped = reap(pid, true)?.ok_or_else(|| {
                    GradeError::Sandbox(format!("pid {} disappeared before reaping", pid))
                })?;
                return Ok((reaped, termination, peak_kb));
            }
            thread::sleep(poll);
        }
    }
}

impl Sandbox for ProcessSandbox {
    fn supports(&self, language: &LanguageId) -> bool {
        self.adapter(language).is_ok()
    }

    fn prepare(&self, language: &LanguageId, code: &str, cancel: &CancelToken) -> Result<Prepared> {
        cancel.check()?;
        let adapter = self.adapter(language)?;
        let slot = self.pool.acquire(cancel)?;
        let workdir = slot.workdir();

        let source_path = workdir.join(adapter.source_file(code));
        fs::write(&source_path, code).map_err(|e| io_error("write", &source_path, e))?;

        if let Some(profile) = adapter.compile_profile(workdir) {
            let result = self.launch(&profile, &slot, None, cancel)?;
            if !result.succeeded() {
                let raw = if result.stderr.trim().is_empty() {
                    &result.stdout
                } else {
                    &result.stderr
                };
                let mut diagnostics = sanitize_diagnostics(raw, &[workdir]);
                if result.timed_out {
                    diagnostics.push_str("\ncompilation timed out");
                } else if result.memory_exceeded {
                    diagnostics.push_str("\ncompilation exceeded the memory limit");
                }
                log::debug!(
                    "{} build failed after {}ms ({})",
                    language,
                    result.duration_ms,
                    result.exit_status
                );
                return Ok(Prepared::CompileFailed(CompileFailure {
                    diagnostics,
                    duration_ms: result.duration_ms,
                    timed_out: result.timed_out,
                }));
            }
        }

        let build = BuildDir::create(&self.builds_dir)?;
        copy_tree(workdir, build.path())?;
        Ok(Prepared::Ready(Program::built(language.clone(), code, build)))
    }

    fn run(
        &self,
        program: &Program,
        stdin: &str,
        limits: &ExecutionLimits,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult> {
        limits.validate()?;
        cancel.check()?;
        let adapter = self.adapter(program.language())?;
        let build = program.build_dir().ok_or_else(|| {
            GradeError::Sandbox("program was not prepared by this sandbox".to_string())
        })?;

        let slot = self.pool.acquire(cancel)?;
        copy_tree(build, slot.workdir())?;
        let profile = adapter.run_profile(slot.workdir(), limits);
        let mut result = self.launch(&profile, &slot, Some(stdin), cancel)?;
        result.stderr = sanitize_diagnostics(&result.stderr, &[slot.workdir(), build]);
        Ok(result)
    }
}

fn decode_status(pid: i32, raw_status: libc::c_int) -> Result<ExitStatus> {
    match WaitStatus::from_raw(Pid::from_raw(pid), raw_status) {
        Ok(WaitStatus::Exited(_, code)) => Ok(ExitStatus::Exited(code)),
        Ok(WaitStatus::Signaled(_, signal, _)) => Ok(ExitStatus::Signaled(signal as i32)),
        other => Err(GradeError::Sandbox(format!(
            "unexpected wait status for pid {}: {:?}",
            pid, other
        ))),
    }
}

fn reap(pid: i32, blocking: bool) -> Result<Option<Reaped>> {
    let options = if blocking { 0 } else { libc::WNOHANG };
    loop {
        let mut raw_status: libc::c_int = 0;
        let mut rusage: libc::rusage = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::wait4(pid, &mut raw_status, options, &mut rusage) };
        if rc == pid {
            return Ok(Some(Reaped { raw_status, rusage }));
        }
        if rc == 0 {
            return Ok(None);
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
            continue;
        }
        return Err(GradeError::Sandbox(format!("wait4({}): {}", pid, err)));
    }
}

/// Resident set size of a live process in KB
fn resident_kb(pid: i32) -> Option<u64> {
    let statm = fs::read_to_string(format!("/proc/{}/statm", pid)).ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some(pages * page_size as u64 / 1024)
}

fn kill_group(pid: i32) {
    let rc = unsafe { libc::kill(-pid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            log::warn!("Failed to kill process group {}: {}", pid, err);
        }
    }
}
