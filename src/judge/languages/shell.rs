use crate::config::types::ExecutionLimits;
use crate::judge::adapter::{locate_binary, path_arg, profile, ExecutionProfile, JudgeAdapter};
use std::path::{Path, PathBuf};

/// POSIX shell scripts, run with /bin/sh.
#[derive(Debug, Clone, Default)]
pub struct ShellAdapter;

impl JudgeAdapter for ShellAdapter {
    fn language(&self) -> &'static str {
        "sh"
    }

    fn source_file(&self, _code: &str) -> String {
        "solution.sh".to_string()
    }

    fn compile_profile(&self, _workdir: &Path) -> Option<ExecutionProfile> {
        None
    }

    fn run_profile(&self, workdir: &Path, limits: &ExecutionLimits) -> ExecutionProfile {
        profile(
            vec![
                "/bin/sh".to_string(),
                path_arg(workdir, "solution.sh"),
            ],
            limits.time_ms,
            limits.memory_mb,
            Some(4),
            16,
            64,
        )
    }

    fn required_binaries(&self) -> Vec<PathBuf> {
        vec![locate_binary("sh")]
    }
}
