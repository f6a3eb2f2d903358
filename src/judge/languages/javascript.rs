use crate::config::types::ExecutionLimits;
use crate::judge::adapter::{binary_arg, locate_binary, path_arg, profile, ExecutionProfile, JudgeAdapter};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct JavaScriptAdapter;

impl JudgeAdapter for JavaScriptAdapter {
    fn language(&self) -> &'static str {
        "javascript"
    }

    fn source_file(&self, _code: &str) -> String {
        "solution.js".to_string()
    }

    fn compile_profile(&self, _workdir: &Path) -> Option<ExecutionProfile> {
        None
    }

    fn run_profile(&self, workdir: &Path, limits: &ExecutionLimits) -> ExecutionProfile {
        // V8 reserves far more address space than it touches, so no RLIMIT_AS.
        profile(
            vec![
                binary_arg("node"),
                format!("--max-old-space-size={}", limits.memory_mb),
                path_arg(workdir, "solution.js"),
            ],
            limits.time_ms,
            limits.memory_mb,
            None,
            64,
            128,
        )
    }

    fn required_binaries(&self) -> Vec<PathBuf> {
        vec![locate_binary("node")]
    }
}
