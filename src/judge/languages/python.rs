use crate::config::types::ExecutionLimits;
use crate::judge::adapter::{binary_arg, locate_binary, path_arg, profile, ExecutionProfile, JudgeAdapter};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct PythonAdapter;

impl JudgeAdapter for PythonAdapter {
    fn language(&self) -> &'static str {
        "python"
    }

    fn source_file(&self, _code: &str) -> String {
        "solution.py".to_string()
    }

    fn compile_profile(&self, _workdir: &Path) -> Option<ExecutionProfile> {
        None
    }

    fn run_profile(&self, workdir: &Path, limits: &ExecutionLimits) -> ExecutionProfile {
        let mut p = profile(
            vec![
                binary_arg("python3"),
                "-B".to_string(),
                "-S".to_string(),
                "-u".to_string(),
                path_arg(workdir, "solution.py"),
            ],
            limits.time_ms,
            limits.memory_mb,
            Some(4),
            8,
            64,
        );
        p.environment
            .push(("PYTHONIOENCODING".to_string(), "utf-8".to_string()));
        p
    }

    fn required_binaries(&self) -> Vec<PathBuf> {
        vec![locate_binary("python3")]
    }
}
