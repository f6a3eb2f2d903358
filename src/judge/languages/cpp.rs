use crate::config::types::ExecutionLimits;
use crate::judge::adapter::{binary_arg, locate_binary, path_arg, profile, ExecutionProfile, JudgeAdapter};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct CppAdapter;

impl JudgeAdapter for CppAdapter {
    fn language(&self) -> &'static str {
        "cpp"
    }

    fn source_file(&self, _code: &str) -> String {
        "solution.cpp".to_string()
    }

    fn compile_profile(&self, workdir: &Path) -> Option<ExecutionProfile> {
        // Compile needs more processes (cc1plus/as/ld) and memory than the run envelope.
        Some(profile(
            vec![
                binary_arg("g++"),
                "-std=c++17".to_string(),
                "-O2".to_string(),
                "-pipe".to_string(),
                "-o".to_string(),
                path_arg(workdir, "solution"),
                path_arg(workdir, "solution.cpp"),
            ],
            30_000,
            768,
            None,
            64,
            128,
        ))
    }

    fn run_profile(&self, workdir: &Path, limits: &ExecutionLimits) -> ExecutionProfile {
        profile(
            vec![path_arg(workdir, "solution")],
            limits.time_ms,
            limits.memory_mb,
            Some(2),
            1,
            64,
        )
    }

    fn required_binaries(&self) -> Vec<PathBuf> {
        vec![locate_binary("g++")]
    }
}
