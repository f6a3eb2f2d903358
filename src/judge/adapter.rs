use crate::config::types::ExecutionLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directories searched for toolchain binaries, in order.
const BINARY_SEARCH_PATH: [&str; 3] = ["/usr/local/bin", "/usr/bin", "/bin"];

/// Fully resolved launch envelope consumed by the sandbox backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionProfile {
    pub command: Vec<String>,
    pub environment: Vec<(String, String)>,
    pub wall_time_ms: u64,
    /// Resident memory ceiling enforced by the watchdog
    pub memory_limit_bytes: u64,
    /// RLIMIT_AS backstop; None for runtimes that reserve large address space
    pub address_space_limit: Option<u64>,
    pub file_size_limit: u64,
    pub fd_limit: u64,
    /// RLIMIT_NPROC, only applied once the payload runs as its own uid
    pub process_limit: u32,
}

impl ExecutionProfile {
    /// CPU-second backstop derived from the wall limit
    pub fn cpu_limit_secs(&self) -> u64 {
        self.wall_time_ms.div_ceil(1000) + 1
    }
}

/// Judge adapter contract for language-specific compile/run stages.
pub trait JudgeAdapter: Send + Sync {
    fn language(&self) -> &'static str;

    /// File name the submitted code is written to
    fn source_file(&self, code: &str) -> String;

    /// Build step, if the language has one
    fn compile_profile(&self, workdir: &Path) -> Option<ExecutionProfile>;

    fn run_profile(&self, workdir: &Path, limits: &ExecutionLimits) -> ExecutionProfile;

    /// Binaries that must exist on the host for this adapter to work
    fn required_binaries(&self) -> Vec<PathBuf>;

    fn is_compiled(&self) -> bool {
        self.compile_profile(Path::new(".")).is_some()
    }
}

/// Locate a toolchain binary on the fixed search path.
pub fn locate_binary(name: &str) -> PathBuf {
    BINARY_SEARCH_PATH
        .iter()
        .map(|dir| Path::new(dir).join(name))
        .find(|candidate| candidate.exists())
        .unwrap_or_else(|| Path::new("/usr/bin").join(name))
}

pub(crate) fn binary_arg(name: &str) -> String {
    locate_binary(name).to_string_lossy().to_string()
}

pub(crate) fn path_arg(workdir: &Path, file: &str) -> String {
    workdir.join(file).to_string_lossy().to_string()
}

/// Shared builder so every language starts from the same envelope.
pub(crate) fn profile(
    command: Vec<String>,
    wall_time_ms: u64,
    memory_mb: u64,
    address_space_factor: Option<u64>,
    process_limit: u32,
    fd_limit: u64,
) -> ExecutionProfile {
    let memory_limit_bytes = memory_mb * 1024 * 1024;
    ExecutionProfile {
        command,
        environment: Vec::new(),
        wall_time_ms,
        memory_limit_bytes,
        address_space_limit: address_space_factor.map(|factor| memory_limit_bytes * factor),
        file_size_limit: 16 * 1024 * 1024,
        fd_limit,
        process_limit,
    }
}
