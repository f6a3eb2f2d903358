/// Configuration loading from gradebox.json
use crate::config::types::{ExecutionLimits, GradeError, LanguageId, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "GRADEBOX_CONFIG";
/// File looked up in the current directory when nothing else is given.
pub const DEFAULT_CONFIG_FILE: &str = "gradebox.json";

/// Sandbox backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Root under which slot and build directories are created
    pub root_dir: PathBuf,
    /// Require root and apply namespaces plus privilege drop
    pub strict: bool,
    /// Number of pooled scratch slots (max concurrent executions)
    pub slots: usize,
    pub stdout_limit_bytes: usize,
    pub stderr_limit_bytes: usize,
    /// Watchdog poll interval
    pub poll_interval_ms: u64,
    /// Host paths masked with an empty tmpfs in strict mode
    pub hidden_paths: Vec<PathBuf>,
}

impl SandboxSettings {
    /// Runtime root directory scoped by effective UID so root and non-root
    /// runs never share scratch space.
    pub fn default_root_dir() -> PathBuf {
        let euid = unsafe { libc::geteuid() };
        std::env::temp_dir().join(format!("gradebox-uid-{}", euid))
    }
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            root_dir: Self::default_root_dir(),
            strict: false,
            slots: 4,
            stdout_limit_bytes: 64 * 1024,
            stderr_limit_bytes: 16 * 1024,
            poll_interval_ms: 5,
            hidden_paths: ["/home", "/root", "/srv", "/mnt", "/media"]
                .iter()
                .map(PathBuf::from)
                .collect(),
        }
    }
}

/// Score policy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    #[default]
    AllOrNothing,
    Proportional,
}

/// Grading engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub default_time_ms: u64,
    pub default_memory_mb: u64,
    /// Parallel test-case executions for one submission
    pub per_submission_concurrency: usize,
    /// Grade requests allowed in flight at once across all callers
    pub global_concurrency: usize,
    /// Waiters allowed in the admission queue before backpressure
    pub queue_depth: usize,
    /// Extra attempts after a sandbox infrastructure failure
    pub sandbox_retries: u32,
    /// Extra attempts after a ledger write failure
    pub ledger_retries: u32,
    /// Bytes of actual output kept per case result
    pub display_output_bytes: usize,
    pub scoring: ScoringMode,
}

impl EngineSettings {
    pub fn default_limits(&self) -> ExecutionLimits {
        ExecutionLimits::new(self.default_time_ms, self.default_memory_mb)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_time_ms: crate::config::types::DEFAULT_TIME_MS,
            default_memory_mb: crate::config::types::DEFAULT_MEMORY_MB,
            per_submission_concurrency: 4,
            global_concurrency: 8,
            queue_depth: 64,
            sandbox_retries: 1,
            ledger_retries: 1,
            display_output_bytes: 4096,
            scoring: ScoringMode::AllOrNothing,
        }
    }
}

/// Per-language overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageSettings {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub time_ms: Option<u64>,
    pub memory_mb: Option<u64>,
}

fn enabled_by_default() -> bool {
    true
}

/// Full gradebox.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GradeboxConfig {
    pub sandbox: SandboxSettings,
    pub engine: EngineSettings,
    pub languages: HashMap<String, LanguageSettings>,
}

impl GradeboxConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GradeError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: GradeboxConfig = serde_json::from_str(&content).map_err(|e| {
            GradeError::Configuration(format!("Failed to parse config JSON: {}", e))
        })?;
        config.validate()?;

        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve configuration: explicit path, then $GRADEBOX_CONFIG, then
    /// ./gradebox.json, then built-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Self::load_from_file(path);
            }
        }

        let local = std::env::current_dir()?.join(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::load_from_file(local);
        }

        log::warn!("No {} found, using built-in defaults", DEFAULT_CONFIG_FILE);
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.default_limits().validate()?;
        if self.sandbox.slots == 0 {
            return Err(GradeError::Configuration(
                "sandbox.slots must be at least 1".to_string(),
            ));
        }
        if self.sandbox.stdout_limit_bytes == 0 || self.sandbox.stderr_limit_bytes == 0 {
            return Err(GradeError::Configuration(
                "sandbox output limits must be greater than zero".to_string(),
            ));
        }
        if self.engine.per_submission_concurrency == 0 || self.engine.global_concurrency == 0 {
            return Err(GradeError::Configuration(
                "engine concurrency limits must be at least 1".to_string(),
            ));
        }
        for (name, lang) in &self.languages {
            if lang.time_ms == Some(0) || lang.memory_mb == Some(0) {
                return Err(GradeError::Configuration(format!(
                    "language '{}' has a zero limit override",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Get language-specific settings
    pub fn language(&self, language: &LanguageId) -> Option<&LanguageSettings> {
        self.languages
            .iter()
            .find(|(name, _)| LanguageId::new(name) == *language)
            .map(|(_, settings)| settings)
    }

    pub fn language_enabled(&self, language: &LanguageId) -> bool {
        self.language(language).map(|l| l.enabled).unwrap_or(true)
    }

    /// Limits for a language: engine defaults with language overrides applied.
    pub fn limits_for(&self, language: &LanguageId) -> ExecutionLimits {
        let mut limits = self.engine.default_limits();
        if let Some(lang) = self.language(language) {
            if let Some(time_ms) = lang.time_ms {
                limits.time_ms = time_ms;
            }
            if let Some(memory_mb) = lang.memory_mb {
                limits.memory_mb = memory_mb;
            }
        }
        limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GradeboxConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.default_time_ms, 5000);
        assert_eq!(config.engine.default_memory_mb, 256);
        assert!(!config.sandbox.strict);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{
            "engine": { "global_concurrency": 2 },
            "languages": { "Java": { "memory_mb": 512 } }
        }"#;
        let config: GradeboxConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.engine.global_concurrency, 2);
        assert_eq!(config.engine.queue_depth, 64);
        assert_eq!(config.sandbox.slots, 4);

        let java = config.limits_for(&LanguageId::new("java"));
        assert_eq!(java.memory_mb, 512);
        assert_eq!(java.time_ms, 5000);
        assert!(config.language_enabled(&LanguageId::new("java")));
    }

    #[test]
    fn test_zero_slots_rejected() {
        let mut config = GradeboxConfig::default();
        config.sandbox.slots = 0;
        assert!(matches!(
            config.validate(),
            Err(GradeError::Configuration(_))
        ));
    }

    #[test]
    fn test_load_from_missing_file() {
        let result = GradeboxConfig::load_from_file("/nonexistent/gradebox.json");
        assert!(matches!(result, Err(GradeError::Configuration(_))));
    }
}
