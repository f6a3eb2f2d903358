use crate::config::types::ExecutionLimits;
use crate::judge::adapter::{binary_arg, locate_binary, path_arg, profile, ExecutionProfile, JudgeAdapter};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct JavaAdapter;

/// Name of the first public class, which javac requires to match the file name.
fn detect_class_name(code: &str) -> String {
    for line in code.lines() {
        let trimmed = line.trim();
        let rest = trimmed
            .strip_prefix("public final class ")
            .or_else(|| trimmed.strip_prefix("public class "));
        if let Some(rest) = rest {
            let name = rest
                .split(|c: char| c.is_whitespace() || c == '{' || c == '<')
                .next()
                .unwrap_or("")
                .trim();
            if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return name.to_string();
            }
        }
    }
    "Main".to_string()
}

/// Recover the class name from the source file already in the workdir.
fn class_in_workdir(workdir: &Path) -> String {
    let Ok(entries) = std::fs::read_dir(workdir) else {
        return "Main".to_string();
    };
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .find(|path| path.extension().and_then(|e| e.to_str()) == Some("java"))
        .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().to_string()))
        .unwrap_or_else(|| "Main".to_string())
}

impl JudgeAdapter for JavaAdapter {
    fn language(&self) -> &'static str {
        "java"
    }

    fn source_file(&self, code: &str) -> String {
        format!("{}.java", detect_class_name(code))
    }

    fn compile_profile(&self, workdir: &Path) -> Option<ExecutionProfile> {
        let source = format!("{}.java", class_in_workdir(workdir));
        let mut p = profile(
            vec![
                binary_arg("javac"),
                "-encoding".to_string(),
                "UTF-8".to_string(),
                "-d".to_string(),
                workdir.to_string_lossy().to_string(),
                path_arg(workdir, &source),
            ],
            45_000,
            1024,
            None,
            320,
            256,
        );
        p.environment
            .push(("JAVA_TOOL_OPTIONS".to_string(), "-Xss8m".to_string()));
        Some(p)
    }

    fn run_profile(&self, workdir: &Path, limits: &ExecutionLimits) -> ExecutionProfile {
        profile(
            vec![
                binary_arg("java"),
                format!("-Xmx{}m", limits.memory_mb),
                "-Xss8m".to_string(),
                "-XX:+UseSerialGC".to_string(),
                "-Dfile.encoding=UTF-8".to_string(),
                "-cp".to_string(),
                workdir.to_string_lossy().to_string(),
                class_in_workdir(workdir),
            ],
            limits.time_ms,
            limits.memory_mb,
            None,
            256,
            256,
        )
    }

    fn required_binaries(&self) -> Vec<PathBuf> {
        vec![locate_binary("javac"), locate_binary("java")]
    }
}
