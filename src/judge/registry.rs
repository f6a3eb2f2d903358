use crate::config::types::{GradeError, LanguageId, Result};
use crate::judge::adapter::JudgeAdapter;
use crate::judge::languages::{
    cpp::CppAdapter, java::JavaAdapter, javascript::JavaScriptAdapter, python::PythonAdapter,
    shell::ShellAdapter,
};

/// Canonical names of every language with an adapter
pub const SUPPORTED_LANGUAGES: [&str; 5] = ["python", "javascript", "cpp", "java", "sh"];

pub fn adapter_for(language: &LanguageId) -> Result<Box<dyn JudgeAdapter>> {
    match language.as_str() {
        "python" => Ok(Box::new(PythonAdapter)),
        "cpp" | "c" => Ok(Box::new(CppAdapter)),
        "java" => Ok(Box::new(JavaAdapter)),
        "javascript" => Ok(Box::new(JavaScriptAdapter)),
        "sh" => Ok(Box::new(ShellAdapter)),
        other => Err(GradeError::UnsupportedLanguage(other.to_string())),
    }
}

/// Host toolchain availability per language: (language, missing binaries)
pub fn missing_toolchains() -> Vec<(&'static str, Vec<String>)> {
    SUPPORTED_LANGUAGES
        .iter()
        .filter_map(|name| adapter_for(&LanguageId::new(name)).ok())
        .map(|adapter| {
            let missing = adapter
                .required_binaries()
                .into_iter()
                .filter(|path| !path.exists())
                .map(|path| path.to_string_lossy().to_string())
                .collect();
            (adapter.language(), missing)
        })
        .collect()
}
