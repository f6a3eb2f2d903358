//! Test-case model
//!
//! Authored exercise definitions as the engine sees them. Payloads are a
//! closed tagged union so comparison dispatch stays exhaustive.

use crate::config::types::{ExecutionLimits, GradeError, LanguageId, Result};
use serde::{Deserialize, Serialize};

/// Points awarded when an exercise omits its reward.
pub const DEFAULT_POINTS: u32 = 10;

/// Test-case input or expected output
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    /// Raw text, fed to stdin verbatim
    Text(String),
    /// Numeric sequence, one value per whitespace-separated token
    Numbers(Vec<f64>),
    /// Structured value rendered as compact JSON
    Structured(serde_json::Value),
}

/// Accepts either the tagged form or a bare string (shorthand for text).
#[derive(Deserialize)]
#[serde(untagged)]
enum PayloadRepr {
    Tagged(TaggedPayload),
    Plain(String),
}

#[derive(Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
enum TaggedPayload {
    Text(String),
    Numbers(Vec<f64>),
    Structured(serde_json::Value),
}

impl From<PayloadRepr> for Payload {
    fn from(repr: PayloadRepr) -> Self {
        match repr {
            PayloadRepr::Plain(text) => Payload::Text(text),
            PayloadRepr::Tagged(TaggedPayload::Text(text)) => Payload::Text(text),
            PayloadRepr::Tagged(TaggedPayload::Numbers(values)) => Payload::Numbers(values),
            PayloadRepr::Tagged(TaggedPayload::Structured(value)) => Payload::Structured(value),
        }
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        PayloadRepr::deserialize(deserializer).map(Payload::from)
    }
}

impl Payload {
    pub fn text(value: impl Into<String>) -> Self {
        Payload::Text(value.into())
    }

    /// Render as the bytes written to the program's stdin.
    pub fn to_stdin(&self) -> String {
        match self {
            Payload::Text(text) => text.clone(),
            Payload::Numbers(values) => {
                let joined = values
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("{}\n", joined)
            }
            Payload::Structured(value) => format!("{}\n", value),
        }
    }
}

/// How actual stdout is compared with the expected payload
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ComparisonMode {
    /// Byte-for-byte equality
    ExactText,
    /// Equality after collapsing whitespace runs and trimming ends
    #[default]
    NormalizedWhitespace,
    /// Structural equality after parsing both sides per the exercise data format
    DeepEqual,
    /// Numeric sequences of equal length, pairwise |a - b| <= epsilon
    Tolerance { epsilon: f64 },
}

/// Declared shape of structured program output, used by deep-equal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    /// One value per non-empty line; each line is JSON if it parses, else a string
    #[default]
    Lines,
    /// The whole output is a single JSON document
    Json,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: Payload,
    pub expected_output: Payload,
    #[serde(default)]
    pub comparison: ComparisonMode,
    /// Hidden cases run but their output is never shown to the learner
    #[serde(default)]
    pub hidden: bool,
}

impl TestCase {
    pub fn new(input: Payload, expected_output: Payload, comparison: ComparisonMode) -> Self {
        Self {
            input,
            expected_output,
            comparison,
            hidden: false,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// Per-exercise limit overrides
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOverrides {
    pub time_ms: Option<u64>,
    pub memory_mb: Option<u64>,
}

fn default_points() -> u32 {
    DEFAULT_POINTS
}

/// Immutable exercise definition owned by the content collaborator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
    pub id: String,
    #[serde(default)]
    pub lesson_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Falls back to the owning course's language when absent
    #[serde(default)]
    pub language: Option<LanguageId>,
    #[serde(default)]
    pub initial_code: Option<String>,
    /// Reference implementation; never shown to learners
    pub solution_code: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default = "default_points")]
    pub points: u32,
    #[serde(default)]
    pub data_format: DataFormat,
    #[serde(default)]
    pub limits: LimitOverrides,
}

impl Exercise {
    pub fn language(&self) -> Result<&LanguageId> {
        self.language.as_ref().ok_or_else(|| {
            GradeError::Configuration(format!("exercise {} declares no language", self.id))
        })
    }

    /// Reject definitions that cannot be graded honestly.
    pub fn validate(&self) -> Result<()> {
        if self.test_cases.is_empty() {
            return Err(GradeError::Configuration(format!(
                "exercise {} has no test cases",
                self.id
            )));
        }
        self.language()?;
        for (index, case) in self.test_cases.iter().enumerate() {
            if let ComparisonMode::Tolerance { epsilon } = case.comparison {
                if !epsilon.is_finite() || epsilon < 0.0 {
                    return Err(GradeError::Configuration(format!(
                        "exercise {} case {} has invalid tolerance {}",
                        self.id, index, epsilon
                    )));
                }
            }
        }
        Ok(())
    }

    /// Base limits with this exercise's overrides applied.
    pub fn effective_limits(&self, base: ExecutionLimits) -> ExecutionLimits {
        ExecutionLimits {
            time_ms: self.limits.time_ms.unwrap_or(base.time_ms),
            memory_mb: self.limits.memory_mb.unwrap_or(base.memory_mb),
        }
    }

    pub fn visible_case_count(&self) -> usize {
        self.test_cases.iter().filter(|c| !c.hidden).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(cases: Vec<TestCase>) -> Exercise {
        Exercise {
            id: "ex-1".to_string(),
            lesson_id: Some("lesson-1".to_string()),
            title: "Echo".to_string(),
            description: String::new(),
            language: Some(LanguageId::new("python")),
            initial_code: None,
            solution_code: "print(input())".to_string(),
            test_cases: cases,
            points: 10,
            data_format: DataFormat::Lines,
            limits: LimitOverrides::default(),
        }
    }

    #[test]
    fn test_empty_cases_rejected() {
        let ex = exercise(Vec::new());
        assert!(matches!(ex.validate(), Err(GradeError::Configuration(_))));
    }

    #[test]
    fn test_negative_tolerance_rejected() {
        let ex = exercise(vec![TestCase::new(
            Payload::text("1"),
            Payload::text("1"),
            ComparisonMode::Tolerance { epsilon: -1.0 },
        )]);
        assert!(ex.validate().is_err());
    }

    #[test]
    fn test_payload_shorthand_and_tagged_forms() {
        let case: TestCase = serde_json::from_str(
            r#"{
                "input": "4",
                "expected_output": { "type": "numbers", "value": [4.0] },
                "comparison": { "mode": "tolerance", "epsilon": 0.01 },
                "hidden": true
            }"#,
        )
        .unwrap();
        assert_eq!(case.input, Payload::text("4"));
        assert_eq!(case.expected_output, Payload::Numbers(vec![4.0]));
        assert_eq!(case.comparison, ComparisonMode::Tolerance { epsilon: 0.01 });
        assert!(case.hidden);
    }

    #[test]
    fn test_exercise_defaults() {
        let ex: Exercise = serde_json::from_str(
            r#"{ "id": "e", "solution_code": "x", "test_cases": [
                { "input": "", "expected_output": "" }
            ] }"#,
        )
        .unwrap();
        assert_eq!(ex.points, DEFAULT_POINTS);
        assert_eq!(ex.test_cases[0].comparison, ComparisonMode::NormalizedWhitespace);
        assert_eq!(ex.data_format, DataFormat::Lines);
        assert!(ex.language().is_err());
    }

    #[test]
    fn test_stdin_rendering() {
        assert_eq!(Payload::text("a b").to_stdin(), "a b");
        assert_eq!(Payload::Numbers(vec![1.0, 2.5]).to_stdin(), "1 2.5\n");
        assert_eq!(
            Payload::Structured(serde_json::json!({"a": 1})).to_stdin(),
            "{\"a\":1}\n"
        );
    }

    #[test]
    fn test_effective_limits() {
        let mut ex = exercise(Vec::new());
        ex.limits.time_ms = Some(1000);
        let limits = ex.effective_limits(ExecutionLimits::default());
        assert_eq!(limits.time_ms, 1000);
        assert_eq!(limits.memory_mb, 256);
    }
}
