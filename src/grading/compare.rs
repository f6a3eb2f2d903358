/// Output comparison per test-case mode
///
/// Comparison never errors: anything that cannot be parsed in the mode's
/// terms is a mismatch.
use crate::model::exercise::{ComparisonMode, DataFormat, Payload};
use serde_json::Value;

pub fn outputs_match(
    actual: &str,
    expected: &Payload,
    mode: ComparisonMode,
    format: DataFormat,
) -> bool {
    match mode {
        ComparisonMode::ExactText => actual == expected.to_stdin(),
        ComparisonMode::NormalizedWhitespace => {
            normalize_whitespace(actual) == normalize_whitespace(&expected.to_stdin())
        }
        ComparisonMode::DeepEqual => deep_equal(actual, expected, format),
        ComparisonMode::Tolerance { epsilon } => within_tolerance(actual, expected, epsilon),
    }
}

/// Collapse whitespace runs to one space and trim both ends
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn deep_equal(actual: &str, expected: &Payload, format: DataFormat) -> bool {
    let Some(actual) = parse_output(actual, format) else {
        return false;
    };
    let expected = match (expected, format) {
        (Payload::Text(text), _) => match parse_output(text, format) {
            Some(value) => value,
            None => return false,
        },
        (Payload::Numbers(values), _) => Value::Array(values.iter().map(|v| number(*v)).collect()),
        (Payload::Structured(value), DataFormat::Json) => value.clone(),
        (Payload::Structured(Value::Array(items)), DataFormat::Lines) => {
            Value::Array(items.clone())
        }
        (Payload::Structured(value), DataFormat::Lines) => Value::Array(vec![value.clone()]),
    };
    values_equal(&actual, &expected)
}

fn number(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Parse program output in the declared data format
fn parse_output(text: &str, format: DataFormat) -> Option<Value> {
    match format {
        DataFormat::Json => serde_json::from_str(text.trim()).ok(),
        DataFormat::Lines => Some(Value::Array(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| {
                    serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.to_string()))
                })
                .collect(),
        )),
    }
}

/// Structural equality; numbers compare by value so 2 and 2.0 match.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

fn parse_numbers(text: &str) -> Option<Vec<f64>> {
    text.split_whitespace()
        .map(|token| token.parse::<f64>().ok())
        .collect()
}

fn expected_numbers(expected: &Payload) -> Option<Vec<f64>> {
    match expected {
        Payload::Numbers(values) => Some(values.clone()),
        Payload::Text(text) => parse_numbers(text),
        Payload::Structured(Value::Array(items)) => items.iter().map(Value::as_f64).collect(),
        Payload::Structured(value) => value.as_f64().map(|v| vec![v]),
    }
}

fn within_tolerance(actual: &str, expected: &Payload, epsilon: f64) -> bool {
    let (Some(actual), Some(expected)) = (parse_numbers(actual), expected_numbers(expected)) else {
        return false;
    };
    actual.len() == expected.len()
        && actual
            .iter()
            .zip(&expected)
            .all(|(a, e)| (a - e).abs() <= epsilon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(s: &str) -> Payload {
        Payload::text(s)
    }

    #[test]
    fn test_tolerance_vs_exact() {
        let expected = text("3.14160");
        assert!(outputs_match(
            "3.14159",
            &expected,
            ComparisonMode::Tolerance { epsilon: 0.001 },
            DataFormat::Lines
        ));
        assert!(!outputs_match(
            "3.14159",
            &expected,
            ComparisonMode::ExactText,
            DataFormat::Lines
        ));
    }

    #[test]
    fn test_exact_is_byte_for_byte() {
        assert!(outputs_match("4\n", &text("4\n"), ComparisonMode::ExactText, DataFormat::Lines));
        assert!(!outputs_match("4\n", &text("4"), ComparisonMode::ExactText, DataFormat::Lines));
    }

    #[test]
    fn test_normalized_whitespace() {
        assert!(outputs_match(
            "  hello \t world\n\n",
            &text("hello world"),
            ComparisonMode::NormalizedWhitespace,
            DataFormat::Lines
        ));
        assert!(!outputs_match(
            "helloworld",
            &text("hello world"),
            ComparisonMode::NormalizedWhitespace,
            DataFormat::Lines
        ));
    }

    #[test]
    fn test_deep_equal_lines() {
        let expected = Payload::Structured(json!([1, "two", [3, 4]]));
        assert!(outputs_match(
            "1\ntwo\n[3, 4]\n",
            &expected,
            ComparisonMode::DeepEqual,
            DataFormat::Lines
        ));
        assert!(outputs_match(
            "1.0\n\"two\"\n[3,4.0]",
            &expected,
            ComparisonMode::DeepEqual,
            DataFormat::Lines
        ));
        assert!(!outputs_match(
            "1\ntwo\n",
            &expected,
            ComparisonMode::DeepEqual,
            DataFormat::Lines
        ));
    }

    #[test]
    fn test_deep_equal_json_document() {
        let expected = Payload::Structured(json!({"a": 1, "b": [true, null]}));
        assert!(outputs_match(
            "{ \"b\": [true, null], \"a\": 1.0 }\n",
            &expected,
            ComparisonMode::DeepEqual,
            DataFormat::Json
        ));
    }

    #[test]
    fn test_deep_equal_parse_failure_is_mismatch() {
        let expected = Payload::Structured(json!({"a": 1}));
        assert!(!outputs_match(
            "{not json",
            &expected,
            ComparisonMode::DeepEqual,
            DataFormat::Json
        ));
    }

    #[test]
    fn test_tolerance_length_and_garbage() {
        let mode = ComparisonMode::Tolerance { epsilon: 0.01 };
        let expected = Payload::Numbers(vec![1.0, 2.0]);
        assert!(outputs_match("1.001 1.999\n", &expected, mode, DataFormat::Lines));
        assert!(!outputs_match("1.0", &expected, mode, DataFormat::Lines));
        assert!(!outputs_match("1.0 abc", &expected, mode, DataFormat::Lines));
        assert!(!outputs_match("NaN 2.0", &expected, mode, DataFormat::Lines));
    }

    #[test]
    fn test_numbers_expected_renders_for_text_modes() {
        let expected = Payload::Numbers(vec![1.0, 2.5]);
        assert!(outputs_match(
            "1 2.5",
            &expected,
            ComparisonMode::NormalizedWhitespace,
            DataFormat::Lines
        ));
    }
}
