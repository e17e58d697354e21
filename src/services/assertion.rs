//! Scores an HTTP response against a case's assertion rules.

use regex::Regex;
use serde_json::Value;

use crate::models::{AssertionResult, AssertionRule, HttpResponse, TestResultStatus};
use crate::services::jsonpath::JsonPath;

/// Assertion rule types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    StatusCode,
    ResponseTime,
    JsonPath,
    Regex,
    Contains,
    Equals,
}

impl RuleType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "status_code" => Some(Self::StatusCode),
            "response_time" => Some(Self::ResponseTime),
            "json_path" => Some(Self::JsonPath),
            "regex" => Some(Self::Regex),
            "contains" => Some(Self::Contains),
            "equals" => Some(Self::Equals),
            _ => None,
        }
    }

    pub fn operators(&self) -> &'static [&'static str] {
        match self {
            Self::StatusCode => &["eq", "ne", "in"],
            Self::ResponseTime => &["lt", "lte", "gt", "gte"],
            Self::JsonPath => &["eq", "ne", "contains", "gt", "lt", "gte", "lte", "exists"],
            Self::Regex => &["matches"],
            Self::Contains => &["contains", "not_contains"],
            Self::Equals => &["eq"],
        }
    }
}

/// Outcome of a well-formed rule
struct Verdict {
    passed: bool,
    actual: Option<Value>,
    detail: Option<String>,
}

impl Verdict {
    fn of(passed: bool, actual: Value) -> Self {
        Self {
            passed,
            actual: Some(actual),
            detail: None,
        }
    }

    fn failed(actual: Option<Value>, detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            actual,
            detail: Some(detail.into()),
        }
    }
}

/// `Err` carries why the rule itself is malformed
type RuleOutcome = Result<Verdict, String>;

#[derive(Debug, Clone, Copy, Default)]
pub struct AssertionEvaluator;

impl AssertionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate every rule in order; a bad rule never stops the others
    pub fn evaluate(&self, response: &HttpResponse, rules: &[AssertionRule]) -> Vec<AssertionResult> {
        rules
            .iter()
            .map(|rule| self.evaluate_rule(response, rule))
            .collect()
    }

    pub fn evaluate_rule(&self, response: &HttpResponse, rule: &AssertionRule) -> AssertionResult {
        let label = rule.label();

        match self.check(response, rule) {
            Ok(verdict) => {
                let detail = match (verdict.passed, verdict.detail) {
                    (_, Some(detail)) => detail,
                    (true, None) => format!("{}: ok", label),
                    (false, None) => format!(
                        "{}: expected {} {}, actual {}",
                        label,
                        rule.operator,
                        text_of(&rule.expected),
                        verdict
                            .actual
                            .as_ref()
                            .map(text_of)
                            .unwrap_or_else(|| "none".to_string())
                    ),
                };
                if !verdict.passed {
                    tracing::debug!(rule = %label, "Assertion failed");
                }
                AssertionResult {
                    rule: rule.clone(),
                    passed: verdict.passed,
                    actual: verdict.actual,
                    detail,
                    malformed: false,
                }
            }
            Err(reason) => AssertionResult {
                rule: rule.clone(),
                passed: false,
                actual: None,
                detail: format!("{}: invalid rule: {}", label, reason),
                malformed: true,
            },
        }
    }

    fn check(&self, response: &HttpResponse, rule: &AssertionRule) -> RuleOutcome {
        let rule_type = RuleType::parse(&rule.rule_type)
            .ok_or_else(|| format!("unknown assertion type '{}'", rule.rule_type))?;
        let operator = rule.operator.as_str();
        if !rule_type.operators().contains(&operator) {
            return Err(format!(
                "operator '{}' is not supported for {}",
                operator, rule.rule_type
            ));
        }

        match rule_type {
            RuleType::StatusCode => {
                let actual = Value::from(response.status);
                let passed = match operator {
                    "in" => {
                        let allowed = rule
                            .expected
                            .as_array()
                            .ok_or("'in' expects an array of status codes")?;
                        allowed.iter().any(|code| loose_eq(&actual, code))
                    }
                    _ => compare(operator, &actual, &rule.expected)?,
                };
                Ok(Verdict::of(passed, actual))
            }
            RuleType::ResponseTime => {
                let actual = Value::from(response.elapsed_ms);
                Ok(Verdict::of(compare(operator, &actual, &rule.expected)?, actual))
            }
            RuleType::JsonPath => {
                let field = rule
                    .field
                    .as_deref()
                    .ok_or("json_path rule requires a field")?;
                let path = JsonPath::parse(field).map_err(|e| e.to_string())?;

                match path.find(&response.body) {
                    None if operator == "exists" => {
                        let want = expects_existence(&rule.expected)?;
                        Ok(Verdict::of(!want, Value::Bool(false)))
                    }
                    None => Ok(Verdict::failed(None, "path not found")),
                    Some(_) if operator == "exists" => {
                        let want = expects_existence(&rule.expected)?;
                        Ok(Verdict::of(want, Value::Bool(true)))
                    }
                    Some(actual) => Ok(Verdict::of(
                        compare(operator, actual, &rule.expected)?,
                        actual.clone(),
                    )),
                }
            }
            RuleType::Regex => {
                let pattern = rule
                    .expected
                    .as_str()
                    .ok_or("regex rule expects a string pattern")?;
                let regex = Regex::new(pattern).map_err(|e| format!("invalid pattern: {}", e))?;

                let subject = match self.target(response, rule)? {
                    Some(Target::Text(text)) => text,
                    Some(Target::Json(value)) => text_of(&value),
                    None => return Ok(Verdict::failed(None, "path not found")),
                };
                Ok(Verdict::of(regex.is_match(&subject), Value::String(subject)))
            }
            RuleType::Contains => {
                let found = match self.target(response, rule)? {
                    Some(Target::Text(text)) => {
                        let hit = text.contains(&text_of(&rule.expected));
                        (hit, Value::String(text))
                    }
                    Some(Target::Json(value)) => (contains(&value, &rule.expected), value),
                    None => return Ok(Verdict::failed(None, "path not found")),
                };
                let passed = match operator {
                    "not_contains" => !found.0,
                    _ => found.0,
                };
                Ok(Verdict::of(passed, found.1))
            }
            RuleType::Equals => {
                let actual = match rule.field.as_deref() {
                    Some(field) => {
                        let path = JsonPath::parse(field).map_err(|e| e.to_string())?;
                        match path.find(&response.body) {
                            Some(value) => value.clone(),
                            None => return Ok(Verdict::failed(None, "path not found")),
                        }
                    }
                    None => response.body.clone(),
                };
                Ok(Verdict::of(loose_eq(&actual, &rule.expected), actual))
            }
        }
    }

    /// What a regex/contains rule looks at: a field, or the whole body
    fn target(&self, response: &HttpResponse, rule: &AssertionRule) -> Result<Option<Target>, String> {
        match rule.field.as_deref() {
            Some(field) => {
                let path = JsonPath::parse(field).map_err(|e| e.to_string())?;
                Ok(path.find(&response.body).map(|value| match value {
                    Value::String(text) => Target::Text(text.clone()),
                    other => Target::Json(other.clone()),
                }))
            }
            // Structured expectations match against the parsed body
            None if rule.expected.is_object() || rule.expected.is_array() => {
                Ok(Some(Target::Json(response.body.clone())))
            }
            None => Ok(Some(Target::Text(response.text.clone()))),
        }
    }
}

enum Target {
    Text(String),
    Json(Value),
}

/// Case status from its assertion results; an empty list passes
pub fn case_status(results: &[AssertionResult]) -> TestResultStatus {
    if results.iter().any(|r| r.malformed) {
        TestResultStatus::Error
    } else if results.iter().all(|r| r.passed) {
        TestResultStatus::Pass
    } else {
        TestResultStatus::Fail
    }
}

fn compare(operator: &str, actual: &Value, expected: &Value) -> Result<bool, String> {
    match operator {
        "eq" => Ok(loose_eq(actual, expected)),
        "ne" => Ok(!loose_eq(actual, expected)),
        "contains" => Ok(contains(actual, expected)),
        "gt" | "lt" | "gte" | "lte" => {
            let expected = as_number(expected)
                .ok_or_else(|| format!("'{}' expects a number, got {}", operator, expected))?;
            let Some(actual) = as_number(actual) else {
                return Ok(false);
            };
            Ok(match operator {
                "gt" => actual > expected,
                "lt" => actual < expected,
                "gte" => actual >= expected,
                _ => actual <= expected,
            })
        }
        other => Err(format!("unknown operator '{}'", other)),
    }
}

/// Equality that tolerates `200` vs `"200"` and `1` vs `1.0`
fn loose_eq(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (actual, expected) {
        (Value::Array(_), _) | (Value::Object(_), _) | (_, Value::Array(_)) | (_, Value::Object(_)) => {
            false
        }
        _ => match (as_number(actual), as_number(expected)) {
            (Some(a), Some(b)) => a == b,
            _ => text_of(actual) == text_of(expected),
        },
    }
}

/// Substring for text, membership for arrays, sub-structure for objects
fn contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(text), _) => text.contains(&text_of(expected)),
        (Value::Array(items), Value::Array(_)) => json_contains(actual, expected)
            || items.iter().any(|item| loose_eq(item, expected)),
        (Value::Array(items), _) => items
            .iter()
            .any(|item| loose_eq(item, expected) || json_contains(item, expected)),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        (Value::Object(_), Value::Object(_)) => json_contains(actual, expected),
        _ => text_of(actual).contains(&text_of(expected)),
    }
}

/// Whether every field of `expected` is present, recursively, in `actual`
fn json_contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Object(actual_obj), Value::Object(expected_obj)) => {
            expected_obj.iter().all(|(key, expected_value)| {
                actual_obj
                    .get(key)
                    .map(|actual_value| json_contains(actual_value, expected_value))
                    .unwrap_or(false)
            })
        }
        (Value::Array(actual_arr), Value::Array(expected_arr)) => {
            expected_arr.iter().all(|expected_item| {
                actual_arr
                    .iter()
                    .any(|actual_item| json_contains(actual_item, expected_item))
            })
        }
        _ => loose_eq(actual, expected),
    }
}

fn expects_existence(expected: &Value) -> Result<bool, String> {
    match expected {
        Value::Null => Ok(true),
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "true" => Ok(true),
        Value::String(s) if s == "false" => Ok(false),
        other => Err(format!("'exists' expects true or false, got {}", other)),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn response(status: u16, body: Value) -> HttpResponse {
        HttpResponse {
            status,
            headers: BTreeMap::new(),
            text: body.to_string(),
            body,
            elapsed_ms: 120,
        }
    }

    fn eval(response: &HttpResponse, rule: AssertionRule) -> AssertionResult {
        AssertionEvaluator::new().evaluate_rule(response, &rule)
    }

    #[test]
    fn test_status_code_eq() {
        let rule = AssertionRule::new("status_code", "eq", json!(200));

        let ok = eval(&response(200, json!({})), rule.clone());
        assert!(ok.passed);

        let bad = eval(&response(404, json!({})), rule);
        assert!(!bad.passed);
        assert!(!bad.malformed);
        assert_eq!(bad.actual, Some(json!(404)));
        assert!(bad.detail.contains("expected eq 200"), "{}", bad.detail);
        assert!(bad.detail.contains("actual 404"), "{}", bad.detail);
    }

    #[test]
    fn test_status_code_in_and_ne() {
        let resp = response(201, json!({}));
        assert!(eval(&resp, AssertionRule::new("status_code", "in", json!([200, 201]))).passed);
        assert!(eval(&resp, AssertionRule::new("status_code", "ne", json!("500"))).passed);
        assert!(eval(&resp, AssertionRule::new("status_code", "in", json!(201))).malformed);
    }

    #[test]
    fn test_response_time() {
        let resp = response(200, json!({}));
        assert!(eval(&resp, AssertionRule::new("response_time", "lt", json!(500))).passed);
        assert!(!eval(&resp, AssertionRule::new("response_time", "gte", json!(500))).passed);
        assert!(eval(&resp, AssertionRule::new("response_time", "eq", json!(120))).malformed);
    }

    #[test]
    fn test_json_path_operators() {
        let resp = response(
            200,
            json!({"name": "a", "count": 5, "tags": ["x", "y"], "user": {"id": 7}}),
        );
        let rule = |op: &str, field: &str, expected: Value| {
            AssertionRule::new("json_path", op, expected).with_field(field)
        };

        assert!(eval(&resp, rule("eq", "$.name", json!("a"))).passed);
        assert!(eval(&resp, rule("ne", "$.name", json!("b"))).passed);
        assert!(eval(&resp, rule("eq", "$.count", json!("5"))).passed);
        assert!(eval(&resp, rule("gt", "$.count", json!(4))).passed);
        assert!(eval(&resp, rule("lte", "$.count", json!(5))).passed);
        assert!(!eval(&resp, rule("lt", "$.count", json!(5))).passed);
        assert!(eval(&resp, rule("contains", "$.tags", json!("y"))).passed);
        assert!(eval(&resp, rule("contains", "$.user", json!({"id": 7}))).passed);
        assert!(eval(&resp, rule("exists", "$.user.id", json!(true))).passed);
    }

    #[test]
    fn test_json_path_missing() {
        let resp = response(200, json!({"name": "a"}));

        let missing = eval(
            &resp,
            AssertionRule::new("json_path", "eq", json!("a")).with_field("$.nope"),
        );
        assert!(!missing.passed);
        assert!(!missing.malformed);
        assert_eq!(missing.detail, "path not found");

        let absent = eval(
            &resp,
            AssertionRule::new("json_path", "exists", json!(false)).with_field("$.nope"),
        );
        assert!(absent.passed);
    }

    #[test]
    fn test_regex_and_contains() {
        let resp = response(200, json!({"email": "user@example.com", "items": [{"id": 1}]}));

        assert!(eval(
            &resp,
            AssertionRule::new("regex", "matches", json!(r"^\w+@example\.com$")).with_field("$.email")
        )
        .passed);
        assert!(eval(&resp, AssertionRule::new("regex", "matches", json!("example"))).passed);
        assert!(eval(&resp, AssertionRule::new("regex", "matches", json!("("))).malformed);

        assert!(eval(&resp, AssertionRule::new("contains", "contains", json!("user@"))).passed);
        assert!(eval(
            &resp,
            AssertionRule::new("contains", "contains", json!({"items": [{"id": 1}]}))
        )
        .passed);
        assert!(eval(
            &resp,
            AssertionRule::new("contains", "not_contains", json!("admin"))
        )
        .passed);
    }

    #[test]
    fn test_equals() {
        let resp = response(200, json!({"a": {"b": [1, 2]}}));
        assert!(eval(&resp, AssertionRule::new("equals", "eq", json!({"a": {"b": [1, 2]}}))).passed);
        assert!(eval(
            &resp,
            AssertionRule::new("equals", "eq", json!([1, 2])).with_field("$.a.b")
        )
        .passed);
        assert!(!eval(&resp, AssertionRule::new("equals", "eq", json!({"a": {}}))).passed);
    }

    #[test]
    fn test_malformed_rules() {
        let resp = response(200, json!({}));
        assert!(eval(&resp, AssertionRule::new("header", "eq", json!("x"))).malformed);
        assert!(eval(&resp, AssertionRule::new("status_code", "matches", json!(200))).malformed);
        assert!(eval(&resp, AssertionRule::new("json_path", "eq", json!(1))).malformed);
        assert!(eval(
            &resp,
            AssertionRule::new("json_path", "eq", json!(1)).with_field("$.x[")
        )
        .malformed);
    }

    #[test]
    fn test_evaluation_continues_after_bad_rule() {
        let resp = response(200, json!({}));
        let rules = vec![
            AssertionRule::new("bogus", "eq", json!(1)),
            AssertionRule::new("status_code", "eq", json!(200)),
        ];

        let results = AssertionEvaluator::new().evaluate(&resp, &rules);
        assert_eq!(results.len(), 2);
        assert!(results[0].malformed);
        assert!(results[1].passed);
        assert_eq!(case_status(&results), TestResultStatus::Error);
    }

    #[test]
    fn test_case_status() {
        let resp = response(404, json!({}));
        let evaluator = AssertionEvaluator::new();

        assert_eq!(case_status(&[]), TestResultStatus::Pass);
        let results = evaluator.evaluate(
            &resp,
            &[
                AssertionRule::new("status_code", "eq", json!(200)),
                AssertionRule::new("response_time", "lt", json!(1000)),
            ],
        );
        assert_eq!(case_status(&results), TestResultStatus::Fail);
    }
}
