use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

/// Request overrides a test case layers on top of its API definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestData {
    #[serde(default)]
    pub headers: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub query_params: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// One assertion as stored; type and operator are validated when evaluated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionRule {
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub operator: String,
    #[serde(default)]
    pub expected: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl AssertionRule {
    pub fn new(
        rule_type: impl Into<String>,
        operator: impl Into<String>,
        expected: serde_json::Value,
    ) -> Self {
        Self {
            rule_type: rule_type.into(),
            field: None,
            operator: operator.into(),
            expected,
            description: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Human label used in assertion details
    pub fn label(&self) -> String {
        match (&self.description, &self.field) {
            (Some(description), _) => description.clone(),
            (None, Some(field)) => {
                format!("{} {} {} {}", self.rule_type, field, self.operator, self.expected)
            }
            (None, None) => format!("{} {} {}", self.rule_type, self.operator, self.expected),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: Uuid,
    pub api_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub request_data: RequestData,
    /// Documentation only; `assertions` decide pass/fail
    #[serde(default)]
    pub expected_response: serde_json::Value,
    #[serde(default)]
    pub assertions: Vec<AssertionRule>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TestCase {
    pub fn new(api_id: Uuid, name: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            api_id,
            name: name.into(),
            description: None,
            request_data: RequestData::default(),
            expected_response: serde_json::Value::Null,
            assertions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_assertion(mut self, rule: AssertionRule) -> Self {
        self.assertions.push(rule);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rule_deserialization() {
        let rule: AssertionRule = serde_json::from_value(json!({
            "type": "json_path",
            "field": "$.name",
            "operator": "eq",
            "expected": "a"
        }))
        .unwrap();

        assert_eq!(rule.rule_type, "json_path");
        assert_eq!(rule.field.as_deref(), Some("$.name"));
        assert_eq!(rule.expected, json!("a"));
        assert_eq!(rule.label(), r#"json_path $.name eq "a""#);
    }

    #[test]
    fn test_request_data_defaults() {
        let data: RequestData = serde_json::from_value(json!({"body": {"k": 1}})).unwrap();
        assert!(data.headers.is_empty());
        assert!(data.query_params.is_empty());
        assert_eq!(data.body, Some(json!({"k": 1})));
    }
}
