use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{ApiDefinition, Environment, HttpMethod, TestCase};

/// Unresolved request: definition, case overrides and environment defaults merged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTemplate {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, serde_json::Value>,
    pub query_params: BTreeMap<String, serde_json::Value>,
    pub body: Option<serde_json::Value>,
}

impl RequestTemplate {
    /// Headers: environment < definition < case. Query: definition < case.
    /// Body: the case body when present, else the definition's body template.
    pub fn compose(api: &ApiDefinition, case: &TestCase, environment: Option<&Environment>) -> Self {
        let mut headers = environment
            .map(|env| env.headers.clone())
            .unwrap_or_default();
        headers.extend(api.headers.clone());
        headers.extend(case.request_data.headers.clone());

        let mut query_params = api.query_params.clone();
        query_params.extend(case.request_data.query_params.clone());

        let body = case
            .request_data
            .body
            .clone()
            .or_else(|| api.body.clone())
            .filter(|_| api.method.has_body());

        Self {
            method: api.method,
            url: api.full_url(environment.and_then(|env| env.base_url.as_deref())),
            headers,
            query_params,
            body,
        }
    }
}

/// A request with every placeholder substituted, exactly as it is sent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRequest {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// Response captured by the invoker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON body, or the text as a JSON string when it is not JSON
    pub body: serde_json::Value,
    /// Raw body text
    pub text: String,
    pub elapsed_ms: u64,
}
