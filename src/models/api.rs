use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// HTTP methods an API definition may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value.to_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "PATCH" => Ok(Self::Patch),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            _ => Err(AppError::Validation(format!(
                "Unsupported HTTP method: {}",
                value
            ))),
        }
    }

    /// Methods that carry a request body
    pub fn has_body(&self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch | Self::Delete)
    }
}

/// Template of an HTTP call; every text field may contain placeholders
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiDefinition {
    pub id: Uuid,
    pub name: String,
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub query_params: BTreeMap<String, serde_json::Value>,
    /// Default body template, used when the test case supplies none
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ApiDefinition {
    pub fn new(name: impl Into<String>, method: HttpMethod, url: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            query_params: BTreeMap::new(),
            body: None,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Absolute URL: returned as-is when already absolute, else joined onto `base_url`
    pub fn full_url(&self, base_url: Option<&str>) -> String {
        join_url(base_url, &self.url)
    }
}

fn join_url(base_url: Option<&str>, url: &str) -> String {
    match base_url {
        Some(base) if !base.is_empty() && !url.starts_with("http") && !url.starts_with("{{") => {
            format!("{}/{}", base.trim_end_matches('/'), url.trim_start_matches('/'))
        }
        _ => url.to_string(),
    }
}
