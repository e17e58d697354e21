use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: Uuid,
    pub name: String, // e.g., "dev", "staging", "production"
    pub base_url: Option<String>,
    /// Default headers, lowest precedence when building a request
    #[serde(default)]
    pub headers: BTreeMap<String, serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Environment {
    pub fn new(name: impl Into<String>, base_url: Option<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            base_url,
            headers: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
