use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Variable scope, listed from highest to lowest lookup precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableScope {
    /// Owned by one execution, never outlives it
    Temporary,
    /// Owned by one user
    Personal,
    /// Bound to one environment
    Environment,
    /// System-wide singleton
    Global,
}

impl VariableScope {
    /// Lookup order used by the resolver: first scope with a binding wins
    pub const PRECEDENCE: [VariableScope; 4] = [
        Self::Temporary,
        Self::Personal,
        Self::Environment,
        Self::Global,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temporary => "temporary",
            Self::Personal => "personal",
            Self::Environment => "environment",
            Self::Global => "global",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "temporary" => Some(Self::Temporary),
            "personal" => Some(Self::Personal),
            "environment" => Some(Self::Environment),
            "global" => Some(Self::Global),
            _ => None,
        }
    }
}

/// How the raw text of a variable is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    #[default]
    String,
    Number,
    Boolean,
    Json,
}

impl VariableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Json => "json",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Kind that best describes an extracted JSON value
    pub fn of_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(_) => Self::String,
            serde_json::Value::Number(_) => Self::Number,
            serde_json::Value::Bool(_) => Self::Boolean,
            _ => Self::Json,
        }
    }
}

/// Raw text tagged with the kind that governs its coercion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedValue {
    pub raw: String,
    pub kind: VariableType,
}

impl TypedValue {
    pub fn new(raw: impl Into<String>, kind: VariableType) -> Self {
        Self {
            raw: raw.into(),
            kind,
        }
    }

    pub fn text(raw: impl Into<String>) -> Self {
        Self::new(raw, VariableType::String)
    }

    /// Build from an arbitrary JSON value (strings keep their unquoted text)
    pub fn from_json(value: &serde_json::Value) -> Self {
        let raw = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self::new(raw, VariableType::of_json(value))
    }

    /// Interpret the raw text per `kind`; unparsable text stays a JSON string
    pub fn to_json(&self) -> serde_json::Value {
        match self.kind {
            VariableType::String => serde_json::Value::String(self.raw.clone()),
            VariableType::Number => {
                let trimmed = self.raw.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    serde_json::Value::from(i)
                } else if let Some(n) = trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                {
                    serde_json::Value::Number(n)
                } else {
                    serde_json::Value::String(self.raw.clone())
                }
            }
            VariableType::Boolean => serde_json::Value::Bool(matches!(
                self.raw.trim().to_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            )),
            VariableType::Json => serde_json::from_str(&self.raw)
                .unwrap_or_else(|_| serde_json::Value::String(self.raw.clone())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub id: Uuid,
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub var_type: VariableType,
    pub scope: VariableScope,
    /// Set for personal variables only
    pub owner_id: Option<Uuid>,
    /// Set for environment variables only
    pub environment_id: Option<Uuid>,
    pub description: Option<String>,
    #[serde(default)]
    pub is_sensitive: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Variable {
    pub fn new(
        scope: VariableScope,
        name: impl Into<String>,
        value: impl Into<String>,
        var_type: VariableType,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            value: value.into(),
            var_type,
            scope,
            owner_id: None,
            environment_id: None,
            description: None,
            is_sensitive: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn global(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(VariableScope::Global, name, value, VariableType::String)
    }

    pub fn environment(
        environment_id: Uuid,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let mut var = Self::new(VariableScope::Environment, name, value, VariableType::String);
        var.environment_id = Some(environment_id);
        var
    }

    pub fn personal(owner_id: Uuid, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut var = Self::new(VariableScope::Personal, name, value, VariableType::String);
        var.owner_id = Some(owner_id);
        var
    }

    pub fn with_type(mut self, var_type: VariableType) -> Self {
        self.var_type = var_type;
        self
    }

    pub fn typed_value(&self) -> TypedValue {
        TypedValue::new(self.value.clone(), self.var_type)
    }

    /// Value safe to show in logs and previews
    pub fn display_value(&self) -> &str {
        if self.is_sensitive {
            "***"
        } else {
            &self.value
        }
    }
}
