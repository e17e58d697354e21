//! Placeholder substitution over the four variable scopes.
//!
//! Resolution is split in two steps. [`ScopeSnapshot::load`] reads every
//! binding a template can reach from a [`VariableStore`]; the resolver then
//! works purely on that snapshot, so resolving the same template twice
//! against the same snapshot always produces the same output (function calls
//! such as `{{uuid()}}` aside).

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{RequestTemplate, ResolvedRequest, TypedValue, VariableScope, VariableType};
use crate::repositories::{OwnerKey, VariableStore};
use crate::services::functions;

const PLACEHOLDER_PATTERN: &str = r"\{\{([^{}]+)\}\}";

/// Who is resolving, and on behalf of which execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveContext {
    pub execution_id: Uuid,
    pub case_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub environment_id: Option<Uuid>,
}

impl ResolveContext {
    pub fn new(execution_id: Uuid) -> Self {
        Self {
            execution_id,
            case_id: None,
            user_id: None,
            environment_id: None,
        }
    }

    pub fn with_case(mut self, case_id: Uuid) -> Self {
        self.case_id = Some(case_id);
        self
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_environment(mut self, environment_id: Option<Uuid>) -> Self {
        self.environment_id = environment_id;
        self
    }

    /// Namespaces to consult for a name, highest precedence first
    pub fn lookup_keys(&self) -> Vec<OwnerKey> {
        let mut keys = Vec::with_capacity(5);
        if let Some(case_id) = self.case_id {
            keys.push(OwnerKey::Execution {
                execution_id: self.execution_id,
                case_id: Some(case_id),
            });
        }
        keys.push(OwnerKey::Execution {
            execution_id: self.execution_id,
            case_id: None,
        });
        if let Some(user_id) = self.user_id {
            keys.push(OwnerKey::User(user_id));
        }
        if let Some(environment_id) = self.environment_id {
            keys.push(OwnerKey::Environment(environment_id));
        }
        keys.push(OwnerKey::Global);
        keys
    }
}

/// Immutable view of the bindings visible to one case
#[derive(Debug, Clone, Default)]
pub struct ScopeSnapshot {
    scopes: HashMap<VariableScope, HashMap<String, TypedValue>>,
}

impl ScopeSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, scope: VariableScope, name: impl Into<String>, value: TypedValue) {
        self.scopes
            .entry(scope)
            .or_default()
            .insert(name.into(), value);
    }

    /// Builder form of [`insert`](Self::insert) for string bindings
    pub fn with(mut self, scope: VariableScope, name: &str, raw: &str) -> Self {
        self.insert(scope, name, TypedValue::text(raw));
        self
    }

    pub fn with_typed(mut self, scope: VariableScope, name: &str, value: TypedValue) -> Self {
        self.insert(scope, name, value);
        self
    }

    /// First binding for `name` walking scopes by precedence
    pub fn lookup(&self, name: &str) -> Option<&TypedValue> {
        self.lookup_with_scope(name).map(|(_, value)| value)
    }

    pub fn lookup_with_scope(&self, name: &str) -> Option<(VariableScope, &TypedValue)> {
        VariableScope::PRECEDENCE.iter().find_map(|scope| {
            self.scopes
                .get(scope)
                .and_then(|bindings| bindings.get(name))
                .map(|value| (*scope, value))
        })
    }

    pub fn len(&self) -> usize {
        self.scopes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read every binding reachable from `templates` out of the store.
    ///
    /// Names found in binding values are followed too, one layer per nesting
    /// level, so nested references can be expanded without another store
    /// round trip.
    pub async fn load(
        store: &dyn VariableStore,
        ctx: &ResolveContext,
        templates: &[&Value],
        resolver: &VariableResolver,
    ) -> AppResult<Self> {
        let keys = ctx.lookup_keys();
        let mut snapshot = Self::default();
        let mut seen = BTreeSet::new();
        let mut pending: BTreeSet<String> = templates
            .iter()
            .flat_map(|template| resolver.extract_variables(template))
            .collect();

        for _ in 0..=resolver.max_depth() {
            if pending.is_empty() {
                break;
            }
            let mut next = BTreeSet::new();
            for name in pending {
                if !seen.insert(name.clone()) {
                    continue;
                }
                for key in &keys {
                    if let Some(variable) = store.get(*key, &name).await? {
                        for inner in resolver.names_in(&variable.value) {
                            if !seen.contains(&inner) {
                                next.insert(inner);
                            }
                        }
                        tracing::trace!(
                            name = %name,
                            scope = key.scope().as_str(),
                            value = variable.display_value(),
                            "Variable bound"
                        );
                        snapshot.insert(key.scope(), name.clone(), variable.typed_value());
                        break;
                    }
                }
            }
            pending = next;
        }

        tracing::debug!(
            execution_id = %ctx.execution_id,
            bindings = snapshot.len(),
            "Loaded variable snapshot"
        );
        Ok(snapshot)
    }
}

/// Names a template uses, split by whether the snapshot can satisfy them
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TemplateReport {
    pub used: BTreeSet<String>,
    pub resolved: BTreeMap<String, VariableScope>,
    pub missing: BTreeSet<String>,
}

impl TemplateReport {
    pub fn is_valid(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Substitutes `{{name}}`, `{{name|default}}` and `{{fn(args)}}` placeholders
#[derive(Debug, Clone)]
pub struct VariableResolver {
    pattern: Regex,
    max_depth: usize,
}

impl Default for VariableResolver {
    fn default() -> Self {
        Self::new(5)
    }
}

impl VariableResolver {
    pub fn new(max_depth: usize) -> Self {
        Self {
            pattern: Regex::new(PLACEHOLDER_PATTERN).expect("placeholder pattern is valid"),
            max_depth,
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Resolve a string template; every placeholder is inserted as text
    pub fn resolve_str(&self, template: &str, snapshot: &ScopeSnapshot) -> AppResult<String> {
        self.expand_text(template, snapshot, &mut Vec::new())
    }

    /// Resolve every string leaf of a JSON value.
    ///
    /// A leaf that is exactly one placeholder takes the JSON type of its
    /// binding; object keys are never rewritten.
    pub fn resolve_value(&self, value: &Value, snapshot: &ScopeSnapshot) -> AppResult<Value> {
        match value {
            Value::String(text) => match self.sole_placeholder(text) {
                Some(expression) => Ok(self
                    .expand_placeholder(expression, snapshot, &mut Vec::new())?
                    .to_json()),
                None => Ok(Value::String(self.resolve_str(text, snapshot)?)),
            },
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_value(item, snapshot))
                .collect::<AppResult<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut resolved = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    resolved.insert(key.clone(), self.resolve_value(item, snapshot)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    /// Resolve URL, headers, query parameters and body independently
    pub fn resolve_request(
        &self,
        template: &RequestTemplate,
        snapshot: &ScopeSnapshot,
    ) -> AppResult<ResolvedRequest> {
        Ok(ResolvedRequest {
            method: template.method,
            url: self.resolve_str(&template.url, snapshot)?,
            headers: self.resolve_text_map(&template.headers, snapshot)?,
            query_params: self.resolve_text_map(&template.query_params, snapshot)?,
            body: template
                .body
                .as_ref()
                .map(|body| self.resolve_value(body, snapshot))
                .transpose()?,
        })
    }

    /// Variable names referenced anywhere in `value` (function calls excluded)
    pub fn extract_variables(&self, value: &Value) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_names(value, &mut names);
        names
    }

    /// Variable names referenced by a single string
    pub fn names_in(&self, text: &str) -> BTreeSet<String> {
        self.references(text)
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    /// Report which referenced names resolve and which do not, following
    /// nested references through binding values
    pub fn validate(&self, value: &Value, snapshot: &ScopeSnapshot) -> TemplateReport {
        let mut report = TemplateReport::default();
        let mut queue: Vec<(String, bool)> = Vec::new();
        self.collect_references(value, &mut queue);

        while let Some((name, has_default)) = queue.pop() {
            if !report.used.insert(name.clone()) {
                continue;
            }
            match snapshot.lookup_with_scope(&name) {
                Some((scope, binding)) => {
                    report.resolved.insert(name, scope);
                    queue.extend(self.references(&binding.raw));
                }
                None if has_default => {}
                None => {
                    report.missing.insert(name);
                }
            }
        }

        report
    }

    fn resolve_text_map(
        &self,
        map: &BTreeMap<String, Value>,
        snapshot: &ScopeSnapshot,
    ) -> AppResult<BTreeMap<String, String>> {
        map.iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(text) => self.resolve_str(text, snapshot)?,
                    other => match self.resolve_value(other, snapshot)? {
                        Value::String(text) => text,
                        resolved => resolved.to_string(),
                    },
                };
                Ok((key.clone(), text))
            })
            .collect()
    }

    fn expand_text(
        &self,
        text: &str,
        snapshot: &ScopeSnapshot,
        chain: &mut Vec<String>,
    ) -> AppResult<String> {
        let mut output = String::with_capacity(text.len());
        let mut last = 0;

        for found in self.pattern.find_iter(text) {
            output.push_str(&text[last..found.start()]);
            let expression = inner_expression(found.as_str());
            output.push_str(&self.expand_placeholder(expression, snapshot, chain)?.raw);
            last = found.end();
        }
        output.push_str(&text[last..]);

        Ok(output)
    }

    fn expand_placeholder(
        &self,
        expression: &str,
        snapshot: &ScopeSnapshot,
        chain: &mut Vec<String>,
    ) -> AppResult<TypedValue> {
        let expression = expression.trim();
        if functions::is_call(expression) {
            return functions::call(expression).map(TypedValue::text);
        }

        let (name, default) = split_default(expression);
        if name.is_empty() {
            return Err(AppError::Validation(format!(
                "Empty variable name in '{{{{{}}}}}'",
                expression
            )));
        }

        if chain.iter().any(|seen| seen == name) {
            chain.push(name.to_string());
            return Err(AppError::CircularReference(chain.join(" -> ")));
        }

        let binding = match snapshot.lookup(name) {
            Some(binding) => binding,
            None => {
                return match default {
                    Some(default) => Ok(TypedValue::text(default)),
                    None => Err(AppError::UnresolvedVariable(name.to_string())),
                }
            }
        };

        if !binding.raw.contains("{{") {
            return Ok(binding.clone());
        }

        if chain.len() >= self.max_depth {
            chain.push(name.to_string());
            return Err(AppError::CircularReference(format!(
                "{} (nesting deeper than {})",
                chain.join(" -> "),
                self.max_depth
            )));
        }

        chain.push(name.to_string());
        let expanded = match self.sole_placeholder(&binding.raw) {
            // An alias keeps the type of what it points at
            Some(inner) if binding.kind == VariableType::String => {
                self.expand_placeholder(inner, snapshot, chain)
            }
            _ => self
                .expand_text(&binding.raw, snapshot, chain)
                .map(|raw| TypedValue::new(raw, binding.kind)),
        };
        chain.pop();

        expanded
    }

    /// Inner expression when `text` is exactly one placeholder
    fn sole_placeholder<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.pattern
            .find(text)
            .filter(|found| found.start() == 0 && found.end() == text.len())
            .map(|found| inner_expression(&text[found.range()]))
    }

    fn references(&self, text: &str) -> Vec<(String, bool)> {
        self.pattern
            .find_iter(text)
            .filter_map(|found| {
                let expression = inner_expression(found.as_str()).trim();
                if functions::is_call(expression) {
                    return None;
                }
                let (name, default) = split_default(expression);
                (!name.is_empty()).then(|| (name.to_string(), default.is_some()))
            })
            .collect()
    }

    fn collect_names(&self, value: &Value, names: &mut BTreeSet<String>) {
        let mut references = Vec::new();
        self.collect_references(value, &mut references);
        names.extend(references.into_iter().map(|(name, _)| name));
    }

    fn collect_references(&self, value: &Value, out: &mut Vec<(String, bool)>) {
        match value {
            Value::String(text) => out.extend(self.references(text)),
            Value::Array(items) => items
                .iter()
                .for_each(|item| self.collect_references(item, out)),
            Value::Object(map) => map
                .values()
                .for_each(|item| self.collect_references(item, out)),
            _ => {}
        }
    }
}

fn inner_expression(placeholder: &str) -> &str {
    &placeholder[2..placeholder.len() - 2]
}

fn split_default(expression: &str) -> (&str, Option<&str>) {
    match expression.split_once('|') {
        Some((name, default)) => (name.trim(), Some(default.trim())),
        None => (expression.trim(), None),
    }
}
