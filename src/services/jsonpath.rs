//! Minimal JSONPath: `$`, `.name`, `['name']`, `[index]`, `[*]`, `.*` and
//! recursive descent (`..name`, `..*`, `..[0]`).
//!
//! The leading `$` is optional, so `data.items[0].id` is accepted. Negative
//! indexes count from the end of an array.

use serde_json::Value;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(i64),
    Wildcard,
    /// The current node and everything below it, in document order
    Descendants,
}

/// A parsed path, reusable across documents
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPath {
    segments: Vec<Segment>,
}

impl JsonPath {
    pub fn parse(expression: &str) -> AppResult<Self> {
        let invalid = |reason: &str| {
            AppError::Validation(format!("Invalid JSONPath '{}': {}", expression, reason))
        };

        let trimmed = expression.trim();
        let mut rest = trimmed.strip_prefix('$').unwrap_or(trimmed);
        let mut segments = Vec::new();

        // Relative form: first key without a leading dot
        if !rest.is_empty() && !rest.starts_with('.') && !rest.starts_with('[') {
            let end = rest.find(['.', '[']).unwrap_or(rest.len());
            segments.push(Segment::Key(rest[..end].to_string()));
            rest = &rest[end..];
        }

        while !rest.is_empty() {
            if let Some(after_dot) = rest.strip_prefix('.') {
                let after_dot = match after_dot.strip_prefix('.') {
                    Some(after_dots) => {
                        segments.push(Segment::Descendants);
                        if after_dots.starts_with('[') {
                            rest = after_dots;
                            continue;
                        }
                        after_dots
                    }
                    None => after_dot,
                };
                let end = after_dot.find(['.', '[']).unwrap_or(after_dot.len());
                let name = &after_dot[..end];
                if name.is_empty() {
                    return Err(invalid("empty member name"));
                }
                segments.push(if name == "*" {
                    Segment::Wildcard
                } else {
                    Segment::Key(name.to_string())
                });
                rest = &after_dot[end..];
            } else if let Some(after_bracket) = rest.strip_prefix('[') {
                let close = after_bracket
                    .find(']')
                    .ok_or_else(|| invalid("unclosed bracket"))?;
                let inner = after_bracket[..close].trim();
                segments.push(parse_bracket(inner).ok_or_else(|| invalid("bad selector"))?);
                rest = &after_bracket[close + 1..];
            } else {
                return Err(invalid("unexpected character"));
            }
        }

        Ok(Self { segments })
    }

    /// Every value the path selects, in document order
    pub fn find_all<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![root];

        for segment in &self.segments {
            let mut next = Vec::new();
            for value in current {
                match (segment, value) {
                    (Segment::Descendants, _) => push_descendants(value, &mut next),
                    (Segment::Key(key), Value::Object(map)) => {
                        if let Some(child) = map.get(key) {
                            next.push(child);
                        }
                    }
                    (Segment::Index(index), Value::Array(items)) => {
                        let resolved = if *index < 0 {
                            items.len() as i64 + index
                        } else {
                            *index
                        };
                        if resolved >= 0 {
                            if let Some(child) = items.get(resolved as usize) {
                                next.push(child);
                            }
                        }
                    }
                    (Segment::Wildcard, Value::Array(items)) => next.extend(items.iter()),
                    (Segment::Wildcard, Value::Object(map)) => next.extend(map.values()),
                    _ => {}
                }
            }
            if next.is_empty() {
                return next;
            }
            current = next;
        }

        current
    }

    /// First selected value
    pub fn find<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.find_all(root).into_iter().next()
    }
}

fn push_descendants<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    out.push(value);
    match value {
        Value::Array(items) => items.iter().for_each(|item| push_descendants(item, out)),
        Value::Object(map) => map.values().for_each(|child| push_descendants(child, out)),
        _ => {}
    }
}

fn parse_bracket(inner: &str) -> Option<Segment> {
    if inner == "*" {
        return Some(Segment::Wildcard);
    }
    for quote in ['\'', '"'] {
        if let Some(name) = inner
            .strip_prefix(quote)
            .and_then(|s| s.strip_suffix(quote))
        {
            return Some(Segment::Key(name.to_string()));
        }
    }
    inner.parse::<i64>().ok().map(Segment::Index)
}

/// Parse `expression` and return the first value it selects in `root`
pub fn select<'a>(root: &'a Value, expression: &str) -> AppResult<Option<&'a Value>> {
    Ok(JsonPath::parse(expression)?.find(root))
}
