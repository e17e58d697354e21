//! Built-in functions callable from a placeholder, e.g. `{{randomInt(1, 10)}}`.

use base64::Engine as _;
use rand::distributions::Alphanumeric;
use rand::Rng;
use time::format_description;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

const DEFAULT_DATETIME_FORMAT: &str = "[year]-[month]-[day] [hour]:[minute]:[second]";

/// A literal argument inside a function call
#[derive(Debug, Clone, PartialEq)]
pub enum FnArg {
    Str(String),
    Int(i64),
    Float(f64),
}

impl FnArg {
    fn as_int(&self, func: &str) -> AppResult<i64> {
        match self {
            FnArg::Int(i) => Ok(*i),
            other => Err(AppError::Validation(format!(
                "{}() expects an integer argument, got {:?}",
                func, other
            ))),
        }
    }

    fn as_text(&self) -> String {
        match self {
            FnArg::Str(s) => s.clone(),
            FnArg::Int(i) => i.to_string(),
            FnArg::Float(f) => f.to_string(),
        }
    }
}

/// Whether the inside of a placeholder looks like `name(args)`
pub fn is_call(expression: &str) -> bool {
    let expression = expression.trim();
    expression.ends_with(')')
        && expression
            .find('(')
            .is_some_and(|open| open > 0 && is_identifier(&expression[..open]))
}

/// Evaluate `name(args)` and return the produced text
pub fn call(expression: &str) -> AppResult<String> {
    let (name, args) = parse_call(expression)?;
    invoke(&name, &args)
}

fn parse_call(expression: &str) -> AppResult<(String, Vec<FnArg>)> {
    let expression = expression.trim();
    let open = expression
        .find('(')
        .ok_or_else(|| AppError::Validation(format!("Not a function call: {}", expression)))?;
    let name = expression[..open].trim().to_string();
    let inner = expression[open + 1..expression.len() - 1].trim();

    let args = if inner.is_empty() {
        Vec::new()
    } else {
        inner.split(',').map(|arg| parse_arg(arg.trim())).collect()
    };

    Ok((name, args))
}

fn parse_arg(raw: &str) -> FnArg {
    for quote in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return FnArg::Str(raw[1..raw.len() - 1].to_string());
        }
    }
    if let Ok(i) = raw.parse::<i64>() {
        return FnArg::Int(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return FnArg::Float(f);
    }
    FnArg::Str(raw.to_string())
}

fn invoke(name: &str, args: &[FnArg]) -> AppResult<String> {
    let mut rng = rand::thread_rng();

    match name {
        "randomString" => {
            let length = match args.first() {
                Some(arg) => arg.as_int(name)?,
                None => 10,
            };
            let length = usize::try_from(length).map_err(|_| {
                AppError::Validation("randomString() length must not be negative".to_string())
            })?;
            Ok((&mut rng)
                .sample_iter(&Alphanumeric)
                .take(length)
                .map(char::from)
                .collect())
        }
        "randomInt" => {
            let min = match args.first() {
                Some(arg) => arg.as_int(name)?,
                None => 1,
            };
            let max = match args.get(1) {
                Some(arg) => arg.as_int(name)?,
                None => 100,
            };
            if min > max {
                return Err(AppError::Validation(format!(
                    "randomInt() range is empty: {}..={}",
                    min, max
                )));
            }
            Ok(rng.gen_range(min..=max).to_string())
        }
        "timestamp" => Ok(OffsetDateTime::now_utc().unix_timestamp().to_string()),
        "datetime" => {
            let pattern = args
                .first()
                .map(FnArg::as_text)
                .unwrap_or_else(|| DEFAULT_DATETIME_FORMAT.to_string());
            let format = format_description::parse(&pattern).map_err(|e| {
                AppError::Validation(format!("datetime() format '{}': {}", pattern, e))
            })?;
            OffsetDateTime::now_utc()
                .format(&format)
                .map_err(|e| AppError::Validation(format!("datetime() failed: {}", e)))
        }
        "uuid" => Ok(Uuid::new_v4().to_string()),
        "randomEmail" => {
            let domain = args
                .first()
                .map(FnArg::as_text)
                .unwrap_or_else(|| "example.com".to_string());
            let user: String = (0..8)
                .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
                .collect();
            Ok(format!("{}@{}", user, domain))
        }
        "randomPhone" => {
            let digits: String = (0..10)
                .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
                .collect();
            Ok(format!("1{}", digits))
        }
        "base64" => {
            let text = args
                .first()
                .map(FnArg::as_text)
                .unwrap_or_else(|| "test".to_string());
            Ok(base64::engine::general_purpose::STANDARD.encode(text.as_bytes()))
        }
        _ => Err(AppError::Validation(format!(
            "Unknown template function: {}",
            name
        ))),
    }
}

fn is_identifier(name: &str) -> bool {
    let name = name.trim();
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
