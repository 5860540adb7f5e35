//! The filter set.
//!
//! Filters are pure value transforms applied with the pipe operator. The set
//! is closed: `trim`, `upper`, `lower`, `length`, `split(sep)`, `join(sep)`,
//! `first`, `last`, `default(value)`.
//!
//! Failure modes are deliberately forgiving: an unknown filter name or a
//! type the filter does not apply to passes the input through unchanged, so
//! workflows written against newer engine versions degrade instead of
//! erroring.

use serde_json::Value;

use crate::value_utils::stringify;

/// Apply a filter by name.
///
/// Returns the transformed value, or the input unchanged when the filter is
/// unknown or does not apply to the input type.
#[must_use]
pub fn apply(name: &str, input: Value, args: &[Value]) -> Value {
    match name {
        "trim" => trim(input),
        "upper" => upper(input),
        "lower" => lower(input),
        "length" => length(input),
        "split" => split(input, args),
        "join" => join(input, args),
        "first" => first(input),
        "last" => last(input),
        "default" => default(input, args),
        _ => input,
    }
}

fn trim(input: Value) -> Value {
    match input {
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other,
    }
}

fn upper(input: Value) -> Value {
    match input {
        Value::String(s) => Value::String(s.to_uppercase()),
        other => other,
    }
}

fn lower(input: Value) -> Value {
    match input {
        Value::String(s) => Value::String(s.to_lowercase()),
        other => other,
    }
}

fn length(input: Value) -> Value {
    match &input {
        Value::String(s) => Value::Number((s.len() as i64).into()),
        Value::Array(arr) => Value::Number((arr.len() as i64).into()),
        Value::Object(obj) => Value::Number((obj.len() as i64).into()),
        _ => input,
    }
}

fn split(input: Value, args: &[Value]) -> Value {
    let Some(sep) = args.first().and_then(Value::as_str) else {
        return input;
    };
    match input {
        Value::String(s) => Value::Array(
            s.split(sep)
                .map(|part| Value::String(part.to_string()))
                .collect(),
        ),
        other => other,
    }
}

fn join(input: Value, args: &[Value]) -> Value {
    let Some(sep) = args.first().and_then(Value::as_str) else {
        return input;
    };
    match &input {
        Value::Array(arr) => {
            let joined = arr.iter().map(stringify).collect::<Vec<_>>().join(sep);
            Value::String(joined)
        }
        _ => input,
    }
}

fn first(input: Value) -> Value {
    match &input {
        Value::Array(arr) => arr.first().cloned().unwrap_or(Value::Null),
        _ => input,
    }
}

fn last(input: Value) -> Value {
    match &input {
        Value::Array(arr) => arr.last().cloned().unwrap_or(Value::Null),
        _ => input,
    }
}

fn default(input: Value, args: &[Value]) -> Value {
    if input.is_null() {
        args.first().cloned().unwrap_or(Value::Null)
    } else {
        input
    }
}
