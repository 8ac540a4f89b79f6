//! Row values and records.
//!
//! Values are `serde_json::Value` so rows, bind parameters and template variables
//! share one representation. Records keep column order (`preserve_order`).

pub use serde_json::Value;

/// One flat record: column name → scalar value, in column order.
pub type Record = serde_json::Map<String, Value>;

/// Template-style truthiness.
///
/// `null`, `false`, `0`, `""` and `"0"` are false; everything else, including
/// empty lists and hashes, is true.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !(s.is_empty() || s == "0"),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Text form of a value as it appears in rendered output and key buckets.
///
/// `null` renders as the empty string, booleans as `1` / empty.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => String::new(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(to_text).collect::<Vec<_>>().join(", "),
        Value::Object(_) => value.to_string(),
    }
}

/// Numeric view of a value, accepting numeric strings.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Build a JSON number from an `f64`, collapsing integral values to integers.
pub fn number(f: f64) -> Value {
    if f.fract() == 0.0 && f.is_finite() && f.abs() < 9.0e15 {
        Value::from(f as i64)
    } else {
        serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)
    }
}

/// Flatten column-name arguments: nested lists are spliced in place, order and
/// duplicates preserved, `null` skipped.
pub fn flatten_names(args: &[Value]) -> Vec<String> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Value::Null => {}
            Value::Array(items) => out.extend(flatten_names(items)),
            other => out.push(to_text(other)),
        }
    }
    out
}
