//! Type coercion between the five sample types.
//!
//! Used when a sample is pushed into an Input or Output whose declared type
//! differs from the incoming sample, and when converting a sample for a
//! push handler that requested a different encoding. The table is
//! exhaustive over the 5x5 matrix.

use crate::error::Result;
use crate::sample::{format_numeric, DataSample, Value};
use crate::types::{DataType, MAX_STRING_BYTES};
use std::rc::Rc;

/// Coerce `sample` to `to`. Returns the original sample (cheaply cloned)
/// when no conversion is required.
///
/// Notable entries: trigger -> numeric yields NaN; any -> trigger
/// synthesises a trigger with the source timestamp; string -> bool maps ""
/// to false and anything else to true; numeric -> bool is `v != 0`;
/// JSON -> bool/numeric parse the JSON text.
pub fn coerce(to: DataType, sample: &Rc<DataSample>) -> Result<Rc<DataSample>> {
    let ts = sample.timestamp();
    let from = sample.data_type();

    if from == to {
        return Ok(Rc::clone(sample));
    }

    let coerced = match to {
        DataType::Trigger => DataSample::trigger(ts),

        DataType::Boolean => {
            let value = match sample.value() {
                Value::Trigger => false,
                Value::Bool(v) => *v,
                Value::Numeric(v) => *v != 0.0,
                Value::String(s) => !s.is_empty(),
                Value::Json(j) => json_to_bool(j),
            };
            DataSample::boolean(ts, value)
        }

        DataType::Numeric => {
            let value = match sample.value() {
                Value::Trigger => f64::NAN,
                Value::Bool(v) => {
                    if *v {
                        1.0
                    } else {
                        0.0
                    }
                }
                Value::Numeric(v) => *v,
                Value::String(s) => {
                    if s.is_empty() {
                        0.0
                    } else {
                        1.0
                    }
                }
                Value::Json(j) => json_to_number(j),
            };
            DataSample::numeric(ts, value)
        }

        DataType::String => {
            let value = match sample.value() {
                Value::Trigger => String::new(),
                Value::Bool(v) => (if *v { "true" } else { "false" }).to_string(),
                Value::Numeric(v) => format_numeric(*v),
                Value::String(s) => s.clone(),
                Value::Json(j) => j.clone(),
            };
            DataSample::string(ts, value)?
        }

        DataType::Json => {
            let value = match sample.value() {
                Value::Trigger => "null".to_string(),
                Value::Bool(v) => (if *v { "true" } else { "false" }).to_string(),
                Value::Numeric(v) => format_numeric(*v),
                Value::String(s) => quote_string(s),
                Value::Json(j) => j.clone(),
            };
            DataSample::json(ts, value)?
        }
    };

    Ok(coerced)
}

/// Quote a string payload as a JSON value, truncating so the closing quote
/// always survives when the quoted form would exceed the payload limit.
fn quote_string(s: &str) -> String {
    let mut quoted = serde_json::Value::String(s.to_string()).to_string();
    if quoted.len() > MAX_STRING_BYTES {
        let mut cut = MAX_STRING_BYTES - 1;
        while !quoted.is_char_boundary(cut) {
            cut -= 1;
        }
        quoted.truncate(cut);
        quoted.push('"');
    }
    quoted
}

/// Interpret a JSON text as a Boolean.
///
/// Booleans map to themselves, numbers to `v != 0`, strings to
/// non-emptiness, arrays and objects to true, null and malformed text to
/// false.
fn json_to_bool(text: &str) -> bool {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Bool(v)) => v,
        Ok(serde_json::Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Ok(serde_json::Value::String(s)) => !s.is_empty(),
        Ok(serde_json::Value::Array(_)) | Ok(serde_json::Value::Object(_)) => true,
        _ => false,
    }
}

/// Interpret a JSON text as a number. Non-numeric values yield NaN.
fn json_to_number(text: &str) -> f64 {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Ok(serde_json::Value::Bool(v)) => {
            if v {
                1.0
            } else {
                0.0
            }
        }
        _ => f64::NAN,
    }
}
