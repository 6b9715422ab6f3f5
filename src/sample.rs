//! Data samples — the unit of flow through the hub.
//!
//! A [`DataSample`] carries a timestamp and one of five tagged values. It is
//! shared behind `Rc` by the current-value holder, buffers, default and
//! override slots and handler deliveries; it is destroyed when the last
//! holder drops it. Samples are immutable after creation, except for an
//! internal set-timestamp escape used when a sample is reused as a
//! trigger-derived child.

use crate::error::{HubError, Result};
use crate::types::{DataType, MAX_STRING_BYTES};
use std::cell::Cell;
use std::rc::Rc;

/// The tagged value of a [`DataSample`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Timestamp only.
    Trigger,
    Bool(bool),
    Numeric(f64),
    /// UTF-8 payload, at most [`MAX_STRING_BYTES`] bytes.
    String(String),
    /// JSON text, at most [`MAX_STRING_BYTES`] bytes.
    Json(String),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Trigger => DataType::Trigger,
            Value::Bool(_) => DataType::Boolean,
            Value::Numeric(_) => DataType::Numeric,
            Value::String(_) => DataType::String,
            Value::Json(_) => DataType::Json,
        }
    }
}

/// An immutable, shared, timestamped value.
#[derive(Debug)]
pub struct DataSample {
    timestamp: Cell<f64>,
    value: Value,
}

/// Render a numeric the way the wire formats expect: fixed six decimal
/// places, lowercase nan/inf.
pub(crate) fn format_numeric(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else {
        format!("{:.6}", v)
    }
}

impl DataSample {
    /// Create a trigger sample.
    pub fn trigger(timestamp: f64) -> Rc<DataSample> {
        Rc::new(DataSample {
            timestamp: Cell::new(timestamp),
            value: Value::Trigger,
        })
    }

    /// Create a Boolean sample.
    pub fn boolean(timestamp: f64, value: bool) -> Rc<DataSample> {
        Rc::new(DataSample {
            timestamp: Cell::new(timestamp),
            value: Value::Bool(value),
        })
    }

    /// Create a numeric sample.
    pub fn numeric(timestamp: f64, value: f64) -> Rc<DataSample> {
        Rc::new(DataSample {
            timestamp: Cell::new(timestamp),
            value: Value::Numeric(value),
        })
    }

    /// Create a string sample. Fails with `Overflow` if the payload exceeds
    /// [`MAX_STRING_BYTES`].
    pub fn string(timestamp: f64, value: impl Into<String>) -> Result<Rc<DataSample>> {
        let value = value.into();
        if value.len() > MAX_STRING_BYTES {
            return Err(HubError::Overflow);
        }
        Ok(Rc::new(DataSample {
            timestamp: Cell::new(timestamp),
            value: Value::String(value),
        }))
    }

    /// Create a JSON sample. The text is not validated here; consumers that
    /// need to parse it report `BadParameter` on malformed input.
    pub fn json(timestamp: f64, value: impl Into<String>) -> Result<Rc<DataSample>> {
        let value = value.into();
        if value.len() > MAX_STRING_BYTES {
            return Err(HubError::Overflow);
        }
        Ok(Rc::new(DataSample {
            timestamp: Cell::new(timestamp),
            value: Value::Json(value),
        }))
    }

    /// Create a sample from an already-tagged value.
    pub fn from_value(timestamp: f64, value: Value) -> Result<Rc<DataSample>> {
        match &value {
            Value::String(s) | Value::Json(s) if s.len() > MAX_STRING_BYTES => {
                Err(HubError::Overflow)
            }
            _ => Ok(Rc::new(DataSample {
                timestamp: Cell::new(timestamp),
                value,
            })),
        }
    }

    /// Timestamp in seconds since the Unix epoch.
    pub fn timestamp(&self) -> f64 {
        self.timestamp.get()
    }

    /// Internal escape: retime a sample that is being reused (e.g. "now"
    /// substitution on push, or a trigger-derived child).
    pub(crate) fn set_timestamp(&self, timestamp: f64) {
        self.timestamp.set(timestamp);
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn data_type(&self) -> DataType {
        self.value.data_type()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_numeric(&self) -> Option<f64> {
        match self.value {
            Value::Numeric(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&str> {
        match &self.value {
            Value::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Render the value as a printable UTF-8 string.
    ///
    /// Trigger renders empty; Booleans render `true`/`false`; numerics use
    /// fixed six-decimal formatting; string and JSON render verbatim.
    pub fn to_display_string(&self) -> String {
        match &self.value {
            Value::Trigger => String::new(),
            Value::Bool(v) => (if *v { "true" } else { "false" }).to_string(),
            Value::Numeric(v) => format_numeric(*v),
            Value::String(v) => v.clone(),
            Value::Json(v) => v.clone(),
        }
    }

    /// Render the value in JSON form.
    ///
    /// Trigger renders `null`; strings are quoted and escaped; JSON renders
    /// verbatim.
    pub fn to_json_string(&self) -> String {
        match &self.value {
            Value::Trigger => "null".to_string(),
            Value::Bool(v) => (if *v { "true" } else { "false" }).to_string(),
            Value::Numeric(v) => format_numeric(*v),
            Value::String(v) => serde_json::Value::String(v.clone()).to_string(),
            Value::Json(v) => v.clone(),
        }
    }

    /// Extract an object member or array element from a JSON sample, based
    /// on an extraction specifier like `x`, `x.y`, `[3]` or `x[3].y`.
    ///
    /// Returns a fresh sample of the appropriate type, carrying the original
    /// timestamp.
    pub fn extract_json(&self, spec: &str) -> Result<(DataType, Rc<DataSample>)> {
        let text = self.as_json().ok_or_else(|| {
            HubError::FormatError("JSON extraction on a non-JSON sample".to_string())
        })?;

        let root: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| HubError::BadParameter(format!("invalid JSON value: {}", e)))?;

        let mut node = &root;
        for step in parse_extraction_spec(spec)? {
            node = match step {
                ExtractionStep::Member(name) => node.get(name.as_str()).ok_or_else(|| {
                    HubError::NotFound
                })?,
                ExtractionStep::Index(i) => node.get(i).ok_or(HubError::NotFound)?,
            };
        }

        let ts = self.timestamp();
        let (data_type, sample) = match node {
            serde_json::Value::Null => (DataType::Trigger, DataSample::trigger(ts)),
            serde_json::Value::Bool(v) => (DataType::Boolean, DataSample::boolean(ts, *v)),
            serde_json::Value::Number(n) => (
                DataType::Numeric,
                DataSample::numeric(ts, n.as_f64().unwrap_or(f64::NAN)),
            ),
            serde_json::Value::String(s) => (DataType::String, DataSample::string(ts, s.clone())?),
            other => (DataType::Json, DataSample::json(ts, other.to_string())?),
        };
        Ok((data_type, sample))
    }
}

/// One step of a JSON extraction specifier.
#[derive(Debug, PartialEq, Eq)]
enum ExtractionStep {
    Member(String),
    Index(usize),
}

/// Parse an extraction spec like `x`, `x.y`, `[3]`, `x[3].y`.
fn parse_extraction_spec(spec: &str) -> Result<Vec<ExtractionStep>> {
    let mut steps = Vec::new();
    let bytes = spec.as_bytes();
    let mut i = 0;

    let malformed = || HubError::BadParameter(format!("malformed extraction spec '{}'", spec));

    while i < bytes.len() {
        match bytes[i] {
            b'.' => {
                // A dot is only valid between steps.
                if steps.is_empty() || i + 1 >= bytes.len() {
                    return Err(malformed());
                }
                i += 1;
            }
            b'[' => {
                let close = spec[i..].find(']').ok_or_else(malformed)? + i;
                let index: usize = spec[i + 1..close].parse().map_err(|_| malformed())?;
                steps.push(ExtractionStep::Index(index));
                i = close + 1;
            }
            _ => {
                let rest = &spec[i..];
                let end = rest
                    .find(|c| c == '.' || c == '[')
                    .unwrap_or(rest.len());
                if end == 0 {
                    return Err(malformed());
                }
                steps.push(ExtractionStep::Member(rest[..end].to_string()));
                i += end;
            }
        }
    }

    if steps.is_empty() {
        return Err(malformed());
    }
    Ok(steps)
}
