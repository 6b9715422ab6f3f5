//! Configuration-file loading.
//!
//! A configuration file declares a set of Observations and a set of state
//! values:
//!
//! ```json
//! {
//!   "o": {
//!     "room-temp": {
//!       "r": "/app/sensor/temp",
//!       "p": 1.5,
//!       "st": 0.5,
//!       "lt": -40.0,
//!       "gt": 85.0,
//!       "b": 100,
//!       "f": "mean",
//!       "s": "x.y",
//!       "d": "cloud"
//!     }
//!   },
//!   "s": {
//!     "/app/actuator/setpoint": { "v": 21.0, "dt": "n" }
//!   }
//! }
//! ```
//!
//! Observation fields: `r` source path, `d` destination label, `p` minimum
//! period, `st` change-by step, `lt`/`gt` low/high limits, `b` buffer size,
//! `f` transform name, `s` JSON extraction spec. State entries install a
//! default value on the target resource (`dt` selects the sample type;
//! inferred from the JSON value when absent) and push it.
//!
//! Loading replaces the observation set previously installed via
//! configuration: config-marked observations absent from the new file are
//! deleted. The whole load runs inside an update barrier. Parse errors
//! report the byte offset of the failure.

use crate::error::{HubError, Result};
use crate::hub::Hub;
use crate::sample::Value;
use crate::service::AdminService;
use crate::types::{DataType, TransformType};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct ConfigFile {
    /// Observations, keyed by name under `/obs`.
    #[serde(default)]
    o: BTreeMap<String, ObservationEntry>,
    /// State values, keyed by absolute resource path.
    #[serde(default)]
    s: BTreeMap<String, StateEntry>,
}

#[derive(Debug, Deserialize)]
struct ObservationEntry {
    /// Source resource path.
    r: String,
    /// Destination label or path.
    #[serde(default)]
    d: Option<String>,
    /// Minimum period, seconds.
    #[serde(default)]
    p: Option<f64>,
    /// Change-by step.
    #[serde(default)]
    st: Option<f64>,
    /// Low limit.
    #[serde(default)]
    lt: Option<f64>,
    /// High limit.
    #[serde(default)]
    gt: Option<f64>,
    /// Buffer max count.
    #[serde(default)]
    b: Option<u32>,
    /// Transform name.
    #[serde(default)]
    f: Option<String>,
    /// JSON extraction spec.
    #[serde(default)]
    s: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StateEntry {
    v: serde_json::Value,
    #[serde(default)]
    dt: Option<String>,
}

/// Load a configuration file and apply it to the hub.
pub fn load_file(hub: &mut Hub, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| HubError::Fault(format!("cannot read '{}': {}", path.display(), e)))?;
    apply(hub, &text).map_err(|e| match e {
        HubError::FormatError(msg) => {
            HubError::FormatError(format!("{}: {}", path.display(), msg))
        }
        other => other,
    })
}

/// Apply configuration text to the hub.
pub fn apply(hub: &mut Hub, text: &str) -> Result<()> {
    let parsed: ConfigFile = serde_json::from_str(text).map_err(|e| {
        HubError::FormatError(format!(
            "parse error at byte {}: {}",
            byte_offset(text, e.line(), e.column()),
            e
        ))
    })?;

    // Remember what the previous configuration installed, so the stale
    // remainder can be swept afterwards.
    let previous: Vec<String> = hub
        .config_observations()
        .into_iter()
        .map(|id| hub.absolute_path(id))
        .collect();

    hub.start_update();
    let result = apply_inner(hub, &parsed, &previous);
    hub.end_update();
    result
}

fn apply_inner(hub: &mut Hub, parsed: &ConfigFile, previous: &[String]) -> Result<()> {
    let mut admin = AdminService::new(hub);

    for (name, entry) in &parsed.o {
        if let Err(e) = apply_observation(&mut admin, name, entry) {
            tracing::warn!("config observation '{}' not applied: {}", name, e);
        }
    }

    // Sweep config-installed observations that the new file no longer
    // declares.
    for path in previous {
        let name = path.trim_start_matches("/obs/");
        if !parsed.o.contains_key(name) {
            if let Err(e) = admin.delete_observation(path) {
                tracing::warn!("failed to delete stale config observation '{}': {}", path, e);
            }
        }
    }

    for (path, entry) in &parsed.s {
        if let Err(e) = apply_state(&mut admin, path, entry) {
            tracing::warn!("config state '{}' not applied: {}", path, e);
        }
    }

    Ok(())
}

fn apply_observation(
    admin: &mut AdminService<'_>,
    name: &str,
    entry: &ObservationEntry,
) -> Result<()> {
    admin.create_observation(name)?;
    admin.mark_observation_as_config(name)?;

    // Route the source, creating a placeholder when the producer has not
    // appeared yet.
    admin.ensure_resource(&entry.r)?;
    admin.set_source(name, Some(&entry.r))?;

    if let Some(d) = &entry.d {
        admin.set_destination(name, d)?;
    }
    if let Some(p) = entry.p {
        admin.set_min_period(name, p)?;
    }
    if let Some(st) = entry.st {
        admin.set_change_by(name, st)?;
    }
    if let Some(lt) = entry.lt {
        admin.set_low_limit(name, lt)?;
    }
    if let Some(gt) = entry.gt {
        admin.set_high_limit(name, gt)?;
    }
    if let Some(b) = entry.b {
        admin.set_buffer_max_count(name, b)?;
    }
    if let Some(f) = &entry.f {
        admin.set_transform(name, TransformType::from_config_str(f))?;
    }
    if let Some(s) = &entry.s {
        admin.set_json_extraction(name, s)?;
    }
    Ok(())
}

fn apply_state(admin: &mut AdminService<'_>, path: &str, entry: &StateEntry) -> Result<()> {
    let value = state_value(&entry.v, entry.dt.as_deref())?;
    admin.ensure_resource(path)?;
    admin.set_default(path, value)
}

/// Build a sample value from a config state entry.
fn state_value(v: &serde_json::Value, dt: Option<&str>) -> Result<Value> {
    let data_type = match dt {
        Some(code) => DataType::from_code(code).ok_or_else(|| {
            HubError::FormatError(format!("unknown data type code '{}'", code))
        })?,
        None => match v {
            serde_json::Value::Null => DataType::Trigger,
            serde_json::Value::Bool(_) => DataType::Boolean,
            serde_json::Value::Number(_) => DataType::Numeric,
            serde_json::Value::String(_) => DataType::String,
            _ => DataType::Json,
        },
    };

    let mismatch = || HubError::FormatError(format!("value {} does not match type", v));
    Ok(match data_type {
        DataType::Trigger => Value::Trigger,
        DataType::Boolean => Value::Bool(v.as_bool().ok_or_else(mismatch)?),
        DataType::Numeric => Value::Numeric(v.as_f64().ok_or_else(mismatch)?),
        DataType::String => Value::String(v.as_str().ok_or_else(mismatch)?.to_string()),
        DataType::Json => Value::Json(v.to_string()),
    })
}

/// Translate serde_json's 1-based line/column into a byte offset.
fn byte_offset(text: &str, line: usize, column: usize) -> usize {
    let mut offset = 0;
    for (i, l) in text.split('\n').enumerate() {
        if i + 1 == line {
            return offset + column.saturating_sub(1);
        }
        offset += l.len() + 1;
    }
    offset
}
