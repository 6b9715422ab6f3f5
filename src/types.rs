//! Common types and constants shared across the hub.
//!
//! # Main Types
//!
//! - [`DataType`] - The five sample types a resource can carry
//! - [`EntryType`] - The kind of a resource tree entry
//! - [`TransformType`] - Buffer transforms available on Observations
//! - [`ResourceOperation`] - Add/remove notifications for tree change handlers
//!
//! # Path Rules
//!
//! A path is a sequence of non-empty `/`-separated segments. Segments may
//! not contain `.`, `[` or `]`. Paths starting with `/` are absolute;
//! otherwise they are resolved relative to a base namespace (root, the
//! `/obs` namespace, or a client app namespace).

use crate::error::{HubError, Result};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum payload size of a string or JSON sample, in bytes.
pub const MAX_STRING_BYTES: usize = 1023;

/// Maximum length of a single resource tree entry name, in bytes.
pub const MAX_ENTRY_NAME_BYTES: usize = 32;

/// Maximum length of a full resource path, in bytes.
pub const MAX_RESOURCE_PATH_BYTES: usize = 256;

/// `since` value requesting a full (non-delta) snapshot.
pub const BEGINNING_OF_TIME: f64 = 0.0;

/// Window-start values below this many seconds are interpreted as
/// relative-from-now; values at or above it as absolute epoch seconds.
/// Thirty years, ignoring leap days.
pub const THIRTY_YEARS_SECS: f64 = 30.0 * 365.0 * 24.0 * 3600.0;

/// The data type of a sample or of an Input/Output resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Timestamp only, no value.
    Trigger,
    Boolean,
    Numeric,
    String,
    Json,
}

impl DataType {
    /// Human-readable name, used in logs and snapshot encodings.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Trigger => "trigger",
            DataType::Boolean => "boolean",
            DataType::Numeric => "numeric",
            DataType::String => "string",
            DataType::Json => "json",
        }
    }

    /// Single-letter code used by the config file schema and backup files.
    pub fn code(&self) -> &'static str {
        match self {
            DataType::Trigger => "t",
            DataType::Boolean => "b",
            DataType::Numeric => "n",
            DataType::String => "s",
            DataType::Json => "j",
        }
    }

    /// Parse a single-letter code.
    pub fn from_code(code: &str) -> Option<DataType> {
        match code {
            "t" => Some(DataType::Trigger),
            "b" => Some(DataType::Boolean),
            "n" => Some(DataType::Numeric),
            "s" => Some(DataType::String),
            "j" => Some(DataType::Json),
            _ => None,
        }
    }
}

/// The kind of a resource tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// Inner tree node with no value and no policy.
    Namespace,
    /// Admin-settings-only stand-in for an absent I/O resource.
    Placeholder,
    /// App-facing producer endpoint.
    Input,
    /// App-facing consumer endpoint.
    Output,
    /// Admin-created interposer with filters, transform, buffer and backup.
    Observation,
}

impl EntryType {
    pub fn name(&self) -> &'static str {
        match self {
            EntryType::Namespace => "namespace",
            EntryType::Placeholder => "placeholder",
            EntryType::Input => "input",
            EntryType::Output => "output",
            EntryType::Observation => "observation",
        }
    }
}

/// Transform applied by an Observation to the buffered window on acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformType {
    /// Pass-through.
    #[default]
    None,
    Mean,
    StdDev,
    Min,
    Max,
}

impl TransformType {
    /// Parse the config-file transform string. Unknown strings map to `None`.
    pub fn from_config_str(s: &str) -> TransformType {
        match s {
            "mean" => TransformType::Mean,
            "stddev" => TransformType::StdDev,
            "min" => TransformType::Min,
            "max" => TransformType::Max,
            _ => TransformType::None,
        }
    }
}

/// Operation reported to resource tree change handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceOperation {
    Added,
    Removed,
}

/// Current wall-clock time in seconds since the Unix epoch.
pub fn now_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Resolve a window-start parameter against the current time.
///
/// Values below [`THIRTY_YEARS_SECS`] are seconds-before-now; larger values
/// are absolute epoch seconds. NaN means "the whole buffer" and resolves to
/// negative infinity.
pub fn resolve_window_start(start: f64, now: f64) -> f64 {
    if start.is_nan() {
        f64::NEG_INFINITY
    } else if start < THIRTY_YEARS_SECS {
        now - start
    } else {
        start
    }
}

/// Validate a resource path: non-empty segments, no forbidden characters,
/// length limits. An empty path (or a bare `/`) names the base entry
/// itself and is valid.
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() || path == "/" {
        return Ok(());
    }
    if path.len() > MAX_RESOURCE_PATH_BYTES {
        return Err(HubError::BadParameter(format!(
            "path longer than {} bytes",
            MAX_RESOURCE_PATH_BYTES
        )));
    }
    if let Some(c) = path.chars().find(|c| matches!(c, '.' | '[' | ']')) {
        return Err(HubError::BadParameter(format!(
            "illegal character '{}' in path '{}'",
            c, path
        )));
    }
    for segment in path.trim_start_matches('/').split('/') {
        if segment.is_empty() {
            return Err(HubError::BadParameter(format!(
                "resource path element missing in path '{}'",
                path
            )));
        }
        if segment.len() > MAX_ENTRY_NAME_BYTES {
            return Err(HubError::BadParameter(format!(
                "resource path element too long in path '{}'",
                path
            )));
        }
    }
    Ok(())
}

/// Whether two unit strings are compatible on a routed pair.
///
/// Empty means unspecified and is compatible with anything; otherwise
/// equality is exact byte comparison.
pub fn units_compatible(a: &str, b: &str) -> bool {
    a.is_empty() || b.is_empty() || a == b
}
