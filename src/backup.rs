//! Observation buffer backups.
//!
//! An observation with a non-zero buffer and a non-zero backup period has
//! its buffer persisted to a hub-private directory, no more often than the
//! period allows. The file is a JSON object holding the sample type, the
//! buffer capacity and the `{t, v}` records; it is restored when an
//! observation is first created at a path that has an existing backup.
//!
//! Files are named by resource path under the backup directory, e.g. the
//! observation `/obs/o1` backs up to `<backup_dir>/obs/o1.json`.

use crate::error::{HubError, Result};
use crate::resource::observation::ObservationBody;
use crate::sample::{DataSample, Value};
use crate::types::DataType;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Contents of a restored backup file.
pub(crate) struct RestoredBackup {
    pub data_type: DataType,
    pub buffer_max: u32,
    pub samples: Vec<Rc<DataSample>>,
}

/// The on-disk file for an observation path.
pub(crate) fn backup_file_path(backup_dir: &Path, resource_path: &str) -> PathBuf {
    let relative = resource_path.trim_start_matches('/');
    backup_dir.join(format!("{}.json", relative))
}

/// Persist an observation's buffer.
pub(crate) fn write_backup(
    backup_dir: &Path,
    resource_path: &str,
    obs: &ObservationBody,
) -> Result<()> {
    let file_path = backup_file_path(backup_dir, resource_path);
    if let Some(parent) = file_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let samples: Vec<serde_json::Value> = obs
        .buffer
        .iter()
        .map(|sample| {
            let mut record = serde_json::Map::new();
            record.insert("t".to_string(), json_number(sample.timestamp()));
            match sample.value() {
                Value::Trigger => {}
                Value::Bool(v) => {
                    record.insert("v".to_string(), serde_json::Value::Bool(*v));
                }
                Value::Numeric(v) => {
                    record.insert("v".to_string(), json_number(*v));
                }
                Value::String(s) => {
                    record.insert("v".to_string(), serde_json::Value::String(s.clone()));
                }
                Value::Json(j) => {
                    let parsed = serde_json::from_str(j)
                        .unwrap_or_else(|_| serde_json::Value::String(j.clone()));
                    record.insert("v".to_string(), parsed);
                }
            }
            serde_json::Value::Object(record)
        })
        .collect();

    let doc = serde_json::json!({
        "dt": obs.buffer_type.code(),
        "max": obs.buffer_max,
        "samples": samples,
    });

    // Write whole-file then rename, so a crash never leaves a torn backup.
    let tmp_path = file_path.with_extension("json.tmp");
    std::fs::write(&tmp_path, doc.to_string())?;
    std::fs::rename(&tmp_path, &file_path)?;
    Ok(())
}

/// Load the backup for an observation path, if one exists.
pub(crate) fn read_backup(
    backup_dir: &Path,
    resource_path: &str,
) -> Result<Option<RestoredBackup>> {
    let file_path = backup_file_path(backup_dir, resource_path);
    let text = match std::fs::read_to_string(&file_path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let doc: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| HubError::FormatError(format!("corrupt backup file: {}", e)))?;

    let data_type = doc
        .get("dt")
        .and_then(|v| v.as_str())
        .and_then(DataType::from_code)
        .ok_or_else(|| HubError::FormatError("backup missing data type".to_string()))?;
    let buffer_max = doc.get("max").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

    let mut samples = Vec::new();
    if let Some(records) = doc.get("samples").and_then(|v| v.as_array()) {
        for record in records {
            let t = record
                .get("t")
                .and_then(|v| v.as_f64())
                .ok_or_else(|| HubError::FormatError("backup record missing 't'".to_string()))?;
            let sample = match (data_type, record.get("v")) {
                (DataType::Trigger, _) => DataSample::trigger(t),
                (DataType::Boolean, Some(v)) => {
                    DataSample::boolean(t, v.as_bool().unwrap_or(false))
                }
                (DataType::Numeric, Some(v)) => {
                    DataSample::numeric(t, v.as_f64().unwrap_or(f64::NAN))
                }
                (DataType::String, Some(v)) => {
                    DataSample::string(t, v.as_str().unwrap_or_default())?
                }
                (DataType::Json, Some(v)) => DataSample::json(t, v.to_string())?,
                (_, None) => {
                    return Err(HubError::FormatError(
                        "backup record missing 'v'".to_string(),
                    ))
                }
            };
            samples.push(sample);
        }
    }

    Ok(Some(RestoredBackup {
        data_type,
        buffer_max,
        samples,
    }))
}

/// Remove the backup file for an observation path, if present.
pub(crate) fn delete_backup(backup_dir: &Path, resource_path: &str) {
    let file_path = backup_file_path(backup_dir, resource_path);
    if let Err(e) = std::fs::remove_file(&file_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("failed to delete backup '{}': {}", file_path.display(), e);
        }
    }
}

/// Encode an f64 as a JSON number, falling back to null for NaN/inf (which
/// JSON cannot represent).
fn json_number(v: f64) -> serde_json::Value {
    serde_json::Number::from_f64(v)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}
