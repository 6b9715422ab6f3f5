//! Error handling for the Data Hub
//!
//! This module defines the error taxonomy used uniformly across all hub
//! interfaces (I/O, admin, query, config) and a Result alias for use
//! throughout the crate.

use thiserror::Error;

/// Main error type for Data Hub operations.
///
/// The taxonomy is shared by every service facade; a given operation
/// documents which subset it can return.
#[derive(Error, Debug)]
pub enum HubError {
    /// No entry exists at the given path.
    #[error("not found")]
    NotFound,

    /// The path exists but the resource has no value yet.
    #[error("no value available")]
    Unavailable,

    /// Conflicting definition, or a routing change that would create a loop.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// Malformed path, wrong type, invalid JSON, or unit mismatch.
    #[error("bad parameter: {0}")]
    BadParameter(String),

    /// Allocation failed; the sample was dropped.
    #[error("out of memory")]
    NoMemory,

    /// The caller's buffer or the value size limit is too small.
    #[error("overflow")]
    Overflow,

    /// Blocked because a configuration update is in progress.
    #[error("update in progress")]
    InProgress,

    /// Operation not permitted on this deployment.
    #[error("not permitted")]
    NotPermitted,

    /// Type mismatch on a typed getter, or unparseable input.
    #[error("format error: {0}")]
    FormatError(String),

    /// Unclassified failure.
    #[error("fault: {0}")]
    Fault(String),
}

impl From<std::io::Error> for HubError {
    fn from(err: std::io::Error) -> Self {
        HubError::Fault(err.to_string())
    }
}

/// Result type alias for Data Hub operations.
pub type Result<T> = std::result::Result<T, HubError>;
