//! Error taxonomy shared by every skyjet crate.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::OperationType;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Provider credentials/configuration could not be established.
    #[error("cannot set up provider: {0}")]
    Setup(String),

    /// Error-severity diagnostics returned by a provider call.
    #[error("{operation} failed: {summary}")]
    Diagnostics { operation: &'static str, summary: String },

    #[error("refusing to update: diff contains attributes that require replacement: {}", .paths.join(", "))]
    ReplaceRequired { paths: Vec<String> },

    #[error("{op} operation that started at {started} is still running{}", .last_error.as_deref().map(|e| format!(" (last error: {e})")).unwrap_or_default())]
    OperationRunning { op: OperationType, started: DateTime<Utc>, last_error: Option<String> },

    #[error("async {op} task panicked: {message}")]
    TaskPanicked { op: OperationType, message: String },

    #[error("async {op} task exceeded its deadline of {timeout:?}")]
    TaskTimeout { op: OperationType, timeout: Duration },

    #[error("cannot convert value at {path}: {reason}")]
    Conversion { path: String, reason: String },

    #[error("value at {path} is not yet known")]
    UnknownValue { path: String },

    #[error("number {value} at {path} cannot be represented as a 64-bit number")]
    NumberOverflow { path: String, value: String },

    #[error("number {value} at {path} underflows a 64-bit float")]
    NumberUnderflow { path: String, value: String },

    #[error("invalid field path {path:?}: {reason}")]
    FieldPath { path: String, reason: String },

    #[error("secret {reference}: {reason}")]
    Secret { reference: String, reason: String },

    #[error("workspace {dir}: {reason}")]
    Workspace { dir: String, reason: String },

    #[error("{0} requires a preceding observe")]
    ObserveRequired(OperationType),

    #[error("provider returned an empty state after {0}")]
    EmptyState(OperationType),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn conversion(path: impl ToString, reason: impl ToString) -> Self {
        Error::Conversion { path: path.to_string(), reason: reason.to_string() }
    }

    pub fn field_path(path: impl ToString, reason: impl ToString) -> Self {
        Error::FieldPath { path: path.to_string(), reason: reason.to_string() }
    }

    /// True for errors reporting a still-running operation.
    pub fn is_operation_running(&self) -> bool { matches!(self, Error::OperationRunning { .. }) }
}
