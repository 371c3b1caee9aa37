//! Error types for the ordering engine

use crate::api::TaskRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, KanbanError>;

/// Errors that can occur in engine operations
#[derive(Debug, Error)]
pub enum KanbanError {
    /// Task not found on the board
    #[error("task not found: {id}")]
    ItemNotFound { id: String },

    /// List not found on the board
    #[error("list not found: {id}")]
    ListNotFound { id: String },

    /// Move intent names a source list the task is not in
    #[error("task '{item}' is in list '{actual}', not '{expected}'")]
    SourceMismatch {
        item: String,
        expected: String,
        actual: String,
    },

    /// Task id already present on the board
    #[error("duplicate task ID: {id}")]
    DuplicateItem { id: String },

    /// No position exists strictly between the two neighbours
    #[error("no position available between {prev} and {next}")]
    ExhaustedPrecision { prev: String, next: String },

    /// Invalid field value
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    /// Failure reported by the Task/List API
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// The board session task has stopped
    #[error("board session closed")]
    SessionClosed,

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KanbanError {
    /// Create a task-not-found error
    pub fn item_not_found(id: impl ToString) -> Self {
        Self::ItemNotFound { id: id.to_string() }
    }

    /// Create a list-not-found error
    pub fn list_not_found(id: impl ToString) -> Self {
        Self::ListNotFound { id: id.to_string() }
    }

    /// Create an invalid value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a precision exhaustion error
    pub fn exhausted(prev: Option<impl ToString>, next: Option<impl ToString>) -> Self {
        Self::ExhaustedPrecision {
            prev: prev.map_or_else(|| "start".to_string(), |p| p.to_string()),
            next: next.map_or_else(|| "end".to_string(), |n| n.to_string()),
        }
    }

    /// Malformed request rejected before any state changed
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::ItemNotFound { .. }
                | Self::ListNotFound { .. }
                | Self::SourceMismatch { .. }
                | Self::DuplicateItem { .. }
                | Self::InvalidValue { .. }
        )
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_transient())
    }
}

/// How a failed call should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient; worth one more attempt
    Network,
    /// The server answered and refused; never retried
    External,
}

/// Failures reported by the Task/List API collaborator
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApiError {
    /// Connection failed or dropped
    #[error("network failure: {message}")]
    Network { message: String },

    /// No response within the confirmation window
    #[error("request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// Missing or invalid bearer credential
    #[error("unauthorized")]
    Unauthorized,

    /// Credential valid but not allowed
    #[error("forbidden")]
    Forbidden,

    /// Target task or list no longer exists
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    /// Stale-parent conflict; carries the server's current record when known
    #[error("conflict: {message}")]
    Conflict {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current: Option<Box<TaskRecord>>,
    },

    /// Request failed validation on the server
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Server-side failure
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Response body did not match the contract
    #[error("malformed response: {message}")]
    Decode { message: String },
}

impl ApiError {
    /// Create a network failure
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(resource: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.to_string(),
        }
    }

    /// Create a conflict carrying the server's current record
    pub fn conflict(message: impl Into<String>, current: Option<TaskRecord>) -> Self {
        Self::Conflict {
            message: message.into(),
            current: current.map(Box::new),
        }
    }

    /// Network failures and timeouts are transient; everything else is final
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }

    pub fn kind(&self) -> FailureKind {
        if self.is_transient() {
            FailureKind::Network
        } else {
            FailureKind::External
        }
    }
}
