//! Classified synchronization errors.

use std::time::Duration;

use ecolearn_common::AppError;
use thiserror::Error;

use crate::row::Table;
use crate::store::StoreError;

/// Result alias for the synchronization core.
pub type SyncResult<T> = Result<T, SyncError>;

/// A store failure classified into the categories the UI reacts to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The store could not be reached or failed internally. Retry is manual.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The request did not resolve in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A uniqueness constraint rejected a write that was already done.
    #[error("duplicate {table} ({key})")]
    Constraint {
        /// Table of the rejected write.
        table: Table,
        /// Unique key columns.
        key: String,
    },

    /// The session is no longer valid.
    #[error("session expired")]
    SessionExpired,

    /// The row or its parent no longer exists.
    #[error("{table} {id} not found")]
    NotFound {
        /// Table of the missing row.
        table: Table,
        /// Missing id.
        id: String,
    },

    /// Input or returned data failed validation.
    #[error("invalid data: {0}")]
    Invalid(String),
}

/// Coarse error class driving rollback and notice behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network failure or timeout.
    Transient,
    /// Benign duplicate.
    Constraint,
    /// Identity rejected; the current flow is abandoned.
    Authorization,
    /// Missing parent or row.
    NotFound,
    /// Rejected input.
    Invalid,
}

impl SyncError {
    /// Classify the error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Transient(_) | Self::Timeout(_) => ErrorClass::Transient,
            Self::Constraint { .. } => ErrorClass::Constraint,
            Self::SessionExpired => ErrorClass::Authorization,
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::Invalid(_) => ErrorClass::Invalid,
        }
    }

    /// Short, actionable text safe to show to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Transient(_) => {
                "Couldn't reach the server. Check your connection and try again.".to_string()
            }
            Self::Timeout(_) => "The request took too long. Please try again.".to_string(),
            Self::Constraint { .. } => "Already done.".to_string(),
            Self::SessionExpired => "Your session has expired. Please sign in again.".to_string(),
            Self::NotFound { .. } => "This item is no longer available.".to_string(),
            Self::Invalid(_) => "Please check your input and try again.".to_string(),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Network(msg) | StoreError::Backend(msg) => Self::Transient(msg),
            StoreError::Constraint { table, key } => Self::Constraint { table, key },
            StoreError::Unauthorized => Self::SessionExpired,
            StoreError::NotFound { table, id } => Self::NotFound { table, id },
            StoreError::Decode { table, message } => Self::Invalid(format!("{table}: {message}")),
            StoreError::UnknownProcedure(name) => Self::Invalid(format!("unknown procedure {name}")),
        }
    }
}

impl From<validator::ValidationErrors> for SyncError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Invalid(err.to_string())
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Transient(msg) => Self::Database(msg),
            SyncError::Timeout(after) => Self::Timeout(format!("{after:?}")),
            SyncError::Constraint { table, key } => Self::Conflict(format!("{table} ({key})")),
            SyncError::SessionExpired => Self::Unauthorized,
            SyncError::NotFound { table, id } => Self::NotFound(format!("{table} {id}")),
            SyncError::Invalid(msg) => Self::Validation(msg),
        }
    }
}
