//! Store error types.

use thiserror::Error;

/// Errors returned by store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A create-only write found an existing value.
    ///
    /// Callers treat this as a non-fatal outcome.
    #[error("Value already exists at '{0}'")]
    AlreadyExists(String),

    /// A write rule rejected the operation
    #[error("Permission denied at '{path}': {reason}")]
    PermissionDenied { path: String, reason: String },

    /// The connection has not signed in yet
    #[error("Connection is not signed in")]
    Unauthenticated,

    /// Malformed path or path segment
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The optimistic transaction kept losing against concurrent writers
    #[error("Transaction on '{path}' gave up after {attempts} attempts")]
    TransactionConflict { path: String, attempts: usize },

    /// The connection is closed
    #[error("Connection closed")]
    Disconnected,

    /// Transport or protocol failure between client and store server
    #[error("Transport error: {0}")]
    Transport(String),
}

impl StoreError {
    /// `true` for the create-only collision, which is an expected outcome.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    /// `true` for errors caused by a lost or failing connection.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Disconnected
                | StoreError::Transport(_)
                | StoreError::TransactionConflict { .. }
        )
    }

    pub(crate) fn denied(path: impl ToString, reason: impl Into<String>) -> Self {
        StoreError::PermissionDenied {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}
