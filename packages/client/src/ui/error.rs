//! Error types for the terminal client.

use thiserror::Error;

use crate::usecase::SessionError;

/// Client-specific errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// The store server could not be reached or the connection dropped
    #[error("Connection error: {0}")]
    Connection(String),

    /// The session stopped with an error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// The terminal could not be used for input
    #[error("Input error: {0}")]
    Input(String),
}
