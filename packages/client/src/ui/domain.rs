//! Domain logic for client-side operations.
//!
//! Pure functions deciding how the terminal reacts to errors and input,
//! kept free of side effects so they are easy to test.

use crate::domain::SessionCommand;

use super::error::ClientError;

/// What a line typed by the user asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAction {
    Command(SessionCommand),
    Help,
    Quit,
    Unknown(String),
}

/// Parse one input line. Lines not starting with `/` are chat messages.
pub fn parse_input(line: &str) -> InputAction {
    let trimmed = line.trim();
    if !trimmed.starts_with('/') {
        return InputAction::Command(SessionCommand::Send(trimmed.to_string()));
    }

    match trimmed.to_lowercase().as_str() {
        "/find" => InputAction::Command(SessionCommand::Find),
        "/next" => InputAction::Command(SessionCommand::Next),
        "/leave" => InputAction::Command(SessionCommand::Leave),
        "/help" => InputAction::Help,
        "/quit" | "/exit" => InputAction::Quit,
        _ => InputAction::Unknown(trimmed.to_string()),
    }
}

/// Check if the client should exit immediately based on the error type.
///
/// Only a lost connection is worth reconnecting for.
pub fn should_exit_immediately(error: &ClientError) -> bool {
    match error {
        ClientError::Connection(_) => false,
        ClientError::Session(e) => !e.is_connection_lost(),
        ClientError::Input(_) => true,
    }
}

/// Check if the client should attempt to reconnect.
///
/// # Arguments
///
/// * `error` - The client error that occurred
/// * `current_attempt` - The current reconnection attempt count (0-indexed)
/// * `max_attempts` - The maximum number of reconnection attempts allowed
pub fn should_attempt_reconnect(
    error: &ClientError,
    current_attempt: u32,
    max_attempts: u32,
) -> bool {
    if should_exit_immediately(error) {
        return false;
    }
    current_attempt < max_attempts
}
