//! Use case errors.

use pairchat_server::domain::StoreError;
use thiserror::Error;

use crate::domain::ValidationError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArbiterError {
    #[error("Waiting slot transaction failed: {0}")]
    Store(#[from] StoreError),

    #[error("Waiting slot names an invalid peer: {0}")]
    InvalidPeer(#[from] ValidationError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MailboxError {
    /// A user cannot be matched with themselves
    #[error("Refusing to deliver a match to the sender's own mailbox")]
    SelfDelivery,

    #[error("Mailbox store operation failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RoomError {
    #[error("Room could not be created: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Room store operation failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SendError {
    #[error("{0}")]
    Invalid(#[from] ValidationError),

    #[error("Message could not be stored: {0}")]
    Store(#[from] StoreError),
}

/// Errors surfaced by the session state machine
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("Session is not signed in")]
    NotSignedIn,

    #[error("Store subscription on {0} ended unexpectedly")]
    SubscriptionClosed(&'static str),

    #[error("Store returned an invalid identity: {0}")]
    InvalidIdentity(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Arbiter(#[from] ArbiterError),

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Mailbox(#[from] MailboxError),

    #[error(transparent)]
    Send(#[from] SendError),
}

impl SessionError {
    /// The underlying store error, if any
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            SessionError::Store(e)
            | SessionError::Arbiter(ArbiterError::Store(e))
            | SessionError::Room(RoomError::Store(e))
            | SessionError::Room(RoomError::Mailbox(MailboxError::Store(e)))
            | SessionError::Mailbox(MailboxError::Store(e))
            | SessionError::Send(SendError::Store(e)) => Some(e),
            _ => None,
        }
    }

    /// The store connection is gone; the session cannot continue on it.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, SessionError::SubscriptionClosed(_))
            || matches!(
                self.store_error(),
                Some(StoreError::Disconnected | StoreError::Transport(_))
            )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::SubscriptionClosed(_))
            || self.store_error().is_some_and(StoreError::is_transient)
    }
}
