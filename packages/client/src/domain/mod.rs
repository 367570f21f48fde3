//! Client domain: identities, store layout and the records kept in the store.

pub mod config;
pub mod identity;
pub mod layout;
pub mod mailbox;
pub mod message;
pub mod room;
pub mod session;
pub mod slot;

pub use config::SessionConfig;
pub use identity::{RoomId, UserId, ValidationError};
pub use mailbox::MatchAssignment;
pub use message::{MessageId, MessageRecord, MessageSignature, MessageText};
pub use room::RoomStatus;
pub use session::{Phase, SessionCommand, SessionEvent, SessionStatus};
pub use slot::{SlotDecision, WaitingSlot};
