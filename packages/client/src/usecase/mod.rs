//! Coordination use cases built on the `SharedStore` port.

pub mod arbiter;
pub mod dedup;
pub mod error;
pub mod mailbox;
pub mod presence;
pub mod room_lifecycle;
pub mod session;
pub mod typing;

pub use arbiter::{MatchOutcome, WaitingSlotArbiter};
pub use dedup::{MessageDedup, RenderFilter, SendOutcome};
pub use error::{ArbiterError, MailboxError, RoomError, SendError, SessionError};
pub use mailbox::{MailboxWatch, MatchMailbox};
pub use presence::Presence;
pub use room_lifecycle::RoomLifecycle;
pub use session::SessionStateMachine;
pub use typing::TypingIndicator;
