//! UseCase: マッチ通知メールボックス
//!
//! The pairer writes the room assignment into the waiter's mailbox; the waiter
//! watches its own mailbox and consumes the first assignment it sees.

use std::sync::Arc;

use pairchat_server::domain::{
    DisconnectAction, SharedStore, StorePath, Subscription, Value, ValueSnapshot,
};

use crate::domain::{MatchAssignment, RoomId, UserId, layout};

use super::error::MailboxError;

/// マッチ通知のユースケース
pub struct MatchMailbox {
    store: Arc<dyn SharedStore>,
}

impl MatchMailbox {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Path and value of an assignment for `recipient`, for use in a batch.
    ///
    /// Delivering to the sender's own mailbox is rejected.
    pub fn assignment_write(
        sender: &UserId,
        recipient: &UserId,
        room_id: &RoomId,
    ) -> Result<(StorePath, Value), MailboxError> {
        if sender == recipient {
            return Err(MailboxError::SelfDelivery);
        }
        let path = layout::mailbox(recipient)?;
        Ok((path, MatchAssignment::delivery_value(room_id, sender)))
    }

    /// Write an assignment to `recipient`'s mailbox on its own.
    ///
    /// Pairing never uses this: the assignment is written by
    /// [`MatchMailbox::assignment_write`] inside the room-creation batch.
    pub async fn deliver(
        &self,
        sender: &UserId,
        recipient: &UserId,
        room_id: &RoomId,
    ) -> Result<(), MailboxError> {
        let (path, value) = Self::assignment_write(sender, recipient, room_id)?;
        self.store.set(&path, value).await?;
        tracing::debug!("Delivered room '{}' to '{}'", room_id, recipient);
        Ok(())
    }

    /// Watch the caller's own mailbox.
    pub async fn subscribe(&self, self_id: &UserId) -> Result<MailboxWatch, MailboxError> {
        let subscription = self.store.subscribe_value(&layout::mailbox(self_id)?).await?;
        Ok(MailboxWatch { subscription })
    }

    pub async fn clear(&self, self_id: &UserId) -> Result<(), MailboxError> {
        self.store.remove(&layout::mailbox(self_id)?).await?;
        Ok(())
    }

    /// Remove the caller's mailbox when its connection is lost.
    pub async fn register_disconnect_cleanup(&self, self_id: &UserId) -> Result<(), MailboxError> {
        self.store
            .on_disconnect(&layout::mailbox(self_id)?, DisconnectAction::Remove)
            .await?;
        Ok(())
    }
}

/// Subscription on the caller's mailbox yielding assignments only
#[derive(Debug)]
pub struct MailboxWatch {
    subscription: Subscription<ValueSnapshot>,
}

impl MailboxWatch {
    /// Wait for the next assignment. `None` when the subscription has ended.
    pub async fn next_assignment(&mut self) -> Option<MatchAssignment> {
        loop {
            let snapshot = self.subscription.recv().await?;
            if let Some(assignment) = parse_snapshot(snapshot) {
                return Some(assignment);
            }
        }
    }

    /// Next already delivered assignment, without waiting.
    pub fn try_next_assignment(&mut self) -> Option<MatchAssignment> {
        while let Some(snapshot) = self.subscription.try_recv() {
            if let Some(assignment) = parse_snapshot(snapshot) {
                return Some(assignment);
            }
        }
        None
    }

    pub fn unsubscribe(&mut self) {
        self.subscription.unsubscribe();
    }
}

fn parse_snapshot(snapshot: ValueSnapshot) -> Option<MatchAssignment> {
    let value = snapshot.value?;
    let assignment = MatchAssignment::parse(&value);
    if assignment.is_none() {
        tracing::warn!("Ignoring malformed match assignment at '{}': {}", snapshot.path, value);
    }
    assignment
}
