//! UseCase: ルームの作成と終了
//!
//! A room and the peer's match assignment are written in one multi-path
//! update, so the peer can never observe an assignment for a room that does
//! not exist yet, and a partially created room is never visible.

use std::sync::Arc;

use pairchat_server::domain::{
    SharedStore, Subscription, ValueSnapshot, WriteBatch, server_timestamp,
};
use serde_json::json;

use crate::domain::{RoomId, RoomStatus, UserId, layout, room::Room};

use super::{error::RoomError, mailbox::MatchMailbox};

/// ルームのライフサイクル管理のユースケース
pub struct RoomLifecycle {
    store: Arc<dyn SharedStore>,
}

impl RoomLifecycle {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Create a room for `self_id` and `peer_id` and notify the peer.
    ///
    /// # Errors
    ///
    /// Fails without side effects when the batch is rejected; the caller does
    /// not retry.
    pub async fn create_room(&self, self_id: &UserId, peer_id: &UserId) -> Result<RoomId, RoomError> {
        let room_id = RoomId::generate();
        let (mailbox_path, assignment) = MatchMailbox::assignment_write(self_id, peer_id, &room_id)?;

        let batch = WriteBatch::new()
            .set(
                layout::room(&room_id)?,
                Room::creation_value(&room_id, self_id, peer_id),
            )
            .set(mailbox_path, assignment);
        self.store.update(batch).await?;

        tracing::info!("Room '{}' created for '{}' and '{}'", room_id, self_id, peer_id);
        Ok(room_id)
    }

    /// Mark the room inactive, then remove it.
    ///
    /// Removal is best effort: once `active` is `false` the room is over for
    /// both participants.
    pub async fn end_room(&self, room_id: &RoomId) -> Result<(), RoomError> {
        let batch = WriteBatch::new()
            .set(layout::room_active(room_id)?, json!(false))
            .set(layout::room_ended_at(room_id)?, server_timestamp());
        self.store.update(batch).await?;

        if let Err(e) = self.store.remove(&layout::room(room_id)?).await {
            tracing::warn!("Room '{}' is inactive but could not be removed: {}", room_id, e);
        } else {
            tracing::info!("Room '{}' ended", room_id);
        }
        Ok(())
    }

    pub async fn room_status(&self, room_id: &RoomId) -> Result<RoomStatus, RoomError> {
        let value = self.store.get(&layout::room(room_id)?).await?;
        Ok(RoomStatus::of(value.as_ref()))
    }

    /// Watch the room's `active` flag; the value disappears when the room is removed.
    pub async fn subscribe_active(
        &self,
        room_id: &RoomId,
    ) -> Result<Subscription<ValueSnapshot>, RoomError> {
        Ok(self
            .store
            .subscribe_value(&layout::room_active(room_id)?)
            .await?)
    }
}
