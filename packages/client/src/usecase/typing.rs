//! UseCase: タイピング表示
//!
//! Each participant owns `rooms/{rid}/typing/{uid}`. The flag is removed by
//! the store if the connection is lost.

use std::sync::Arc;

use pairchat_server::domain::{
    DisconnectAction, SharedStore, StoreError, Subscription, ValueSnapshot,
};
use serde_json::json;

use crate::domain::{RoomId, UserId, layout};

/// タイピング表示のユースケース
pub struct TypingIndicator {
    store: Arc<dyn SharedStore>,
}

impl TypingIndicator {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Write the own flag as `false` and register its disconnect cleanup.
    pub async fn init(&self, room_id: &RoomId, self_id: &UserId) -> Result<(), StoreError> {
        let path = layout::typing(room_id, self_id)?;
        self.store.set(&path, json!(false)).await?;
        self.store.on_disconnect(&path, DisconnectAction::Remove).await
    }

    pub async fn set_typing(
        &self,
        room_id: &RoomId,
        self_id: &UserId,
        typing: bool,
    ) -> Result<(), StoreError> {
        self.store
            .set(&layout::typing(room_id, self_id)?, json!(typing))
            .await
    }

    /// Remove the own flag and drop its disconnect cleanup.
    pub async fn clear(&self, room_id: &RoomId, self_id: &UserId) -> Result<(), StoreError> {
        let path = layout::typing(room_id, self_id)?;
        self.store.cancel_on_disconnect(&path).await?;
        self.store.remove(&path).await
    }

    /// Watch the peer's flag.
    pub async fn subscribe_peer(
        &self,
        room_id: &RoomId,
        peer_id: &UserId,
    ) -> Result<Subscription<ValueSnapshot>, StoreError> {
        self.store
            .subscribe_value(&layout::typing(room_id, peer_id)?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecase::RoomLifecycle;
    use pairchat_server::infrastructure::memory::MemoryStore;

    #[tokio::test]
    async fn test_peer_sees_typing_changes() {
        // テスト項目: 相手のタイピング状態の変化が購読で届く
        // given (前提条件):
        let store = MemoryStore::default();
        let alice_connection = Arc::new(store.connect());
        let a: Arc<dyn SharedStore> = alice_connection.clone();
        let b: Arc<dyn SharedStore> = Arc::new(store.connect());
        let alice = UserId::new(a.sign_in_anonymously().await.unwrap()).unwrap();
        let bob = UserId::new(b.sign_in_anonymously().await.unwrap()).unwrap();
        let room_id = RoomLifecycle::new(a.clone()).create_room(&alice, &bob).await.unwrap();
        let alice_typing = TypingIndicator::new(a);
        let mut watch = TypingIndicator::new(b)
            .subscribe_peer(&room_id, &alice)
            .await
            .unwrap();

        // when (操作):
        alice_typing.init(&room_id, &alice).await.unwrap();
        alice_typing.set_typing(&room_id, &alice, true).await.unwrap();
        alice_connection.disconnect().await;

        // then (期待する結果):
        let values: Vec<_> = std::iter::from_fn(|| watch.try_recv())
            .map(|snapshot| snapshot.value)
            .collect();
        assert_eq!(values, vec![None, Some(json!(false)), Some(json!(true)), None]);
    }

    #[tokio::test]
    async fn test_cannot_write_peer_flag() {
        // テスト項目: 相手のタイピングフラグは書き込めない
        // given (前提条件):
        let store = MemoryStore::default();
        let a: Arc<dyn SharedStore> = Arc::new(store.connect());
        let b: Arc<dyn SharedStore> = Arc::new(store.connect());
        let alice = UserId::new(a.sign_in_anonymously().await.unwrap()).unwrap();
        let bob = UserId::new(b.sign_in_anonymously().await.unwrap()).unwrap();
        let room_id = RoomLifecycle::new(a.clone()).create_room(&alice, &bob).await.unwrap();

        // when (操作):
        let result = TypingIndicator::new(a).set_typing(&room_id, &bob, true).await;

        // then (期待する結果):
        assert!(matches!(result, Err(StoreError::PermissionDenied { .. })));
    }
}
