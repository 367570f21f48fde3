//! UseCase: オンライン状態
//!
//! `presence/{uid}` exists while the user is connected; the store removes it
//! when the connection is lost.

use std::sync::Arc;

use pairchat_server::domain::{DisconnectAction, SharedStore, StoreError, server_timestamp};
use serde_json::json;

use crate::domain::{UserId, layout};

/// オンライン状態のユースケース
pub struct Presence {
    store: Arc<dyn SharedStore>,
}

impl Presence {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    pub async fn announce(&self, self_id: &UserId) -> Result<(), StoreError> {
        let path = layout::presence(self_id)?;
        self.store
            .set(&path, json!({ "online": true, "since": server_timestamp() }))
            .await?;
        self.store.on_disconnect(&path, DisconnectAction::Remove).await
    }

    pub async fn withdraw(&self, self_id: &UserId) -> Result<(), StoreError> {
        let path = layout::presence(self_id)?;
        self.store.cancel_on_disconnect(&path).await?;
        self.store.remove(&path).await
    }
}
