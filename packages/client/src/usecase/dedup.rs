//! UseCase: メッセージの重複排除
//!
//! Write side: the message id is derived from the sender, the normalized text
//! and the time bucket, and the record is written create-only, so a repeated
//! send within one bucket lands on the existing record.
//!
//! Read side: [`RenderFilter`] keeps the ids already rendered plus a short
//! lived cache of content signatures, which hides duplicates that were stored
//! under different ids.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use pairchat_server::domain::{
    ChildAdded, ChildQuery, SharedStore, StoreError, Subscription,
};
use pairchat_shared::time::Clock;

use crate::domain::{
    MessageId, MessageRecord, MessageSignature, MessageText, RoomId, SessionConfig, UserId,
    layout,
    message::time_bucket,
};

use super::error::SendError;

/// Field the message list is ordered by
const ORDER_BY: &str = "serverTimestamp";

/// Result of a successful send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// A new record was written
    Stored(MessageId),
    /// The same message was already stored in this bucket
    Duplicate(MessageId),
}

impl SendOutcome {
    pub fn id(&self) -> &MessageId {
        match self {
            SendOutcome::Stored(id) | SendOutcome::Duplicate(id) => id,
        }
    }
}

/// メッセージ送信・購読のユースケース
pub struct MessageDedup {
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
    bucket_width_ms: i64,
    max_text_len: usize,
}

impl MessageDedup {
    pub fn new(store: Arc<dyn SharedStore>, clock: Arc<dyn Clock>, config: &SessionConfig) -> Self {
        Self {
            store,
            clock,
            bucket_width_ms: config.bucket_width_ms,
            max_text_len: config.max_text_len,
        }
    }

    /// Validate and store a message.
    ///
    /// # Errors
    ///
    /// Empty or over-long text is rejected before anything is written.
    pub async fn send(
        &self,
        room_id: &RoomId,
        sender: &UserId,
        raw: &str,
    ) -> Result<SendOutcome, SendError> {
        let text = MessageText::new(raw, self.max_text_len)?;
        let now = self.clock.now_millis();
        let id = MessageId::derive(sender, text.as_str(), time_bucket(now, self.bucket_width_ms));
        let path = layout::message(room_id, &id)?;

        match self
            .store
            .create(&path, MessageRecord::creation_value(&id, sender, &text, now))
            .await
        {
            Ok(()) => {
                tracing::debug!("Stored message '{}' in room '{}'", id, room_id);
                Ok(SendOutcome::Stored(id))
            }
            Err(e) if e.is_already_exists() => {
                tracing::debug!("Message '{}' already stored in room '{}'", id, room_id);
                Ok(SendOutcome::Duplicate(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Subscribe to the last `history_limit` messages of the room, then to new ones.
    pub async fn subscribe(
        &self,
        room_id: &RoomId,
        history_limit: usize,
    ) -> Result<Subscription<ChildAdded>, StoreError> {
        let query = ChildQuery::new(layout::messages(room_id)?)
            .order_by_child(ORDER_BY)
            .limit_to_last(history_limit);
        self.store.subscribe_children(query).await
    }
}

/// Decides whether an arriving message is rendered
#[derive(Debug)]
pub struct RenderFilter {
    capacity: usize,
    order: VecDeque<String>,
    rendered: HashSet<String>,
    signatures: HashMap<MessageSignature, i64>,
    horizon_ms: i64,
    bucket_width_ms: i64,
}

impl RenderFilter {
    pub fn new(capacity: usize, horizon_ms: i64, bucket_width_ms: i64) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            rendered: HashSet::new(),
            signatures: HashMap::new(),
            horizon_ms,
            bucket_width_ms,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.rendered_capacity(),
            config.signature_horizon_ms,
            config.bucket_width_ms,
        )
    }

    /// `true` if `record` has not been rendered yet; it is then remembered.
    ///
    /// Content signatures only apply to records stored under non-derived ids;
    /// a derived id already encodes the sender's own bucket.
    pub fn admit(&mut self, record: &MessageRecord, now: i64) -> bool {
        if self.rendered.contains(&record.id) {
            return false;
        }
        if MessageId::is_derived(&record.id) {
            self.remember(record.id.clone());
            return true;
        }

        let horizon_ms = self.horizon_ms;
        self.signatures.retain(|_, seen| now - *seen <= horizon_ms);

        let signature = record.signature(self.bucket_width_ms);
        let duplicate = self.signatures.contains_key(&signature);
        if !duplicate {
            self.signatures.insert(signature, now);
        }
        self.remember(record.id.clone());
        !duplicate
    }

    pub fn reset(&mut self) {
        self.order.clear();
        self.rendered.clear();
        self.signatures.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.rendered.len()
    }

    fn remember(&mut self, id: String) {
        if self.rendered.insert(id.clone()) {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.rendered.remove(&oldest);
            }
        }
    }
}
