//! Change subscriptions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{StorePath, Value};

/// Identifier of a subscription, unique per store connection.
pub type SubscriptionId = u64;

/// Current value of a watched node (`None` when the node does not exist).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueSnapshot {
    pub path: StorePath,
    pub value: Option<Value>,
}

/// A child that appeared under a watched node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildAdded {
    pub key: String,
    pub value: Value,
}

/// Removes a subscription from whatever is feeding it.
pub trait SubscriptionCanceller: Send + Sync {
    fn cancel(&self, id: SubscriptionId);
}

/// Handle to a live subscription.
///
/// Events arrive in delivery order. [`Subscription::unsubscribe`] is
/// idempotent and takes effect immediately: events still buffered are
/// discarded. Dropping the handle unsubscribes as well.
pub struct Subscription<T> {
    id: SubscriptionId,
    receiver: Option<mpsc::UnboundedReceiver<T>>,
    canceller: Arc<dyn SubscriptionCanceller>,
}

impl<T> Subscription<T> {
    pub fn new(
        id: SubscriptionId,
        receiver: mpsc::UnboundedReceiver<T>,
        canceller: Arc<dyn SubscriptionCanceller>,
    ) -> Self {
        Self {
            id,
            receiver: Some(receiver),
            canceller,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.receiver.is_some()
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once unsubscribed or when the feeding side has gone away.
    pub async fn recv(&mut self) -> Option<T> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => None,
        }
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver
            .as_mut()
            .and_then(|receiver| receiver.try_recv().ok())
    }

    pub fn unsubscribe(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.close();
            self.canceller.cancel(self.id);
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCanceller {
        cancelled: Mutex<Vec<SubscriptionId>>,
    }

    impl SubscriptionCanceller for RecordingCanceller {
        fn cancel(&self, id: SubscriptionId) {
            self.cancelled.lock().unwrap().push(id);
        }
    }

    #[tokio::test]
    async fn test_recv_delivers_in_order() {
        // テスト項目: 送信順にイベントが受信される
        // given (前提条件):
        let (tx, rx) = mpsc::unbounded_channel();
        let canceller = Arc::new(RecordingCanceller::default());
        let mut subscription = Subscription::new(1, rx, canceller);
        tx.send(1).unwrap();
        tx.send(2).unwrap();

        // when (操作):
        let first = subscription.recv().await;
        let second = subscription.try_recv();
        let third = subscription.try_recv();

        // then (期待する結果):
        assert_eq!(first, Some(1));
        assert_eq!(second, Some(2));
        assert_eq!(third, None);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_discards_buffered_events() {
        // テスト項目: unsubscribe は冪等で、バッファ済みのイベントも破棄される
        // given (前提条件):
        let (tx, rx) = mpsc::unbounded_channel();
        let canceller = Arc::new(RecordingCanceller::default());
        let mut subscription = Subscription::new(7, rx, canceller.clone());
        tx.send("pending").unwrap();

        // when (操作):
        subscription.unsubscribe();
        subscription.unsubscribe();
        drop(subscription);

        // then (期待する結果):
        assert_eq!(*canceller.cancelled.lock().unwrap(), vec![7]);
        assert!(tx.send("late").is_err());
    }

    #[tokio::test]
    async fn test_recv_after_unsubscribe_returns_none() {
        // テスト項目: unsubscribe 後の recv は None を返す
        // given (前提条件):
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscription = Subscription::new(3, rx, Arc::new(RecordingCanceller::default()));
        tx.send(10).unwrap();

        // when (操作):
        subscription.unsubscribe();
        let received = subscription.recv().await;

        // then (期待する結果):
        assert_eq!(received, None);
        assert!(!subscription.is_active());
    }
}
