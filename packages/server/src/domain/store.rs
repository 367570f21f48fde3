//! `SharedStore` trait
//!
//! The port the matchmaking protocol consumes. Every implementation offers
//! per-node atomicity only: there are no multi-node transactions, but a
//! [`WriteBatch`] is applied atomically as a whole.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChildAdded, StoreError, StorePath, Subscription, Value, ValueSnapshot};

/// Pure function from the current node value to the new one (`None` removes the node).
///
/// It may be invoked several times when the transaction is retried, so it must
/// not have side effects.
pub type TransactionFn = Box<dyn Fn(Option<&Value>) -> Option<Value> + Send + Sync>;

/// Outcome of a committed transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionResult {
    /// The value the committed update was computed from
    pub snapshot: Option<Value>,
    /// The value now stored at the path
    pub committed: Option<Value>,
}

/// Several writes applied as one atomic update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<(StorePath, Option<Value>)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: StorePath, value: Value) -> Self {
        self.writes.push((path, Some(value)));
        self
    }

    pub fn remove(mut self, path: StorePath) -> Self {
        self.writes.push((path, None));
        self
    }

    pub fn push(&mut self, path: StorePath, value: Option<Value>) {
        self.writes.push((path, value));
    }

    pub fn writes(&self) -> &[(StorePath, Option<Value>)] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<(StorePath, Option<Value>)> {
        self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Ordered, optionally limited view over the children of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildQuery {
    pub path: StorePath,
    /// Child field to order by; children are ordered by key when absent or missing
    pub order_by_child: Option<String>,
    /// Keep only the last N children of the initial snapshot
    pub limit_to_last: Option<usize>,
}

impl ChildQuery {
    pub fn new(path: StorePath) -> Self {
        Self {
            path,
            order_by_child: None,
            limit_to_last: None,
        }
    }

    pub fn order_by_child(mut self, field: impl Into<String>) -> Self {
        self.order_by_child = Some(field.into());
        self
    }

    pub fn limit_to_last(mut self, limit: usize) -> Self {
        self.limit_to_last = Some(limit);
        self
    }
}

/// Operation the store executes on its own when the registering connection is lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisconnectAction {
    /// Remove the node
    Remove,
    /// Overwrite the node
    Set { value: Value },
    /// Remove the node only while its `child` field still equals `equals`
    RemoveIfChildEquals { child: String, equals: Value },
}

/// Shared store connection
///
/// One value per connected client. Writes are authorized against the identity
/// issued by [`SharedStore::sign_in_anonymously`].
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Issue (or return the already issued) anonymous identity of this connection
    async fn sign_in_anonymously(&self) -> Result<String, StoreError>;

    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError>;

    /// Overwrite a node (last write wins). Writing `null` removes it.
    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError>;

    async fn remove(&self, path: &StorePath) -> Result<(), StoreError>;

    /// Write only if the node is absent, otherwise [`StoreError::AlreadyExists`]
    async fn create(&self, path: &StorePath, value: Value) -> Result<(), StoreError>;

    /// Apply several writes atomically
    async fn update(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Atomic read-modify-write of a single node
    async fn transaction(
        &self,
        path: &StorePath,
        update: TransactionFn,
    ) -> Result<TransactionResult, StoreError>;

    /// Initial value, then every change of the node
    async fn subscribe_value(
        &self,
        path: &StorePath,
    ) -> Result<Subscription<ValueSnapshot>, StoreError>;

    /// Initial children (ordered, limited) as add events, then every new child
    async fn subscribe_children(
        &self,
        query: ChildQuery,
    ) -> Result<Subscription<ChildAdded>, StoreError>;

    /// Register cleanup executed by the store when this connection is lost
    async fn on_disconnect(
        &self,
        path: &StorePath,
        action: DisconnectAction,
    ) -> Result<(), StoreError>;

    async fn cancel_on_disconnect(&self, path: &StorePath) -> Result<(), StoreError>;
}
