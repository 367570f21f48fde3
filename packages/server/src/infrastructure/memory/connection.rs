//! Per-client connection to the in-memory store.

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    ChildAdded, ChildQuery, DisconnectAction, SharedStore, StoreError, StorePath, Subscription,
    TransactionFn, TransactionResult, Value, ValueSnapshot, WriteBatch,
};

use super::engine::{CompareAndSetOutcome, ConnectionId, Engine};

/// A client connection to a [`super::MemoryStore`].
///
/// Writes are authorized as the identity issued by `sign_in_anonymously`.
/// [`MemoryConnection::disconnect`] simulates an abrupt network loss and runs
/// the registered disconnect hooks; [`MemoryConnection::close`] is a clean
/// shutdown that discards them.
pub struct MemoryConnection {
    engine: Arc<Engine>,
    connection_id: ConnectionId,
    identity: Mutex<Option<String>>,
    disconnect_hooks: Mutex<BTreeMap<StorePath, DisconnectAction>>,
    closed: AtomicBool,
}

impl MemoryConnection {
    pub(crate) fn new(engine: Arc<Engine>) -> Self {
        let connection_id = engine.allocate_connection_id();
        Self {
            engine,
            connection_id,
            identity: Mutex::new(None),
            disconnect_hooks: Mutex::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Identity issued to this connection, if signed in.
    pub async fn identity(&self) -> Option<String> {
        self.identity.lock().await.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Conditional write used by remote clients to run optimistic transactions.
    pub async fn compare_and_set(
        &self,
        path: &StorePath,
        expected: Option<Value>,
        value: Option<Value>,
    ) -> Result<CompareAndSetOutcome, StoreError> {
        let auth = self.auth().await?;
        self.engine
            .compare_and_set(Some(&auth), path, expected, value)
            .await
    }

    /// Connection lost without a clean shutdown: run the disconnect hooks.
    pub async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.engine.cancel_owner(self.connection_id);

        let hooks = std::mem::take(&mut *self.disconnect_hooks.lock().await);
        tracing::info!(
            "Connection {} lost, running {} disconnect hook(s)",
            self.connection_id,
            hooks.len()
        );
        for (path, action) in hooks {
            self.engine.run_disconnect_action(&path, action).await;
        }
    }

    /// Clean shutdown: disconnect hooks are discarded, not executed.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.engine.cancel_owner(self.connection_id);
        self.disconnect_hooks.lock().await.clear();
        tracing::info!("Connection {} closed", self.connection_id);
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            Err(StoreError::Disconnected)
        } else {
            Ok(())
        }
    }

    async fn auth(&self) -> Result<String, StoreError> {
        self.ensure_open()?;
        self.identity
            .lock()
            .await
            .clone()
            .ok_or(StoreError::Unauthenticated)
    }

    fn canceller(&self) -> Arc<Engine> {
        self.engine.clone()
    }
}

#[async_trait]
impl SharedStore for MemoryConnection {
    async fn sign_in_anonymously(&self) -> Result<String, StoreError> {
        self.ensure_open()?;
        let mut identity = self.identity.lock().await;
        let issued = identity
            .get_or_insert_with(|| Uuid::new_v4().simple().to_string())
            .clone();
        tracing::debug!("Connection {} signed in as '{}'", self.connection_id, issued);
        Ok(issued)
    }

    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        self.ensure_open()?;
        Ok(self.engine.read(path).await)
    }

    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        let auth = self.auth().await?;
        self.engine
            .write(Some(&auth), WriteBatch::new().set(path.clone(), value))
            .await
    }

    async fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        let auth = self.auth().await?;
        self.engine
            .write(Some(&auth), WriteBatch::new().remove(path.clone()))
            .await
    }

    async fn create(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        let auth = self.auth().await?;
        self.engine.create(Some(&auth), path, value).await
    }

    async fn update(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let auth = self.auth().await?;
        self.engine.write(Some(&auth), batch).await
    }

    async fn transaction(
        &self,
        path: &StorePath,
        update: TransactionFn,
    ) -> Result<TransactionResult, StoreError> {
        let auth = self.auth().await?;
        self.engine.transaction(Some(&auth), path, update).await
    }

    async fn subscribe_value(
        &self,
        path: &StorePath,
    ) -> Result<Subscription<ValueSnapshot>, StoreError> {
        self.ensure_open()?;
        let (id, receiver) = self.engine.subscribe_value(self.connection_id, path).await;
        Ok(Subscription::new(id, receiver, self.canceller()))
    }

    async fn subscribe_children(
        &self,
        query: ChildQuery,
    ) -> Result<Subscription<ChildAdded>, StoreError> {
        self.ensure_open()?;
        let (id, receiver) = self
            .engine
            .subscribe_children(self.connection_id, query)
            .await;
        Ok(Subscription::new(id, receiver, self.canceller()))
    }

    async fn on_disconnect(
        &self,
        path: &StorePath,
        action: DisconnectAction,
    ) -> Result<(), StoreError> {
        self.auth().await?;
        self.disconnect_hooks
            .lock()
            .await
            .insert(path.clone(), action);
        tracing::debug!(
            "Connection {} registered disconnect hook on '{}'",
            self.connection_id,
            path
        );
        Ok(())
    }

    async fn cancel_on_disconnect(&self, path: &StorePath) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.disconnect_hooks.lock().await.remove(path);
        Ok(())
    }
}
