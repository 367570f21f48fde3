//! `SharedStore` over a WebSocket connection to `pairchat-server`.
//!
//! Requests carry an id and are answered in order by the server. Change events
//! are routed to subscriptions by the id the client picked when subscribing.
//! Transactions run optimistically: read the node, compute the update, and
//! compare-and-set it against the value read, retrying with the value the
//! server reports on a mismatch.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use pairchat_server::{
    domain::{
        ChildAdded, ChildQuery, DisconnectAction, SharedStore, StoreError, StorePath, Subscription,
        SubscriptionCanceller, SubscriptionId, TransactionFn, TransactionResult, Value,
        ValueSnapshot, WriteBatch,
    },
    infrastructure::dto::websocket::{
        RequestEnvelope, RequestId, ResponsePayload, ServerMessage, StoreRequest,
    },
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

/// Default bound of compare-and-set attempts per transaction
pub const DEFAULT_MAX_TRANSACTION_ATTEMPTS: usize = 25;

type Reply = Result<ResponsePayload, StoreError>;

enum Route {
    Values(mpsc::UnboundedSender<ValueSnapshot>),
    Children(mpsc::UnboundedSender<ChildAdded>),
}

/// State shared by the store handle, the reader task and subscriptions
struct Inner {
    outgoing: mpsc::UnboundedSender<String>,
    pending: DashMap<RequestId, oneshot::Sender<Reply>>,
    routes: DashMap<SubscriptionId, Route>,
    next_request_id: AtomicU64,
    next_subscription_id: AtomicU64,
    closed: AtomicBool,
}

impl Inner {
    fn new(outgoing: mpsc::UnboundedSender<String>) -> Self {
        Self {
            outgoing,
            pending: DashMap::new(),
            routes: DashMap::new(),
            next_request_id: AtomicU64::new(1),
            next_subscription_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    async fn request(&self, request: StoreRequest) -> Reply {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Disconnected);
        }
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(request_id, reply_tx);
        // shutdown() may have drained `pending` between the check above and the insert.
        if self.closed.load(Ordering::SeqCst) {
            self.pending.remove(&request_id);
            return Err(StoreError::Disconnected);
        }

        tracing::debug!("Request {} ({})", request_id, request.op());
        if let Err(e) = self.enqueue(request_id, request) {
            self.pending.remove(&request_id);
            return Err(e);
        }
        reply_rx.await.unwrap_or(Err(StoreError::Disconnected))
    }

    fn enqueue(&self, request_id: RequestId, request: StoreRequest) -> Result<(), StoreError> {
        let text = serde_json::to_string(&RequestEnvelope {
            request_id,
            request,
        })
        .map_err(|e| StoreError::Transport(e.to_string()))?;
        self.outgoing
            .send(text)
            .map_err(|_| StoreError::Disconnected)
    }

    fn dispatch(&self, message: ServerMessage) {
        match message {
            ServerMessage::Ok {
                request_id,
                payload,
            } => self.complete(request_id, Ok(payload)),
            ServerMessage::Error {
                request_id: Some(request_id),
                error,
            } => self.complete(request_id, Err(error.into())),
            ServerMessage::Error {
                request_id: None,
                error,
            } => {
                tracing::warn!("Server reported an error: {}", error.message);
            }
            ServerMessage::ValueChanged {
                subscription_id,
                path,
                value,
            } => match self.routes.get(&subscription_id).as_deref() {
                Some(Route::Values(sender)) => {
                    let _ = sender.send(ValueSnapshot { path, value });
                }
                _ => tracing::debug!("Dropping value event for subscription {}", subscription_id),
            },
            ServerMessage::ChildAdded {
                subscription_id,
                key,
                value,
            } => match self.routes.get(&subscription_id).as_deref() {
                Some(Route::Children(sender)) => {
                    let _ = sender.send(ChildAdded { key, value });
                }
                _ => tracing::debug!("Dropping child event for subscription {}", subscription_id),
            },
        }
    }

    fn complete(&self, request_id: RequestId, reply: Reply) {
        match self.pending.remove(&request_id) {
            Some((_, sender)) => {
                let _ = sender.send(reply);
            }
            None => tracing::debug!("Response to untracked request {}", request_id),
        }
    }

    /// Fail every waiting request and end every subscription.
    fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!("Store connection closed");
        }
        self.pending.clear();
        self.routes.clear();
    }
}

impl SubscriptionCanceller for Inner {
    fn cancel(&self, id: SubscriptionId) {
        if self.routes.remove(&id).is_none() || self.closed.load(Ordering::SeqCst) {
            return;
        }
        // Fire and forget; the answer is dropped as untracked.
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.enqueue(
            request_id,
            StoreRequest::Unsubscribe {
                subscription_id: id,
            },
        ) {
            tracing::debug!("Unsubscribe {} not sent: {}", id, e);
        }
    }
}

/// Remote shared store connection
pub struct WebSocketStore {
    inner: Arc<Inner>,
    max_transaction_attempts: usize,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WebSocketStore {
    /// Connect to a store server (e.g. `ws://127.0.0.1:8080/ws`).
    pub async fn connect(url: &str, max_transaction_attempts: usize) -> Result<Self, StoreError> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        tracing::info!("Connected to store server at {}", url);

        let (mut write, mut read) = ws_stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let inner = Arc::new(Inner::new(outgoing));

        let writer = tokio::spawn(async move {
            while let Some(text) = outgoing_rx.recv().await {
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    tracing::warn!("WebSocket write error: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        let reader_inner = inner.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(message) => reader_inner.dispatch(message),
                        Err(e) => tracing::warn!("Unparseable server message: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("Server closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("WebSocket read error: {}", e);
                        break;
                    }
                }
            }
            reader_inner.shutdown();
        });

        Ok(Self {
            inner,
            max_transaction_attempts: max_transaction_attempts.max(1),
            reader,
            writer,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Conditional write: store `value` only if the node still equals `expected`.
    ///
    /// Returns whether it committed and the value now stored.
    pub async fn compare_and_set(
        &self,
        path: &StorePath,
        expected: Option<Value>,
        value: Option<Value>,
    ) -> Result<(bool, Option<Value>), StoreError> {
        match self
            .inner
            .request(StoreRequest::CompareAndSet {
                path: path.clone(),
                expected,
                value,
            })
            .await?
        {
            ResponsePayload::CompareAndSet { committed, current } => Ok((committed, current)),
            other => Err(unexpected(other)),
        }
    }

    /// Clean shutdown: the server discards the disconnect hooks of this connection.
    pub async fn close(&self) -> Result<(), StoreError> {
        match self.inner.request(StoreRequest::Close).await {
            Ok(_) | Err(StoreError::Disconnected) => {}
            Err(e) => return Err(e),
        }
        self.inner.shutdown();
        Ok(())
    }

    /// Drop the socket without a close handshake; the server runs the disconnect hooks.
    pub fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
        self.inner.shutdown();
    }

    async fn expect_done(&self, request: StoreRequest) -> Result<(), StoreError> {
        match self.inner.request(request).await? {
            ResponsePayload::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn subscribe(
        &self,
        route: Route,
        request: impl FnOnce(SubscriptionId) -> StoreRequest,
    ) -> Result<SubscriptionId, StoreError> {
        let id = self.inner.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        // Events may follow the response immediately, so route first.
        self.inner.routes.insert(id, route);
        match self.expect_done(request(id)).await {
            Ok(()) => Ok(id),
            Err(e) => {
                self.inner.routes.remove(&id);
                Err(e)
            }
        }
    }
}

impl Drop for WebSocketStore {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

fn unexpected(payload: ResponsePayload) -> StoreError {
    StoreError::Transport(format!("Unexpected response: {:?}", payload))
}

#[async_trait]
impl SharedStore for WebSocketStore {
    async fn sign_in_anonymously(&self) -> Result<String, StoreError> {
        match self.inner.request(StoreRequest::SignIn).await? {
            ResponsePayload::Identity { uid } => Ok(uid),
            other => Err(unexpected(other)),
        }
    }

    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        match self
            .inner
            .request(StoreRequest::Get { path: path.clone() })
            .await?
        {
            ResponsePayload::Value { value } => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        self.expect_done(StoreRequest::Set {
            path: path.clone(),
            value,
        })
        .await
    }

    async fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        self.expect_done(StoreRequest::Remove { path: path.clone() })
            .await
    }

    async fn create(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        self.expect_done(StoreRequest::Create {
            path: path.clone(),
            value,
        })
        .await
    }

    async fn update(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.expect_done(StoreRequest::Update {
            writes: batch.into(),
        })
        .await
    }

    async fn transaction(
        &self,
        path: &StorePath,
        update: TransactionFn,
    ) -> Result<TransactionResult, StoreError> {
        let mut current = self.get(path).await?;
        for attempt in 1..=self.max_transaction_attempts {
            let next = update(current.as_ref());
            let (committed, stored) = self.compare_and_set(path, current.clone(), next).await?;
            if committed {
                return Ok(TransactionResult {
                    snapshot: current,
                    committed: stored,
                });
            }
            tracing::debug!("Transaction on '{}' conflicted (attempt {})", path, attempt);
            current = stored;
        }

        tracing::warn!(
            "Transaction on '{}' gave up after {} attempts",
            path,
            self.max_transaction_attempts
        );
        Err(StoreError::TransactionConflict {
            path: path.to_string(),
            attempts: self.max_transaction_attempts,
        })
    }

    async fn subscribe_value(
        &self,
        path: &StorePath,
    ) -> Result<Subscription<ValueSnapshot>, StoreError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self
            .subscribe(Route::Values(sender), |subscription_id| {
                StoreRequest::SubscribeValue {
                    subscription_id,
                    path: path.clone(),
                }
            })
            .await?;
        Ok(Subscription::new(id, receiver, self.inner.clone()))
    }

    async fn subscribe_children(
        &self,
        query: ChildQuery,
    ) -> Result<Subscription<ChildAdded>, StoreError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self
            .subscribe(Route::Children(sender), |subscription_id| {
                StoreRequest::SubscribeChildren {
                    subscription_id,
                    query,
                }
            })
            .await?;
        Ok(Subscription::new(id, receiver, self.inner.clone()))
    }

    async fn on_disconnect(
        &self,
        path: &StorePath,
        action: DisconnectAction,
    ) -> Result<(), StoreError> {
        self.expect_done(StoreRequest::OnDisconnect {
            path: path.clone(),
            action,
        })
        .await
    }

    async fn cancel_on_disconnect(&self, path: &StorePath) -> Result<(), StoreError> {
        self.expect_done(StoreRequest::CancelOnDisconnect { path: path.clone() })
            .await
    }
}
