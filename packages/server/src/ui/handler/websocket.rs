//! WebSocket protocol handler.
//!
//! Each socket is one [`MemoryConnection`]. Requests are executed one at a
//! time in arrival order; subscription events are forwarded by one task per
//! subscription through the same outbound channel as the responses. When the
//! socket goes away without a `close` request, the connection's disconnect
//! hooks run.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    domain::{
        ChildAdded, SharedStore, StoreError, Subscription, SubscriptionId, Value, ValueSnapshot,
    },
    infrastructure::{
        dto::websocket::{
            ErrorCode, ErrorDto, RequestEnvelope, RequestId, ResponsePayload, ServerMessage,
            StoreRequest,
        },
        memory::MemoryConnection,
    },
    ui::state::AppState,
};

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Spawns a task that serializes outbound frames and pushes them to the WebSocket sender.
///
/// The task ends when every sender of `rx` is gone or the socket refuses a frame.
fn pusher_loop(
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
    mut sender: SplitSink<WebSocket, Message>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to serialize server message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    })
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sender, mut receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let mut send_task = pusher_loop(rx, sender);
    let mut session = SocketSession::new(state.store.connect(), tx);
    tracing::info!("Store client connected");

    let mut clean_close = false;
    let mut send_task_done = false;
    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };
                match message {
                    Message::Text(text) => {
                        if session.handle_text(text.as_str()).await {
                            clean_close = true;
                            break;
                        }
                    }
                    Message::Close(_) => {
                        tracing::debug!("Client sent a close frame");
                        break;
                    }
                    _ => {}
                }
            }
            _ = &mut send_task => {
                send_task_done = true;
                break;
            }
        }
    }

    session.finish(clean_close).await;
    if !send_task_done {
        let _ = send_task.await;
    }
}

/// A subscription whose events still have to be forwarded to the socket.
enum Forwarder {
    Values(SubscriptionId, Subscription<ValueSnapshot>),
    Children(SubscriptionId, Subscription<ChildAdded>),
}

struct SocketSession {
    connection: MemoryConnection,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    forwarders: HashMap<SubscriptionId, JoinHandle<()>>,
}

impl SocketSession {
    fn new(connection: MemoryConnection, outbound: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            connection,
            outbound,
            forwarders: HashMap::new(),
        }
    }

    /// Handle one text frame. Returns `true` when the client asked to close.
    async fn handle_text(&mut self, text: &str) -> bool {
        let envelope = match serde_json::from_str::<RequestEnvelope>(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Failed to parse request: {}", e);
                let request_id = serde_json::from_str::<Value>(text)
                    .ok()
                    .and_then(|raw| raw.get("request_id")?.as_u64());
                self.push(ServerMessage::Error {
                    request_id,
                    error: ErrorDto {
                        code: ErrorCode::BadRequest,
                        message: e.to_string(),
                        path: None,
                        reason: None,
                        attempts: None,
                    },
                });
                return false;
            }
        };

        let request_id = envelope.request_id;
        let is_close = matches!(envelope.request, StoreRequest::Close);
        tracing::debug!("Request {} ({})", request_id, envelope.request.op());

        match self.execute(envelope.request).await {
            Ok((payload, forwarder)) => {
                self.push(ServerMessage::Ok {
                    request_id,
                    payload,
                });
                // The response is queued first, so the client sees it before the initial snapshot.
                if let Some(forwarder) = forwarder {
                    self.spawn_forwarder(forwarder);
                }
            }
            Err(e) => {
                tracing::debug!("Request {} failed: {}", request_id, e);
                self.push(ServerMessage::Error {
                    request_id: Some(request_id),
                    error: ErrorDto::from(&e),
                });
            }
        }
        is_close
    }

    async fn execute(
        &mut self,
        request: StoreRequest,
    ) -> Result<(ResponsePayload, Option<Forwarder>), StoreError> {
        let connection = &self.connection;
        let payload = match request {
            StoreRequest::SignIn => ResponsePayload::Identity {
                uid: connection.sign_in_anonymously().await?,
            },
            StoreRequest::Get { path } => ResponsePayload::Value {
                value: connection.get(&path).await?,
            },
            StoreRequest::Set { path, value } => {
                connection.set(&path, value).await?;
                ResponsePayload::Done
            }
            StoreRequest::Remove { path } => {
                connection.remove(&path).await?;
                ResponsePayload::Done
            }
            StoreRequest::Create { path, value } => {
                connection.create(&path, value).await?;
                ResponsePayload::Done
            }
            StoreRequest::Update { writes } => {
                connection.update(writes.into()).await?;
                ResponsePayload::Done
            }
            StoreRequest::CompareAndSet {
                path,
                expected,
                value,
            } => connection
                .compare_and_set(&path, expected, value)
                .await?
                .into(),
            StoreRequest::SubscribeValue {
                subscription_id,
                path,
            } => {
                let subscription = connection.subscribe_value(&path).await?;
                return Ok((
                    ResponsePayload::Done,
                    Some(Forwarder::Values(subscription_id, subscription)),
                ));
            }
            StoreRequest::SubscribeChildren {
                subscription_id,
                query,
            } => {
                let subscription = connection.subscribe_children(query).await?;
                return Ok((
                    ResponsePayload::Done,
                    Some(Forwarder::Children(subscription_id, subscription)),
                ));
            }
            StoreRequest::Unsubscribe { subscription_id } => {
                if let Some(handle) = self.forwarders.remove(&subscription_id) {
                    handle.abort();
                }
                ResponsePayload::Done
            }
            StoreRequest::OnDisconnect { path, action } => {
                connection.on_disconnect(&path, action).await?;
                ResponsePayload::Done
            }
            StoreRequest::CancelOnDisconnect { path } => {
                connection.cancel_on_disconnect(&path).await?;
                ResponsePayload::Done
            }
            StoreRequest::Close => {
                connection.close().await;
                ResponsePayload::Done
            }
        };
        Ok((payload, None))
    }

    fn spawn_forwarder(&mut self, forwarder: Forwarder) {
        let outbound = self.outbound.clone();
        let (subscription_id, handle) = match forwarder {
            Forwarder::Values(subscription_id, mut subscription) => {
                let handle = tokio::spawn(async move {
                    while let Some(snapshot) = subscription.recv().await {
                        let message = ServerMessage::ValueChanged {
                            subscription_id,
                            path: snapshot.path,
                            value: snapshot.value,
                        };
                        if outbound.send(message).is_err() {
                            break;
                        }
                    }
                });
                (subscription_id, handle)
            }
            Forwarder::Children(subscription_id, mut subscription) => {
                let handle = tokio::spawn(async move {
                    while let Some(added) = subscription.recv().await {
                        let message = ServerMessage::ChildAdded {
                            subscription_id,
                            key: added.key,
                            value: added.value,
                        };
                        if outbound.send(message).is_err() {
                            break;
                        }
                    }
                });
                (subscription_id, handle)
            }
        };

        if let Some(previous) = self.forwarders.insert(subscription_id, handle) {
            tracing::warn!("Subscription id {} reused, replacing", subscription_id);
            previous.abort();
        }
    }

    fn push(&self, message: ServerMessage) {
        if self.outbound.send(message).is_err() {
            tracing::debug!("Outbound channel closed, dropping message");
        }
    }

    async fn finish(self, clean_close: bool) {
        for (_, handle) in self.forwarders {
            handle.abort();
        }
        if clean_close {
            tracing::info!("Store client closed the connection");
        } else {
            tracing::info!("Store client connection lost");
            self.connection.disconnect().await;
        }
    }
}
