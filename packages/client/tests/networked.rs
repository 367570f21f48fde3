//! Client sessions talking to a real store server over WebSocket.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use pairchat_client::{
    domain::{SessionCommand, SessionConfig, SessionEvent, SessionStatus, layout},
    infrastructure::{WebSocketStore, websocket_store::DEFAULT_MAX_TRANSACTION_ATTEMPTS},
    usecase::SessionStateMachine,
};
use pairchat_server::{infrastructure::memory::MemoryStore, ui::Server};
use pairchat_shared::time::SystemClock;
use serde_json::Value;
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

struct TestServer {
    addr: SocketAddr,
    store: MemoryStore,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let store = MemoryStore::default();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = Server::new(store.clone());
        let handle = tokio::spawn(async move {
            server
                .run_with_listener(listener, async {
                    let _ = shutdown_rx.await;
                })
                .await
                .unwrap();
        });
        Self {
            addr,
            store,
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    async fn connect(&self) -> Arc<WebSocketStore> {
        Arc::new(
            WebSocketStore::connect(&self.ws_url(), DEFAULT_MAX_TRANSACTION_ATTEMPTS)
                .await
                .unwrap(),
        )
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    wanted: impl Fn(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            let done = wanted(&event);
            seen.push(event);
            if done {
                return true;
            }
        }
        false
    })
    .await;
    assert_eq!(found, Ok(true), "events so far: {:?}", seen);
    seen
}

#[tokio::test]
async fn test_sessions_pair_and_chat_over_websocket() {
    // テスト項目: WebSocket 経由の2つのセッションが組になり、メッセージを交換できる
    // given (前提条件):
    let server = TestServer::start().await;
    let mut commands = Vec::new();
    let mut events = Vec::new();
    let mut handles = Vec::new();
    let mut stores = Vec::new();
    for _ in 0..2 {
        let store = server.connect().await;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let session = SessionStateMachine::new(
            store.clone(),
            Arc::new(SystemClock),
            SessionConfig::default(),
            event_tx,
        );
        handles.push(tokio::spawn(session.run(command_rx)));
        commands.push(command_tx);
        events.push(event_rx);
        stores.push(store);
    }

    // when (操作):
    commands[0].send(SessionCommand::Find).unwrap();
    wait_for(&mut events[0], |e| {
        *e == SessionEvent::Status(SessionStatus::Searching)
    })
    .await;
    commands[1].send(SessionCommand::Find).unwrap();
    let connected = SessionEvent::Status(SessionStatus::Connected);
    wait_for(&mut events[0], |e| *e == connected).await;
    wait_for(&mut events[1], |e| *e == connected).await;

    commands[1]
        .send(SessionCommand::Send("hello over the wire".to_string()))
        .unwrap();
    let received = wait_for(&mut events[0], |e| {
        matches!(e, SessionEvent::Message { .. })
    })
    .await;
    drop(commands);

    // then (期待する結果):
    assert_eq!(
        received.last(),
        Some(&SessionEvent::Message {
            text: "hello over the wire".to_string(),
            own: false
        })
    );
    for handle in handles {
        assert_eq!(handle.await.unwrap(), Ok(()));
    }
    for store in stores {
        store.close().await.unwrap();
    }
    assert!(server.store.snapshot().await.get("rooms").is_none());
    server.stop().await;
}

#[tokio::test]
async fn test_aborted_waiter_is_removed_from_slot() {
    // テスト項目: 待機中のクライアントの接続が突然切れると、サーバーが待機枠を空にする
    // given (前提条件):
    let server = TestServer::start().await;
    let store = server.connect().await;
    let (event_tx, _events) = mpsc::unbounded_channel();
    let mut session = SessionStateMachine::new(
        store.clone(),
        Arc::new(SystemClock),
        SessionConfig::default(),
        event_tx,
    );
    session.sign_in().await.unwrap();
    session.find().await.unwrap();
    let slot_path = layout::waiting_slot().unwrap();
    let occupied = server.store.read(&slot_path).await;

    // when (操作):
    store.abort();
    let emptied = tokio::time::timeout(Duration::from_secs(5), async {
        while server.store.read(&slot_path).await.is_some() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    // then (期待する結果):
    assert!(occupied.is_some());
    assert!(store.is_closed());
    assert!(emptied.is_ok());
    server.stop().await;
}

#[tokio::test]
async fn test_health_check_endpoint() {
    // テスト項目: ヘルスチェックエンドポイントが ok を返す
    // given (前提条件):
    let server = TestServer::start().await;

    // when (操作):
    let response = reqwest::get(format!("http://{}/api/health", server.addr))
        .await
        .unwrap();
    let status = response.status();
    let body: Value = response.json().await.unwrap();

    // then (期待する結果):
    assert!(status.is_success());
    assert_eq!(body, serde_json::json!({ "status": "ok" }));
    server.stop().await;
}
