//! In-memory store engine.
//!
//! The tree lives behind one `tokio::sync::Mutex`, so every committed write is
//! serialized. Subscribers are notified while the lock is still held, which
//! keeps event order identical to commit order for every subscriber.

use std::{
    cmp::Ordering,
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering as AtomicOrdering},
    },
};

use dashmap::DashMap;
use pairchat_shared::time::Clock;
use tokio::sync::{Mutex, mpsc};

use crate::domain::{
    ChildAdded, ChildQuery, DisconnectAction, StoreError, StorePath, SubscriptionCanceller,
    SubscriptionId, TransactionFn, TransactionResult, Value, ValueSnapshot, WriteBatch,
    resolve_server_values,
    rules::authorize_write,
    tree::{child_entries, prune, value_at, write_at},
};

pub(crate) type ConnectionId = u64;

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq)]
pub struct CompareAndSetOutcome {
    pub committed: bool,
    /// Value at the path after the call (the new value when committed)
    pub current: Option<Value>,
}

struct ValueSubscriber {
    owner: ConnectionId,
    path: StorePath,
    last: Option<Value>,
    sender: mpsc::UnboundedSender<ValueSnapshot>,
}

struct ChildSubscriber {
    owner: ConnectionId,
    query: ChildQuery,
    seen: HashSet<String>,
    sender: mpsc::UnboundedSender<ChildAdded>,
}

pub(crate) struct Engine {
    tree: Mutex<Value>,
    value_subscribers: DashMap<SubscriptionId, ValueSubscriber>,
    child_subscribers: DashMap<SubscriptionId, ChildSubscriber>,
    next_subscription_id: AtomicU64,
    next_connection_id: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tree: Mutex::new(Value::Object(Default::default())),
            value_subscribers: DashMap::new(),
            child_subscribers: DashMap::new(),
            next_subscription_id: AtomicU64::new(1),
            next_connection_id: AtomicU64::new(1),
            clock,
        }
    }

    pub(crate) fn allocate_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, AtomicOrdering::SeqCst)
    }

    pub(crate) async fn snapshot(&self) -> Value {
        self.tree.lock().await.clone()
    }

    pub(crate) async fn read(&self, path: &StorePath) -> Option<Value> {
        let tree = self.tree.lock().await;
        value_at(&tree, path).cloned()
    }

    /// Apply `batch` atomically. `auth` is `None` for trusted writes (disconnect hooks).
    pub(crate) async fn write(&self, auth: Option<&str>, batch: WriteBatch) -> Result<(), StoreError> {
        let mut tree = self.tree.lock().await;
        self.commit(&mut tree, auth, batch)
    }

    pub(crate) async fn create(
        &self,
        auth: Option<&str>,
        path: &StorePath,
        value: Value,
    ) -> Result<(), StoreError> {
        let mut tree = self.tree.lock().await;
        if value_at(&tree, path).is_some() {
            return Err(StoreError::AlreadyExists(path.to_string()));
        }
        self.commit(&mut tree, auth, WriteBatch::new().set(path.clone(), value))
    }

    pub(crate) async fn compare_and_set(
        &self,
        auth: Option<&str>,
        path: &StorePath,
        expected: Option<Value>,
        value: Option<Value>,
    ) -> Result<CompareAndSetOutcome, StoreError> {
        let mut tree = self.tree.lock().await;
        let current = value_at(&tree, path).cloned();
        if current != expected.and_then(prune) {
            return Ok(CompareAndSetOutcome {
                committed: false,
                current,
            });
        }

        let mut batch = WriteBatch::new();
        batch.push(path.clone(), value);
        self.commit(&mut tree, auth, batch)?;
        Ok(CompareAndSetOutcome {
            committed: true,
            current: value_at(&tree, path).cloned(),
        })
    }

    pub(crate) async fn transaction(
        &self,
        auth: Option<&str>,
        path: &StorePath,
        update: TransactionFn,
    ) -> Result<TransactionResult, StoreError> {
        let mut tree = self.tree.lock().await;
        let snapshot = value_at(&tree, path).cloned();
        let next = update(snapshot.as_ref());

        let mut batch = WriteBatch::new();
        batch.push(path.clone(), next);
        self.commit(&mut tree, auth, batch)?;

        Ok(TransactionResult {
            snapshot,
            committed: value_at(&tree, path).cloned(),
        })
    }

    pub(crate) async fn run_disconnect_action(&self, path: &StorePath, action: DisconnectAction) {
        let mut tree = self.tree.lock().await;
        let batch = match action {
            DisconnectAction::Remove => WriteBatch::new().remove(path.clone()),
            DisconnectAction::Set { value } => WriteBatch::new().set(path.clone(), value),
            DisconnectAction::RemoveIfChildEquals { child, equals } => {
                let still_matches = value_at(&tree, path)
                    .and_then(|node| node.get(&child))
                    .is_some_and(|value| *value == equals);
                if !still_matches {
                    tracing::debug!("Skipping disconnect removal of '{}': owner changed", path);
                    return;
                }
                WriteBatch::new().remove(path.clone())
            }
        };

        if let Err(e) = self.commit(&mut tree, None, batch) {
            tracing::warn!("Disconnect action on '{}' failed: {}", path, e);
        } else {
            tracing::debug!("Disconnect action on '{}' executed", path);
        }
    }

    pub(crate) async fn subscribe_value(
        &self,
        owner: ConnectionId,
        path: &StorePath,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<ValueSnapshot>) {
        let tree = self.tree.lock().await;
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_subscription_id.fetch_add(1, AtomicOrdering::SeqCst);

        let current = value_at(&tree, path).cloned();
        // The receiver is still in scope, so the initial send cannot fail.
        let _ = sender.send(ValueSnapshot {
            path: path.clone(),
            value: current.clone(),
        });
        self.value_subscribers.insert(
            id,
            ValueSubscriber {
                owner,
                path: path.clone(),
                last: current,
                sender,
            },
        );
        tracing::debug!("Value subscription {} on '{}' registered", id, path);

        (id, receiver)
    }

    pub(crate) async fn subscribe_children(
        &self,
        owner: ConnectionId,
        query: ChildQuery,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<ChildAdded>) {
        let tree = self.tree.lock().await;
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_subscription_id.fetch_add(1, AtomicOrdering::SeqCst);

        let mut entries = child_entries(&tree, &query.path);
        entries.sort_by(|a, b| compare_children(&query, *a, *b));
        let seen: HashSet<String> = entries.iter().map(|(key, _)| (*key).clone()).collect();

        let skip = query
            .limit_to_last
            .map(|limit| entries.len().saturating_sub(limit))
            .unwrap_or(0);
        for (key, value) in entries.into_iter().skip(skip) {
            let _ = sender.send(ChildAdded {
                key: key.clone(),
                value: value.clone(),
            });
        }

        tracing::debug!("Child subscription {} on '{}' registered", id, query.path);
        self.child_subscribers.insert(
            id,
            ChildSubscriber {
                owner,
                query,
                seen,
                sender,
            },
        );

        (id, receiver)
    }

    pub(crate) fn cancel_owner(&self, owner: ConnectionId) {
        self.value_subscribers.retain(|_, sub| sub.owner != owner);
        self.child_subscribers.retain(|_, sub| sub.owner != owner);
    }

    fn commit(
        &self,
        tree: &mut Value,
        auth: Option<&str>,
        batch: WriteBatch,
    ) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let now = self.clock.now_millis();
        let mut after = tree.clone();
        let mut written = Vec::with_capacity(batch.writes().len());
        for (path, mut value) in batch.into_writes() {
            if let Some(value) = value.as_mut() {
                resolve_server_values(value, now);
            }
            write_at(&mut after, &path, value);
            written.push(path);
        }

        if let Some(auth) = auth {
            for path in &written {
                authorize_write(auth, path, tree, &after)?;
            }
        }

        *tree = after;
        self.notify(tree, &written);
        Ok(())
    }

    fn notify(&self, tree: &Value, written: &[StorePath]) {
        let mut closed = Vec::new();

        for mut entry in self.value_subscribers.iter_mut() {
            let id = *entry.key();
            let subscriber = entry.value_mut();
            if !written.iter().any(|path| path.overlaps(&subscriber.path)) {
                continue;
            }
            let current = value_at(tree, &subscriber.path).cloned();
            if current == subscriber.last {
                continue;
            }
            subscriber.last = current.clone();
            let snapshot = ValueSnapshot {
                path: subscriber.path.clone(),
                value: current,
            };
            if subscriber.sender.send(snapshot).is_err() {
                closed.push(id);
            }
        }
        for id in closed.drain(..) {
            self.value_subscribers.remove(&id);
        }

        for mut entry in self.child_subscribers.iter_mut() {
            let id = *entry.key();
            let subscriber = entry.value_mut();
            if !written.iter().any(|path| path.overlaps(&subscriber.query.path)) {
                continue;
            }
            let mut added: Vec<(&String, &Value)> = child_entries(tree, &subscriber.query.path)
                .into_iter()
                .filter(|(key, _)| !subscriber.seen.contains(*key))
                .collect();
            added.sort_by(|a, b| compare_children(&subscriber.query, *a, *b));

            for (key, value) in added {
                subscriber.seen.insert(key.clone());
                let event = ChildAdded {
                    key: key.clone(),
                    value: value.clone(),
                };
                if subscriber.sender.send(event).is_err() {
                    closed.push(id);
                    break;
                }
            }
        }
        for id in closed {
            self.child_subscribers.remove(&id);
        }
    }
}

impl SubscriptionCanceller for Engine {
    fn cancel(&self, id: SubscriptionId) {
        let removed = self.value_subscribers.remove(&id).is_some()
            || self.child_subscribers.remove(&id).is_some();
        if removed {
            tracing::debug!("Subscription {} cancelled", id);
        }
    }
}

/// Order children by the query's child field (numbers before strings, missing first), then by key.
fn compare_children(query: &ChildQuery, a: (&String, &Value), b: (&String, &Value)) -> Ordering {
    let by_field = match query.order_by_child.as_deref() {
        Some(field) => compare_field(a.1.get(field), b.1.get(field)),
        None => Ordering::Equal,
    };
    by_field.then_with(|| a.0.cmp(b.0))
}

fn compare_field(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairchat_shared::time::ManualClock;
    use serde_json::json;

    fn path(raw: &str) -> StorePath {
        StorePath::parse(raw).unwrap()
    }

    fn create_test_engine() -> (Engine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        (Engine::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_value_subscription_receives_initial_and_changes() {
        // テスト項目: 値の購読は初期値と変更を受信し、同じ値では通知しない
        // given (前提条件):
        let (engine, _clock) = create_test_engine();
        let (_id, mut rx) = engine.subscribe_value(1, &path("rooms/r1/active")).await;

        // when (操作):
        engine
            .write(None, WriteBatch::new().set(path("rooms/r1/active"), json!(true)))
            .await
            .unwrap();
        engine
            .write(None, WriteBatch::new().set(path("rooms/r1/active"), json!(true)))
            .await
            .unwrap();
        engine
            .write(None, WriteBatch::new().remove(path("rooms/r1")))
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(rx.try_recv().unwrap().value, None);
        assert_eq!(rx.try_recv().unwrap().value, Some(json!(true)));
        assert_eq!(rx.try_recv().unwrap().value, None);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_child_subscription_limits_initial_snapshot_and_orders() {
        // テスト項目: 子ノード購読は順序付け・件数制限された初期スナップショットを返す
        // given (前提条件):
        let (engine, _clock) = create_test_engine();
        engine
            .write(
                None,
                WriteBatch::new()
                    .set(path("messages/r1/c"), json!({ "serverTimestamp": 3 }))
                    .set(path("messages/r1/a"), json!({ "serverTimestamp": 1 }))
                    .set(path("messages/r1/b"), json!({ "serverTimestamp": 2 })),
            )
            .await
            .unwrap();

        // when (操作):
        let query = ChildQuery::new(path("messages/r1"))
            .order_by_child("serverTimestamp")
            .limit_to_last(2);
        let (_id, mut rx) = engine.subscribe_children(1, query).await;
        engine
            .write(
                None,
                WriteBatch::new().set(path("messages/r1/0"), json!({ "serverTimestamp": 4 })),
            )
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(rx.try_recv().unwrap().key, "b");
        assert_eq!(rx.try_recv().unwrap().key, "c");
        assert_eq!(rx.try_recv().unwrap().key, "0");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_server_timestamp_resolved_on_commit() {
        // テスト項目: サーバータイムスタンプがコミット時の時刻に置換される
        // given (前提条件):
        let (engine, clock) = create_test_engine();
        clock.set(77_000);

        // when (操作):
        engine
            .write(
                None,
                WriteBatch::new().set(
                    path("presence/alice"),
                    json!({ "since": crate::domain::server_timestamp() }),
                ),
            )
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(
            engine.read(&path("presence/alice/since")).await,
            Some(json!(77_000))
        );
    }

    #[tokio::test]
    async fn test_create_rejects_existing() {
        // テスト項目: create は既存ノードに対して AlreadyExists を返す
        // given (前提条件):
        let (engine, _clock) = create_test_engine();
        engine
            .create(None, &path("waiting"), json!({ "occupantId": "a" }))
            .await
            .unwrap();

        // when (操作):
        let result = engine
            .create(None, &path("waiting"), json!({ "occupantId": "b" }))
            .await;

        // then (期待する結果):
        assert_eq!(result, Err(StoreError::AlreadyExists("waiting".to_string())));
        assert_eq!(
            engine.read(&path("waiting/occupantId")).await,
            Some(json!("a"))
        );
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        // テスト項目: 期待値が一致した場合のみ書き込まれる
        // given (前提条件):
        let (engine, _clock) = create_test_engine();
        let slot = path("waiting");

        // when (操作):
        let first = engine
            .compare_and_set(None, &slot, None, Some(json!({ "occupantId": "a" })))
            .await
            .unwrap();
        let stale = engine
            .compare_and_set(None, &slot, None, Some(json!({ "occupantId": "b" })))
            .await
            .unwrap();

        // then (期待する結果):
        assert!(first.committed);
        assert!(!stale.committed);
        assert_eq!(stale.current, Some(json!({ "occupantId": "a" })));
    }

    #[tokio::test]
    async fn test_denied_write_leaves_tree_untouched() {
        // テスト項目: ルールで拒否されたバッチは一切反映されない
        // given (前提条件):
        let (engine, _clock) = create_test_engine();

        // when (操作):
        let result = engine
            .write(
                Some("alice"),
                WriteBatch::new()
                    .set(path("matches/bob"), json!({ "roomId": "r1" }))
                    .set(path("presence/bob"), json!({ "online": true })),
            )
            .await;

        // then (期待する結果):
        assert!(matches!(result, Err(StoreError::PermissionDenied { .. })));
        assert_eq!(engine.snapshot().await, json!({}));
    }

    #[tokio::test]
    async fn test_remove_if_child_equals_respects_new_owner() {
        // テスト項目: 条件付き削除は所有者が変わっていれば実行されない
        // given (前提条件):
        let (engine, _clock) = create_test_engine();
        engine
            .write(
                None,
                WriteBatch::new().set(path("waiting"), json!({ "occupantId": "carol", "since": 1 })),
            )
            .await
            .unwrap();

        // when (操作):
        engine
            .run_disconnect_action(
                &path("waiting"),
                DisconnectAction::RemoveIfChildEquals {
                    child: "occupantId".to_string(),
                    equals: json!("alice"),
                },
            )
            .await;

        // then (期待する結果):
        assert_eq!(
            engine.read(&path("waiting/occupantId")).await,
            Some(json!("carol"))
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_delivery() {
        // テスト項目: キャンセル後は通知されない
        // given (前提条件):
        let (engine, _clock) = create_test_engine();
        let (id, mut rx) = engine.subscribe_value(1, &path("waiting")).await;
        let _initial = rx.try_recv().unwrap();

        // when (操作):
        engine.cancel(id);
        engine
            .write(None, WriteBatch::new().set(path("waiting"), json!({ "occupantId": "a" })))
            .await
            .unwrap();

        // then (期待する結果):
        assert!(rx.try_recv().is_err());
    }
}
