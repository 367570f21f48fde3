//! UseCase: 待機枠の調停
//!
//! The single global waiting slot is only ever touched through the store's
//! transaction primitive. Among concurrent callers that find the same
//! non-empty, fresh, foreign occupant, exactly one commits the clearing write
//! and becomes the pairer.

use std::sync::Arc;

use pairchat_server::domain::{DisconnectAction, SharedStore, Value};
use pairchat_shared::time::Clock;
use serde_json::json;

use crate::domain::{
    UserId,
    layout,
    slot::{self, SlotDecision},
};

use super::error::ArbiterError;

/// Result of a match attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The caller now occupies the waiting slot
    Waiter,
    /// The caller took `peer_id` out of the waiting slot
    Pairer { peer_id: UserId },
}

/// 待機枠の調停のユースケース
pub struct WaitingSlotArbiter {
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
    stale_timeout_ms: i64,
}

impl WaitingSlotArbiter {
    pub fn new(store: Arc<dyn SharedStore>, clock: Arc<dyn Clock>, stale_timeout_ms: i64) -> Self {
        Self {
            store,
            clock,
            stale_timeout_ms,
        }
    }

    /// Claim the slot or take its occupant, in one atomic transaction.
    ///
    /// A waiter also registers a disconnect hook that empties the slot if the
    /// connection is lost while it is still the occupant.
    pub async fn try_match(&self, self_id: &UserId) -> Result<MatchOutcome, ArbiterError> {
        let now = self.clock.now_millis();
        let stale_timeout_ms = self.stale_timeout_ms;
        let uid = self_id.as_str().to_string();
        let path = layout::waiting_slot()?;

        let result = self
            .store
            .transaction(
                &path,
                Box::new(move |current: Option<&Value>| -> Option<Value> {
                    SlotDecision::decide(current, &uid, now, stale_timeout_ms).next_value(&uid, now)
                }),
            )
            .await?;

        let decision = SlotDecision::decide(
            result.snapshot.as_ref(),
            self_id.as_str(),
            now,
            stale_timeout_ms,
        );
        match decision {
            SlotDecision::Pair { peer_id } => {
                tracing::info!("'{}' took '{}' from the waiting slot", self_id, peer_id);
                Ok(MatchOutcome::Pairer {
                    peer_id: UserId::new(peer_id)?,
                })
            }
            SlotDecision::Evict { previous } => {
                tracing::info!(
                    "'{}' evicted stale waiter {:?} and is now waiting",
                    self_id,
                    previous
                );
                self.register_disconnect_cleanup(self_id).await?;
                Ok(MatchOutcome::Waiter)
            }
            SlotDecision::Claim | SlotDecision::Refresh => {
                tracing::info!("'{}' is waiting for a partner", self_id);
                self.register_disconnect_cleanup(self_id).await?;
                Ok(MatchOutcome::Waiter)
            }
        }
    }

    /// Refresh the waiter's timestamp. Returns `false` when the caller no
    /// longer occupies the slot; an empty slot is never claimed here.
    pub async fn heartbeat(&self, self_id: &UserId) -> Result<bool, ArbiterError> {
        let now = self.clock.now_millis();
        let uid = self_id.as_str().to_string();
        let path = layout::waiting_slot()?;

        let result = self
            .store
            .transaction(
                &path,
                Box::new(move |current: Option<&Value>| -> Option<Value> {
                    slot::refresh_if_mine(current, &uid, now)
                }),
            )
            .await?;

        let still_waiting = slot::is_occupied_by(result.committed.as_ref(), self_id.as_str());
        tracing::debug!("Heartbeat of '{}': still waiting = {}", self_id, still_waiting);
        Ok(still_waiting)
    }

    /// Empty the slot if the caller still occupies it. Returns whether it did.
    pub async fn clear_if_mine(&self, self_id: &UserId) -> Result<bool, ArbiterError> {
        let uid = self_id.as_str().to_string();
        let path = layout::waiting_slot()?;

        let result = self
            .store
            .transaction(
                &path,
                Box::new(move |current: Option<&Value>| -> Option<Value> {
                    slot::clear_if_mine(current, &uid)
                }),
            )
            .await?;

        let cleared = slot::is_occupied_by(result.snapshot.as_ref(), self_id.as_str());
        if cleared {
            self.store.cancel_on_disconnect(&path).await?;
            tracing::info!("'{}' left the waiting slot", self_id);
        }
        Ok(cleared)
    }

    async fn register_disconnect_cleanup(&self, self_id: &UserId) -> Result<(), ArbiterError> {
        let path = layout::waiting_slot()?;
        self.store
            .on_disconnect(
                &path,
                DisconnectAction::RemoveIfChildEquals {
                    child: "occupantId".to_string(),
                    equals: json!(self_id.as_str()),
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairchat_server::{
        domain::StorePath,
        infrastructure::memory::{MemoryConnection, MemoryStore},
    };
    use pairchat_shared::time::ManualClock;

    // ========================================
    // テスト作業記録
    // ========================================
    // 【何をテストするか】
    // - WaitingSlotArbiter の try_match / heartbeat / clear_if_mine
    //
    // 【なぜこのテストが必要か】
    // - 1つの待機枠を複数クライアントが同時に奪い合っても、ペアは1組しか成立してはならない
    // - 古くなった待機者は追い出され、切断時には待機枠が解放されなければならない
    //
    // 【どのようなシナリオをテストするか】
    // 1. 空の待機枠 → 待機者、次の呼び出し → ペア成立
    // 2. 同時に多数のクライアントが try_match しても各待機者は高々1回しかペアにならない
    // 3. STALE_TIMEOUT 経過後は追い出される
    // 4. 異常切断で自分の待機だけが解放される
    // ========================================

    struct Fixture {
        store: MemoryStore,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new(100_000));
            Self {
                store: MemoryStore::new(clock.clone()),
                clock,
            }
        }

        async fn client(&self) -> (Arc<MemoryConnection>, WaitingSlotArbiter, UserId) {
            let connection = Arc::new(self.store.connect());
            let uid = UserId::new(connection.sign_in_anonymously().await.unwrap()).unwrap();
            let arbiter = WaitingSlotArbiter::new(connection.clone(), self.clock.clone(), 45_000);
            (connection, arbiter, uid)
        }

        async fn slot(&self) -> Option<Value> {
            self.store.read(&StorePath::parse("waiting").unwrap()).await
        }
    }

    #[tokio::test]
    async fn test_first_caller_waits_second_pairs() {
        // テスト項目: 最初の呼び出しは待機者になり、次の呼び出しはその待機者とペアになる
        // given (前提条件):
        let fixture = Fixture::new();
        let (_a_conn, a, alice) = fixture.client().await;
        let (_b_conn, b, bob) = fixture.client().await;

        // when (操作):
        let first = a.try_match(&alice).await.unwrap();
        let second = b.try_match(&bob).await.unwrap();

        // then (期待する結果):
        assert_eq!(first, MatchOutcome::Waiter);
        assert_eq!(
            second,
            MatchOutcome::Pairer {
                peer_id: alice.clone()
            }
        );
        assert_eq!(fixture.slot().await, None);
    }

    #[tokio::test]
    async fn test_repeated_search_refreshes_own_entry() {
        // テスト項目: 待機中に再度 try_match しても自分自身とはペアにならず時刻が更新される
        // given (前提条件):
        let fixture = Fixture::new();
        let (_conn, a, alice) = fixture.client().await;
        a.try_match(&alice).await.unwrap();
        fixture.clock.advance(1_000);

        // when (操作):
        let outcome = a.try_match(&alice).await.unwrap();

        // then (期待する結果):
        assert_eq!(outcome, MatchOutcome::Waiter);
        assert_eq!(
            fixture.slot().await,
            Some(json!({ "occupantId": alice.as_str(), "since": 101_000 }))
        );
    }

    #[tokio::test]
    async fn test_concurrent_callers_pair_each_waiter_at_most_once() {
        // テスト項目: 多数のクライアントが同時に try_match しても、各待機者は高々1人の相手としか組まれない
        // given (前提条件):
        let fixture = Fixture::new();
        let mut clients = Vec::new();
        for _ in 0..10 {
            clients.push(fixture.client().await);
        }

        // when (操作):
        let mut handles = Vec::new();
        for (_connection, arbiter, uid) in clients {
            handles.push(tokio::spawn(async move {
                let outcome = arbiter.try_match(&uid).await.unwrap();
                (uid, outcome)
            }));
        }
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        // then (期待する結果):
        let waiters: Vec<&UserId> = outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == MatchOutcome::Waiter)
            .map(|(uid, _)| uid)
            .collect();
        let peers: Vec<&UserId> = outcomes
            .iter()
            .filter_map(|(_, outcome)| match outcome {
                MatchOutcome::Pairer { peer_id } => Some(peer_id),
                MatchOutcome::Waiter => None,
            })
            .collect();
        let unique: std::collections::HashSet<&&UserId> = peers.iter().collect();
        assert_eq!(unique.len(), peers.len());
        assert!(peers.iter().all(|peer| waiters.contains(peer)));
        assert_eq!(waiters.len(), peers.len() + usize::from(fixture.slot().await.is_some()));
    }

    #[tokio::test]
    async fn test_stale_waiter_is_evicted() {
        // テスト項目: STALE_TIMEOUT を超えた待機者はペアにされず追い出される
        // given (前提条件):
        let fixture = Fixture::new();
        let (_a_conn, a, alice) = fixture.client().await;
        let (_b_conn, b, bob) = fixture.client().await;
        a.try_match(&alice).await.unwrap();
        fixture.clock.advance(45_001);

        // when (操作):
        let outcome = b.try_match(&bob).await.unwrap();

        // then (期待する結果):
        assert_eq!(outcome, MatchOutcome::Waiter);
        assert!(slot::is_occupied_by(fixture.slot().await.as_ref(), bob.as_str()));
        assert!(!a.heartbeat(&alice).await.unwrap());
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_waiter_fresh() {
        // テスト項目: ハートビートにより待機者は古くならない
        // given (前提条件):
        let fixture = Fixture::new();
        let (_a_conn, a, alice) = fixture.client().await;
        let (_b_conn, b, bob) = fixture.client().await;
        a.try_match(&alice).await.unwrap();

        // when (操作):
        for _ in 0..5 {
            fixture.clock.advance(12_000);
            assert!(a.heartbeat(&alice).await.unwrap());
        }
        let outcome = b.try_match(&bob).await.unwrap();

        // then (期待する結果):
        assert_eq!(outcome, MatchOutcome::Pairer { peer_id: alice });
    }

    #[tokio::test]
    async fn test_heartbeat_does_not_claim_empty_slot() {
        // テスト項目: 待機枠が空ならハートビートは枠を確保しない
        // given (前提条件):
        let fixture = Fixture::new();
        let (_conn, a, alice) = fixture.client().await;

        // when (操作):
        let still_waiting = a.heartbeat(&alice).await.unwrap();

        // then (期待する結果):
        assert!(!still_waiting);
        assert_eq!(fixture.slot().await, None);
    }

    #[tokio::test]
    async fn test_clear_if_mine_leaves_foreign_slot() {
        // テスト項目: clear_if_mine は他人の待機を消さない
        // given (前提条件):
        let fixture = Fixture::new();
        let (_a_conn, a, alice) = fixture.client().await;
        let (_b_conn, b, bob) = fixture.client().await;
        b.try_match(&bob).await.unwrap();

        // when (操作):
        let cleared_other = a.clear_if_mine(&alice).await.unwrap();
        let cleared_own = b.clear_if_mine(&bob).await.unwrap();

        // then (期待する結果):
        assert!(!cleared_other);
        assert!(cleared_own);
        assert_eq!(fixture.slot().await, None);
    }

    #[tokio::test]
    async fn test_disconnect_releases_only_own_slot() {
        // テスト項目: 異常切断時のフックは自分が待機中の場合のみ待機枠を空にする
        // given (前提条件):
        let fixture = Fixture::new();
        let (a_conn, a, alice) = fixture.client().await;
        let (_b_conn, b, bob) = fixture.client().await;
        a.try_match(&alice).await.unwrap();
        fixture.clock.advance(45_001);
        b.try_match(&bob).await.unwrap();

        // when (操作):
        a_conn.disconnect().await;

        // then (期待する結果):
        assert!(slot::is_occupied_by(fixture.slot().await.as_ref(), bob.as_str()));
    }

    #[tokio::test]
    async fn test_disconnect_while_waiting_empties_slot() {
        // テスト項目: 待機中に異常切断すると待機枠が空になる
        // given (前提条件):
        let fixture = Fixture::new();
        let (a_conn, a, alice) = fixture.client().await;
        a.try_match(&alice).await.unwrap();

        // when (操作):
        a_conn.disconnect().await;

        // then (期待する結果):
        assert_eq!(fixture.slot().await, None);
    }
}
