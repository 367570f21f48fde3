//! Waiting slot record and the arbitration decision.
//!
//! The decision is a pure function of the current slot value so it can run
//! inside a store transaction, which may evaluate it more than once.

use pairchat_server::domain::{Value, path::is_valid_segment};
use serde::{Deserialize, Serialize};

/// Content of the `waiting` node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingSlot {
    pub occupant_id: String,
    /// Last claim or heartbeat (ms since epoch)
    pub since: i64,
}

impl WaitingSlot {
    pub fn new(occupant_id: impl Into<String>, since: i64) -> Self {
        Self {
            occupant_id: occupant_id.into(),
            since,
        }
    }

    /// Parse a stored slot. `None` for malformed values such as a legacy bare
    /// string or a slot without timestamp.
    pub fn parse(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({ "occupantId": self.occupant_id, "since": self.since })
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.occupant_id == user_id
    }

    pub fn is_stale(&self, now: i64, stale_timeout_ms: i64) -> bool {
        now - self.since > stale_timeout_ms
    }
}

/// Outcome of evaluating the slot for a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotDecision {
    /// Slot is empty: become the waiter
    Claim,
    /// Caller already waits there: refresh the timestamp
    Refresh,
    /// Slot is stale or malformed: overwrite it and become the waiter
    Evict { previous: Option<String> },
    /// Someone else is waiting: take them and clear the slot
    Pair { peer_id: String },
}

impl SlotDecision {
    /// Decide what `self_id` does with the slot value `current` at time `now`.
    pub fn decide(current: Option<&Value>, self_id: &str, now: i64, stale_timeout_ms: i64) -> Self {
        let Some(value) = current else {
            return SlotDecision::Claim;
        };
        let Some(slot) = WaitingSlot::parse(value) else {
            return SlotDecision::Evict { previous: None };
        };

        if slot.occupant_id.is_empty() {
            SlotDecision::Claim
        } else if slot.is_owned_by(self_id) {
            SlotDecision::Refresh
        } else if slot.is_stale(now, stale_timeout_ms) || !is_valid_segment(&slot.occupant_id) {
            SlotDecision::Evict {
                previous: Some(slot.occupant_id),
            }
        } else {
            SlotDecision::Pair {
                peer_id: slot.occupant_id,
            }
        }
    }

    /// New slot value: the caller as occupant, or empty after pairing.
    pub fn next_value(&self, self_id: &str, now: i64) -> Option<Value> {
        match self {
            SlotDecision::Pair { .. } => None,
            _ => Some(WaitingSlot::new(self_id, now).to_value()),
        }
    }

    #[cfg(test)]
    fn is_waiter(&self) -> bool {
        !matches!(self, SlotDecision::Pair { .. })
    }
}

/// Heartbeat update: refresh `since` only while `self_id` still occupies the slot.
pub fn refresh_if_mine(current: Option<&Value>, self_id: &str, now: i64) -> Option<Value> {
    match current.and_then(WaitingSlot::parse) {
        Some(slot) if slot.is_owned_by(self_id) => Some(WaitingSlot::new(self_id, now).to_value()),
        _ => current.cloned(),
    }
}

/// Empty the slot only while `self_id` occupies it.
pub fn clear_if_mine(current: Option<&Value>, self_id: &str) -> Option<Value> {
    match current.and_then(WaitingSlot::parse) {
        Some(slot) if slot.is_owned_by(self_id) => None,
        _ => current.cloned(),
    }
}

/// `true` when the slot value names `self_id` as occupant.
pub fn is_occupied_by(value: Option<&Value>, self_id: &str) -> bool {
    value
        .and_then(WaitingSlot::parse)
        .is_some_and(|slot| slot.is_owned_by(self_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const STALE: i64 = 45_000;

    #[test]
    fn test_empty_slot_is_claimed() {
        // テスト項目: 空の待機枠は自分が確保する
        // given (前提条件):
        let current = None;

        // when (操作):
        let decision = SlotDecision::decide(current, "alice", 1_000, STALE);

        // then (期待する結果):
        assert_eq!(decision, SlotDecision::Claim);
        assert_eq!(
            decision.next_value("alice", 1_000),
            Some(json!({ "occupantId": "alice", "since": 1_000 }))
        );
    }

    #[test]
    fn test_empty_occupant_is_claimed() {
        // テスト項目: occupantId が空の待機枠は空として扱われる
        // given (前提条件):
        let current = json!({ "occupantId": "", "since": 5 });

        // when (操作):
        let decision = SlotDecision::decide(Some(&current), "alice", 1_000, STALE);

        // then (期待する結果):
        assert_eq!(decision, SlotDecision::Claim);
    }

    #[test]
    fn test_own_slot_is_refreshed() {
        // テスト項目: 自分が待機中なら時刻を更新して待機を続ける
        // given (前提条件):
        let current = json!({ "occupantId": "alice", "since": 1_000 });

        // when (操作):
        let decision = SlotDecision::decide(Some(&current), "alice", 2_000, STALE);

        // then (期待する結果):
        assert_eq!(decision, SlotDecision::Refresh);
        assert!(decision.is_waiter());
        assert_eq!(
            decision.next_value("alice", 2_000),
            Some(json!({ "occupantId": "alice", "since": 2_000 }))
        );
    }

    #[test]
    fn test_stale_slot_is_evicted() {
        // テスト項目: STALE_TIMEOUT を超えた待機者は追い出される
        // given (前提条件):
        let current = json!({ "occupantId": "bob", "since": 1_000 });

        // when (操作):
        let at_limit = SlotDecision::decide(Some(&current), "alice", 1_000 + STALE, STALE);
        let beyond = SlotDecision::decide(Some(&current), "alice", 1_001 + STALE, STALE);

        // then (期待する結果):
        assert_eq!(
            at_limit,
            SlotDecision::Pair {
                peer_id: "bob".to_string()
            }
        );
        assert_eq!(
            beyond,
            SlotDecision::Evict {
                previous: Some("bob".to_string())
            }
        );
    }

    #[test]
    fn test_fresh_other_occupant_is_paired() {
        // テスト項目: 他人が待機中なら相手として取り出し、待機枠を空にする
        // given (前提条件):
        let current = json!({ "occupantId": "bob", "since": 1_000 });

        // when (操作):
        let decision = SlotDecision::decide(Some(&current), "alice", 2_000, STALE);

        // then (期待する結果):
        assert_eq!(
            decision,
            SlotDecision::Pair {
                peer_id: "bob".to_string()
            }
        );
        assert!(!decision.is_waiter());
        assert_eq!(decision.next_value("alice", 2_000), None);
    }

    #[test]
    fn test_malformed_slot_is_treated_as_stale() {
        // テスト項目: 旧形式（文字列のみ）やタイムスタンプ欠落の待機枠は古いものとして扱われる
        // given (前提条件):
        let legacy = json!("bob");
        let no_since = json!({ "occupantId": "bob" });

        // when (操作):
        let legacy_decision = SlotDecision::decide(Some(&legacy), "alice", 2_000, STALE);
        let no_since_decision = SlotDecision::decide(Some(&no_since), "alice", 2_000, STALE);

        // then (期待する結果):
        assert_eq!(legacy_decision, SlotDecision::Evict { previous: None });
        assert_eq!(no_since_decision, SlotDecision::Evict { previous: None });
    }

    #[test]
    fn test_refresh_if_mine_never_claims() {
        // テスト項目: ハートビートは自分が待機中の場合のみ更新し、空の枠は確保しない
        // given (前提条件):
        let mine = json!({ "occupantId": "alice", "since": 1_000 });
        let other = json!({ "occupantId": "bob", "since": 1_000 });

        // when (操作) / then (期待する結果):
        assert_eq!(
            refresh_if_mine(Some(&mine), "alice", 5_000),
            Some(json!({ "occupantId": "alice", "since": 5_000 }))
        );
        assert_eq!(refresh_if_mine(Some(&other), "alice", 5_000), Some(other));
        assert_eq!(refresh_if_mine(None, "alice", 5_000), None);
    }

    #[test]
    fn test_clear_if_mine() {
        // テスト項目: 自分が待機中の場合のみ待機枠を空にする
        // given (前提条件):
        let mine = json!({ "occupantId": "alice", "since": 1_000 });
        let other = json!({ "occupantId": "bob", "since": 1_000 });

        // when (操作) / then (期待する結果):
        assert_eq!(clear_if_mine(Some(&mine), "alice"), None);
        assert_eq!(clear_if_mine(Some(&other), "alice"), Some(other.clone()));
        assert!(is_occupied_by(Some(&mine), "alice"));
        assert!(!is_occupied_by(Some(&other), "alice"));
    }
}
