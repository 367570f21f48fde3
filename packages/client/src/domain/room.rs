//! Room record.

use std::collections::BTreeMap;

use pairchat_server::domain::{Value, server_timestamp};
use serde::Deserialize;
use serde_json::json;

use super::{RoomId, UserId};

/// Stored room as read back from `rooms/{rid}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub active: bool,
    pub participants: BTreeMap<String, bool>,
    #[serde(default)]
    pub ended_at: Option<i64>,
}

impl Room {
    /// Value written when the room is created (`createdAt` set by the store clock).
    pub fn creation_value(id: &RoomId, creator: &UserId, peer: &UserId) -> Value {
        json!({
            "id": id.as_str(),
            "createdAt": server_timestamp(),
            "active": true,
            "participants": {
                creator.as_str(): true,
                peer.as_str(): true,
            },
        })
    }

    pub fn parse(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participants.get(user.as_str()).copied().unwrap_or(false)
    }
}

/// What a client can tell about a room from the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomStatus {
    Active,
    Inactive,
    Missing,
}

impl RoomStatus {
    /// Classify the value of `rooms/{rid}`.
    pub fn of(value: Option<&Value>) -> Self {
        match value.and_then(Room::parse) {
            Some(room) if room.active => RoomStatus::Active,
            Some(_) => RoomStatus::Inactive,
            None if value.is_some() => RoomStatus::Inactive,
            None => RoomStatus::Missing,
        }
    }

    /// Classify the value of `rooms/{rid}/active`.
    pub fn of_active_flag(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Bool(true)) => RoomStatus::Active,
            Some(_) => RoomStatus::Inactive,
            None => RoomStatus::Missing,
        }
    }

    pub fn is_active(self) -> bool {
        self == RoomStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(raw: &str) -> UserId {
        UserId::new(raw.to_string()).unwrap()
    }

    #[test]
    fn test_creation_value_has_two_participants() {
        // テスト項目: 作成時の値に2人の参加者と active=true が含まれる
        // given (前提条件):
        let id = RoomId::new("r1".to_string()).unwrap();

        // when (操作):
        let value = Room::creation_value(&id, &user("alice"), &user("bob"));

        // then (期待する結果):
        assert_eq!(value["active"], json!(true));
        assert_eq!(value["participants"], json!({ "alice": true, "bob": true }));
        assert_eq!(value["createdAt"], server_timestamp());
    }

    #[test]
    fn test_room_status_classification() {
        // テスト項目: ルームの状態が Active / Inactive / Missing に分類される
        // given (前提条件):
        let active = json!({ "id": "r1", "createdAt": 1, "active": true, "participants": { "a": true, "b": true } });
        let inactive = json!({ "id": "r1", "createdAt": 1, "active": false, "endedAt": 2, "participants": { "a": true, "b": true } });

        // when (操作) / then (期待する結果):
        assert_eq!(RoomStatus::of(Some(&active)), RoomStatus::Active);
        assert_eq!(RoomStatus::of(Some(&inactive)), RoomStatus::Inactive);
        assert_eq!(RoomStatus::of(None), RoomStatus::Missing);
        assert_eq!(RoomStatus::of_active_flag(Some(&json!(true))), RoomStatus::Active);
        assert_eq!(RoomStatus::of_active_flag(Some(&json!(false))), RoomStatus::Inactive);
        assert_eq!(RoomStatus::of_active_flag(None), RoomStatus::Missing);
    }

    #[test]
    fn test_parse_room() {
        // テスト項目: 保存済みのルームを読み戻せる
        // given (前提条件):
        let value = json!({ "id": "r1", "createdAt": 10, "active": true, "participants": { "alice": true, "bob": true } });

        // when (操作):
        let room = Room::parse(&value).unwrap();

        // then (期待する結果):
        assert_eq!(room.created_at, Some(10));
        assert!(room.has_participant(&user("alice")));
        assert!(!room.has_participant(&user("carol")));
    }
}
