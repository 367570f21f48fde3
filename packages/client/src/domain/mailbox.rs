//! Match assignment delivered to the waiter's mailbox.

use pairchat_server::domain::{Value, server_timestamp};
use serde::Deserialize;
use serde_json::json;

use super::{RoomId, UserId};

/// Content of `matches/{uid}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchAssignment {
    pub room_id: RoomId,
    pub peer_id: UserId,
    #[serde(default)]
    pub assigned_at: Option<i64>,
}

impl MatchAssignment {
    /// Value written by the pairer (`assignedAt` set by the store clock).
    pub fn delivery_value(room_id: &RoomId, peer_id: &UserId) -> Value {
        json!({
            "roomId": room_id.as_str(),
            "peerId": peer_id.as_str(),
            "assignedAt": server_timestamp(),
        })
    }

    pub fn parse(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}
