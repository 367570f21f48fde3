//! Where each record lives in the store tree.

use pairchat_server::domain::{
    StoreError, StorePath,
    rules::{MATCHES, MESSAGES, PRESENCE, ROOMS, TYPING, WAITING},
};

use super::{MessageId, RoomId, UserId};

pub const ACTIVE: &str = "active";
pub const ENDED_AT: &str = "endedAt";

/// The global waiting slot: `waiting`
pub fn waiting_slot() -> Result<StorePath, StoreError> {
    StorePath::from_segments([WAITING])
}

/// Match mailbox of a user: `matches/{uid}`
pub fn mailbox(user: &UserId) -> Result<StorePath, StoreError> {
    StorePath::from_segments([MATCHES, user.as_str()])
}

/// `presence/{uid}`
pub fn presence(user: &UserId) -> Result<StorePath, StoreError> {
    StorePath::from_segments([PRESENCE, user.as_str()])
}

/// `rooms/{rid}`
pub fn room(room: &RoomId) -> Result<StorePath, StoreError> {
    StorePath::from_segments([ROOMS, room.as_str()])
}

/// `rooms/{rid}/active`
pub fn room_active(room: &RoomId) -> Result<StorePath, StoreError> {
    StorePath::from_segments([ROOMS, room.as_str(), ACTIVE])
}

/// `rooms/{rid}/endedAt`
pub fn room_ended_at(room: &RoomId) -> Result<StorePath, StoreError> {
    StorePath::from_segments([ROOMS, room.as_str(), ENDED_AT])
}

/// `rooms/{rid}/typing/{uid}`
pub fn typing(room: &RoomId, user: &UserId) -> Result<StorePath, StoreError> {
    StorePath::from_segments([ROOMS, room.as_str(), TYPING, user.as_str()])
}

/// `messages/{rid}`
pub fn messages(room: &RoomId) -> Result<StorePath, StoreError> {
    StorePath::from_segments([MESSAGES, room.as_str()])
}

/// `messages/{rid}/{mid}`
pub fn message(room: &RoomId, id: &MessageId) -> Result<StorePath, StoreError> {
    StorePath::from_segments([MESSAGES, room.as_str(), id.as_str()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        // テスト項目: 各レコードのパスが期待どおりに組み立てられる
        // given (前提条件):
        let user = UserId::new("u1".to_string()).unwrap();
        let room_id = RoomId::new("r1".to_string()).unwrap();

        // when (操作) / then (期待する結果):
        assert_eq!(waiting_slot().unwrap().to_string(), "waiting");
        assert_eq!(mailbox(&user).unwrap().to_string(), "matches/u1");
        assert_eq!(presence(&user).unwrap().to_string(), "presence/u1");
        assert_eq!(room(&room_id).unwrap().to_string(), "rooms/r1");
        assert_eq!(room_active(&room_id).unwrap().to_string(), "rooms/r1/active");
        assert_eq!(typing(&room_id, &user).unwrap().to_string(), "rooms/r1/typing/u1");
        assert_eq!(messages(&room_id).unwrap().to_string(), "messages/r1");
    }
}
