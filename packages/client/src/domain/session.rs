//! Session phase and the UI boundary types.

use super::{RoomId, UserId};

/// Where a session is in its lifecycle.
///
/// The phase doubles as the guard against duplicate triggers: a search is only
/// started from `Idle`, and a join for the room already being joined or
/// connected is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    /// `waiting` is `true` once this session occupies the waiting slot
    Searching { waiting: bool },
    Joining { room_id: RoomId },
    Connected { room_id: RoomId, peer_id: UserId },
    Leaving,
}

impl Phase {
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            Phase::Joining { room_id } | Phase::Connected { room_id, .. } => Some(room_id),
            _ => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Phase::Idle)
    }

    pub fn is_searching(&self) -> bool {
        matches!(self, Phase::Searching { .. })
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Phase::Connected { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Searching { .. } => "searching",
            Phase::Joining { .. } => "joining",
            Phase::Connected { .. } => "connected",
            Phase::Leaving => "leaving",
        }
    }
}

/// Coarse status shown by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    SigningIn,
    Ready,
    Searching,
    Connected,
    PeerLeft,
    Error,
}

/// Session → UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Status(SessionStatus),
    Message { text: String, own: bool },
    Notice(String),
    PeerTyping(bool),
}

/// UI → session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Find,
    Next,
    Leave,
    Send(String),
    Typing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_room_id() {
        // テスト項目: ルームに関係するフェーズのみルーム ID を返す
        // given (前提条件):
        let room_id = RoomId::new("r1".to_string()).unwrap();
        let peer_id = UserId::new("bob".to_string()).unwrap();

        // when (操作) / then (期待する結果):
        assert_eq!(Phase::Idle.room_id(), None);
        assert_eq!(Phase::Searching { waiting: true }.room_id(), None);
        assert_eq!(
            Phase::Joining {
                room_id: room_id.clone()
            }
            .room_id(),
            Some(&room_id)
        );
        assert_eq!(
            Phase::Connected {
                room_id: room_id.clone(),
                peer_id
            }
            .room_id(),
            Some(&room_id)
        );
    }
}
