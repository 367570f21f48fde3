//! Write authorization rules.
//!
//! Every write of a batch is checked against the tree before the batch
//! (`before`) and the tree as it would look after the whole batch (`after`),
//! so a room and the writes that depend on its participant set can be
//! authorized in one step.
//!
//! | Path | Who may write |
//! |------|---------------|
//! | `waiting` | any signed-in identity |
//! | `matches/{uid}` | any signed-in identity |
//! | `presence/{uid}` | `uid` |
//! | `rooms/{rid}` | create: one of exactly two new participants; afterwards: an existing participant, participants immutable |
//! | `rooms/{rid}/typing/{uid}` | `uid`, if a participant |
//! | `rooms/{rid}/**` | an existing participant |
//! | `messages/{rid}/{mid}` | a participant of `rid`, as `senderId`, create only |

use std::collections::BTreeSet;

use super::{StoreError, StorePath, Value, tree::value_at};

pub const WAITING: &str = "waiting";
pub const MATCHES: &str = "matches";
pub const PRESENCE: &str = "presence";
pub const ROOMS: &str = "rooms";
pub const MESSAGES: &str = "messages";
pub const PARTICIPANTS: &str = "participants";
pub const TYPING: &str = "typing";
pub const SENDER_ID: &str = "senderId";

/// Check a single write of `auth` to `path`.
pub fn authorize_write(
    auth: &str,
    path: &StorePath,
    before: &Value,
    after: &Value,
) -> Result<(), StoreError> {
    let segments: Vec<&str> = path.segments().iter().map(String::as_str).collect();

    match segments.as_slice() {
        [WAITING, ..] => Ok(()),
        [MATCHES, _, ..] => Ok(()),
        [PRESENCE, uid, ..] if *uid == auth => Ok(()),
        [PRESENCE, ..] => Err(StoreError::denied(path, "presence belongs to its owner")),
        [ROOMS, room_id] => authorize_room(auth, path, room_id, before, after),
        [ROOMS, room_id, TYPING, uid, ..] => {
            require_participant(auth, path, room_id, before)?;
            if *uid == auth {
                Ok(())
            } else {
                Err(StoreError::denied(path, "typing flag belongs to its owner"))
            }
        }
        [ROOMS, room_id, rest @ ..] => {
            require_participant(auth, path, room_id, before)?;
            if rest.first() == Some(&PARTICIPANTS) {
                return Err(StoreError::denied(path, "participants are immutable"));
            }
            if room_exists(after, room_id)
                && participants(before, room_id) != participants(after, room_id)
            {
                return Err(StoreError::denied(path, "participants are immutable"));
            }
            Ok(())
        }
        [MESSAGES, room_id, _message_id] => authorize_message(auth, path, room_id, before, after),
        _ => Err(StoreError::denied(path, "no rule allows writing here")),
    }
}

fn authorize_room(
    auth: &str,
    path: &StorePath,
    room_id: &str,
    before: &Value,
    after: &Value,
) -> Result<(), StoreError> {
    if !room_exists(before, room_id) {
        let Some(new_participants) = participants(after, room_id) else {
            // Removing a room that does not exist.
            return Ok(());
        };
        if new_participants.len() != 2 {
            return Err(StoreError::denied(path, "a room has exactly two participants"));
        }
        if !new_participants.contains(auth) {
            return Err(StoreError::denied(path, "creator must be a participant"));
        }
        return Ok(());
    }

    require_participant(auth, path, room_id, before)?;
    if room_exists(after, room_id) && participants(before, room_id) != participants(after, room_id)
    {
        return Err(StoreError::denied(path, "participants are immutable"));
    }
    Ok(())
}

fn authorize_message(
    auth: &str,
    path: &StorePath,
    room_id: &str,
    before: &Value,
    after: &Value,
) -> Result<(), StoreError> {
    if value_at(before, path).is_some() {
        return Err(StoreError::denied(path, "messages are immutable"));
    }
    let Some(message) = value_at(after, path) else {
        return Err(StoreError::denied(path, "messages are never deleted"));
    };
    let is_participant = participants(after, room_id).is_some_and(|set| set.contains(auth));
    if !is_participant {
        return Err(StoreError::denied(path, "sender is not a participant of the room"));
    }
    if message.get(SENDER_ID).and_then(Value::as_str) != Some(auth) {
        return Err(StoreError::denied(path, "senderId must match the writer"));
    }
    Ok(())
}

fn require_participant(
    auth: &str,
    path: &StorePath,
    room_id: &str,
    before: &Value,
) -> Result<(), StoreError> {
    match participants(before, room_id) {
        Some(set) if set.contains(auth) => Ok(()),
        Some(_) => Err(StoreError::denied(path, "not a participant of the room")),
        None => Err(StoreError::denied(path, "room does not exist")),
    }
}

fn room_path(room_id: &str) -> Option<StorePath> {
    StorePath::from_segments([ROOMS, room_id]).ok()
}

fn room_exists(root: &Value, room_id: &str) -> bool {
    room_path(room_id).is_some_and(|path| value_at(root, &path).is_some())
}

/// Participant identities of a room (`participants` is an object keyed by identity).
pub fn participants(root: &Value, room_id: &str) -> Option<BTreeSet<String>> {
    let path = room_path(room_id)?.child(PARTICIPANTS).ok()?;
    let map = value_at(root, &path)?.as_object()?;
    Some(
        map.iter()
            .filter(|(_, flag)| flag.as_bool() == Some(true))
            .map(|(uid, _)| uid.clone())
            .collect(),
    )
}
