//! Chat message value objects and the deterministic message id.
//!
//! A message id is `sha256(senderId, normalize(text), bucket)` in hex, where
//! `bucket = floor(now / width)`. Two sends of the same text by the same user
//! inside one bucket therefore produce the same id, and the create-only write
//! keeps a single record.

use std::fmt;

use pairchat_server::domain::{Value, server_timestamp};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use super::{UserId, ValidationError};

/// Validated outgoing text (trimmed, non-empty, bounded length)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageText(String);

impl MessageText {
    pub fn new(raw: &str, max_len: usize) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        let len = trimmed.chars().count();
        if len > max_len {
            return Err(ValidationError::MessageTooLong { len, max: max_len });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Trim, collapse whitespace runs to a single space and lowercase.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Index of the dedup bucket `now` falls into.
pub fn time_bucket(now_millis: i64, bucket_width_ms: i64) -> i64 {
    now_millis.div_euclid(bucket_width_ms.max(1))
}

/// Deterministic message id (64 hex chars)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    pub fn derive(sender: &UserId, text: &str, bucket: i64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(sender.as_str().as_bytes());
        hasher.update([0x1f]);
        hasher.update(normalize(text).as_bytes());
        hasher.update([0x1f]);
        hasher.update(bucket.to_string().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` for ids produced by [`MessageId::derive`] (64 lowercase hex chars).
    pub fn is_derived(id: &str) -> bool {
        id.len() == 64 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stored message as read from `messages/{rid}/{mid}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Falls back to the node key for records written without an id
    #[serde(default)]
    pub id: String,
    pub sender_id: String,
    pub text: String,
    pub client_timestamp: i64,
    #[serde(default)]
    pub server_timestamp: Option<i64>,
}

impl MessageRecord {
    /// Value written by the sender (`serverTimestamp` set by the store clock).
    pub fn creation_value(id: &MessageId, sender: &UserId, text: &MessageText, now: i64) -> Value {
        json!({
            "id": id.as_str(),
            "senderId": sender.as_str(),
            "text": text.as_str(),
            "clientTimestamp": now,
            "serverTimestamp": server_timestamp(),
        })
    }

    /// Parse a child of the message list. `key` is the node key.
    pub fn from_child(key: &str, value: &Value) -> Option<Self> {
        let mut record: MessageRecord = serde_json::from_value(value.clone()).ok()?;
        if record.id.is_empty() {
            record.id = key.to_string();
        }
        Some(record)
    }

    pub fn signature(&self, bucket_width_ms: i64) -> MessageSignature {
        MessageSignature {
            sender_id: self.sender_id.clone(),
            normalized_text: normalize(&self.text),
            bucket: time_bucket(self.client_timestamp, bucket_width_ms),
        }
    }
}

/// Content fingerprint used to hide duplicates stored under different ids
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageSignature {
    pub sender_id: String,
    pub normalized_text: String,
    pub bucket: i64,
}
