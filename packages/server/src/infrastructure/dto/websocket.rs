//! WebSocket protocol frames.
//!
//! Clients send [`RequestEnvelope`] frames and receive [`ServerMessage`]
//! frames. Requests on one socket are answered in the order they were sent.
//! Subscription ids are chosen by the client, so events can be routed before
//! the subscribe response arrives.

use serde::{Deserialize, Serialize};

use crate::domain::{ChildQuery, DisconnectAction, StorePath, SubscriptionId, Value};

pub type RequestId = u64;

/// Client → server frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub request_id: RequestId,
    pub request: StoreRequest,
}

/// A single write of an update batch (`value: null` removes)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteDto {
    pub path: StorePath,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreRequest {
    SignIn,
    Get {
        path: StorePath,
    },
    Set {
        path: StorePath,
        value: Value,
    },
    Remove {
        path: StorePath,
    },
    Create {
        path: StorePath,
        value: Value,
    },
    Update {
        writes: Vec<WriteDto>,
    },
    CompareAndSet {
        path: StorePath,
        expected: Option<Value>,
        value: Option<Value>,
    },
    SubscribeValue {
        subscription_id: SubscriptionId,
        path: StorePath,
    },
    SubscribeChildren {
        subscription_id: SubscriptionId,
        query: ChildQuery,
    },
    Unsubscribe {
        subscription_id: SubscriptionId,
    },
    OnDisconnect {
        path: StorePath,
        action: DisconnectAction,
    },
    CancelOnDisconnect {
        path: StorePath,
    },
    /// Clean shutdown: pending disconnect hooks are discarded
    Close,
}

impl StoreRequest {
    /// Operation name, for logs
    pub fn op(&self) -> &'static str {
        match self {
            StoreRequest::SignIn => "sign_in",
            StoreRequest::Get { .. } => "get",
            StoreRequest::Set { .. } => "set",
            StoreRequest::Remove { .. } => "remove",
            StoreRequest::Create { .. } => "create",
            StoreRequest::Update { .. } => "update",
            StoreRequest::CompareAndSet { .. } => "compare_and_set",
            StoreRequest::SubscribeValue { .. } => "subscribe_value",
            StoreRequest::SubscribeChildren { .. } => "subscribe_children",
            StoreRequest::Unsubscribe { .. } => "unsubscribe",
            StoreRequest::OnDisconnect { .. } => "on_disconnect",
            StoreRequest::CancelOnDisconnect { .. } => "cancel_on_disconnect",
            StoreRequest::Close => "close",
        }
    }
}

/// Successful result of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponsePayload {
    Done,
    Identity { uid: String },
    Value { value: Option<Value> },
    CompareAndSet { committed: bool, current: Option<Value> },
}

/// Wire form of a `StoreError`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDto {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AlreadyExists,
    PermissionDenied,
    Unauthenticated,
    InvalidPath,
    TransactionConflict,
    Disconnected,
    Transport,
    BadRequest,
}

/// Server → client frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ok {
        request_id: RequestId,
        payload: ResponsePayload,
    },
    Error {
        request_id: Option<RequestId>,
        error: ErrorDto,
    },
    ValueChanged {
        subscription_id: SubscriptionId,
        path: StorePath,
        value: Option<Value>,
    },
    ChildAdded {
        subscription_id: SubscriptionId,
        key: String,
        value: Value,
    },
}
