//! Identity value objects.

use std::fmt;

use pairchat_server::domain::path::is_valid_segment;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Validation errors of client value objects
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Identifier '{0}' cannot be used as a store key")]
    InvalidIdentifier(String),

    #[error("Message text is empty")]
    EmptyMessage,

    #[error("Message text is {len} characters long, the limit is {max}")]
    MessageTooLong { len: usize, max: usize },
}

/// Anonymous identity issued by the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn new(value: String) -> Result<Self, ValidationError> {
        if is_valid_segment(&value) {
            Ok(Self(value))
        } else {
            Err(ValidationError::InvalidIdentifier(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Room identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn new(value: String) -> Result<Self, ValidationError> {
        if is_valid_segment(&value) {
            Ok(Self(value))
        } else {
            Err(ValidationError::InvalidIdentifier(value))
        }
    }

    /// Fresh random room id
    pub fn generate() -> Self {
        Self(format!("room-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! string_conversions {
    ($name:ident) => {
        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_conversions!(UserId);
string_conversions!(RoomId);
