//! Store domain: paths, values, errors, write rules and the `SharedStore` port.

pub mod error;
pub mod path;
pub mod rules;
pub mod server_value;
pub mod store;
pub mod subscription;
pub mod tree;

pub use error::StoreError;
pub use path::StorePath;
pub use server_value::{resolve_server_values, server_timestamp};
pub use store::{
    ChildQuery, DisconnectAction, SharedStore, TransactionFn, TransactionResult, WriteBatch,
};
pub use subscription::{ChildAdded, Subscription, SubscriptionCanceller, SubscriptionId, ValueSnapshot};

/// Node value stored in the tree.
pub type Value = serde_json::Value;
