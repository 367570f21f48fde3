//! Shared realtime store for PairChat.
//!
//! The store keeps a JSON tree and offers the primitives the matchmaking
//! protocol is built on: atomic per-node transactions, create-only writes,
//! multi-path atomic updates, change subscriptions and disconnect hooks.
//! It can be embedded in-process ([`infrastructure::memory::MemoryStore`]) or
//! served to remote clients over WebSocket ([`ui::Server`]).

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
