//! Anonymous one-to-one chat client.
//!
//! Pairs anonymous participants through a single shared waiting slot, creates
//! a two-person room atomically with the peer's match notification, and
//! exchanges deduplicated messages inside the room. All coordination happens
//! through the [`pairchat_server::domain::SharedStore`] primitives.

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;
