//! Data Transfer Objects (DTOs) for the store server.
//!
//! - `websocket`: request, response and event frames of the `/ws` protocol
//! - `conversion`: mapping between DTOs and domain types

pub mod conversion;
pub mod websocket;
