//! Utilities shared by the PairChat store server and client.

pub mod logger;
pub mod time;
