//! Store adapters used by the client.

pub mod websocket_store;

pub use websocket_store::WebSocketStore;
