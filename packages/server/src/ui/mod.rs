//! Store server: WebSocket protocol endpoint and HTTP debug endpoints.

mod handler;
mod server;
mod signal;
pub mod state;

pub use server::Server;
pub use signal::shutdown_signal;
