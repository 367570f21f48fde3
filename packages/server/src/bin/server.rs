//! Shared store server for PairChat clients.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin pairchat-server
//! cargo run --bin pairchat-server -- --host 0.0.0.0 --port 3000
//! ```

use clap::Parser;
use pairchat_server::{infrastructure::memory::MemoryStore, ui::Server};
use pairchat_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "pairchat-server")]
#[command(about = "Shared store server for anonymous one-to-one chat", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "debug");

    let args = Args::parse();

    let store = MemoryStore::default();
    let server = Server::new(store);
    if let Err(e) = server.run(args.host, args.port).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
