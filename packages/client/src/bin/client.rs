//! Anonymous one-to-one chat client.
//!
//! Connects to a PairChat store server, pairs with a random stranger through
//! the shared waiting slot and chats in a private two-person room.
//! Automatically reconnects on disconnection (max 5 attempts with 5 second interval).
//!
//! Run with:
//! ```not_rust
//! cargo run --bin pairchat-client
//! cargo run --bin pairchat-client -- -u ws://127.0.0.1:3000/ws --bucket-ms 300
//! ```

use clap::Parser;
use pairchat_client::{
    domain::SessionConfig,
    infrastructure::websocket_store::DEFAULT_MAX_TRANSACTION_ATTEMPTS,
    ui::{ClientOptions, run_client},
};
use pairchat_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "pairchat-client")]
#[command(about = "Anonymous one-to-one chat with a random stranger", long_about = None)]
struct Args {
    /// WebSocket server URL
    #[arg(short = 'u', long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,

    /// Width of the message dedup time bucket (milliseconds)
    #[arg(long = "bucket-ms", default_value_t = SessionConfig::default().bucket_width_ms)]
    bucket_width_ms: i64,

    /// Age after which a waiting partner is considered gone (milliseconds)
    #[arg(long = "stale-ms", default_value_t = SessionConfig::default().stale_timeout_ms)]
    stale_timeout_ms: i64,

    /// Heartbeat period while waiting (milliseconds, shorter than --stale-ms)
    #[arg(long = "heartbeat-ms", default_value_t = SessionConfig::default().heartbeat_interval_ms)]
    heartbeat_interval_ms: u64,

    /// Number of recent messages loaded when a chat starts
    #[arg(long, default_value_t = SessionConfig::default().history_limit)]
    history_limit: usize,

    /// Compare-and-set attempts per store transaction
    #[arg(long, default_value_t = DEFAULT_MAX_TRANSACTION_ATTEMPTS)]
    max_transaction_attempts: usize,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "warn");

    let args = Args::parse();
    if args.heartbeat_interval_ms as i64 >= args.stale_timeout_ms {
        tracing::warn!(
            "Heartbeat interval {} ms is not shorter than the stale timeout {} ms; a waiting client may be evicted",
            args.heartbeat_interval_ms,
            args.stale_timeout_ms
        );
    }

    let options = ClientOptions {
        url: args.url,
        session: SessionConfig {
            bucket_width_ms: args.bucket_width_ms,
            stale_timeout_ms: args.stale_timeout_ms,
            heartbeat_interval_ms: args.heartbeat_interval_ms,
            history_limit: args.history_limit,
            ..SessionConfig::default()
        },
        max_transaction_attempts: args.max_transaction_attempts,
    };

    // Run the client
    if let Err(e) = run_client(options).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}
