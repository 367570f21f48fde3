//! Client execution logic with reconnection support.

use std::time::Duration;

use crate::domain::SessionConfig;

use super::{
    domain::should_attempt_reconnect,
    error::ClientError,
    terminal::{run_terminal_session, spawn_line_reader},
};

const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_INTERVAL_SECS: u64 = 5;

/// Settings of the terminal client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// WebSocket endpoint of the store server
    pub url: String,
    pub session: SessionConfig,
    /// Bound of compare-and-set attempts per store transaction
    pub max_transaction_attempts: usize,
}

/// Run the terminal client, reconnecting when the store connection is lost
///
/// Each reconnect starts a fresh session with a new anonymous identity.
pub async fn run_client(options: ClientOptions) -> Result<(), ClientError> {
    let mut input = spawn_line_reader().await?;
    let mut reconnect_count = 0;

    loop {
        tracing::info!(
            "Attempting to connect to {} (attempt {}/{})",
            options.url,
            reconnect_count + 1,
            MAX_RECONNECT_ATTEMPTS
        );

        match run_terminal_session(
            &options.url,
            &options.session,
            options.max_transaction_attempts,
            &mut input,
        )
        .await
        {
            Ok(()) => {
                tracing::info!("Client session ended normally");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!("Session ended: {}", e);
                reconnect_count += 1;

                if !should_attempt_reconnect(&e, reconnect_count, MAX_RECONNECT_ATTEMPTS) {
                    tracing::error!("Giving up after {} attempt(s)", reconnect_count);
                    return Err(e);
                }

                tracing::info!(
                    "Reconnecting in {} seconds... (attempt {}/{})",
                    RECONNECT_INTERVAL_SECS,
                    reconnect_count + 1,
                    MAX_RECONNECT_ATTEMPTS
                );
                tokio::time::sleep(Duration::from_secs(RECONNECT_INTERVAL_SECS)).await;
            }
        }
    }
}
