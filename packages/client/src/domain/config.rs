//! Session tunables.

/// Timing and size parameters of a client session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Age after which a waiting slot entry may be evicted
    pub stale_timeout_ms: i64,
    /// Period of the waiter's slot heartbeat (shorter than `stale_timeout_ms`)
    pub heartbeat_interval_ms: u64,
    /// Width of the message dedup bucket
    pub bucket_width_ms: i64,
    /// Maximum message length in characters, after trimming
    pub max_text_len: usize,
    /// Number of recent messages loaded when joining a room
    pub history_limit: usize,
    /// How long a rendered message signature hides look-alike duplicates
    pub signature_horizon_ms: i64,
    /// Idle time after which the own typing flag is reset
    pub typing_idle_ms: u64,
}

impl SessionConfig {
    /// Capacity of the rendered message id set
    pub fn rendered_capacity(&self) -> usize {
        self.history_limit.saturating_mul(2).max(1)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stale_timeout_ms: 45_000,
            heartbeat_interval_ms: 12_000,
            bucket_width_ms: 1_000,
            max_text_len: 1_000,
            history_limit: 200,
            signature_horizon_ms: 5_000,
            typing_idle_ms: 900,
        }
    }
}
