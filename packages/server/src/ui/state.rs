//! Server state.

use crate::infrastructure::memory::MemoryStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Store shared by every socket（全接続で共有するストア）
    pub store: MemoryStore,
}
