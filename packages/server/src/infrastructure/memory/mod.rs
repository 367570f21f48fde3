//! In-memory implementation of the shared store.

mod connection;
mod engine;

use std::sync::Arc;

use pairchat_shared::time::{Clock, SystemClock};

use crate::domain::{StorePath, Value};

pub use connection::MemoryConnection;
pub use engine::CompareAndSetOutcome;

use engine::Engine;

/// Shared in-memory store; cheap to clone, every clone sees the same tree.
#[derive(Clone)]
pub struct MemoryStore {
    engine: Arc<Engine>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            engine: Arc::new(Engine::new(clock)),
        }
    }

    /// Open a new client connection.
    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection::new(self.engine.clone())
    }

    /// Copy of the whole tree.
    pub async fn snapshot(&self) -> Value {
        self.engine.snapshot().await
    }

    /// Read a node bypassing any connection.
    pub async fn read(&self, path: &StorePath) -> Option<Value> {
        self.engine.read(path).await
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}
