use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::RwLock;

/// Caller-owned key/value bag handed to every hook and tool of a run.
///
/// Clones share the same storage. Individual reads and writes are atomic, but
/// tools running concurrently must coordinate read-modify-write sequences
/// themselves (see [`SharedContext::update`]).
#[derive(Debug, Clone, Default)]
pub struct SharedContext {
    inner: Arc<RwLock<Map<String, Value>>>,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().await.get(key).cloned()
    }

    pub async fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.inner.write().await.insert(key.into(), value)
    }

    pub async fn remove(&self, key: &str) -> Option<Value> {
        self.inner.write().await.remove(key)
    }

    /// Run `f` with exclusive access to the whole bag.
    pub async fn update<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        let mut guard = self.inner.write().await;
        f(&mut guard)
    }

    pub async fn snapshot(&self) -> Map<String, Value> {
        self.inner.read().await.clone()
    }
}
