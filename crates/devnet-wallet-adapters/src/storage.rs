use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use devnet_wallet_core::{PortError, StorageChange, StoragePort};

const CHANGE_CAPACITY: usize = 64;

/// Process-wide stand-in for `chrome.storage.local`. Every context of one
/// wallet shares a clone.
#[derive(Debug, Clone)]
pub struct MemoryStorageAdapter {
    entries: Arc<Mutex<HashMap<String, Value>>>,
    changes: Option<broadcast::Sender<StorageChange>>,
}

impl Default for MemoryStorageAdapter {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            entries: Arc::default(),
            changes: Some(changes),
        }
    }
}

impl MemoryStorageAdapter {
    /// A store without change notifications, so readers fall back to polling.
    pub fn polling_only() -> Self {
        Self {
            entries: Arc::default(),
            changes: None,
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort_unstable();
        keys
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>, PortError> {
        self.entries
            .lock()
            .map_err(|e| PortError::Transport(format!("storage lock poisoned: {e}")))
    }

    fn notify(&self, key: &str) {
        if let Some(changes) = &self.changes {
            // No subscribers is fine.
            let _ = changes.send(StorageChange {
                key: key.to_owned(),
            });
        }
    }
}

#[async_trait]
impl StoragePort for MemoryStorageAdapter {
    async fn get(&self, key: &str) -> Result<Option<Value>, PortError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), PortError> {
        self.lock()?.insert(key.to_owned(), value);
        self.notify(key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PortError> {
        let removed = self.lock()?.remove(key).is_some();
        if removed {
            self.notify(key);
        }
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StorageChange>> {
        self.changes.as_ref().map(broadcast::Sender::subscribe)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn writes_are_announced() {
        let storage = MemoryStorageAdapter::default();
        let mut rx = storage.subscribe().expect("notifying store");
        storage.set("a", json!(1)).await.expect("set");
        assert_eq!(rx.recv().await.expect("change").key, "a");
        assert_eq!(storage.get("a").await.expect("get"), Some(json!(1)));

        storage.remove("a").await.expect("remove");
        assert_eq!(rx.recv().await.expect("change").key, "a");
        assert_eq!(storage.get("a").await.expect("get"), None);
    }

    #[tokio::test]
    async fn polling_store_has_no_feed() {
        let storage = MemoryStorageAdapter::polling_only();
        assert!(storage.subscribe().is_none());
        storage.set("b", json!("x")).await.expect("set");
        assert_eq!(storage.keys(), vec!["b".to_owned()]);
    }
}
