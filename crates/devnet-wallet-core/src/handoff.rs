use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

use crate::ports::{load_json, PortError, StoragePort};

/// Wait until `key` holds a value, up to `timeout`. Stores that push change
/// notifications wake the waiter directly; others are polled every
/// `interval`. Returns `None` when time runs out.
pub async fn wait_for_record<S, T>(
    storage: &S,
    key: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<Option<T>, PortError>
where
    S: StoragePort + ?Sized,
    T: DeserializeOwned,
{
    // Subscribe before the first read so a write in between is not missed.
    let mut changes = storage.subscribe();
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(record) = load_json(storage, key).await? {
            return Ok(Some(record));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        let remaining = deadline - now;

        let mut closed = false;
        match changes.as_mut() {
            Some(rx) => {
                let woke = tokio::time::timeout(remaining, async {
                    loop {
                        match rx.recv().await {
                            Ok(change) if change.key == key => return true,
                            Ok(_) => continue,
                            Err(RecvError::Lagged(_)) => return true,
                            Err(RecvError::Closed) => return false,
                        }
                    }
                })
                .await;
                closed = matches!(woke, Ok(false));
            }
            None => tokio::time::sleep(remaining.min(interval)).await,
        }
        if closed {
            tracing::debug!(key, "storage notifications closed, falling back to polling");
            changes = None;
        }
    }
}
