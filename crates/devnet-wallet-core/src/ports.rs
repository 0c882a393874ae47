use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::domain::{Popup, ReceiptSummary, SessionRecord, SignRequest, TabId, TxRequest, WindowId};
use crate::messages::{CoreEvent, CoreMessage, CoreResponse, MessageSender};

#[derive(Debug, Error)]
pub enum PortError {
    #[error("port not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("disconnected: {0}")]
    Disconnected(String),
    #[error("rpc error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
}

/// Shared persistent key/value store (`chrome.storage.local` in the browser).
#[async_trait]
pub trait StoragePort: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, PortError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), PortError>;
    async fn remove(&self, key: &str) -> Result<(), PortError>;

    /// Push notifications for writes, when the store supports them.
    fn subscribe(&self) -> Option<broadcast::Receiver<StorageChange>> {
        None
    }
}

pub async fn load_json<S, T>(storage: &S, key: &str) -> Result<Option<T>, PortError>
where
    S: StoragePort + ?Sized,
    T: DeserializeOwned,
{
    match storage.get(key).await? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| PortError::Validation(format!("stored {key} is malformed: {e}"))),
    }
}

pub async fn store_json<S, T>(storage: &S, key: &str, value: &T) -> Result<(), PortError>
where
    S: StoragePort + ?Sized,
    T: Serialize,
{
    let value = serde_json::to_value(value)
        .map_err(|e| PortError::Validation(format!("serialize {key} failed: {e}")))?;
    storage.set(key, value).await
}

#[async_trait]
pub trait WindowPort: Send + Sync {
    async fn open(&self, popup: Popup) -> Result<WindowId, PortError>;
    async fn close(&self, id: WindowId) -> Result<(), PortError>;
}

#[async_trait]
pub trait TabsPort: Send + Sync {
    async fn tab_ids(&self) -> Result<Vec<TabId>, PortError>;
    async fn send_event(&self, tab_id: TabId, event: CoreEvent) -> Result<(), PortError>;
}

/// Privileged messaging channel as seen from the relay bridge.
#[async_trait]
pub trait RuntimePort: Send + Sync {
    fn is_alive(&self) -> bool;
    async fn send(
        &self,
        message: CoreMessage,
        sender: MessageSender,
    ) -> Result<CoreResponse, PortError>;
}

/// Receiving end of the privileged channel, implemented by the extension core.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: CoreMessage, sender: MessageSender) -> CoreResponse;
}

#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// POST a JSON body and return the decoded JSON body of a 2xx response.
    async fn post_json(&self, url: &str, body: &Value, timeout: Duration)
        -> Result<Value, PortError>;
}

/// Key-holding chain access used by the isolated signer.
#[async_trait]
pub trait BroadcastPort: Send + Sync {
    async fn send_transaction(
        &self,
        endpoint: &str,
        tx: &TxRequest,
        private_key: &str,
    ) -> Result<B256, PortError>;

    async fn receipt(&self, endpoint: &str, hash: B256)
        -> Result<Option<ReceiptSummary>, PortError>;

    async fn replay_call(
        &self,
        endpoint: &str,
        tx: &TxRequest,
        from: Address,
        block_number: u64,
    ) -> Result<Bytes, PortError>;
}

#[async_trait]
pub trait MessageSigner: Send + Sync {
    async fn sign(&self, request: &SignRequest, session: &SessionRecord)
        -> Result<Value, PortError>;
}

pub trait ClockPort: Send + Sync {
    fn now_ms(&self) -> Result<u64, PortError>;
}
