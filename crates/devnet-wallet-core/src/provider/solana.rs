use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use crate::error::{ErrorCode, WalletError};
use crate::messages::Verb;
use crate::provider::channel::RelayClient;
use crate::provider::events::{EventEmitter, ListenerId};

struct SolanaInner {
    relay: Arc<RelayClient>,
    events: EventEmitter,
    public_key: Mutex<Option<String>>,
}

/// The Solana provider, sharing the EVM provider's relay and token.
#[derive(Clone)]
pub struct SolanaProvider {
    inner: Arc<SolanaInner>,
}

fn malformed(what: &str) -> WalletError {
    WalletError::Remote {
        code: ErrorCode::Internal,
        message: format!("response carried no {what}"),
    }
}

impl SolanaProvider {
    pub fn new(relay: Arc<RelayClient>) -> Self {
        Self {
            inner: Arc::new(SolanaInner {
                relay,
                events: EventEmitter::default(),
                public_key: Mutex::new(None),
            }),
        }
    }

    pub fn ptr_eq(&self, other: &SolanaProvider) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn public_key(&self) -> Option<String> {
        self.inner.public_key.lock().ok().and_then(|k| k.clone())
    }

    pub async fn connect(&self) -> Result<String, WalletError> {
        self.inner
            .relay
            .send(Verb::RequestAccounts, Value::Null)
            .await?;
        let state = self
            .inner
            .relay
            .send(Verb::GetWalletState, Value::Null)
            .await?;
        let key = state
            .data
            .as_ref()
            .and_then(|d| d.pointer("/walletState/solanaPublicKey"))
            .and_then(Value::as_str)
            .filter(|k| !k.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| malformed("Solana public key"))?;
        if let Ok(mut slot) = self.inner.public_key.lock() {
            *slot = Some(key.clone());
        }
        self.inner.events.emit("connect", &json!(key));
        Ok(key)
    }

    pub async fn disconnect(&self) {
        if let Ok(mut slot) = self.inner.public_key.lock() {
            *slot = None;
        }
        self.inner.events.emit("disconnect", &Value::Null);
    }

    pub async fn sign_transaction(&self, transaction: Value) -> Result<Value, WalletError> {
        let response = self
            .inner
            .relay
            .send(Verb::SignTransaction, json!({ "transaction": transaction }))
            .await?;
        response
            .signature
            .as_ref()
            .and_then(|s| s.get("signedTransaction"))
            .cloned()
            .ok_or_else(|| malformed("signed transaction"))
    }

    pub async fn sign_all_transactions(
        &self,
        transactions: Vec<Value>,
    ) -> Result<Vec<Value>, WalletError> {
        let response = self
            .inner
            .relay
            .send(
                Verb::SignTransaction,
                json!({ "transactions": transactions }),
            )
            .await?;
        response
            .signature
            .as_ref()
            .and_then(|s| s.get("signedTransactions"))
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| malformed("signed transactions"))
    }

    /// Resolves to `{ signature, publicKey }` once the cluster accepted the
    /// transaction.
    pub async fn sign_and_send_transaction(&self, transaction: Value) -> Result<Value, WalletError> {
        let response = self
            .inner
            .relay
            .send(Verb::SendTransaction, json!({ "transaction": transaction }))
            .await?;
        response
            .signature
            .filter(|s| s.get("signature").and_then(Value::as_str).is_some())
            .ok_or_else(|| malformed("transaction signature"))
    }

    pub async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, WalletError> {
        let response = self
            .inner
            .relay
            .send(Verb::SignTransaction, json!({ "message": message }))
            .await?;
        let signature = response.signature.ok_or_else(|| malformed("signature"))?;
        serde_json::from_value(signature).map_err(|_| malformed("signature bytes"))
    }

    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.events.on(event, listener)
    }

    pub fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        self.inner.events.remove_listener(event, id)
    }
}
