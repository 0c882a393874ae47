pub mod channel;
pub mod events;
pub mod install;
pub mod solana;

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use crate::config::ProviderConfig;
use crate::error::{ErrorCode, WalletError};
use crate::messages::{CoreResponse, Verb};
use crate::network::{self, DEFAULT_CHAIN_ID_HEX};
use crate::page::{GlobalValue, ProviderFlags, WindowBus};
use crate::ports::RpcTransport;
use crate::rpc::RpcMultiplexer;
use crate::validation::is_passthrough;

use self::channel::RelayClient;
use self::events::{EventEmitter, ListenerId};

struct ProviderInner {
    relay: Arc<RelayClient>,
    rpc: RpcMultiplexer,
    events: EventEmitter,
    config: ProviderConfig,
    foreign: Mutex<Vec<GlobalValue>>,
}

/// The EVM provider object a page sees as `window.ethereum`.
#[derive(Clone)]
pub struct PageProvider {
    inner: Arc<ProviderInner>,
}

impl std::fmt::Debug for PageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageProvider")
            .field("relay", &self.inner.relay)
            .finish_non_exhaustive()
    }
}

fn missing_field(what: &str) -> WalletError {
    WalletError::Remote {
        code: ErrorCode::Internal,
        message: format!("response carried no {what}"),
    }
}

impl PageProvider {
    /// Must be called inside a tokio runtime.
    pub fn connect(bus: WindowBus, transport: Arc<dyn RpcTransport>, config: ProviderConfig) -> Self {
        let events = EventEmitter::default();
        let relay = Arc::new(RelayClient::connect(
            bus,
            events.clone(),
            config.request_timeout,
        ));
        let rpc = RpcMultiplexer::new(transport, config.rpc.clone());
        Self {
            inner: Arc::new(ProviderInner {
                relay,
                rpc,
                events,
                config,
                foreign: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn relay(&self) -> Arc<RelayClient> {
        Arc::clone(&self.inner.relay)
    }

    pub fn ptr_eq(&self, other: &PageProvider) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn flags(&self) -> ProviderFlags {
        ProviderFlags::DEVNET
    }

    /// This provider first, then any foreign provider found at install time.
    pub fn providers(&self) -> Vec<GlobalValue> {
        let mut all = vec![GlobalValue::Evm(self.clone())];
        if let Ok(foreign) = self.inner.foreign.lock() {
            all.extend(foreign.iter().cloned());
        }
        all
    }

    pub(crate) fn register_foreign(&self, provider: GlobalValue) {
        if let Ok(mut foreign) = self.inner.foreign.lock() {
            foreign.push(provider);
        }
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

    pub fn emit(&self, event: &str, value: &Value) -> usize {
        self.inner.events.emit(event, value)
    }

    async fn send(&self, verb: Verb, data: Value) -> Result<CoreResponse, WalletError> {
        self.inner.relay.send(verb, data).await
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value, WalletError> {
        let params = if params.is_null() { json!([]) } else { params };
        tracing::debug!(method, "provider request");

        if is_passthrough(method) {
            return self.inner.rpc.call(method, params).await;
        }

        match method {
            "eth_requestAccounts" => {
                let response = self.send(Verb::RequestAccounts, Value::Null).await?;
                response
                    .accounts
                    .map(|a| json!(a))
                    .ok_or_else(|| missing_field("accounts"))
            }
            "eth_accounts" => match self.send(Verb::GetAccounts, Value::Null).await {
                Ok(response) => Ok(json!(response.accounts.unwrap_or_default())),
                Err(e) => {
                    tracing::debug!(error = %e, "eth_accounts failed, reporting no accounts");
                    Ok(json!([]))
                }
            },
            "eth_chainId" => {
                let response = self.send(Verb::GetWalletState, Value::Null).await?;
                let chain_id = response
                    .data
                    .as_ref()
                    .and_then(|d| d.get("selectedNetwork"))
                    .and_then(Value::as_str)
                    .and_then(|selected| network::resolve(selected).ok())
                    .and_then(|n| n.chain_id_hex())
                    .unwrap_or_else(|| DEFAULT_CHAIN_ID_HEX.to_owned());
                Ok(json!(chain_id))
            }
            "net_version" => Ok(json!(self.inner.config.chain_id.to_string())),
            "eth_sendTransaction" => {
                let tx = params
                    .get(0)
                    .filter(|t| t.is_object())
                    .cloned()
                    .ok_or_else(|| {
                        WalletError::InvalidParameters(
                            "eth_sendTransaction expects a transaction object".to_owned(),
                        )
                    })?;
                let response = self.send(Verb::SendTransaction, tx).await?;
                response
                    .hash
                    .map(|h| json!(h))
                    .ok_or_else(|| missing_field("transaction hash"))
            }
            "eth_sign" | "personal_sign" => {
                // eth_sign is [address, data], personal_sign is [data, address].
                let index = usize::from(method == "eth_sign");
                let data = params.get(index).cloned().ok_or_else(|| {
                    WalletError::InvalidParameters(format!("{method} expects a message"))
                })?;
                let response = self
                    .send(Verb::SignTransaction, json!({ "data": data }))
                    .await?;
                response.signature.ok_or_else(|| missing_field("signature"))
            }
            "wallet_switchEthereumChain" => {
                let chain_id = params
                    .get(0)
                    .and_then(|p| p.get("chainId"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        WalletError::InvalidParameters(
                            "wallet_switchEthereumChain expects [{ chainId }]".to_owned(),
                        )
                    })?;
                self.send(Verb::SwitchNetwork, json!({ "network": chain_id }))
                    .await?;
                Ok(Value::Null)
            }
            other => {
                tracing::warn!(method = other, "unsupported provider method");
                Err(WalletError::MethodNotSupported(other.to_owned()))
            }
        }
    }
}
