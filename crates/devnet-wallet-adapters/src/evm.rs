use std::sync::Arc;
use std::time::Duration;

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use devnet_wallet_core::rpc::rpc_request;
use devnet_wallet_core::{BroadcastPort, PortError, ReceiptSummary, RpcTransport, TxRequest};

/// Priority tip used when the node cannot suggest one (1.5 gwei).
pub const DEFAULT_PRIORITY_FEE: u128 = 1_500_000_000;

pub fn parse_signer(private_key: &str) -> Result<PrivateKeySigner, PortError> {
    private_key
        .trim()
        .parse::<PrivateKeySigner>()
        .map_err(|e| PortError::Validation(format!("invalid private key: {e}")))
}

fn decode<T: DeserializeOwned>(what: &str, value: Value) -> Result<T, PortError> {
    serde_json::from_value(value)
        .map_err(|e| PortError::Validation(format!("malformed {what}: {e}")))
}

fn narrow_u64(what: &str, value: U256) -> Result<u64, PortError> {
    u64::try_from(value).map_err(|_| PortError::Validation(format!("{what} out of range")))
}

fn narrow_u128(what: &str, value: U256) -> Result<u128, PortError> {
    u128::try_from(value).map_err(|_| PortError::Validation(format!("{what} out of range")))
}

/// `eth_call` / `eth_estimateGas` argument for `tx` sent by `from`.
fn call_object(tx: &TxRequest, from: Address) -> Value {
    let mut call = Map::new();
    call.insert("from".to_owned(), json!(from));
    if let Some(to) = tx.to {
        call.insert("to".to_owned(), json!(to));
    }
    if let Some(value) = tx.value {
        call.insert("value".to_owned(), json!(value));
    }
    if let Some(data) = &tx.data {
        call.insert("data".to_owned(), json!(data));
    }
    if let Some(gas) = tx.gas_limit() {
        call.insert("gas".to_owned(), json!(gas));
    }
    Value::Object(call)
}

/// Signs locally and broadcasts raw transactions over JSON-RPC. Missing
/// nonce, gas and fee fields are filled from the endpoint being used.
#[derive(Clone)]
pub struct EvmBroadcastAdapter {
    transport: Arc<dyn RpcTransport>,
    timeout: Duration,
}

impl std::fmt::Debug for EvmBroadcastAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmBroadcastAdapter")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl EvmBroadcastAdapter {
    pub fn new(transport: Arc<dyn RpcTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    async fn call(&self, endpoint: &str, method: &str, params: Value) -> Result<Value, PortError> {
        rpc_request(&*self.transport, endpoint, method, &params, self.timeout).await
    }

    async fn quantity(&self, endpoint: &str, method: &str, params: Value) -> Result<U256, PortError> {
        let raw = self.call(endpoint, method, params).await?;
        decode(method, raw)
    }

    async fn build_request(
        &self,
        endpoint: &str,
        tx: &TxRequest,
        from: Address,
    ) -> Result<TransactionRequest, PortError> {
        let nonce = match tx.nonce {
            Some(nonce) => nonce,
            None => {
                self.quantity(endpoint, "eth_getTransactionCount", json!([from, "pending"]))
                    .await?
            }
        };
        let chain_id = self.quantity(endpoint, "eth_chainId", json!([])).await?;
        let gas_limit = match tx.gas_limit() {
            Some(gas) => gas,
            None => {
                self.quantity(endpoint, "eth_estimateGas", json!([call_object(tx, from)]))
                    .await?
            }
        };

        let mut request = TransactionRequest::default()
            .with_from(from)
            .with_value(tx.value.unwrap_or_default())
            .with_input(tx.data.clone().unwrap_or_default())
            .with_nonce(narrow_u64("nonce", nonce)?)
            .with_chain_id(narrow_u64("chain id", chain_id)?)
            .with_gas_limit(narrow_u64("gas limit", gas_limit)?);
        request = match tx.to {
            Some(to) => request.with_to(to),
            None => request.into_create(),
        };

        if let Some(gas_price) = tx.gas_price {
            return Ok(request.with_gas_price(narrow_u128("gas price", gas_price)?));
        }
        let priority = match tx.max_priority_fee_per_gas {
            Some(tip) => narrow_u128("priority fee", tip)?,
            None => match self.quantity(endpoint, "eth_maxPriorityFeePerGas", json!([])).await {
                Ok(tip) => narrow_u128("priority fee", tip)?,
                Err(e) => {
                    tracing::debug!(endpoint, error = %e, "no priority fee suggestion");
                    DEFAULT_PRIORITY_FEE
                }
            },
        };
        let max_fee = match tx.max_fee_per_gas {
            Some(max_fee) => narrow_u128("max fee", max_fee)?,
            None => {
                let gas_price = self.quantity(endpoint, "eth_gasPrice", json!([])).await?;
                narrow_u128("gas price", gas_price)?
                    .saturating_mul(2)
                    .saturating_add(priority)
            }
        };
        Ok(request
            .with_max_fee_per_gas(max_fee)
            .with_max_priority_fee_per_gas(priority.min(max_fee)))
    }
}

#[async_trait]
impl BroadcastPort for EvmBroadcastAdapter {
    async fn send_transaction(
        &self,
        endpoint: &str,
        tx: &TxRequest,
        private_key: &str,
    ) -> Result<B256, PortError> {
        let signer = parse_signer(private_key)?;
        let from = signer.address();
        if let Some(claimed) = tx.from.filter(|claimed| *claimed != from) {
            tracing::warn!(%claimed, %from, "transaction from differs from wallet account, signing as wallet");
        }
        let request = self.build_request(endpoint, tx, from).await?;
        let wallet = EthereumWallet::from(signer);
        let envelope = request
            .build(&wallet)
            .await
            .map_err(|e| PortError::Validation(format!("could not sign transaction: {e}")))?;
        let local_hash = *envelope.tx_hash();
        let raw = Bytes::from(envelope.encoded_2718());

        let returned = self
            .call(endpoint, "eth_sendRawTransaction", json!([raw]))
            .await?;
        match serde_json::from_value::<B256>(returned) {
            Ok(hash) => Ok(hash),
            Err(_) => {
                tracing::debug!(endpoint, "node returned no usable hash, using local hash");
                Ok(local_hash)
            }
        }
    }

    async fn receipt(
        &self,
        endpoint: &str,
        hash: B256,
    ) -> Result<Option<ReceiptSummary>, PortError> {
        let raw = self
            .call(endpoint, "eth_getTransactionReceipt", json!([hash]))
            .await?;
        if raw.is_null() {
            return Ok(None);
        }
        let status: U256 = decode("receipt status", raw.get("status").cloned().unwrap_or(Value::Null))?;
        let block_number: U256 = decode(
            "receipt block number",
            raw.get("blockNumber").cloned().unwrap_or(Value::Null),
        )?;
        let from: Address = decode("receipt sender", raw.get("from").cloned().unwrap_or(Value::Null))?;
        Ok(Some(ReceiptSummary {
            status: status == U256::from(1),
            block_number: narrow_u64("block number", block_number)?,
            from,
        }))
    }

    async fn replay_call(
        &self,
        endpoint: &str,
        tx: &TxRequest,
        from: Address,
        block_number: u64,
    ) -> Result<Bytes, PortError> {
        let block = format!("{block_number:#x}");
        let raw = self
            .call(endpoint, "eth_call", json!([call_object(tx, from), block]))
            .await?;
        decode("eth_call result", raw)
    }
}
