use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::RpcConfig;
use crate::error::WalletError;
use crate::ports::{PortError, RpcTransport};
use crate::validation::validate_rpc_params;

static NEXT_RPC_ID: AtomicU64 = AtomicU64::new(1);

/// One JSON-RPC exchange against a single endpoint. Error envelopes and a
/// missing `result` are reported as failures.
pub async fn rpc_request(
    transport: &dyn RpcTransport,
    endpoint: &str,
    method: &str,
    params: &Value,
    timeout: Duration,
) -> Result<Value, PortError> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": NEXT_RPC_ID.fetch_add(1, Ordering::Relaxed),
        "method": method,
        "params": params,
    });
    let response = tokio::time::timeout(timeout, transport.post_json(endpoint, &body, timeout))
        .await
        .map_err(|_| PortError::Transport(format!("{endpoint} timed out after {timeout:?}")))??;
    if let Some(err) = response.get("error").filter(|e| !e.is_null()) {
        return Err(PortError::Rpc {
            code: err.get("code").and_then(Value::as_i64).unwrap_or(-32000),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown RPC error")
                .to_owned(),
            data: err.get("data").cloned(),
        });
    }
    response
        .get("result")
        .cloned()
        .ok_or_else(|| PortError::Transport(format!("{method} response missing result")))
}

#[derive(Clone)]
pub struct RpcMultiplexer {
    transport: Arc<dyn RpcTransport>,
    config: RpcConfig,
}

impl RpcMultiplexer {
    pub fn new(transport: Arc<dyn RpcTransport>, config: RpcConfig) -> Self {
        Self { transport, config }
    }

    pub fn endpoints(&self) -> &[String] {
        &self.config.endpoints
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, WalletError> {
        let params = if params.is_null() { json!([]) } else { params };
        validate_rpc_params(method, &params)?;

        let mut last_error = None;
        for endpoint in &self.config.endpoints {
            match rpc_request(
                self.transport.as_ref(),
                endpoint,
                method,
                &params,
                self.config.timeout,
            )
            .await
            {
                Ok(result) => {
                    tracing::debug!(%endpoint, method, "rpc call served");
                    return Ok(result);
                }
                Err(e) => {
                    tracing::warn!(%endpoint, method, error = %e, "rpc endpoint failed");
                    last_error = Some(e);
                }
            }
        }
        tracing::error!(method, "all rpc endpoints failed");
        Err(WalletError::AllEndpointsFailed(match last_error {
            Some(_) => format!("no endpoint answered {method}"),
            None => "no endpoints configured".to_owned(),
        }))
    }
}
