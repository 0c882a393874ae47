use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use devnet_wallet_core::{PortError, RpcTransport};

/// JSON-over-HTTP transport backed by a shared `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct HttpTransportAdapter {
    client: reqwest::Client,
}

impl HttpTransportAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RpcTransport for HttpTransportAdapter {
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, PortError> {
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| PortError::Transport(format!("request to {url} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PortError::Transport(format!(
                "{url} answered status {status}: {text}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| PortError::Transport(format!("{url} returned invalid json: {e}")))
    }
}
