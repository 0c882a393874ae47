use std::time::Duration;

use devnet_wallet_core::config::signer_result_deadline;
use devnet_wallet_core::network::{DEFAULT_CHAIN_ID, SEPOLIA_RPC_URLS, SOLANA_DEVNET_RPC_URL};
use devnet_wallet_core::{BridgeConfig, CoreConfig, ProviderConfig, RpcConfig, SignerConfig};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a whole number of milliseconds, got {value:?}")]
    InvalidMillis { name: &'static str, value: String },
    #[error("{name} must list at least one URL")]
    EmptyList { name: &'static str },
}

#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub rpc_urls: Vec<String>,
    pub solana_rpc_urls: Vec<String>,
    pub chain_id: u64,
    pub request_timeout_ms: u64,
    pub rpc_timeout_ms: u64,
    pub signer_timeout_ms: u64,
    pub inclusion_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub receipt_poll_interval_ms: u64,
    pub session_ttl_ms: Option<u64>,
    pub guard_window_ms: u64,
    pub lock_provider_slots: bool,
    pub private_key: Option<String>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            rpc_urls: SEPOLIA_RPC_URLS.iter().map(|u| (*u).to_owned()).collect(),
            solana_rpc_urls: vec![SOLANA_DEVNET_RPC_URL.to_owned()],
            chain_id: DEFAULT_CHAIN_ID,
            request_timeout_ms: 30_000,
            rpc_timeout_ms: 8_000,
            signer_timeout_ms: 30_000,
            inclusion_timeout_ms: 60_000,
            poll_interval_ms: 100,
            receipt_poll_interval_ms: 1_000,
            session_ttl_ms: None,
            guard_window_ms: 10_000,
            lock_provider_slots: true,
            private_key: None,
        }
    }
}

fn millis(name: &'static str, lookup: &impl Fn(&str) -> Option<String>) -> Result<Option<u64>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidMillis { name, value: raw }),
    }
}

fn urls(name: &'static str, lookup: &impl Fn(&str) -> Option<String>) -> Result<Option<Vec<String>>, ConfigError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let urls: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_owned)
        .collect();
    if urls.is_empty() {
        return Err(ConfigError::EmptyList { name });
    }
    Ok(Some(urls))
}

impl WalletConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`WalletConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(urls) = urls("DEVNET_WALLET_RPC_URLS", &lookup)? {
            config.rpc_urls = urls;
        }
        if let Some(urls) = urls("DEVNET_WALLET_SOLANA_RPC_URLS", &lookup)? {
            config.solana_rpc_urls = urls;
        }
        if let Some(v) = millis("DEVNET_WALLET_REQUEST_TIMEOUT_MS", &lookup)? {
            config.request_timeout_ms = v;
        }
        if let Some(v) = millis("DEVNET_WALLET_RPC_TIMEOUT_MS", &lookup)? {
            config.rpc_timeout_ms = v;
        }
        if let Some(v) = millis("DEVNET_WALLET_SIGNER_TIMEOUT_MS", &lookup)? {
            config.signer_timeout_ms = v;
        }
        if let Some(v) = millis("DEVNET_WALLET_INCLUSION_TIMEOUT_MS", &lookup)? {
            config.inclusion_timeout_ms = v;
        }
        if let Some(v) = millis("DEVNET_WALLET_POLL_INTERVAL_MS", &lookup)? {
            config.poll_interval_ms = v;
        }
        config.session_ttl_ms = millis("DEVNET_WALLET_SESSION_TTL_MS", &lookup)?;
        config.private_key = lookup("DEVNET_WALLET_PRIVATE_KEY").filter(|k| !k.trim().is_empty());
        Ok(config)
    }

    pub fn rpc(&self) -> RpcConfig {
        RpcConfig {
            endpoints: self.rpc_urls.clone(),
            timeout: Duration::from_millis(self.rpc_timeout_ms),
        }
    }

    pub fn provider(&self) -> ProviderConfig {
        ProviderConfig {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            chain_id: self.chain_id,
            lock_provider_slots: self.lock_provider_slots,
            rpc: self.rpc(),
        }
    }

    pub fn bridge(&self) -> BridgeConfig {
        BridgeConfig {
            guard_window: Duration::from_millis(self.guard_window_ms),
            ..BridgeConfig::default()
        }
    }

    pub fn core(&self) -> CoreConfig {
        CoreConfig {
            signer_poll_interval: Duration::from_millis(self.poll_interval_ms),
            signer_timeout: Duration::from_millis(self.signer_timeout_ms),
            session_ttl: self.session_ttl_ms.map(Duration::from_millis),
            solana_rpc: RpcConfig {
                endpoints: self.solana_rpc_urls.clone(),
                timeout: Duration::from_millis(self.rpc_timeout_ms),
            },
        }
    }

    pub fn signer(&self) -> SignerConfig {
        SignerConfig {
            endpoints: self.rpc_urls.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            handoff_timeout: Duration::from_millis(self.signer_timeout_ms),
            inclusion_timeout: Duration::from_millis(self.inclusion_timeout_ms),
            receipt_poll_interval: Duration::from_millis(self.receipt_poll_interval_ms),
            result_deadline: signer_result_deadline(Duration::from_millis(self.signer_timeout_ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_timings() {
        let config = WalletConfig::from_lookup(lookup(&[])).expect("defaults");
        assert_eq!(config.rpc_urls.len(), 4);
        assert_eq!(config.core().signer_timeout, Duration::from_secs(30));
        assert_eq!(config.signer().inclusion_timeout, Duration::from_secs(60));
        assert_eq!(config.rpc().timeout, Duration::from_secs(8));
        assert_eq!(config.provider().request_timeout, Duration::from_secs(30));
        assert_eq!(config.core().solana_rpc.endpoints, vec![SOLANA_DEVNET_RPC_URL]);
    }

    #[test]
    fn signer_reports_inside_the_core_wait() {
        for signer_timeout_ms in [30_000, 2_000, 200] {
            let config = WalletConfig {
                signer_timeout_ms,
                ..WalletConfig::default()
            };
            let signer = config.signer();
            assert!(signer.result_deadline < config.core().signer_timeout);
            assert!(signer.result_deadline < signer.inclusion_timeout);
        }
    }

    #[test]
    fn overrides_are_applied() {
        let config = WalletConfig::from_lookup(lookup(&[
            ("DEVNET_WALLET_RPC_URLS", "http://a, http://b"),
            ("DEVNET_WALLET_SIGNER_TIMEOUT_MS", "250"),
            ("DEVNET_WALLET_SESSION_TTL_MS", "1000"),
            ("DEVNET_WALLET_SOLANA_RPC_URLS", "http://sol"),
        ]))
        .expect("overrides");
        assert_eq!(config.rpc_urls, vec!["http://a", "http://b"]);
        assert_eq!(config.core().solana_rpc.endpoints, vec!["http://sol"]);
        assert_eq!(config.core().signer_timeout, Duration::from_millis(250));
        assert_eq!(config.core().session_ttl, Some(Duration::from_secs(1)));
    }

    #[test]
    fn bad_values_are_reported() {
        let err = WalletConfig::from_lookup(lookup(&[("DEVNET_WALLET_POLL_INTERVAL_MS", "fast")]))
            .expect_err("non-numeric");
        assert!(matches!(err, ConfigError::InvalidMillis { .. }));
        let err = WalletConfig::from_lookup(lookup(&[("DEVNET_WALLET_RPC_URLS", " , ")]))
            .expect_err("empty list");
        assert!(matches!(err, ConfigError::EmptyList { .. }));
    }
}
