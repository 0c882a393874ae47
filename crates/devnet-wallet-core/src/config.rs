use std::time::Duration;

use crate::network::{DEFAULT_CHAIN_ID, SEPOLIA_RPC_URLS, SOLANA_DEVNET_RPC_URL};

/// Slack between the signer's last write and the core giving up on it.
const SIGNER_RESULT_MARGIN: Duration = Duration::from_secs(2);

/// How long after starting a signer may work before it has to report, when
/// the core waits `core_timeout` for that report.
pub fn signer_result_deadline(core_timeout: Duration) -> Duration {
    core_timeout
        .saturating_sub(SIGNER_RESULT_MARGIN)
        .max(core_timeout / 2)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcConfig {
    pub endpoints: Vec<String>,
    pub timeout: Duration,
}

impl RpcConfig {
    pub fn solana_devnet() -> Self {
        Self {
            endpoints: vec![SOLANA_DEVNET_RPC_URL.to_owned()],
            ..Self::default()
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoints: SEPOLIA_RPC_URLS.iter().map(|u| (*u).to_owned()).collect(),
            timeout: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub request_timeout: Duration,
    pub chain_id: u64,
    /// Install the side names (`devnetWallet`, ...) as non-writable slots.
    pub lock_provider_slots: bool,
    pub rpc: RpcConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            chain_id: DEFAULT_CHAIN_ID,
            lock_provider_slots: true,
            rpc: RpcConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub capture_delay: Duration,
    pub guard_interval: Duration,
    pub guard_window: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            capture_delay: Duration::from_millis(50),
            guard_interval: Duration::from_millis(100),
            guard_window: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    pub signer_poll_interval: Duration,
    pub signer_timeout: Duration,
    /// `None` keeps an unlocked session valid until it is cleared.
    pub session_ttl: Option<Duration>,
    /// Cluster endpoints for Solana sign-and-send.
    pub solana_rpc: RpcConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            signer_poll_interval: Duration::from_millis(100),
            signer_timeout: Duration::from_secs(30),
            session_ttl: None,
            solana_rpc: RpcConfig::solana_devnet(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerConfig {
    pub endpoints: Vec<String>,
    pub poll_interval: Duration,
    pub handoff_timeout: Duration,
    pub inclusion_timeout: Duration,
    pub receipt_poll_interval: Duration,
    /// Measured from the start of `run`; caps the inclusion wait so a
    /// broadcast hash reaches the core while it is still listening.
    pub result_deadline: Duration,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            endpoints: SEPOLIA_RPC_URLS.iter().map(|u| (*u).to_owned()).collect(),
            poll_interval: Duration::from_millis(100),
            handoff_timeout: Duration::from_secs(30),
            inclusion_timeout: Duration::from_secs(60),
            receipt_poll_interval: Duration::from_secs(1),
            result_deadline: signer_result_deadline(CoreConfig::default().signer_timeout),
        }
    }
}
