use serde::Serialize;

use crate::error::WalletError;

pub const DEFAULT_NETWORK: &str = "sepolia";
pub const DEFAULT_CHAIN_ID: u64 = 11_155_111;
pub const DEFAULT_CHAIN_ID_HEX: &str = "0xaa36a7";

pub const SEPOLIA_RPC_URLS: &[&str] = &[
    "https://sepolia.gateway.tenderly.co",
    "https://ethereum-sepolia.publicnode.com",
    "https://rpc.sepolia.org",
    "https://sepolia.infura.io/v3/9aa3d95b3bc440fa88ea12eaa4456161",
];

pub const SOLANA_DEVNET_RPC_URL: &str = "https://api.devnet.solana.com";

pub const BLOCKED_CHAIN_IDS: &[u64] = &[1, 137, 56];
pub const BLOCKED_CLUSTERS: &[&str] = &["mainnet-beta"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NetworkKind {
    #[serde(rename = "EVM")]
    Evm,
    Solana,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub key: &'static str,
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: NetworkKind,
    pub chain_id: Option<u64>,
    pub cluster_id: Option<&'static str>,
    pub rpc_url: &'static str,
    pub explorer_url: &'static str,
    pub faucet_url: Option<&'static str>,
    pub symbol: &'static str,
    pub decimals: u8,
}

impl NetworkConfig {
    pub fn chain_id_hex(&self) -> Option<String> {
        self.chain_id.map(|id| format!("{id:#x}"))
    }
}

pub static NETWORKS: &[NetworkConfig] = &[
    NetworkConfig {
        key: "sepolia",
        name: "Ethereum Sepolia",
        kind: NetworkKind::Evm,
        chain_id: Some(11_155_111),
        cluster_id: None,
        rpc_url: "https://sepolia.gateway.tenderly.co",
        explorer_url: "https://sepolia.etherscan.io",
        faucet_url: Some("https://sepoliafaucet.com"),
        symbol: "ETH",
        decimals: 18,
    },
    NetworkConfig {
        key: "mumbai",
        name: "Polygon Mumbai",
        kind: NetworkKind::Evm,
        chain_id: Some(80_001),
        cluster_id: None,
        rpc_url: "https://rpc-mumbai.maticvigil.com",
        explorer_url: "https://mumbai.polygonscan.com",
        faucet_url: Some("https://faucet.polygon.technology"),
        symbol: "MATIC",
        decimals: 18,
    },
    NetworkConfig {
        key: "bscTestnet",
        name: "BSC Testnet",
        kind: NetworkKind::Evm,
        chain_id: Some(97),
        cluster_id: None,
        rpc_url: "https://data-seed-prebsc-1-s1.binance.org:8545",
        explorer_url: "https://testnet.bscscan.com",
        faucet_url: Some("https://testnet.binance.org/faucet-smart"),
        symbol: "BNB",
        decimals: 18,
    },
    NetworkConfig {
        key: "fuji",
        name: "Avalanche Fuji",
        kind: NetworkKind::Evm,
        chain_id: Some(43_113),
        cluster_id: None,
        rpc_url: "https://api.avax-test.network/ext/bc/C/rpc",
        explorer_url: "https://testnet.snowtrace.io",
        faucet_url: Some("https://faucet.avax.network"),
        symbol: "AVAX",
        decimals: 18,
    },
    NetworkConfig {
        key: "fantomTestnet",
        name: "Fantom Testnet",
        kind: NetworkKind::Evm,
        chain_id: Some(4_002),
        cluster_id: None,
        rpc_url: "https://rpc.testnet.fantom.network",
        explorer_url: "https://testnet.ftmscan.com",
        faucet_url: Some("https://faucet.fantom.network"),
        symbol: "FTM",
        decimals: 18,
    },
    NetworkConfig {
        key: "hardhat",
        name: "Local Hardhat / Anvil",
        kind: NetworkKind::Evm,
        chain_id: Some(31_337),
        cluster_id: None,
        rpc_url: "http://127.0.0.1:8545",
        explorer_url: "http://localhost:8545",
        faucet_url: None,
        symbol: "ETH",
        decimals: 18,
    },
    NetworkConfig {
        key: "solanaDevnet",
        name: "Solana Devnet",
        kind: NetworkKind::Solana,
        chain_id: None,
        cluster_id: Some("devnet"),
        rpc_url: SOLANA_DEVNET_RPC_URL,
        explorer_url: "https://explorer.solana.com?cluster=devnet",
        faucet_url: Some("https://faucet.solana.com"),
        symbol: "SOL",
        decimals: 9,
    },
];

pub fn by_key(key: &str) -> Option<&'static NetworkConfig> {
    NETWORKS.iter().find(|n| n.key == key)
}

pub fn by_chain_id(chain_id: u64) -> Option<&'static NetworkConfig> {
    NETWORKS.iter().find(|n| n.chain_id == Some(chain_id))
}

pub fn is_mainnet_blocked(chain_id: Option<u64>, cluster: Option<&str>) -> bool {
    chain_id.is_some_and(|id| BLOCKED_CHAIN_IDS.contains(&id))
        || cluster.is_some_and(|c| BLOCKED_CLUSTERS.contains(&c))
}

/// Accepts `0x`-prefixed hex or decimal.
pub fn parse_chain_id(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).ok();
    }
    raw.parse::<u64>().ok()
}

/// Resolve a network key, chain id or cluster name to a supported network.
pub fn resolve(selector: &str) -> Result<&'static NetworkConfig, WalletError> {
    if let Some(network) = by_key(selector) {
        return Ok(network);
    }
    if is_mainnet_blocked(None, Some(selector)) {
        return Err(WalletError::UnsupportedNetwork(format!(
            "{selector} is a mainnet cluster"
        )));
    }
    if let Some(network) = NETWORKS.iter().find(|n| n.cluster_id == Some(selector)) {
        return Ok(network);
    }
    let chain_id = parse_chain_id(selector)
        .ok_or_else(|| WalletError::UnsupportedNetwork(selector.to_owned()))?;
    if is_mainnet_blocked(Some(chain_id), None) {
        return Err(WalletError::UnsupportedNetwork(format!(
            "chain {chain_id} is a mainnet"
        )));
    }
    by_chain_id(chain_id).ok_or_else(|| WalletError::UnsupportedNetwork(selector.to_owned()))
}
