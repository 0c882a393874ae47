pub mod clock;
pub mod config;
pub mod evm;
pub mod http;
pub mod message_signer;
pub mod runtime;
pub mod storage;
pub mod vault;

pub use clock::WallClock;
pub use config::{ConfigError, WalletConfig};
pub use evm::EvmBroadcastAdapter;
pub use http::HttpTransportAdapter;
pub use message_signer::LocalMessageSigner;
pub use runtime::{
    BrowserTab, InProcessWallet, InProcessWalletBuilder, PopupWindowsAdapter, RuntimeChannel,
    TabRegistry, UiEvent, WalletCore,
};
pub use storage::MemoryStorageAdapter;
pub use vault::{KdfCost, Vault, VaultBlob, WalletSecrets};
