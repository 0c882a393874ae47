pub mod bridge;
pub mod config;
pub mod domain;
pub mod error;
pub mod handoff;
pub mod messages;
pub mod network;
pub mod page;
pub mod ports;
pub mod provider;
pub mod revert;
pub mod router;
pub mod rpc;
pub mod signer;
pub mod task;
pub mod token;
pub mod validation;

pub use bridge::RelayBridge;
pub use config::{BridgeConfig, CoreConfig, ProviderConfig, RpcConfig, SignerConfig};
pub use domain::{
    keys, Popup, ReceiptSummary, SessionRecord, SignRequest, SignerHandoff, SignerResult, TabId,
    TimestampMs, TxRequest, WalletState, WindowId,
};
pub use error::{ErrorCode, WalletError};
pub use messages::{CoreEvent, CoreMessage, CoreResponse, MessageSender, Verb, WindowMessage};
pub use page::{GlobalScope, GlobalValue, Page, PageEvent, WindowBus};
pub use ports::{
    BroadcastPort, ClockPort, MessageHandler, MessageSigner, PortError, RpcTransport, RuntimePort,
    StorageChange, StoragePort, TabsPort, WindowPort,
};
pub use provider::install::{install, InstalledProviders};
pub use provider::solana::SolanaProvider;
pub use provider::PageProvider;
pub use router::ExtensionCore;
pub use rpc::RpcMultiplexer;
pub use signer::SignerHandoffWorker;
pub use token::HandshakeToken;
