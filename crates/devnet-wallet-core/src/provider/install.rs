use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;

use crate::config::ProviderConfig;
use crate::page::{GlobalValue, Mutability, Page, PageEvent, PageEvents, ProviderInfo};
use crate::ports::RpcTransport;
use crate::provider::solana::SolanaProvider;
use crate::provider::PageProvider;
use crate::task::AbortOnDrop;

pub const EVM_SLOTS: [&str; 2] = ["devnetWallet", "testnetWallet"];
pub const SOLANA_SLOTS: [&str; 2] = ["solanaDevnetWallet", "solanaTestnetWallet"];
pub const ETHEREUM_SLOT: &str = "ethereum";
pub const PRESERVED_SLOT: &str = "phantomEthereum";

pub const PROVIDER_NAME: &str = "DevNet Developer Wallet";
pub const PROVIDER_RDNS: &str = "io.github.devnet-wallet";
const PROVIDER_ICON: &str = "data:image/svg+xml,<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"0 0 100 100\"><rect width=\"100\" height=\"100\" rx=\"20\" fill=\"%230d5132\"/><text x=\"50\" y=\"68\" font-size=\"52\" font-family=\"Arial\" font-weight=\"700\" text-anchor=\"middle\" fill=\"white\">D</text></svg>";

pub struct InstalledProviders {
    pub evm: PageProvider,
    pub solana: SolanaProvider,
    pub claimed_ethereum: bool,
    _announcer: AbortOnDrop,
}

/// EIP-6963 identity; the uuid is fixed for the life of one installation.
fn provider_info() -> ProviderInfo {
    ProviderInfo {
        uuid: uuid::Uuid::new_v4().to_string(),
        name: PROVIDER_NAME.to_owned(),
        icon: PROVIDER_ICON.to_owned(),
        rdns: PROVIDER_RDNS.to_owned(),
    }
}

fn announce(events: &PageEvents, info: &ProviderInfo, provider: &PageProvider) {
    events.dispatch(PageEvent::AnnounceProvider {
        info: info.clone(),
        provider: provider.clone(),
    });
}

/// Inject the wallet into `page`. Must be called inside a tokio runtime.
pub fn install(
    page: &Page,
    transport: Arc<dyn RpcTransport>,
    config: ProviderConfig,
) -> InstalledProviders {
    let mutability = if config.lock_provider_slots {
        Mutability::Locked
    } else {
        Mutability::Writable
    };
    let evm = PageProvider::connect(page.bus.clone(), transport, config);
    let solana = SolanaProvider::new(evm.relay());

    for name in EVM_SLOTS {
        if let Err(e) = page.globals.define(name, GlobalValue::Evm(evm.clone()), mutability) {
            tracing::warn!(slot = name, error = %e, "could not install provider");
        }
    }
    for name in SOLANA_SLOTS {
        if let Err(e) = page
            .globals
            .define(name, GlobalValue::Solana(solana.clone()), mutability)
        {
            tracing::warn!(slot = name, error = %e, "could not install provider");
        }
    }

    if let Some(existing) = page.globals.get(ETHEREUM_SLOT) {
        if !existing.flags().is_devnet_wallet {
            tracing::info!(?existing, "preserving foreign provider");
            evm.register_foreign(existing.clone());
            if let Err(e) = page.globals.assign(PRESERVED_SLOT, existing) {
                tracing::warn!(error = %e, "could not preserve foreign provider");
            }
        }
    }

    let claimed_ethereum = match page.globals.delete(ETHEREUM_SLOT).and_then(|_| {
        page.globals
            .define(ETHEREUM_SLOT, GlobalValue::Evm(evm.clone()), mutability)
    }) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "window.ethereum is held by another provider");
            false
        }
    };

    for name in ["devnetWallet", "testnetWallet", ETHEREUM_SLOT] {
        page.events
            .dispatch(PageEvent::Initialized(format!("{name}#initialized")));
    }

    let info = provider_info();
    let mut requests = page.events.subscribe();
    announce(&page.events, &info, &evm);
    let announcer = {
        let events = page.events.clone();
        let provider = evm.clone();
        AbortOnDrop::new(tokio::spawn(async move {
            loop {
                match requests.recv().await {
                    Ok(PageEvent::RequestProvider) => announce(&events, &info, &provider),
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    };

    tracing::info!(claimed_ethereum, "wallet providers installed");
    InstalledProviders {
        evm,
        solana,
        claimed_ethereum,
        _announcer: announcer,
    }
}
