//! DevNet wallet: run provider requests through a full in-process wallet.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use eyre::{eyre, WrapErr};
use serde_json::Value;

use devnet_wallet_adapters::{InProcessWallet, WalletConfig, WalletSecrets};
use devnet_wallet_core::network::{self, NetworkKind};

mod ui;

#[derive(Debug, Parser)]
#[command(name = "devnet-wallet", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send one EIP-1193 request from a simulated dapp tab.
    Request {
        /// Provider method, e.g. eth_chainId or eth_sendTransaction.
        method: String,
        /// JSON params array.
        #[arg(default_value = "[]")]
        params: String,
        /// Origin the request appears to come from.
        #[arg(long, default_value = "http://localhost:3000")]
        origin: String,
        /// Answer approval popups with a rejection.
        #[arg(long)]
        reject: bool,
        /// Override DEVNET_WALLET_RPC_URLS (repeatable).
        #[arg(long = "rpc-url")]
        rpc_urls: Vec<String>,
        /// Password the throwaway vault is sealed with.
        #[arg(long, env = "DEVNET_WALLET_PASSWORD", default_value = "devnet", hide_env_values = true)]
        password: String,
    },
    /// List the networks the wallet can switch to.
    Networks,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Networks => {
            print_networks();
            Ok(())
        }
        Command::Request {
            method,
            params,
            origin,
            reject,
            rpc_urls,
            password,
        } => {
            let params: Value =
                serde_json::from_str(&params).wrap_err("params must be valid JSON")?;
            let mut config = WalletConfig::from_env()?;
            if !rpc_urls.is_empty() {
                config.rpc_urls = rpc_urls;
            }
            let decision = if reject {
                ui::Decision::Reject
            } else {
                ui::Decision::Approve
            };
            let result = run_request(config, &password, &origin, &method, params, decision).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}

async fn run_request(
    config: WalletConfig,
    password: &str,
    origin: &str,
    method: &str,
    params: Value,
    decision: ui::Decision,
) -> eyre::Result<Value> {
    let secrets = match &config.private_key {
        Some(key) => WalletSecrets {
            evm_private_key: key.clone(),
            solana_secret_key: None,
        },
        None => {
            tracing::info!("DEVNET_WALLET_PRIVATE_KEY not set, generating a throwaway key");
            WalletSecrets::generate()?
        }
    };

    let (wallet, ui_events) = InProcessWallet::builder().config(config).build();
    let wallet = Arc::new(wallet);
    let vault = wallet.vault();
    vault.create(&secrets, password).await?;
    let state = vault.unlock(password).await?;
    tracing::info!(address = ?state.evm_address, "wallet ready");

    let _driver = tokio::spawn(ui::drive(Arc::clone(&wallet), ui_events, decision));

    let tab = wallet.open_tab(origin);
    let relay = tab.providers.evm.relay();
    for _ in 0..100 {
        if relay.is_acknowledged() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    if !relay.is_acknowledged() {
        return Err(eyre!("relay handshake did not complete"));
    }

    tab.providers
        .evm
        .request(method, params)
        .await
        .map_err(|e| eyre!("{method} failed ({:?}): {e}", e.code()))
}

fn print_networks() {
    for net in network::NETWORKS {
        let id = match net.kind {
            NetworkKind::Evm => net.chain_id_hex().unwrap_or_default(),
            NetworkKind::Solana => net.cluster_id.unwrap_or_default().to_owned(),
        };
        println!("{:<16} {:<24} {:<10} {}", net.key, net.name, id, net.rpc_url);
    }
}
