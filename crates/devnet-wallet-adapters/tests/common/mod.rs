#![allow(dead_code)]

use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde_json::{json, Value};
use tiny_http::{Response, Server, StatusCode};
use tokio::sync::mpsc::UnboundedReceiver;

use devnet_wallet_adapters::{
    InProcessWallet, KdfCost, MemoryStorageAdapter, UiEvent, WalletConfig, WalletSecrets,
};
use devnet_wallet_core::{
    BroadcastPort, ClockPort, Popup, PortError, ReceiptSummary, StoragePort, TxRequest, WindowId,
};

pub const EVM_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
pub const EVM_ADDRESS: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
pub const PASSWORD: &str = "correct horse battery staple";

pub fn tx_hash(seed: u8) -> B256 {
    B256::repeat_byte(seed)
}

pub fn secrets() -> WalletSecrets {
    WalletSecrets {
        evm_private_key: EVM_KEY.to_owned(),
        solana_secret_key: Some(vec![9u8; 32]),
    }
}

pub fn light_kdf() -> KdfCost {
    KdfCost {
        memory_kib: 64,
        iterations: 1,
    }
}

#[derive(Debug, Default)]
pub struct TestClock {
    now: AtomicU64,
}

impl TestClock {
    pub fn at(ms: u64) -> Self {
        Self {
            now: AtomicU64::new(ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl ClockPort for TestClock {
    fn now_ms(&self) -> Result<u64, PortError> {
        Ok(self.now.load(Ordering::SeqCst))
    }
}

/// Timings short enough that no test waits on wall-clock defaults.
pub fn fast_config() -> WalletConfig {
    WalletConfig {
        rpc_urls: vec![
            "http://endpoint-a.invalid".to_owned(),
            "http://endpoint-b.invalid".to_owned(),
        ],
        request_timeout_ms: 3_000,
        rpc_timeout_ms: 1_000,
        signer_timeout_ms: 2_000,
        inclusion_timeout_ms: 200,
        poll_interval_ms: 10,
        receipt_poll_interval_ms: 20,
        guard_window_ms: 300,
        ..WalletConfig::default()
    }
}

#[derive(Debug, Clone)]
pub enum ReceiptScript {
    Confirmed,
    Reverted,
    NeverIncluded,
}

/// Scripted chain: endpoints listed in `failing` refuse broadcasts, the rest
/// accept and answer receipts per `receipt`.
pub struct FakeBroadcaster {
    pub failing: Vec<String>,
    pub receipt: ReceiptScript,
    pub revert_output: Bytes,
    pub hang: bool,
    pub sent: Mutex<Vec<(String, TxRequest)>>,
}

impl FakeBroadcaster {
    pub fn new(receipt: ReceiptScript) -> Self {
        Self {
            failing: Vec::new(),
            receipt,
            revert_output: Bytes::new(),
            hang: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("sent lock").len()
    }
}

#[async_trait]
impl BroadcastPort for FakeBroadcaster {
    async fn send_transaction(
        &self,
        endpoint: &str,
        tx: &TxRequest,
        _private_key: &str,
    ) -> Result<B256, PortError> {
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing.iter().any(|f| f == endpoint) {
            return Err(PortError::Transport(format!("{endpoint} refused")));
        }
        self.sent
            .lock()
            .expect("sent lock")
            .push((endpoint.to_owned(), tx.clone()));
        Ok(tx_hash(0xab))
    }

    async fn receipt(
        &self,
        _endpoint: &str,
        _hash: B256,
    ) -> Result<Option<ReceiptSummary>, PortError> {
        let from: Address = EVM_ADDRESS.parse().expect("address");
        Ok(match self.receipt {
            ReceiptScript::Confirmed => Some(ReceiptSummary {
                status: true,
                block_number: 42,
                from,
            }),
            ReceiptScript::Reverted => Some(ReceiptSummary {
                status: false,
                block_number: 42,
                from,
            }),
            ReceiptScript::NeverIncluded => None,
        })
    }

    async fn replay_call(
        &self,
        _endpoint: &str,
        _tx: &TxRequest,
        _from: Address,
        _block_number: u64,
    ) -> Result<Bytes, PortError> {
        Ok(self.revert_output.clone())
    }
}

pub struct Harness {
    pub wallet: InProcessWallet,
    pub ui: UnboundedReceiver<UiEvent>,
    pub storage: MemoryStorageAdapter,
}

/// Build a wallet whose vault holds [`secrets`]; unlocked when `unlock`.
pub async fn wallet_with(
    config: WalletConfig,
    broadcaster: Arc<dyn BroadcastPort>,
    clock: Arc<dyn ClockPort>,
    unlock: bool,
) -> Harness {
    let storage = MemoryStorageAdapter::default();
    let (wallet, ui) = InProcessWallet::builder()
        .config(config)
        .storage(Arc::new(storage.clone()))
        .broadcaster(broadcaster)
        .clock(clock)
        .build();
    let vault = wallet.vault().with_kdf_cost(light_kdf());
    vault.create(&secrets(), PASSWORD).await.expect("create vault");
    if unlock {
        vault.unlock(PASSWORD).await.expect("unlock vault");
    }
    Harness {
        wallet,
        ui,
        storage,
    }
}

pub async fn unlocked_wallet(broadcaster: Arc<dyn BroadcastPort>) -> Harness {
    wallet_with(
        fast_config(),
        broadcaster,
        Arc::new(TestClock::at(1_739_750_400_000)),
        true,
    )
    .await
}

/// Next approval popup, skipping signer windows and close notices.
pub async fn next_approval(ui: &mut UnboundedReceiver<UiEvent>) -> (WindowId, Popup) {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), ui.recv())
            .await
            .expect("approval popup in time")
            .expect("ui channel open");
        match event {
            UiEvent::Opened {
                popup: Popup::Signer { .. },
                ..
            }
            | UiEvent::Closed { .. } => continue,
            UiEvent::Opened { window, popup } => return (window, popup),
        }
    }
}

pub async fn wait_for_handshake(tab: &devnet_wallet_adapters::BrowserTab) {
    for _ in 0..200 {
        if tab.providers.evm.relay().is_acknowledged() && tab.bridge.has_token() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("handshake never completed");
}

pub fn storage_keys_with_prefix(storage: &MemoryStorageAdapter, prefix: &str) -> Vec<String> {
    storage
        .keys()
        .into_iter()
        .filter(|k| k.starts_with(prefix))
        .collect()
}

pub async fn stored(storage: &dyn StoragePort, key: &str) -> Option<Value> {
    storage.get(key).await.expect("storage read")
}

/// Minimal JSON-RPC server. `answer` maps (method, params) to an HTTP status
/// and body; every method called is recorded in `calls`.
pub fn spawn_rpc_server<F>(calls: Arc<Mutex<Vec<String>>>, answer: F) -> String
where
    F: Fn(&str, &Value) -> (u16, Value) + Send + 'static,
{
    let server = Server::http("127.0.0.1:0").expect("start server");
    let addr = format!("http://{}", server.server_addr());
    thread::spawn(move || {
        for _ in 0..64 {
            let mut req = match server.recv() {
                Ok(r) => r,
                Err(_) => break,
            };
            let mut body = String::new();
            let _ = req.as_reader().read_to_string(&mut body);
            let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
            let method = parsed["method"].as_str().unwrap_or_default().to_owned();
            if let Ok(mut g) = calls.lock() {
                g.push(method.clone());
            }
            let (code, payload) = answer(&method, &parsed["params"]);
            let envelope = if code == 200 && payload.get("error").is_none() {
                json!({ "jsonrpc": "2.0", "id": parsed["id"], "result": payload })
            } else {
                payload
            };
            let response =
                Response::from_string(envelope.to_string()).with_status_code(StatusCode(code));
            let _ = req.respond(response);
        }
    });
    addr
}
