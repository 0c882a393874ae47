mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use devnet_wallet_adapters::{
    HttpTransportAdapter, LocalMessageSigner, MemoryStorageAdapter, TabRegistry, Vault,
    WalletConfig,
};
use devnet_wallet_core::signer::ALL_ENDPOINTS_FAILED_MESSAGE;
use devnet_wallet_core::{
    ClockPort, CoreMessage, CoreResponse, ErrorCode, ExtensionCore, MessageSender, Popup,
    PortError, StoragePort, TabId, TxRequest, WalletError, WindowId, WindowPort,
};

use common::{
    fast_config, light_kdf, next_approval, secrets, storage_keys_with_prefix, tx_hash,
    unlocked_wallet, wait_for_handshake, wallet_with, FakeBroadcaster, Harness, ReceiptScript,
    TestClock, EVM_ADDRESS, PASSWORD,
};

fn revert_data(reason: &str) -> Bytes {
    let mut out = vec![0x08, 0xc3, 0x79, 0xa0];
    out.extend(DynSolValue::Tuple(vec![DynSolValue::String(reason.to_owned())]).abi_encode_params());
    Bytes::from(out)
}

/// Open a tab, submit a transaction from it and approve it in the UI.
async fn submit_and_approve(
    h: &mut Harness,
    edited: Option<TxRequest>,
) -> (JoinHandle<Result<Value, WalletError>>, CoreResponse) {
    let tab = h.wallet.open_tab("https://dapp.example");
    wait_for_handshake(&tab).await;
    let tab_id = tab.tab_id;

    let request = tokio::spawn(async move {
        let result = tab
            .providers
            .evm
            .request(
                "eth_sendTransaction",
                json!([{ "from": EVM_ADDRESS, "to": EVM_ADDRESS, "value": "0x1" }]),
            )
            .await;
        drop(tab);
        result
    });

    let (_, popup) = next_approval(&mut h.ui).await;
    match popup {
        Popup::TransactionApproval { transaction, .. } => {
            assert_eq!(transaction.value, Some(U256::from(1)));
        }
        other => panic!("expected a transaction approval, got {other:?}"),
    }
    let ack = h
        .wallet
        .ui(CoreMessage::ApproveTransaction {
            tab_id,
            transaction: edited,
        })
        .await;
    (request, ack)
}

fn assert_no_handoff_records(h: &Harness) {
    assert!(storage_keys_with_prefix(&h.storage, "pendingSignerTransaction_").is_empty());
    assert!(storage_keys_with_prefix(&h.storage, "signerResult_").is_empty());
}

#[tokio::test]
async fn confirmed_transaction_returns_hash() {
    let broadcaster = Arc::new(FakeBroadcaster::new(ReceiptScript::Confirmed));
    let mut h = unlocked_wallet(broadcaster.clone()).await;

    let (request, ack) = submit_and_approve(&mut h, None).await;
    assert!(ack.success);
    let hash = request.await.expect("join").expect("mined");
    assert_eq!(hash, json!(tx_hash(0xab)));

    assert_eq!(broadcaster.sent_count(), 1);
    assert_no_handoff_records(&h);
    assert_eq!(h.wallet.open_windows(), 0);
}

#[tokio::test]
async fn edited_transaction_is_what_gets_sent() {
    let broadcaster = Arc::new(FakeBroadcaster::new(ReceiptScript::Confirmed));
    let mut h = unlocked_wallet(broadcaster.clone()).await;
    let edited = TxRequest {
        to: Some(EVM_ADDRESS.parse::<Address>().expect("address")),
        value: Some(U256::from(5)),
        gas: Some(U256::from(30_000)),
        ..TxRequest::default()
    };

    let (request, _) = submit_and_approve(&mut h, Some(edited.clone())).await;
    request.await.expect("join").expect("mined");
    let sent = broadcaster.sent.lock().expect("sent");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, edited);
}

#[tokio::test]
async fn uncommitted_transaction_still_returns_hash() {
    let broadcaster = Arc::new(FakeBroadcaster::new(ReceiptScript::NeverIncluded));
    let mut h = unlocked_wallet(broadcaster).await;

    let (request, _) = submit_and_approve(&mut h, None).await;
    let hash = request.await.expect("join").expect("pending is success");
    assert_eq!(hash, json!(tx_hash(0xab)));
    assert_no_handoff_records(&h);
}

#[tokio::test(start_paused = true)]
async fn unmined_transaction_under_default_timings_returns_pending_hash() {
    let broadcaster = Arc::new(FakeBroadcaster::new(ReceiptScript::NeverIncluded));
    let config = WalletConfig::default();
    let core_wait = config.core().signer_timeout;
    let mut h = wallet_with(
        config,
        broadcaster.clone(),
        Arc::new(TestClock::at(1_000)),
        true,
    )
    .await;

    let tab_id = TabId(7);
    let core = h.wallet.core().clone();
    let started = tokio::time::Instant::now();
    let request = tokio::spawn(async move {
        core.dispatch(
            CoreMessage::SendTransaction {
                data: json!({ "from": EVM_ADDRESS, "to": EVM_ADDRESS, "value": "0x1" }),
            },
            MessageSender::tab(tab_id, "https://dapp.example"),
        )
        .await
    });
    let (_, popup) = next_approval(&mut h.ui).await;
    assert_eq!(popup.tab_id(), Some(tab_id));
    let ack = h
        .wallet
        .ui(CoreMessage::ApproveTransaction {
            tab_id,
            transaction: None,
        })
        .await;
    assert!(ack.success);

    let response = request.await.expect("join");
    assert!(response.success, "{response:?}");
    assert_eq!(response.hash, Some(tx_hash(0xab)));
    assert_eq!(response.pending, Some(true));
    assert!(started.elapsed() < core_wait);
    assert_eq!(broadcaster.sent_count(), 1);
    assert_no_handoff_records(&h);
}

#[tokio::test]
async fn revert_reason_is_decoded() {
    let mut fake = FakeBroadcaster::new(ReceiptScript::Reverted);
    fake.revert_output = revert_data("insufficient balance");
    let mut h = unlocked_wallet(Arc::new(fake)).await;

    let (request, _) = submit_and_approve(&mut h, None).await;
    let err = request.await.expect("join").expect_err("reverted");
    assert_eq!(err.code(), ErrorCode::TransactionReverted);
    assert_eq!(err.to_string(), "Transaction reverted: insufficient balance");
    assert_no_handoff_records(&h);
}

#[tokio::test]
async fn every_endpoint_refusing_fails_the_request() {
    let mut fake = FakeBroadcaster::new(ReceiptScript::Confirmed);
    fake.failing = fast_config().rpc_urls;
    let fake = Arc::new(fake);
    let mut h = unlocked_wallet(fake.clone()).await;

    let (request, _) = submit_and_approve(&mut h, None).await;
    let err = request.await.expect("join").expect_err("nobody took it");
    assert_eq!(err.code(), ErrorCode::AllEndpointsFailed);
    assert_eq!(err.to_string(), ALL_ENDPOINTS_FAILED_MESSAGE);
    assert_eq!(fake.sent_count(), 0);
}

#[tokio::test]
async fn locked_wallet_refuses_approval() {
    let mut h = wallet_with(
        fast_config(),
        Arc::new(FakeBroadcaster::new(ReceiptScript::Confirmed)),
        Arc::new(TestClock::at(1_000)),
        false,
    )
    .await;

    let (request, ack) = submit_and_approve(&mut h, None).await;
    assert!(!ack.success);
    assert_eq!(ack.code, Some(ErrorCode::WalletLocked));
    let err = request.await.expect("join").expect_err("locked");
    assert!(matches!(err, WalletError::WalletLocked));
    assert_eq!(h.wallet.open_windows(), 0);
    assert_no_handoff_records(&h);
}

#[tokio::test]
async fn expired_session_counts_as_locked() {
    let clock = Arc::new(TestClock::at(1_000));
    let mut config = fast_config();
    config.session_ttl_ms = Some(60_000);
    let mut h = wallet_with(
        config,
        Arc::new(FakeBroadcaster::new(ReceiptScript::Confirmed)),
        clock.clone(),
        true,
    )
    .await;
    clock.advance(60_001);

    let (request, ack) = submit_and_approve(&mut h, None).await;
    assert_eq!(ack.code, Some(ErrorCode::WalletLocked));
    let err = request.await.expect("join").expect_err("expired");
    assert!(matches!(err, WalletError::WalletLocked));
}

#[tokio::test]
async fn silent_signer_times_out() {
    let mut fake = FakeBroadcaster::new(ReceiptScript::Confirmed);
    fake.hang = true;
    let mut config = fast_config();
    config.signer_timeout_ms = 200;
    let mut h = wallet_with(
        config,
        Arc::new(fake),
        Arc::new(TestClock::at(1_000)),
        true,
    )
    .await;

    let (request, ack) = submit_and_approve(&mut h, None).await;
    assert!(ack.success);
    let err = request.await.expect("join").expect_err("no result");
    assert!(matches!(err, WalletError::SignerTimeout));
    assert_eq!(h.wallet.open_windows(), 0);
    assert_no_handoff_records(&h);
}

#[tokio::test]
async fn locked_wallet_cannot_request_accounts() {
    let h = wallet_with(
        fast_config(),
        Arc::new(FakeBroadcaster::new(ReceiptScript::Confirmed)),
        Arc::new(TestClock::at(1_000)),
        true,
    )
    .await;
    h.storage
        .set(devnet_wallet_core::keys::WALLET_STATE, Value::Null)
        .await
        .expect("forget wallet");
    let tab = h.wallet.open_tab("https://dapp.example");
    wait_for_handshake(&tab).await;

    let err = tab
        .providers
        .evm
        .request("eth_requestAccounts", Value::Null)
        .await
        .expect_err("no wallet");
    assert!(matches!(err, WalletError::WalletLocked));
    assert_eq!(h.wallet.open_windows(), 0);
    assert_eq!(
        tab.providers.evm.request("eth_accounts", Value::Null).await.expect("accounts"),
        json!([])
    );
}

/// Shows approval popups but refuses to open the hidden signer window.
struct BlockedSignerWindows {
    next_id: AtomicU64,
    opened: mpsc::UnboundedSender<Popup>,
}

#[async_trait]
impl WindowPort for BlockedSignerWindows {
    async fn open(&self, popup: Popup) -> Result<WindowId, PortError> {
        if matches!(popup, Popup::Signer { .. }) {
            return Err(PortError::Disconnected("popup blocked".to_owned()));
        }
        let _ = self.opened.send(popup);
        Ok(WindowId(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    async fn close(&self, _id: WindowId) -> Result<(), PortError> {
        Ok(())
    }
}

#[tokio::test]
async fn blocked_signer_window_fails_and_drops_the_handoff() {
    let memory = MemoryStorageAdapter::default();
    let storage: Arc<dyn StoragePort> = Arc::new(memory.clone());
    let clock: Arc<dyn ClockPort> = Arc::new(TestClock::at(1_000));
    let vault = Vault::new(Arc::clone(&storage), Arc::clone(&clock)).with_kdf_cost(light_kdf());
    vault.create(&secrets(), PASSWORD).await.expect("create vault");
    vault.unlock(PASSWORD).await.expect("unlock vault");

    let (opened, mut popups) = mpsc::unbounded_channel();
    let windows = Arc::new(BlockedSignerWindows {
        next_id: AtomicU64::new(1),
        opened,
    });
    let core = ExtensionCore::new(
        storage,
        windows,
        Arc::new(TabRegistry::default()),
        Arc::new(LocalMessageSigner),
        clock,
        Arc::new(HttpTransportAdapter::default()),
        fast_config().core(),
    );

    let tab_id = TabId(3);
    let page_side = core.clone();
    let request = tokio::spawn(async move {
        page_side
            .dispatch(
                CoreMessage::SendTransaction {
                    data: json!({ "to": EVM_ADDRESS, "value": "0x1" }),
                },
                MessageSender::tab(tab_id, "https://dapp.example"),
            )
            .await
    });
    let popup = popups.recv().await.expect("approval popup");
    assert_eq!(popup.tab_id(), Some(tab_id));
    let ack = core
        .dispatch(
            CoreMessage::ApproveTransaction {
                tab_id,
                transaction: None,
            },
            MessageSender::extension(),
        )
        .await;
    assert!(ack.success);

    let response = request.await.expect("join");
    assert!(!response.success);
    assert_eq!(response.code, Some(ErrorCode::Internal));
    assert!(response.hash.is_none());
    assert!(storage_keys_with_prefix(&memory, "pendingSignerTransaction_").is_empty());
    assert!(storage_keys_with_prefix(&memory, "signerResult_").is_empty());
}
