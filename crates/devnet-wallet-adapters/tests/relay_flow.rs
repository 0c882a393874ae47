mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use ed25519_dalek::{Signature, SigningKey, Verifier};
use serde_json::{json, Value};

use devnet_wallet_core::error::CONTEXT_INVALIDATED_MESSAGE;
use devnet_wallet_core::{
    install, CoreMessage, ErrorCode, Page, Popup, ProviderConfig, RpcConfig, WalletError,
};
use devnet_wallet_adapters::HttpTransportAdapter;

use common::{
    fast_config, next_approval, spawn_rpc_server, unlocked_wallet, wait_for_handshake,
    wallet_with, FakeBroadcaster, Harness, ReceiptScript, TestClock, EVM_ADDRESS,
};

fn broadcaster() -> Arc<FakeBroadcaster> {
    Arc::new(FakeBroadcaster::new(ReceiptScript::Confirmed))
}

#[tokio::test]
async fn handshake_then_local_answers() {
    let h = unlocked_wallet(broadcaster()).await;
    let tab = h.wallet.open_tab("https://dapp.example");
    wait_for_handshake(&tab).await;

    let provider = &tab.providers.evm;
    assert_eq!(
        provider.request("eth_accounts", Value::Null).await.expect("accounts"),
        json!([EVM_ADDRESS])
    );
    assert_eq!(
        provider.request("eth_chainId", Value::Null).await.expect("chain"),
        json!("0xaa36a7")
    );
    assert_eq!(
        provider.request("net_version", Value::Null).await.expect("net"),
        json!("11155111")
    );
    let err = provider
        .request("eth_signTypedData_v4", json!([]))
        .await
        .expect_err("unsupported");
    assert_eq!(err.code(), ErrorCode::MethodNotSupported);
}

#[tokio::test]
async fn connection_approval_round_trip() {
    let mut h = unlocked_wallet(broadcaster()).await;
    let tab = h.wallet.open_tab("https://dapp.example");
    wait_for_handshake(&tab).await;

    let provider = tab.providers.evm.clone();
    let request = tokio::spawn(async move { provider.request("eth_requestAccounts", Value::Null).await });

    let (_, popup) = next_approval(&mut h.ui).await;
    assert_eq!(
        popup,
        Popup::ConnectionApproval {
            tab_id: tab.tab_id,
            origin: "https://dapp.example".to_owned(),
        }
    );
    let ack = h
        .wallet
        .ui(CoreMessage::ApproveConnection {
            tab_id: tab.tab_id,
            accounts: Vec::new(),
        })
        .await;
    assert!(ack.success);

    let accounts = request.await.expect("join").expect("approved");
    assert_eq!(accounts, json!([EVM_ADDRESS]));
    assert_eq!(h.wallet.core().pending_count(), 0);

    // A second decision for the same tab finds nothing to settle.
    let again = h
        .wallet
        .ui(CoreMessage::ApproveConnection {
            tab_id: tab.tab_id,
            accounts: Vec::new(),
        })
        .await;
    assert!(again.success);
}

#[tokio::test]
async fn rejection_reaches_the_page() {
    let mut h = unlocked_wallet(broadcaster()).await;
    let tab = h.wallet.open_tab("https://dapp.example");
    wait_for_handshake(&tab).await;

    let provider = tab.providers.evm.clone();
    let request = tokio::spawn(async move { provider.request("eth_requestAccounts", Value::Null).await });
    next_approval(&mut h.ui).await;
    h.wallet
        .ui(CoreMessage::RejectConnection { tab_id: tab.tab_id })
        .await;

    let err = request.await.expect("join").expect_err("rejected");
    assert!(matches!(err, WalletError::UserRejected));
    // The approval window is closed once decided.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.wallet.open_windows(), 0);
}

#[tokio::test]
async fn newer_request_supersedes_older_one() {
    let mut h = unlocked_wallet(broadcaster()).await;
    let tab = h.wallet.open_tab("https://dapp.example");
    wait_for_handshake(&tab).await;

    let first_provider = tab.providers.evm.clone();
    let first = tokio::spawn(async move { first_provider.request("eth_requestAccounts", Value::Null).await });
    next_approval(&mut h.ui).await;

    let second_provider = tab.providers.evm.clone();
    let second = tokio::spawn(async move { second_provider.request("eth_requestAccounts", Value::Null).await });
    next_approval(&mut h.ui).await;

    let err = first.await.expect("join").expect_err("superseded");
    assert!(matches!(err, WalletError::Superseded));

    h.wallet
        .ui(CoreMessage::ApproveConnection {
            tab_id: tab.tab_id,
            accounts: vec!["0xabc".to_owned()],
        })
        .await;
    assert_eq!(second.await.expect("join").expect("approved"), json!(["0xabc"]));
}

#[tokio::test]
async fn forged_responses_do_not_settle_requests() {
    let mut h = unlocked_wallet(broadcaster()).await;
    let tab = h.wallet.open_tab("https://dapp.example");
    wait_for_handshake(&tab).await;

    let provider = tab.providers.evm.clone();
    let request = tokio::spawn(async move { provider.request("eth_requestAccounts", Value::Null).await });
    next_approval(&mut h.ui).await;

    for id in 0..8 {
        tab.page.bus.post(json!({
            "type": "DEVNET_WALLET_REQUEST_ACCOUNTS_RESPONSE",
            "id": id,
            "response": { "success": true, "accounts": ["0xdead"] },
            "token": "forged",
        }));
        tab.page.bus.post(json!({
            "type": "DEVNET_WALLET_REQUEST_ACCOUNTS_RESPONSE",
            "id": id,
            "response": { "success": true, "accounts": ["0xdead"] },
        }));
    }
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!request.is_finished());

    h.wallet
        .ui(CoreMessage::ApproveConnection {
            tab_id: tab.tab_id,
            accounts: Vec::new(),
        })
        .await;
    assert_eq!(request.await.expect("join").expect("approved"), json!([EVM_ADDRESS]));
}

#[tokio::test]
async fn pages_cannot_send_approval_decisions() {
    let h = unlocked_wallet(broadcaster()).await;
    let tab = h.wallet.open_tab("https://dapp.example");
    wait_for_handshake(&tab).await;

    let mut rx = tab.page.bus.subscribe();
    tab.page.bus.post(json!({
        "type": "DEVNET_WALLET_APPROVE_CONNECTION",
        "id": 99,
        "data": { "tabId": tab.tab_id, "accounts": ["0xdead"] },
        "token": tab.providers.evm.relay().token().as_str(),
    }));

    let response = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let posted = rx.recv().await.expect("bus open");
            if posted.data["type"] == "DEVNET_WALLET_APPROVE_CONNECTION_RESPONSE" {
                return posted.data;
            }
        }
    })
    .await
    .expect("bridge answers");
    assert_eq!(response["response"]["success"], false);
    assert_eq!(response["response"]["code"], "UNKNOWN_MESSAGE_TYPE");
}

#[tokio::test]
async fn invalidated_runtime_is_reported_to_the_page() {
    let h = unlocked_wallet(broadcaster()).await;
    let tab = h.wallet.open_tab("https://dapp.example");
    wait_for_handshake(&tab).await;
    h.wallet.invalidate_runtime();

    let err = tab
        .providers
        .evm
        .request("eth_requestAccounts", Value::Null)
        .await
        .expect_err("context gone");
    assert_eq!(err.code(), ErrorCode::ExtensionContextInvalidated);
    assert_eq!(err.to_string(), CONTEXT_INVALIDATED_MESSAGE);

    // eth_accounts degrades to no accounts.
    assert_eq!(
        tab.providers
            .evm
            .request("eth_accounts", Value::Null)
            .await
            .expect("accounts"),
        json!([])
    );
}

#[tokio::test]
async fn unanswered_request_times_out_and_is_forgotten() {
    // No relay bridge on this page, so nothing ever answers.
    let page = Page::new("https://lonely.example");
    let installed = install(
        &page,
        Arc::new(HttpTransportAdapter::default()),
        ProviderConfig {
            request_timeout: Duration::from_millis(80),
            rpc: RpcConfig {
                endpoints: Vec::new(),
                ..RpcConfig::default()
            },
            ..ProviderConfig::default()
        },
    );

    let err = installed
        .evm
        .request("eth_requestAccounts", Value::Null)
        .await
        .expect_err("timeout");
    assert!(matches!(err, WalletError::RequestTimeout));
    assert_eq!(installed.evm.relay().pending_count(), 0);
    assert!(!installed.evm.relay().is_acknowledged());
}

#[tokio::test]
async fn switching_networks_notifies_every_tab() {
    let h = unlocked_wallet(broadcaster()).await;
    let tab_a = h.wallet.open_tab("https://a.example");
    let tab_b = h.wallet.open_tab("https://b.example");
    wait_for_handshake(&tab_a).await;
    wait_for_handshake(&tab_b).await;

    let seen = Arc::new(Mutex::new(Vec::<Value>::new()));
    let sink = Arc::clone(&seen);
    tab_b.providers.evm.on("chainChanged", move |chain| {
        sink.lock().expect("seen").push(chain.clone());
    });

    let result = tab_a
        .providers
        .evm
        .request("wallet_switchEthereumChain", json!([{ "chainId": "0x7a69" }]))
        .await
        .expect("switched");
    assert_eq!(result, Value::Null);

    for _ in 0..100 {
        if !seen.lock().expect("seen").is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(*seen.lock().expect("seen"), vec![json!("0x7a69")]);
    assert_eq!(
        tab_b.providers.evm.request("eth_chainId", Value::Null).await.expect("chain"),
        json!("0x7a69")
    );
}

#[tokio::test]
async fn mainnets_are_refused() {
    let h = unlocked_wallet(broadcaster()).await;
    let tab = h.wallet.open_tab("https://dapp.example");
    wait_for_handshake(&tab).await;

    for chain in ["0x1", "0x89", "0x38"] {
        let err = tab
            .providers
            .evm
            .request("wallet_switchEthereumChain", json!([{ "chainId": chain }]))
            .await
            .expect_err("mainnet");
        assert_eq!(err.code(), ErrorCode::UnsupportedNetwork);
    }
    assert_eq!(
        tab.providers.evm.request("eth_chainId", Value::Null).await.expect("chain"),
        json!("0xaa36a7")
    );
}

#[tokio::test]
async fn personal_sign_after_approval() {
    let mut h = unlocked_wallet(broadcaster()).await;
    let tab = h.wallet.open_tab("https://dapp.example");
    wait_for_handshake(&tab).await;

    let provider = tab.providers.evm.clone();
    let request = tokio::spawn(async move {
        provider
            .request("personal_sign", json!(["0x68656c6c6f", EVM_ADDRESS]))
            .await
    });
    let (_, popup) = next_approval(&mut h.ui).await;
    assert!(matches!(popup, Popup::SignatureApproval { .. }));
    h.wallet
        .ui(CoreMessage::ApproveSignature { tab_id: tab.tab_id })
        .await;

    let signature = request.await.expect("join").expect("signed");
    let signature = signature.as_str().expect("hex string");
    assert!(signature.starts_with("0x"));
    assert_eq!(signature.len(), 2 + 130);
}

#[tokio::test]
async fn solana_provider_shares_the_relay() {
    let mut h = unlocked_wallet(broadcaster()).await;
    let tab = h.wallet.open_tab("https://dapp.example");
    wait_for_handshake(&tab).await;

    let solana = tab.providers.solana.clone();
    let connect = tokio::spawn(async move { solana.connect().await });
    next_approval(&mut h.ui).await;
    h.wallet
        .ui(CoreMessage::ApproveConnection {
            tab_id: tab.tab_id,
            accounts: Vec::new(),
        })
        .await;
    let key = connect.await.expect("join").expect("connected");
    assert_eq!(tab.providers.solana.public_key(), Some(key.clone()));
    assert!(bs58_len_ok(&key));
}

/// Wallet whose Solana sends go to `solana_rpc`.
async fn wallet_on_cluster(solana_rpc: String) -> Harness {
    let mut config = fast_config();
    config.solana_rpc_urls = vec![solana_rpc];
    wallet_with(config, broadcaster(), Arc::new(TestClock::at(1_000)), true).await
}

#[tokio::test]
async fn solana_sign_and_send_submits_to_cluster() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let submitted = Arc::new(Mutex::new(Vec::<Value>::new()));
    let seen = Arc::clone(&submitted);
    // The cluster answers with the first signature of the wire transaction.
    let url = spawn_rpc_server(Arc::clone(&calls), move |_, params| {
        seen.lock().expect("params").push(params.clone());
        let wire = base64::engine::general_purpose::STANDARD
            .decode(params[0].as_str().unwrap_or_default())
            .unwrap_or_default();
        match wire.get(1..65) {
            Some(signature) => (200, json!(bs58::encode(signature).into_string())),
            None => (500, json!({})),
        }
    });
    let mut h = wallet_on_cluster(url).await;
    let tab = h.wallet.open_tab("https://dapp.example");
    wait_for_handshake(&tab).await;

    let solana = tab.providers.solana.clone();
    let send = tokio::spawn(async move { solana.sign_and_send_transaction(json!([1, 2, 3])).await });
    let (_, popup) = next_approval(&mut h.ui).await;
    assert!(matches!(popup, Popup::SignatureApproval { broadcast: true, .. }));
    h.wallet
        .ui(CoreMessage::ApproveSignature { tab_id: tab.tab_id })
        .await;
    let sent = send.await.expect("join").expect("sent");

    assert_eq!(*calls.lock().expect("calls"), vec!["sendTransaction"]);
    let params = submitted.lock().expect("params")[0].clone();
    assert_eq!(params[1]["encoding"], json!("base64"));
    let wire = base64::engine::general_purpose::STANDARD
        .decode(params[0].as_str().expect("encoded transaction"))
        .expect("base64");
    assert_eq!(wire.len(), 1 + 64 + 3);
    assert_eq!(wire[0], 1);
    assert_eq!(&wire[65..], &[1, 2, 3]);

    let key = SigningKey::from_bytes(&[9u8; 32]);
    let signature = Signature::from_slice(&wire[1..65]).expect("signature");
    assert!(key.verifying_key().verify(&[1, 2, 3], &signature).is_ok());
    assert_eq!(sent["signature"], json!(bs58::encode(&wire[1..65]).into_string()));
    assert_eq!(
        sent["publicKey"],
        json!(bs58::encode(key.verifying_key().as_bytes()).into_string())
    );
}

#[tokio::test]
async fn solana_send_fails_when_cluster_refuses() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let url = spawn_rpc_server(Arc::clone(&calls), |_, _| (503, json!({})));
    let mut h = wallet_on_cluster(url).await;
    let tab = h.wallet.open_tab("https://dapp.example");
    wait_for_handshake(&tab).await;

    let solana = tab.providers.solana.clone();
    let send = tokio::spawn(async move { solana.sign_and_send_transaction(json!([4, 5])).await });
    next_approval(&mut h.ui).await;
    h.wallet
        .ui(CoreMessage::ApproveSignature { tab_id: tab.tab_id })
        .await;

    let err = send.await.expect("join").expect_err("cluster down");
    assert_eq!(err.code(), ErrorCode::AllEndpointsFailed);
    assert_eq!(calls.lock().expect("calls").len(), 1);
}

fn bs58_len_ok(key: &str) -> bool {
    (32..=44).contains(&key.len())
}
