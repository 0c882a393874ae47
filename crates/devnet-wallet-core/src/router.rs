use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::config::CoreConfig;
use crate::domain::{
    keys, Popup, SessionRecord, SignRequest, SignerHandoff, SignerResult, TabId, TxRequest,
    WalletState, WindowId,
};
use crate::error::WalletError;
use crate::handoff::wait_for_record;
use crate::messages::{CoreEvent, CoreMessage, CoreResponse, MessageSender};
use crate::network::{self, NetworkConfig, DEFAULT_NETWORK};
use crate::ports::{
    load_json, store_json, ClockPort, MessageHandler, MessageSigner, PortError, RpcTransport,
    StoragePort, TabsPort, WindowPort,
};
use crate::rpc::RpcMultiplexer;

struct Parked<R> {
    responder: oneshot::Sender<CoreResponse>,
    window: Option<WindowId>,
    generation: u64,
    payload: R,
}

/// A signing request; `broadcast` sends the signed Solana transaction to the
/// cluster and answers with its signature.
struct PendingSignature {
    request: SignRequest,
    broadcast: bool,
}

#[derive(Default)]
struct ParkedResponders {
    connections: HashMap<TabId, Parked<()>>,
    transactions: HashMap<TabId, Parked<TxRequest>>,
    signatures: HashMap<TabId, Parked<PendingSignature>>,
}

type Slot<R> = fn(&mut ParkedResponders) -> &mut HashMap<TabId, Parked<R>>;

fn connections(p: &mut ParkedResponders) -> &mut HashMap<TabId, Parked<()>> {
    &mut p.connections
}

fn transactions(p: &mut ParkedResponders) -> &mut HashMap<TabId, Parked<TxRequest>> {
    &mut p.transactions
}

fn signatures(p: &mut ParkedResponders) -> &mut HashMap<TabId, Parked<PendingSignature>> {
    &mut p.signatures
}

struct CoreInner<S: ?Sized, W: ?Sized, T: ?Sized, M: ?Sized, C: ?Sized> {
    storage: Arc<S>,
    windows: Arc<W>,
    tabs: Arc<T>,
    signer: Arc<M>,
    clock: Arc<C>,
    rpc: Arc<dyn RpcTransport>,
    config: CoreConfig,
    parked: Mutex<ParkedResponders>,
    generation: AtomicU64,
}

/// The privileged background context: answers queries, parks page requests
/// for user consent and drives the signer handoff.
pub struct ExtensionCore<S: ?Sized, W: ?Sized, T: ?Sized, M: ?Sized, C: ?Sized> {
    inner: Arc<CoreInner<S, W, T, M, C>>,
}

impl<S: ?Sized, W: ?Sized, T: ?Sized, M: ?Sized, C: ?Sized> Clone for ExtensionCore<S, W, T, M, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn require_tab(sender: &MessageSender) -> Result<TabId, WalletError> {
    sender
        .tab_id
        .ok_or_else(|| WalletError::InvalidParameters("request must come from a tab".to_owned()))
}

fn respond<T>(result: Result<T, WalletError>, ok: impl FnOnce(T) -> CoreResponse) -> CoreResponse {
    match result {
        Ok(value) => ok(value),
        Err(e) => CoreResponse::failure(&e),
    }
}

impl<S, W, T, M, C> ExtensionCore<S, W, T, M, C>
where
    S: StoragePort + ?Sized + 'static,
    W: WindowPort + ?Sized + 'static,
    T: TabsPort + ?Sized + 'static,
    M: MessageSigner + ?Sized + 'static,
    C: ClockPort + ?Sized + 'static,
{
    pub fn new(
        storage: Arc<S>,
        windows: Arc<W>,
        tabs: Arc<T>,
        signer: Arc<M>,
        clock: Arc<C>,
        rpc: Arc<dyn RpcTransport>,
        config: CoreConfig,
    ) -> Self {
        Self {
            inner: Arc::new(CoreInner {
                storage,
                windows,
                tabs,
                signer,
                clock,
                rpc,
                config,
                parked: Mutex::new(ParkedResponders::default()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Entry point for untyped messages, e.g. from the approval UI.
    pub async fn handle_raw(&self, message: Value, sender: MessageSender) -> CoreResponse {
        match serde_json::from_value::<CoreMessage>(message) {
            Ok(message) => self.dispatch(message, sender).await,
            Err(e) => {
                tracing::debug!(error = %e, "unparseable core message");
                CoreResponse::failure(&WalletError::UnknownMessageType)
            }
        }
    }

    pub async fn dispatch(&self, message: CoreMessage, sender: MessageSender) -> CoreResponse {
        if message.is_ui_decision() && sender.tab_id.is_some() {
            tracing::warn!(origin = %sender.origin, "page tried to send an approval decision");
            return CoreResponse::failure(&WalletError::UnknownMessageType);
        }
        tracing::debug!(?sender.tab_id, ?message, "core message");

        match message {
            CoreMessage::GetWalletState => respond(self.wallet_state_view().await, |data| {
                CoreResponse::ok().with_data(data)
            }),
            CoreMessage::GetAccounts => respond(self.accounts().await, |accounts| {
                CoreResponse::ok().with_accounts(accounts)
            }),
            CoreMessage::RequestAccounts { .. } => self.request_accounts(&sender).await,
            CoreMessage::SendTransaction { data } => self.send_transaction(data, &sender).await,
            CoreMessage::SignTransaction { data } => self.sign_request(data, &sender).await,
            CoreMessage::SwitchNetwork { data } => {
                respond(self.switch_network(&data).await, |network| {
                    CoreResponse::ok().with_data(json!({
                        "selectedNetwork": network.key,
                        "chainId": network.chain_id_hex(),
                    }))
                })
            }
            CoreMessage::ApproveConnection { tab_id, accounts } => {
                self.approve_connection(tab_id, accounts).await
            }
            CoreMessage::RejectConnection { tab_id } => {
                self.reject(connections, tab_id).await;
                CoreResponse::ok()
            }
            CoreMessage::ApproveTransaction {
                tab_id,
                transaction,
            } => self.approve_transaction(tab_id, transaction).await,
            CoreMessage::RejectTransaction { tab_id } => {
                self.reject(transactions, tab_id).await;
                CoreResponse::ok()
            }
            CoreMessage::ApproveSignature { tab_id } => self.approve_signature(tab_id).await,
            CoreMessage::RejectSignature { tab_id } => {
                self.reject(signatures, tab_id).await;
                CoreResponse::ok()
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.lock_parked()
            .map(|p| p.connections.len() + p.transactions.len() + p.signatures.len())
            .unwrap_or(0)
    }

    fn lock_parked(&self) -> Result<MutexGuard<'_, ParkedResponders>, WalletError> {
        self.inner
            .parked
            .lock()
            .map_err(|e| PortError::Transport(format!("responder lock poisoned: {e}")).into())
    }

    async fn wallet_state(&self) -> Result<Option<WalletState>, WalletError> {
        Ok(load_json::<S, WalletState>(&*self.inner.storage, keys::WALLET_STATE)
            .await?
            .filter(WalletState::has_wallet))
    }

    async fn wallet_state_view(&self) -> Result<Value, WalletError> {
        let state = self.wallet_state().await?;
        let selected: Option<String> =
            load_json(&*self.inner.storage, keys::SELECTED_NETWORK).await?;
        Ok(json!({
            "walletState": state,
            "selectedNetwork": selected.unwrap_or_else(|| DEFAULT_NETWORK.to_owned()),
        }))
    }

    async fn accounts(&self) -> Result<Vec<String>, WalletError> {
        Ok(self
            .wallet_state()
            .await?
            .and_then(|s| s.evm_address)
            .into_iter()
            .collect())
    }

    /// The unlocked session, unless it is missing or older than the TTL.
    async fn session(&self) -> Result<Option<SessionRecord>, WalletError> {
        let Some(session) =
            load_json::<S, SessionRecord>(&*self.inner.storage, keys::SESSION).await?
        else {
            return Ok(None);
        };
        if let Some(ttl) = self.inner.config.session_ttl {
            let now = self.inner.clock.now_ms()?;
            let age = now.saturating_sub(session.unlocked_at.0);
            if u128::from(age) > ttl.as_millis() {
                tracing::info!(age_ms = age, "wallet session expired");
                return Ok(None);
            }
        }
        Ok(Some(session))
    }

    async fn close_window(&self, window: Option<WindowId>) {
        if let Some(window) = window {
            if let Err(e) = self.inner.windows.close(window).await {
                tracing::debug!(?window, error = %e, "window close failed");
            }
        }
    }

    fn take<R>(&self, slot: Slot<R>, tab_id: TabId) -> Option<Parked<R>> {
        self.lock_parked()
            .ok()
            .and_then(|mut parked| slot(&mut *parked).remove(&tab_id))
    }

    async fn resolve<R>(&self, parked: Parked<R>, response: CoreResponse) {
        if parked.responder.send(response).is_err() {
            tracing::debug!("page request already gone");
        }
        self.close_window(parked.window).await;
    }

    async fn reject<R>(&self, slot: Slot<R>, tab_id: TabId) {
        match self.take(slot, tab_id) {
            Some(parked) => {
                tracing::info!(%tab_id, "request rejected by user");
                self.resolve(parked, CoreResponse::failure(&WalletError::UserRejected))
                    .await;
            }
            None => tracing::debug!(%tab_id, "rejection without a pending request"),
        }
    }

    /// Park a responder for `tab_id`, open the consent popup and wait for the
    /// decision. An older request from the same tab is settled `Superseded`.
    async fn park_and_wait<R>(&self, slot: Slot<R>, tab_id: TabId, payload: R, popup: Popup) -> CoreResponse {
        let (tx, rx) = oneshot::channel();
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let superseded = match self.lock_parked() {
            Ok(mut parked) => slot(&mut *parked).insert(
                tab_id,
                Parked {
                    responder: tx,
                    window: None,
                    generation,
                    payload,
                },
            ),
            Err(e) => return CoreResponse::failure(&e),
        };
        if let Some(old) = superseded {
            tracing::info!(%tab_id, "pending request superseded");
            self.resolve(old, CoreResponse::failure(&WalletError::Superseded))
                .await;
        }

        match self.inner.windows.open(popup).await {
            Ok(window) => {
                let recorded = self.lock_parked().ok().is_some_and(|mut parked| {
                    match slot(&mut *parked).get_mut(&tab_id) {
                        Some(entry) if entry.generation == generation => {
                            entry.window = Some(window);
                            true
                        }
                        _ => false,
                    }
                });
                if !recorded {
                    // Decided before the window id came back.
                    self.close_window(Some(window)).await;
                }
            }
            Err(e) => {
                tracing::warn!(%tab_id, error = %e, "could not open approval window");
                if let Ok(mut parked) = self.lock_parked() {
                    let map = slot(&mut *parked);
                    if map.get(&tab_id).is_some_and(|p| p.generation == generation) {
                        map.remove(&tab_id);
                    }
                }
                return CoreResponse::failure(&WalletError::Port(e));
            }
        }

        rx.await.unwrap_or_else(|_| {
            CoreResponse::failure(&WalletError::Port(PortError::Disconnected(
                "approval abandoned".to_owned(),
            )))
        })
    }

    async fn request_accounts(&self, sender: &MessageSender) -> CoreResponse {
        let tab_id = match require_tab(sender) {
            Ok(tab_id) => tab_id,
            Err(e) => return CoreResponse::failure(&e),
        };
        match self.wallet_state().await {
            Ok(Some(_)) => {}
            Ok(None) => return CoreResponse::failure(&WalletError::WalletLocked),
            Err(e) => return CoreResponse::failure(&e),
        }
        let popup = Popup::ConnectionApproval {
            tab_id,
            origin: sender.origin.clone(),
        };
        self.park_and_wait(connections, tab_id, (), popup).await
    }

    async fn approve_connection(&self, tab_id: TabId, accounts: Vec<String>) -> CoreResponse {
        let Some(parked) = self.take(connections, tab_id) else {
            tracing::debug!(%tab_id, "approval without a pending connection");
            return CoreResponse::ok();
        };
        let accounts = if accounts.is_empty() {
            self.accounts().await.unwrap_or_default()
        } else {
            accounts
        };
        tracing::info!(%tab_id, "connection approved");
        self.resolve(parked, CoreResponse::ok().with_accounts(accounts))
            .await;
        CoreResponse::ok()
    }

    async fn send_transaction(&self, data: Value, sender: &MessageSender) -> CoreResponse {
        let tab_id = match require_tab(sender) {
            Ok(tab_id) => tab_id,
            Err(e) => return CoreResponse::failure(&e),
        };
        if let Some(transaction) = data.get("transaction") {
            let request = SignRequest::Transaction {
                transaction: transaction.clone(),
            };
            return self.park_signature(tab_id, sender, request, true).await;
        }
        let transaction: TxRequest = match serde_json::from_value(data) {
            Ok(tx) => tx,
            Err(e) => {
                return CoreResponse::failure(&WalletError::InvalidParameters(format!(
                    "malformed transaction: {e}"
                )))
            }
        };
        let popup = Popup::TransactionApproval {
            tab_id,
            origin: sender.origin.clone(),
            transaction: transaction.clone(),
        };
        self.park_and_wait(transactions, tab_id, transaction, popup)
            .await
    }

    async fn approve_transaction(
        &self,
        tab_id: TabId,
        edited: Option<TxRequest>,
    ) -> CoreResponse {
        let Some(parked) = self.take(transactions, tab_id) else {
            tracing::debug!(%tab_id, "approval without a pending transaction");
            return CoreResponse::ok();
        };
        let session = match self.session().await {
            Ok(Some(session)) => session,
            Ok(None) => {
                self.resolve(parked, CoreResponse::failure(&WalletError::WalletLocked))
                    .await;
                return CoreResponse::failure(&WalletError::WalletLocked);
            }
            Err(e) => {
                self.resolve(parked, CoreResponse::failure(&e)).await;
                return CoreResponse::failure(&e);
            }
        };

        let Parked {
            responder,
            window,
            payload,
            ..
        } = parked;
        self.close_window(window).await;
        let transaction = edited.unwrap_or(payload);
        let core = self.clone();
        tokio::spawn(async move {
            let response = core
                .drive_signer(transaction, session.evm_private_key)
                .await;
            if responder.send(response).is_err() {
                tracing::debug!(%tab_id, "page request gone before signer finished");
            }
        });
        tracing::info!(%tab_id, "transaction approved, signer started");
        CoreResponse::ok()
    }

    async fn drive_signer(&self, transaction: TxRequest, private_key: String) -> CoreResponse {
        let request_id = uuid::Uuid::new_v4().to_string();
        let handoff_key = keys::signer_handoff(&request_id);
        let result_key = keys::signer_result(&request_id);
        let storage = &*self.inner.storage;

        let handoff = SignerHandoff {
            transaction,
            private_key,
            request_id: request_id.clone(),
        };
        if let Err(e) = store_json(storage, &handoff_key, &handoff).await {
            return CoreResponse::failure(&WalletError::Port(e));
        }
        let window = match self
            .inner
            .windows
            .open(Popup::Signer {
                request_id: request_id.clone(),
            })
            .await
        {
            Ok(window) => Some(window),
            Err(e) => {
                tracing::warn!(%request_id, error = %e, "could not open signer window");
                if let Err(cleanup) = storage.remove(&handoff_key).await {
                    tracing::warn!(key = %handoff_key, error = %cleanup, "orphaned signer handoff");
                }
                return CoreResponse::failure(&WalletError::Port(e));
            }
        };

        let waited: Result<Option<SignerResult>, PortError> = wait_for_record(
            storage,
            &result_key,
            self.inner.config.signer_poll_interval,
            self.inner.config.signer_timeout,
        )
        .await;

        self.close_window(window).await;
        for key in [&result_key, &handoff_key] {
            if let Err(e) = storage.remove(key).await {
                tracing::debug!(key = %key, error = %e, "handoff cleanup failed");
            }
        }

        match waited {
            Ok(Some(result)) if result.success => match result.hash {
                Some(hash) => CoreResponse::ok().with_hash(hash, result.pending == Some(true)),
                None => CoreResponse::failure(&WalletError::from_response(
                    None,
                    Some("signer reported success without a hash".to_owned()),
                )),
            },
            Ok(Some(result)) => {
                let mut response =
                    CoreResponse::failure(&WalletError::from_response(result.code, result.error));
                response.hash = result.hash;
                response
            }
            Ok(None) => {
                tracing::warn!(%request_id, "signer timed out");
                CoreResponse::failure(&WalletError::SignerTimeout)
            }
            Err(e) => CoreResponse::failure(&WalletError::Port(e)),
        }
    }

    async fn sign_request(&self, data: Value, sender: &MessageSender) -> CoreResponse {
        let tab_id = match require_tab(sender) {
            Ok(tab_id) => tab_id,
            Err(e) => return CoreResponse::failure(&e),
        };
        let request: SignRequest = match serde_json::from_value(data) {
            Ok(request) => request,
            Err(_) => {
                return CoreResponse::failure(&WalletError::InvalidParameters(
                    "unrecognised signature request".to_owned(),
                ))
            }
        };
        self.park_signature(tab_id, sender, request, false).await
    }

    async fn park_signature(
        &self,
        tab_id: TabId,
        sender: &MessageSender,
        request: SignRequest,
        broadcast: bool,
    ) -> CoreResponse {
        match self.wallet_state().await {
            Ok(Some(_)) => {}
            Ok(None) => return CoreResponse::failure(&WalletError::WalletLocked),
            Err(e) => return CoreResponse::failure(&e),
        }
        let popup = Popup::SignatureApproval {
            tab_id,
            origin: sender.origin.clone(),
            request: request.clone(),
            broadcast,
        };
        let pending = PendingSignature { request, broadcast };
        self.park_and_wait(signatures, tab_id, pending, popup).await
    }

    async fn approve_signature(&self, tab_id: TabId) -> CoreResponse {
        let Some(parked) = self.take(signatures, tab_id) else {
            tracing::debug!(%tab_id, "approval without a pending signature");
            return CoreResponse::ok();
        };
        let session = match self.session().await {
            Ok(Some(session)) => session,
            Ok(None) => {
                self.resolve(parked, CoreResponse::failure(&WalletError::WalletLocked))
                    .await;
                return CoreResponse::failure(&WalletError::WalletLocked);
            }
            Err(e) => {
                self.resolve(parked, CoreResponse::failure(&e)).await;
                return CoreResponse::failure(&e);
            }
        };
        let pending = &parked.payload;
        let response = match self.inner.signer.sign(&pending.request, &session).await {
            Ok(signed) if pending.broadcast => match self.send_solana_transaction(&signed).await {
                Ok(signature) => {
                    tracing::info!(%tab_id, %signature, "solana transaction sent");
                    let public_key = self
                        .wallet_state()
                        .await
                        .ok()
                        .flatten()
                        .and_then(|s| s.solana_public_key);
                    CoreResponse::ok().with_signature(json!({
                        "signature": signature,
                        "publicKey": public_key,
                    }))
                }
                Err(e) => {
                    tracing::warn!(%tab_id, error = %e, "solana send failed");
                    CoreResponse::failure(&e)
                }
            },
            Ok(signature) => CoreResponse::ok().with_signature(signature),
            Err(e) => {
                tracing::warn!(%tab_id, error = %e, "signing failed");
                CoreResponse::failure(&WalletError::Port(e))
            }
        };
        self.resolve(parked, response).await;
        CoreResponse::ok()
    }

    /// Submit a signed wire transaction with `sendTransaction`, base64
    /// encoded, falling through the configured cluster endpoints.
    async fn send_solana_transaction(&self, signed: &Value) -> Result<Value, WalletError> {
        let wire: Vec<u8> = signed
            .get("signedTransaction")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| {
                PortError::Validation("signer returned no wire transaction".to_owned())
            })?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(wire);
        let rpc = RpcMultiplexer::new(
            Arc::clone(&self.inner.rpc),
            self.inner.config.solana_rpc.clone(),
        );
        let signature = rpc
            .call(
                "sendTransaction",
                json!([encoded, { "encoding": "base64", "preflightCommitment": "confirmed" }]),
            )
            .await?;
        match signature {
            Value::String(_) => Ok(signature),
            other => Err(PortError::Validation(format!(
                "sendTransaction returned {other}, expected a signature"
            ))
            .into()),
        }
    }

    async fn switch_network(&self, data: &Value) -> Result<&'static NetworkConfig, WalletError> {
        let selector = data
            .get("network")
            .and_then(Value::as_str)
            .or_else(|| data.as_str())
            .ok_or_else(|| WalletError::InvalidParameters("network is required".to_owned()))?;
        let network = network::resolve(selector)?;
        store_json(&*self.inner.storage, keys::SELECTED_NETWORK, &network.key).await?;
        tracing::info!(network = network.key, "network switched");

        let announced = network
            .chain_id_hex()
            .or_else(|| network.cluster_id.map(str::to_owned))
            .unwrap_or_else(|| network.key.to_owned());
        match self.inner.tabs.tab_ids().await {
            Ok(tab_ids) => {
                for tab_id in tab_ids {
                    let event = CoreEvent::NetworkChanged {
                        network: announced.clone(),
                    };
                    if let Err(e) = self.inner.tabs.send_event(tab_id, event).await {
                        tracing::debug!(%tab_id, error = %e, "network notice not delivered");
                    }
                }
            }
            Err(e) => tracing::debug!(error = %e, "could not list tabs"),
        }
        Ok(network)
    }
}

#[async_trait]
impl<S, W, T, M, C> MessageHandler for ExtensionCore<S, W, T, M, C>
where
    S: StoragePort + ?Sized + 'static,
    W: WindowPort + ?Sized + 'static,
    T: TabsPort + ?Sized + 'static,
    M: MessageSigner + ?Sized + 'static,
    C: ClockPort + ?Sized + 'static,
{
    async fn handle(&self, message: CoreMessage, sender: MessageSender) -> CoreResponse {
        self.dispatch(message, sender).await
    }
}
