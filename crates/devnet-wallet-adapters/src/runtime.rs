use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use devnet_wallet_core::task::AbortOnDrop;
use devnet_wallet_core::{
    install, BroadcastPort, ClockPort, CoreEvent, CoreMessage, CoreResponse, ExtensionCore,
    InstalledProviders, MessageHandler, MessageSender, MessageSigner, Page, Popup, PortError,
    RelayBridge, RpcTransport, RuntimePort, SignerHandoffWorker, StoragePort, TabId, TabsPort,
    WindowId, WindowPort,
};

use crate::clock::WallClock;
use crate::config::WalletConfig;
use crate::evm::EvmBroadcastAdapter;
use crate::http::HttpTransportAdapter;
use crate::message_signer::LocalMessageSigner;
use crate::storage::MemoryStorageAdapter;
use crate::vault::Vault;

pub type WalletCore =
    ExtensionCore<dyn StoragePort, PopupWindowsAdapter, TabRegistry, dyn MessageSigner, dyn ClockPort>;

type SignerWorker = SignerHandoffWorker<dyn StoragePort, dyn BroadcastPort>;

/// The privileged channel between content scripts and the core. Once
/// invalidated (extension reload) every send fails.
pub struct RuntimeChannel {
    handler: Arc<dyn MessageHandler>,
    alive: AtomicBool,
}

impl RuntimeChannel {
    pub fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            handler,
            alive: AtomicBool::new(true),
        }
    }

    pub fn invalidate(&self) {
        self.alive.store(false, Ordering::SeqCst);
        tracing::info!("runtime channel invalidated");
    }
}

#[async_trait]
impl RuntimePort for RuntimeChannel {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn send(
        &self,
        message: CoreMessage,
        sender: MessageSender,
    ) -> Result<CoreResponse, PortError> {
        if !self.is_alive() {
            return Err(PortError::Disconnected(
                "extension context invalidated".to_owned(),
            ));
        }
        Ok(self.handler.handle(message, sender).await)
    }
}

/// Open tabs and the relay bridge injected into each.
#[derive(Debug, Default)]
pub struct TabRegistry {
    bridges: Mutex<BTreeMap<TabId, Arc<RelayBridge>>>,
}

impl TabRegistry {
    pub fn register(&self, bridge: Arc<RelayBridge>) {
        if let Ok(mut bridges) = self.bridges.lock() {
            bridges.insert(bridge.tab_id(), bridge);
        }
    }

    pub fn unregister(&self, tab_id: TabId) -> bool {
        self.bridges
            .lock()
            .map(|mut b| b.remove(&tab_id).is_some())
            .unwrap_or(false)
    }

    fn bridge(&self, tab_id: TabId) -> Option<Arc<RelayBridge>> {
        self.bridges.lock().ok()?.get(&tab_id).cloned()
    }
}

#[async_trait]
impl TabsPort for TabRegistry {
    async fn tab_ids(&self) -> Result<Vec<TabId>, PortError> {
        self.bridges
            .lock()
            .map(|b| b.keys().copied().collect())
            .map_err(|e| PortError::Transport(format!("tab registry lock poisoned: {e}")))
    }

    async fn send_event(&self, tab_id: TabId, event: CoreEvent) -> Result<(), PortError> {
        let bridge = self
            .bridge(tab_id)
            .ok_or_else(|| PortError::NotFound(format!("tab {tab_id}")))?;
        if bridge.deliver_event(event) {
            Ok(())
        } else {
            Err(PortError::Disconnected(format!(
                "tab {tab_id} has no established relay"
            )))
        }
    }
}

/// What the approval UI sees.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Opened { window: WindowId, popup: Popup },
    Closed { window: WindowId },
}

/// Popup windows. Approval popups are handed to the UI; a signer popup runs
/// the handoff worker, which outlives the window once it is closed.
pub struct PopupWindowsAdapter {
    next_id: AtomicU64,
    open: Mutex<HashMap<WindowId, Option<AbortOnDrop>>>,
    ui: mpsc::UnboundedSender<UiEvent>,
    signer: Arc<SignerWorker>,
}

impl std::fmt::Debug for PopupWindowsAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PopupWindowsAdapter")
            .field("open", &self.open_count())
            .finish_non_exhaustive()
    }
}

impl PopupWindowsAdapter {
    pub fn new(ui: mpsc::UnboundedSender<UiEvent>, signer: Arc<SignerWorker>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            open: Mutex::new(HashMap::new()),
            ui,
            signer,
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.lock().map(|o| o.len()).unwrap_or(0)
    }

    fn notify(&self, event: UiEvent) {
        if self.ui.send(event).is_err() {
            tracing::debug!("approval UI is not listening");
        }
    }
}

#[async_trait]
impl WindowPort for PopupWindowsAdapter {
    async fn open(&self, popup: Popup) -> Result<WindowId, PortError> {
        let window = WindowId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let task = match &popup {
            Popup::Signer { request_id } => {
                let worker = Arc::clone(&self.signer);
                let request_id = request_id.clone();
                Some(AbortOnDrop::new(tokio::spawn(async move {
                    match worker.run(&request_id).await {
                        Ok(_) => {}
                        Err(e) => tracing::warn!(%request_id, error = %e, "signer window failed"),
                    }
                })))
            }
            _ => None,
        };
        self.open
            .lock()
            .map_err(|e| PortError::Transport(format!("window table lock poisoned: {e}")))?
            .insert(window, task);
        tracing::debug!(?window, ?popup, "window opened");
        self.notify(UiEvent::Opened { window, popup });
        Ok(window)
    }

    async fn close(&self, window: WindowId) -> Result<(), PortError> {
        let removed = self
            .open
            .lock()
            .map_err(|e| PortError::Transport(format!("window table lock poisoned: {e}")))?
            .remove(&window);
        match removed {
            Some(task) => {
                // A signer may already have broadcast; it bounds its own run.
                if let Some(running) = task.and_then(AbortOnDrop::detach) {
                    tracing::debug!(?window, finished = running.is_finished(), "signer window closed");
                }
                self.notify(UiEvent::Closed { window });
                Ok(())
            }
            None => Err(PortError::NotFound(format!("window {}", window.0))),
        }
    }
}

/// One browser tab with the wallet injected.
pub struct BrowserTab {
    pub tab_id: TabId,
    pub page: Page,
    pub providers: InstalledProviders,
    pub bridge: Arc<RelayBridge>,
}

#[derive(Default)]
pub struct InProcessWalletBuilder {
    config: WalletConfig,
    storage: Option<Arc<dyn StoragePort>>,
    transport: Option<Arc<dyn RpcTransport>>,
    broadcaster: Option<Arc<dyn BroadcastPort>>,
    signer: Option<Arc<dyn MessageSigner>>,
    clock: Option<Arc<dyn ClockPort>>,
}

impl InProcessWalletBuilder {
    pub fn config(mut self, config: WalletConfig) -> Self {
        self.config = config;
        self
    }

    pub fn storage(mut self, storage: Arc<dyn StoragePort>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn RpcTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn broadcaster(mut self, broadcaster: Arc<dyn BroadcastPort>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn message_signer(mut self, signer: Arc<dyn MessageSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn ClockPort>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> (InProcessWallet, mpsc::UnboundedReceiver<UiEvent>) {
        let config = self.config;
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorageAdapter::default()));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransportAdapter::default()));
        let broadcaster = self.broadcaster.unwrap_or_else(|| {
            Arc::new(EvmBroadcastAdapter::new(
                Arc::clone(&transport),
                config.rpc().timeout,
            ))
        });
        let signer = self.signer.unwrap_or_else(|| Arc::new(LocalMessageSigner));
        let clock = self.clock.unwrap_or_else(|| Arc::new(WallClock));

        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let worker = Arc::new(SignerHandoffWorker::new(
            Arc::clone(&storage),
            broadcaster,
            config.signer(),
        ));
        let windows = Arc::new(PopupWindowsAdapter::new(ui_tx, worker));
        let tabs = Arc::new(TabRegistry::default());
        let core: WalletCore = ExtensionCore::new(
            Arc::clone(&storage),
            Arc::clone(&windows),
            Arc::clone(&tabs),
            signer,
            Arc::clone(&clock),
            Arc::clone(&transport),
            config.core(),
        );
        let runtime = Arc::new(RuntimeChannel::new(Arc::new(core.clone())));

        let wallet = InProcessWallet {
            config,
            storage,
            transport,
            clock,
            core,
            runtime,
            windows,
            tabs,
            next_tab: AtomicI64::new(1),
        };
        (wallet, ui_rx)
    }
}

/// A whole extension in one process: storage, core, signer windows and any
/// number of tabs.
pub struct InProcessWallet {
    config: WalletConfig,
    storage: Arc<dyn StoragePort>,
    transport: Arc<dyn RpcTransport>,
    clock: Arc<dyn ClockPort>,
    core: WalletCore,
    runtime: Arc<RuntimeChannel>,
    windows: Arc<PopupWindowsAdapter>,
    tabs: Arc<TabRegistry>,
    next_tab: AtomicI64,
}

impl InProcessWallet {
    pub fn builder() -> InProcessWalletBuilder {
        InProcessWalletBuilder::default()
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn storage(&self) -> Arc<dyn StoragePort> {
        Arc::clone(&self.storage)
    }

    pub fn core(&self) -> &WalletCore {
        &self.core
    }

    pub fn open_windows(&self) -> usize {
        self.windows.open_count()
    }

    pub fn vault(&self) -> Vault<dyn StoragePort, dyn ClockPort> {
        Vault::new(Arc::clone(&self.storage), Arc::clone(&self.clock))
    }

    /// Load a page and inject the wallet into it. Must be called inside a
    /// tokio runtime.
    pub fn open_tab(&self, origin: &str) -> BrowserTab {
        let tab_id = TabId(self.next_tab.fetch_add(1, Ordering::Relaxed));
        let page = Page::new(origin);
        // Content script first, so the provider handshake finds a listener.
        let runtime: Arc<dyn RuntimePort> = Arc::clone(&self.runtime) as Arc<dyn RuntimePort>;
        let bridge = Arc::new(RelayBridge::attach(
            page.clone(),
            tab_id,
            runtime,
            self.config.bridge(),
        ));
        self.tabs.register(Arc::clone(&bridge));
        let providers = install(&page, Arc::clone(&self.transport), self.config.provider());
        tracing::info!(%tab_id, origin, "tab opened");
        BrowserTab {
            tab_id,
            page,
            providers,
            bridge,
        }
    }

    pub fn close_tab(&self, tab_id: TabId) -> bool {
        self.tabs.unregister(tab_id)
    }

    /// Send a message as the extension's own UI.
    pub async fn ui(&self, message: CoreMessage) -> CoreResponse {
        self.core.dispatch(message, MessageSender::extension()).await
    }

    /// Simulate an extension reload: content scripts lose the core.
    pub fn invalidate_runtime(&self) {
        self.runtime.invalidate();
    }
}
