use std::sync::{Arc, Mutex, Weak};

use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

use crate::config::BridgeConfig;
use crate::domain::TabId;
use crate::error::WalletError;
use crate::messages::{CoreEvent, CoreMessage, CoreResponse, MessageSender, Verb, WindowMessage};
use crate::page::{GlobalScope, MessageSource, Page, PostedMessage};
use crate::ports::{PortError, RuntimePort};
use crate::provider::install::ETHEREUM_SLOT;
use crate::task::AbortOnDrop;
use crate::token::MAX_TOKEN_LEN;

struct BridgeState {
    page: Page,
    tab_id: TabId,
    runtime: Arc<dyn RuntimePort>,
    trusted_token: Mutex<Option<String>>,
}

/// Content-script half of the relay. Authenticates page messages by token and
/// forwards them to the extension core over the runtime channel.
pub struct RelayBridge {
    state: Arc<BridgeState>,
    _listener: AbortOnDrop,
    _guard: AbortOnDrop,
}

impl std::fmt::Debug for RelayBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayBridge")
            .field("tab_id", &self.state.tab_id)
            .field("handshake", &self.has_token())
            .finish_non_exhaustive()
    }
}

impl RelayBridge {
    /// Must be called inside a tokio runtime.
    pub fn attach(
        page: Page,
        tab_id: TabId,
        runtime: Arc<dyn RuntimePort>,
        config: BridgeConfig,
    ) -> Self {
        let rx = page.bus.subscribe();
        let globals = page.globals.clone();
        let state = Arc::new(BridgeState {
            page,
            tab_id,
            runtime,
            trusted_token: Mutex::new(None),
        });
        let listener = AbortOnDrop::new(tokio::spawn(listen(rx, Arc::downgrade(&state))));
        let guard = AbortOnDrop::new(tokio::spawn(guard_provider_slot(globals, config)));
        tracing::debug!(%tab_id, "relay bridge attached");
        Self {
            state,
            _listener: listener,
            _guard: guard,
        }
    }

    pub fn tab_id(&self) -> TabId {
        self.state.tab_id
    }

    pub fn has_token(&self) -> bool {
        self.state.token().is_some()
    }

    /// Relay a core notification into the page. Dropped until a handshake
    /// has established the token.
    pub fn deliver_event(&self, event: CoreEvent) -> bool {
        let Some(token) = self.state.token() else {
            tracing::debug!(tab_id = %self.state.tab_id, "event before handshake dropped");
            return false;
        };
        match event {
            CoreEvent::NetworkChanged { network } => {
                self.state.page.bus.post(
                    WindowMessage::NetworkChanged {
                        network: json!(network),
                        token: Some(token),
                    }
                    .to_value(),
                );
            }
        }
        true
    }
}

async fn listen(mut rx: Receiver<PostedMessage>, state: Weak<BridgeState>) {
    loop {
        let posted = match rx.recv().await {
            Ok(posted) => posted,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "relay bridge lagged behind the window bus");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let Some(strong) = state.upgrade() else {
            break;
        };
        if posted.source != MessageSource::SameWindow {
            continue;
        }
        if let Some(message) = WindowMessage::from_value(&posted.data) {
            strong.on_message(message);
        }
    }
}

impl BridgeState {
    fn token(&self) -> Option<String> {
        self.trusted_token.lock().ok().and_then(|t| t.clone())
    }

    fn on_message(self: &Arc<Self>, message: WindowMessage) {
        match message {
            WindowMessage::Handshake {
                token: Some(token),
                acknowledged: false,
            } => self.on_handshake(token),
            WindowMessage::Request {
                verb, id, data, token,
            } => {
                let trusted = self.token();
                if trusted.is_none() || trusted != token {
                    tracing::debug!(%verb, "untrusted request ignored");
                    return;
                }
                let state = Arc::clone(self);
                tokio::spawn(async move { state.serve(verb, id, data).await });
            }
            _ => {}
        }
    }

    fn on_handshake(&self, token: String) {
        if token.len() > MAX_TOKEN_LEN {
            tracing::warn!(len = token.len(), "oversized handshake token rejected");
            return;
        }
        {
            let Ok(mut trusted) = self.trusted_token.lock() else {
                return;
            };
            match trusted.as_deref() {
                None => *trusted = Some(token.clone()),
                Some(existing) if existing == token => {}
                Some(_) => {
                    tracing::warn!(tab_id = %self.tab_id, "second handshake token ignored");
                    return;
                }
            }
        }
        self.page.bus.post(
            WindowMessage::Handshake {
                token: Some(token),
                acknowledged: true,
            }
            .to_value(),
        );
    }

    async fn serve(&self, verb: String, id: Value, data: Value) {
        let response = self.forward(&verb, data).await;
        let Some(token) = self.token() else {
            return;
        };
        let response = serde_json::to_value(&response).unwrap_or_else(|e| {
            json!({ "success": false, "error": format!("response encoding failed: {e}") })
        });
        self.page.bus.post(
            WindowMessage::Response {
                verb,
                id,
                response,
                token: Some(token),
            }
            .to_value(),
        );
    }

    async fn forward(&self, verb: &str, data: Value) -> CoreResponse {
        if !self.runtime.is_alive() {
            return CoreResponse::failure(&WalletError::ExtensionContextInvalidated);
        }
        let verb: Verb = match verb.parse() {
            Ok(verb) => verb,
            Err(e) => return CoreResponse::failure(&e),
        };
        let sender = MessageSender::tab(self.tab_id, self.page.origin.clone());
        tracing::debug!(tab_id = %self.tab_id, %verb, "forwarding to core");
        match self
            .runtime
            .send(CoreMessage::from_verb(verb, data), sender)
            .await
        {
            Ok(response) => response,
            Err(PortError::Disconnected(reason)) => {
                tracing::warn!(%reason, "runtime channel gone");
                CoreResponse::failure(&WalletError::ExtensionContextInvalidated)
            }
            Err(e) => {
                tracing::warn!(error = %e, "runtime send failed");
                CoreResponse::failure(&WalletError::Port(e))
            }
        }
    }
}

/// Reassert our provider in `window.ethereum` for a short window after
/// injection. Best effort: a locked or foreign-locked slot is left alone.
async fn guard_provider_slot(globals: GlobalScope, config: BridgeConfig) {
    tokio::time::sleep(config.capture_delay).await;
    let Some(captured) = globals
        .get(ETHEREUM_SLOT)
        .filter(|v| v.as_evm().is_some())
    else {
        return;
    };
    let deadline = tokio::time::Instant::now() + config.guard_window;
    let mut ticker = tokio::time::interval(config.guard_interval);
    while tokio::time::Instant::now() < deadline {
        ticker.tick().await;
        let intact = globals
            .get(ETHEREUM_SLOT)
            .is_some_and(|current| current.same(&captured));
        if intact {
            continue;
        }
        match globals.assign(ETHEREUM_SLOT, captured.clone()) {
            Ok(()) => tracing::info!("restored wallet provider in window.ethereum"),
            Err(e) => tracing::debug!(error = %e, "provider slot could not be restored"),
        }
    }
}
