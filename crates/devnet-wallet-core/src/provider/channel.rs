use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;

use crate::error::{ErrorCode, WalletError};
use crate::messages::{CoreResponse, Verb, WindowMessage};
use crate::page::{MessageSource, PostedMessage, WindowBus};
use crate::ports::PortError;
use crate::provider::events::EventEmitter;
use crate::task::AbortOnDrop;
use crate::token::HandshakeToken;

struct PendingRequest {
    responder: oneshot::Sender<Value>,
    created_at: Instant,
}

struct RelayState {
    bus: WindowBus,
    token: HandshakeToken,
    acknowledged: AtomicBool,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    events: EventEmitter,
}

/// Page half of the relay: tags requests with the handshake token, correlates
/// `_RESPONSE` messages by id and turns network notices into `chainChanged`.
pub struct RelayClient {
    state: Arc<RelayState>,
    request_timeout: Duration,
    _listener: AbortOnDrop,
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("request_timeout", &self.request_timeout)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

/// Removes the pending entry however the request future ends.
struct PendingGuard<'a> {
    state: &'a RelayState,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.state.pending.lock() {
            pending.remove(&self.id);
        }
    }
}

impl RelayClient {
    /// Must be called inside a tokio runtime. Subscribes to the bus, then
    /// posts the handshake.
    pub fn connect(bus: WindowBus, events: EventEmitter, request_timeout: Duration) -> Self {
        let state = Arc::new(RelayState {
            bus: bus.clone(),
            token: HandshakeToken::generate(),
            acknowledged: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            events,
        });

        let rx = bus.subscribe();
        let listener = AbortOnDrop::new(tokio::spawn(listen(rx, Arc::downgrade(&state))));

        bus.post(
            WindowMessage::Handshake {
                token: Some(state.token.as_str().to_owned()),
                acknowledged: false,
            }
            .to_value(),
        );

        Self {
            state,
            request_timeout,
            _listener: listener,
        }
    }

    pub fn token(&self) -> &HandshakeToken {
        &self.state.token
    }

    pub fn is_acknowledged(&self) -> bool {
        self.state.acknowledged.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.state.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub async fn send(&self, verb: Verb, data: Value) -> Result<CoreResponse, WalletError> {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.state
            .pending
            .lock()
            .map_err(|e| PortError::Transport(format!("pending map lock poisoned: {e}")))?
            .insert(
                id,
                PendingRequest {
                    responder: tx,
                    created_at: Instant::now(),
                },
            );
        let _guard = PendingGuard {
            state: &*self.state,
            id,
        };

        if !self.is_acknowledged() {
            tracing::debug!(id, %verb, "handshake not yet acknowledged, sending anyway");
        }
        self.state.bus.post(
            WindowMessage::Request {
                verb: verb.as_str().to_owned(),
                id: json!(id),
                data,
                token: Some(self.state.token.as_str().to_owned()),
            }
            .to_value(),
        );

        let raw = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(_)) => {
                return Err(PortError::Disconnected("relay listener stopped".to_owned()).into())
            }
            Err(_) => {
                tracing::warn!(id, %verb, "request timed out");
                return Err(WalletError::RequestTimeout);
            }
        };
        let response: CoreResponse =
            serde_json::from_value(raw).map_err(|e| WalletError::Remote {
                code: ErrorCode::Internal,
                message: format!("malformed response: {e}"),
            })?;
        response.into_result()
    }
}

async fn listen(mut rx: tokio::sync::broadcast::Receiver<PostedMessage>, state: Weak<RelayState>) {
    loop {
        let posted = match rx.recv().await {
            Ok(posted) => posted,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "provider listener lagged behind the window bus");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let Some(strong) = state.upgrade() else {
            break;
        };
        strong.on_message(posted);
    }
}

impl RelayState {
    fn on_message(&self, posted: PostedMessage) {
        if posted.source != MessageSource::SameWindow {
            return;
        }
        let Some(message) = WindowMessage::from_value(&posted.data) else {
            return;
        };
        if !self.token.matches(message.token()) {
            if !matches!(message, WindowMessage::Handshake { .. }) {
                tracing::debug!("dropping window message without our token");
            }
            return;
        }
        match message {
            WindowMessage::Handshake { acknowledged, .. } => {
                if acknowledged && !self.acknowledged.swap(true, Ordering::AcqRel) {
                    tracing::info!("handshake acknowledged by relay bridge");
                }
            }
            WindowMessage::Response { id, response, .. } => {
                let Some(id) = id.as_u64() else {
                    return;
                };
                let entry = self.pending.lock().ok().and_then(|mut p| p.remove(&id));
                match entry {
                    Some(pending) => {
                        tracing::debug!(id, elapsed = ?pending.created_at.elapsed(), "response settled");
                        let _ = pending.responder.send(response);
                    }
                    None => tracing::debug!(id, "late or unknown response dropped"),
                }
            }
            WindowMessage::NetworkChanged { network, .. } => {
                self.events.emit("chainChanged", &network);
            }
            WindowMessage::Request { .. } => {}
        }
    }
}
