//! In-process model of a page: its global scope, the same-window message bus
//! and the DOM-style event target.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::ports::PortError;
use crate::provider::solana::SolanaProvider;
use crate::provider::PageProvider;

const BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSource {
    SameWindow,
    Frame,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostedMessage {
    pub source: MessageSource,
    pub data: Value,
}

/// `window.postMessage` for one page. Every subscriber sees every message,
/// including its own.
#[derive(Debug, Clone)]
pub struct WindowBus {
    tx: broadcast::Sender<PostedMessage>,
}

impl Default for WindowBus {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }
}

impl WindowBus {
    pub fn subscribe(&self) -> broadcast::Receiver<PostedMessage> {
        self.tx.subscribe()
    }

    pub fn post(&self, data: Value) {
        self.send(MessageSource::SameWindow, data);
    }

    pub fn post_from_frame(&self, data: Value) {
        self.send(MessageSource::Frame, data);
    }

    fn send(&self, source: MessageSource, data: Value) {
        // No receivers is not an error for a fire-and-forget post.
        let _ = self.tx.send(PostedMessage { source, data });
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFlags {
    pub is_devnet_wallet: bool,
    pub is_testnet_wallet: bool,
    pub is_meta_mask: bool,
    pub is_phantom: bool,
    pub is_brave_wallet: bool,
    pub is_coinbase_wallet: bool,
    pub is_rabby: bool,
}

impl ProviderFlags {
    pub const DEVNET: ProviderFlags = ProviderFlags {
        is_devnet_wallet: true,
        is_testnet_wallet: true,
        is_meta_mask: true,
        is_phantom: false,
        is_brave_wallet: false,
        is_coinbase_wallet: false,
        is_rabby: false,
    };
}

/// A provider some other extension placed on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignProvider {
    pub name: String,
    pub flags: ProviderFlags,
}

#[derive(Clone)]
pub enum GlobalValue {
    Evm(PageProvider),
    Solana(SolanaProvider),
    Foreign(Arc<ForeignProvider>),
}

impl GlobalValue {
    /// Identity comparison, like `===` on two object references.
    pub fn same(&self, other: &GlobalValue) -> bool {
        match (self, other) {
            (GlobalValue::Evm(a), GlobalValue::Evm(b)) => a.ptr_eq(b),
            (GlobalValue::Solana(a), GlobalValue::Solana(b)) => a.ptr_eq(b),
            (GlobalValue::Foreign(a), GlobalValue::Foreign(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn flags(&self) -> ProviderFlags {
        match self {
            GlobalValue::Evm(_) => ProviderFlags::DEVNET,
            GlobalValue::Solana(_) => ProviderFlags {
                is_meta_mask: false,
                ..ProviderFlags::DEVNET
            },
            GlobalValue::Foreign(p) => p.flags,
        }
    }

    pub fn as_evm(&self) -> Option<&PageProvider> {
        match self {
            GlobalValue::Evm(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_solana(&self) -> Option<&SolanaProvider> {
        match self {
            GlobalValue::Solana(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Debug for GlobalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlobalValue::Evm(_) => f.write_str("GlobalValue::Evm"),
            GlobalValue::Solana(_) => f.write_str("GlobalValue::Solana"),
            GlobalValue::Foreign(p) => write!(f, "GlobalValue::Foreign({})", p.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    Writable,
    Locked,
}

#[derive(Debug, Clone)]
struct Slot {
    value: GlobalValue,
    locked: bool,
}

/// The page's `window` object, reduced to named provider slots.
#[derive(Debug, Clone, Default)]
pub struct GlobalScope {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl GlobalScope {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Slot>>, PortError> {
        self.slots
            .lock()
            .map_err(|e| PortError::Transport(format!("global scope lock poisoned: {e}")))
    }

    pub fn get(&self, name: &str) -> Option<GlobalValue> {
        self.lock().ok()?.get(name).map(|s| s.value.clone())
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.lock()
            .map(|g| g.get(name).is_some_and(|s| s.locked))
            .unwrap_or(false)
    }

    pub fn define(
        &self,
        name: &str,
        value: GlobalValue,
        mutability: Mutability,
    ) -> Result<(), PortError> {
        let mut g = self.lock()?;
        if g.get(name).is_some_and(|s| s.locked) {
            return Err(PortError::Conflict(format!("window.{name} is not configurable")));
        }
        g.insert(
            name.to_owned(),
            Slot {
                value,
                locked: mutability == Mutability::Locked,
            },
        );
        Ok(())
    }

    pub fn assign(&self, name: &str, value: GlobalValue) -> Result<(), PortError> {
        self.define(name, value, Mutability::Writable)
    }

    pub fn delete(&self, name: &str) -> Result<bool, PortError> {
        let mut g = self.lock()?;
        if g.get(name).is_some_and(|s| s.locked) {
            return Err(PortError::Conflict(format!("window.{name} is not configurable")));
        }
        Ok(g.remove(name).is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    pub uuid: String,
    pub name: String,
    pub icon: String,
    pub rdns: String,
}

#[derive(Clone)]
pub enum PageEvent {
    Initialized(String),
    AnnounceProvider {
        info: ProviderInfo,
        provider: PageProvider,
    },
    RequestProvider,
}

impl fmt::Debug for PageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageEvent::Initialized(name) => write!(f, "Initialized({name})"),
            PageEvent::AnnounceProvider { info, .. } => write!(f, "AnnounceProvider({})", info.rdns),
            PageEvent::RequestProvider => f.write_str("RequestProvider"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PageEvents {
    tx: broadcast::Sender<PageEvent>,
}

impl Default for PageEvents {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }
}

impl PageEvents {
    pub fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.tx.subscribe()
    }

    pub fn dispatch(&self, event: PageEvent) {
        let _ = self.tx.send(event);
    }
}

/// Everything scripts running in one page share.
#[derive(Debug, Clone)]
pub struct Page {
    pub origin: String,
    pub globals: GlobalScope,
    pub bus: WindowBus,
    pub events: PageEvents,
}

impl Page {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            globals: GlobalScope::default(),
            bus: WindowBus::default(),
            events: PageEvents::default(),
        }
    }
}
