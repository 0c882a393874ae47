use std::fmt;
use std::str::FromStr;

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::domain::{TabId, TxRequest};
use crate::error::{ErrorCode, WalletError};

pub const MESSAGE_PREFIX: &str = "DEVNET_WALLET_";
pub const RESPONSE_SUFFIX: &str = "_RESPONSE";
pub const HANDSHAKE_TYPE: &str = "DEVNET_WALLET_HANDSHAKE";
pub const NETWORK_CHANGED_TYPE: &str = "DEVNET_WALLET_NETWORK_CHANGED";

/// Requests a page may relay to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    RequestAccounts,
    GetAccounts,
    GetWalletState,
    SendTransaction,
    SignTransaction,
    SwitchNetwork,
}

impl Verb {
    pub const ALL: [Verb; 6] = [
        Verb::RequestAccounts,
        Verb::GetAccounts,
        Verb::GetWalletState,
        Verb::SendTransaction,
        Verb::SignTransaction,
        Verb::SwitchNetwork,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Verb::RequestAccounts => "REQUEST_ACCOUNTS",
            Verb::GetAccounts => "GET_ACCOUNTS",
            Verb::GetWalletState => "GET_WALLET_STATE",
            Verb::SendTransaction => "SEND_TRANSACTION",
            Verb::SignTransaction => "SIGN_TRANSACTION",
            Verb::SwitchNetwork => "SWITCH_NETWORK",
        }
    }

    pub fn window_type(self) -> String {
        format!("{MESSAGE_PREFIX}{}", self.as_str())
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Verb::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or(WalletError::UnknownMessageType)
    }
}

/// A message observed on the page's window bus.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowMessage {
    Handshake {
        token: Option<String>,
        acknowledged: bool,
    },
    Request {
        verb: String,
        id: Value,
        data: Value,
        token: Option<String>,
    },
    Response {
        verb: String,
        id: Value,
        response: Value,
        token: Option<String>,
    },
    NetworkChanged {
        network: Value,
        token: Option<String>,
    },
}

impl WindowMessage {
    /// Returns `None` for anything that is not a wallet message.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let kind = obj.get("type")?.as_str()?;
        let token = obj.get("token").and_then(Value::as_str).map(str::to_owned);
        let field = |name: &str| obj.get(name).cloned().unwrap_or(Value::Null);

        if kind == HANDSHAKE_TYPE {
            return Some(WindowMessage::Handshake {
                token,
                acknowledged: obj
                    .get("acknowledged")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            });
        }
        if kind == NETWORK_CHANGED_TYPE {
            return Some(WindowMessage::NetworkChanged {
                network: field("network"),
                token,
            });
        }
        let verb = kind.strip_prefix(MESSAGE_PREFIX)?;
        if let Some(verb) = verb.strip_suffix(RESPONSE_SUFFIX) {
            return Some(WindowMessage::Response {
                verb: verb.to_owned(),
                id: field("id"),
                response: field("response"),
                token,
            });
        }
        Some(WindowMessage::Request {
            verb: verb.to_owned(),
            id: field("id"),
            data: field("data"),
            token,
        })
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            WindowMessage::Handshake { token, .. }
            | WindowMessage::Request { token, .. }
            | WindowMessage::Response { token, .. }
            | WindowMessage::NetworkChanged { token, .. } => token.as_deref(),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        match self {
            WindowMessage::Handshake {
                token,
                acknowledged,
            } => {
                obj.insert("type".into(), json!(HANDSHAKE_TYPE));
                if *acknowledged {
                    obj.insert("acknowledged".into(), json!(true));
                }
                if let Some(token) = token {
                    obj.insert("token".into(), json!(token));
                }
            }
            WindowMessage::Request {
                verb,
                id,
                data,
                token,
            } => {
                obj.insert("type".into(), json!(format!("{MESSAGE_PREFIX}{verb}")));
                obj.insert("id".into(), id.clone());
                if !data.is_null() {
                    obj.insert("data".into(), data.clone());
                }
                if let Some(token) = token {
                    obj.insert("token".into(), json!(token));
                }
            }
            WindowMessage::Response {
                verb,
                id,
                response,
                token,
            } => {
                obj.insert(
                    "type".into(),
                    json!(format!("{MESSAGE_PREFIX}{verb}{RESPONSE_SUFFIX}")),
                );
                obj.insert("id".into(), id.clone());
                obj.insert("response".into(), response.clone());
                if let Some(token) = token {
                    obj.insert("token".into(), json!(token));
                }
            }
            WindowMessage::NetworkChanged { network, token } => {
                obj.insert("type".into(), json!(NETWORK_CHANGED_TYPE));
                obj.insert("network".into(), network.clone());
                if let Some(token) = token {
                    obj.insert("token".into(), json!(token));
                }
            }
        }
        Value::Object(obj)
    }
}

/// Messages understood by the extension core. The first six arrive from
/// pages through a relay bridge, the rest from the approval UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum CoreMessage {
    GetWalletState,
    GetAccounts,
    RequestAccounts {
        #[serde(default)]
        data: Value,
    },
    SendTransaction {
        #[serde(default)]
        data: Value,
    },
    SignTransaction {
        #[serde(default)]
        data: Value,
    },
    SwitchNetwork {
        #[serde(default)]
        data: Value,
    },
    ApproveConnection {
        tab_id: TabId,
        #[serde(default)]
        accounts: Vec<String>,
    },
    RejectConnection {
        tab_id: TabId,
    },
    ApproveTransaction {
        tab_id: TabId,
        #[serde(default)]
        transaction: Option<TxRequest>,
    },
    RejectTransaction {
        tab_id: TabId,
    },
    ApproveSignature {
        tab_id: TabId,
    },
    RejectSignature {
        tab_id: TabId,
    },
}

impl CoreMessage {
    pub fn from_verb(verb: Verb, data: Value) -> Self {
        match verb {
            Verb::GetWalletState => CoreMessage::GetWalletState,
            Verb::GetAccounts => CoreMessage::GetAccounts,
            Verb::RequestAccounts => CoreMessage::RequestAccounts { data },
            Verb::SendTransaction => CoreMessage::SendTransaction { data },
            Verb::SignTransaction => CoreMessage::SignTransaction { data },
            Verb::SwitchNetwork => CoreMessage::SwitchNetwork { data },
        }
    }

    pub fn is_ui_decision(&self) -> bool {
        matches!(
            self,
            CoreMessage::ApproveConnection { .. }
                | CoreMessage::RejectConnection { .. }
                | CoreMessage::ApproveTransaction { .. }
                | CoreMessage::RejectTransaction { .. }
                | CoreMessage::ApproveSignature { .. }
                | CoreMessage::RejectSignature { .. }
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accounts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

impl CoreResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn with_accounts(mut self, accounts: Vec<String>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_hash(mut self, hash: B256, pending: bool) -> Self {
        self.hash = Some(hash);
        self.pending = pending.then_some(true);
        self
    }

    pub fn with_signature(mut self, signature: Value) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn failure(err: &WalletError) -> Self {
        Self {
            success: false,
            error: Some(err.public_message()),
            code: Some(err.code()),
            ..Self::default()
        }
    }

    pub fn into_result(self) -> Result<Self, WalletError> {
        if self.success {
            Ok(self)
        } else {
            Err(WalletError::from_response(self.code, self.error))
        }
    }
}

/// Notifications the core pushes to every tab's bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoreEvent {
    NetworkChanged { network: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSender {
    pub tab_id: Option<TabId>,
    pub origin: String,
}

impl MessageSender {
    pub fn tab(tab_id: TabId, origin: impl Into<String>) -> Self {
        Self {
            tab_id: Some(tab_id),
            origin: origin.into(),
        }
    }

    pub fn extension() -> Self {
        Self {
            tab_id: None,
            origin: "extension".to_owned(),
        }
    }
}
