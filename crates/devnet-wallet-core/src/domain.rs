use std::fmt;

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampMs(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub i64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub u64);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletState {
    #[serde(default)]
    pub evm_address: Option<String>,
    #[serde(default)]
    pub solana_public_key: Option<String>,
}

impl WalletState {
    pub fn has_wallet(&self) -> bool {
        self.evm_address.as_deref().is_some_and(|a| !a.is_empty())
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub evm_private_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solana_secret_key: Option<Vec<u8>>,
    pub unlocked_at: TimestampMs,
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("evm_private_key", &"<redacted>")
            .field(
                "solana_secret_key",
                &self.solana_secret_key.as_ref().map(|_| "<redacted>"),
            )
            .field("unlocked_at", &self.unlocked_at)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(default, alias = "input", skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<U256>,
}

impl TxRequest {
    pub fn gas_limit(&self) -> Option<U256> {
        self.gas_limit.or(self.gas)
    }
}

/// Payload of a signature request. EVM callers send `{ data }` with the
/// `personal_sign` message, the Solana provider sends the other shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignRequest {
    Message { message: Vec<u8> },
    Transactions { transactions: Vec<Value> },
    Transaction { transaction: Value },
    Evm { data: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerHandoff {
    pub transaction: TxRequest,
    pub private_key: String,
    pub request_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

impl SignerResult {
    pub fn confirmed(hash: B256) -> Self {
        Self {
            success: true,
            hash: Some(hash),
            ..Self::default()
        }
    }

    pub fn pending(hash: B256) -> Self {
        Self {
            success: true,
            hash: Some(hash),
            pending: Some(true),
            ..Self::default()
        }
    }

    pub fn failed(hash: Option<B256>, code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            success: false,
            hash,
            pending: None,
            error: Some(error.into()),
            code: Some(code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptSummary {
    pub status: bool,
    pub block_number: u64,
    pub from: Address,
}

/// Window the core asks the host to open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Popup {
    ConnectionApproval {
        tab_id: TabId,
        origin: String,
    },
    TransactionApproval {
        tab_id: TabId,
        origin: String,
        transaction: TxRequest,
    },
    SignatureApproval {
        tab_id: TabId,
        origin: String,
        request: SignRequest,
        /// Sign and submit to the cluster rather than hand the signature back.
        #[serde(default)]
        broadcast: bool,
    },
    Signer {
        request_id: String,
    },
}

impl Popup {
    pub fn tab_id(&self) -> Option<TabId> {
        match self {
            Popup::ConnectionApproval { tab_id, .. }
            | Popup::TransactionApproval { tab_id, .. }
            | Popup::SignatureApproval { tab_id, .. } => Some(*tab_id),
            Popup::Signer { .. } => None,
        }
    }
}

pub mod keys {
    pub const WALLET_STATE: &str = "walletState";
    pub const SELECTED_NETWORK: &str = "selectedNetwork";
    pub const ENCRYPTED_WALLET: &str = "testnet_wallet_data";
    pub const ENCRYPTED_FLAG: &str = "encrypted";
    pub const SESSION: &str = "walletSession";

    pub fn signer_handoff(request_id: &str) -> String {
        format!("pendingSignerTransaction_{request_id}")
    }

    pub fn signer_result(request_id: &str) -> String {
        format!("signerResult_{request_id}")
    }
}
