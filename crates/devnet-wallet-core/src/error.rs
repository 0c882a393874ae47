use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ports::PortError;

pub const CONTEXT_INVALIDATED_MESSAGE: &str =
    "Extension was updated. Please refresh this page to reconnect your wallet.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidParameters,
    MethodNotSupported,
    RequestTimeout,
    AllEndpointsFailed,
    WalletLocked,
    UserRejected,
    ExtensionContextInvalidated,
    SignerTimeout,
    TransactionReverted,
    Superseded,
    UnknownMessageType,
    UnsupportedNetwork,
    Internal,
}

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("method {0} is not supported")]
    MethodNotSupported(String),
    #[error("request timed out")]
    RequestTimeout,
    #[error("all RPC endpoints failed: {0}")]
    AllEndpointsFailed(String),
    #[error("wallet is locked")]
    WalletLocked,
    #[error("user rejected the request")]
    UserRejected,
    #[error("{CONTEXT_INVALIDATED_MESSAGE}")]
    ExtensionContextInvalidated,
    #[error("signer did not report a result in time")]
    SignerTimeout,
    #[error("{0}")]
    TransactionReverted(String),
    #[error("request was superseded by a newer one from the same tab")]
    Superseded,
    #[error("unknown message type")]
    UnknownMessageType,
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),
    #[error("{message}")]
    Remote { code: ErrorCode, message: String },
    #[error(transparent)]
    Port(#[from] PortError),
}

impl WalletError {
    pub fn code(&self) -> ErrorCode {
        match self {
            WalletError::InvalidParameters(_) => ErrorCode::InvalidParameters,
            WalletError::MethodNotSupported(_) => ErrorCode::MethodNotSupported,
            WalletError::RequestTimeout => ErrorCode::RequestTimeout,
            WalletError::AllEndpointsFailed(_) => ErrorCode::AllEndpointsFailed,
            WalletError::WalletLocked => ErrorCode::WalletLocked,
            WalletError::UserRejected => ErrorCode::UserRejected,
            WalletError::ExtensionContextInvalidated => ErrorCode::ExtensionContextInvalidated,
            WalletError::SignerTimeout => ErrorCode::SignerTimeout,
            WalletError::TransactionReverted(_) => ErrorCode::TransactionReverted,
            WalletError::Superseded => ErrorCode::Superseded,
            WalletError::UnknownMessageType => ErrorCode::UnknownMessageType,
            WalletError::UnsupportedNetwork(_) => ErrorCode::UnsupportedNetwork,
            WalletError::Remote { code, .. } => *code,
            WalletError::Port(_) => ErrorCode::Internal,
        }
    }

    /// Text that may cross into the page. Port failures carry host detail
    /// (URLs, response bodies) and are reduced to a fixed string.
    pub fn public_message(&self) -> String {
        match self {
            WalletError::Port(_) => "internal wallet error".to_owned(),
            other => other.to_string(),
        }
    }

    /// Rebuild an error from a response that crossed a context boundary.
    pub fn from_response(code: Option<ErrorCode>, message: Option<String>) -> Self {
        let message = message.unwrap_or_else(|| "request failed".to_owned());
        match code {
            Some(ErrorCode::WalletLocked) => WalletError::WalletLocked,
            Some(ErrorCode::UserRejected) => WalletError::UserRejected,
            Some(ErrorCode::RequestTimeout) => WalletError::RequestTimeout,
            Some(ErrorCode::ExtensionContextInvalidated) => WalletError::ExtensionContextInvalidated,
            Some(ErrorCode::SignerTimeout) => WalletError::SignerTimeout,
            Some(ErrorCode::Superseded) => WalletError::Superseded,
            Some(ErrorCode::UnknownMessageType) => WalletError::UnknownMessageType,
            Some(ErrorCode::TransactionReverted) => WalletError::TransactionReverted(message),
            Some(code) => WalletError::Remote { code, message },
            None => WalletError::Remote {
                code: ErrorCode::Internal,
                message,
            },
        }
    }
}
