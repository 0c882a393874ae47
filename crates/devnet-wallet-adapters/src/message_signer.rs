use alloy::primitives::hex;
use alloy::signers::SignerSync;
use async_trait::async_trait;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use serde_json::{json, Value};

use devnet_wallet_core::{MessageSigner, PortError, SessionRecord, SignRequest};

use crate::evm::parse_signer;

/// Signs approved message and Solana transaction requests with the keys of
/// the unlocked session.
#[derive(Debug, Clone, Default)]
pub struct LocalMessageSigner;

/// `personal_sign` payloads are hex when they decode as hex, else UTF-8 text.
pub fn personal_message_bytes(data: &str) -> Vec<u8> {
    if data.starts_with("0x") {
        if let Ok(bytes) = hex::decode(data) {
            return bytes;
        }
    }
    data.as_bytes().to_vec()
}

pub fn solana_key(session: &SessionRecord) -> Result<SigningKey, PortError> {
    let secret = session
        .solana_secret_key
        .as_deref()
        .ok_or_else(|| PortError::NotFound("session has no Solana key".to_owned()))?;
    match secret.len() {
        64 => {
            let mut pair = [0u8; 64];
            pair.copy_from_slice(secret);
            SigningKey::from_keypair_bytes(&pair)
                .map_err(|e| PortError::Validation(format!("invalid Solana keypair: {e}")))
        }
        32 => {
            let mut seed = [0u8; 32];
            seed.copy_from_slice(secret);
            Ok(SigningKey::from_bytes(&seed))
        }
        n => Err(PortError::Validation(format!(
            "Solana secret key has {n} bytes, expected 32 or 64"
        ))),
    }
}

/// Serialized message bytes of a page-supplied transaction: a byte array, a
/// base64 string, or an object carrying either under `message`.
fn transaction_message(transaction: &Value) -> Result<Vec<u8>, PortError> {
    match transaction {
        Value::Array(_) => serde_json::from_value(transaction.clone())
            .map_err(|e| PortError::Validation(format!("transaction bytes malformed: {e}"))),
        Value::String(encoded) => base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| PortError::Validation(format!("transaction base64 malformed: {e}"))),
        Value::Object(map) => match map.get("message") {
            Some(message) => transaction_message(message),
            None => Err(PortError::Validation(
                "transaction object has no message".to_owned(),
            )),
        },
        _ => Err(PortError::Validation("unsupported transaction encoding".to_owned())),
    }
}

/// Wire form with a single signature: count, signature, message.
fn sign_transaction(key: &SigningKey, transaction: &Value) -> Result<Value, PortError> {
    let message = transaction_message(transaction)?;
    let signature = key.sign(&message).to_bytes();
    let mut signed = Vec::with_capacity(1 + signature.len() + message.len());
    signed.push(1u8);
    signed.extend_from_slice(&signature);
    signed.extend_from_slice(&message);
    Ok(json!({
        "signedTransaction": signed,
        "signature": bs58::encode(signature).into_string(),
    }))
}

#[async_trait]
impl MessageSigner for LocalMessageSigner {
    async fn sign(
        &self,
        request: &SignRequest,
        session: &SessionRecord,
    ) -> Result<Value, PortError> {
        match request {
            SignRequest::Evm { data } => {
                let signer = parse_signer(&session.evm_private_key)?;
                let signature = signer
                    .sign_message_sync(&personal_message_bytes(data))
                    .map_err(|e| PortError::Validation(format!("message signing failed: {e}")))?;
                Ok(json!(hex::encode_prefixed(signature.as_bytes())))
            }
            SignRequest::Message { message } => {
                let key = solana_key(session)?;
                Ok(json!(key.sign(message).to_bytes().to_vec()))
            }
            SignRequest::Transaction { transaction } => {
                sign_transaction(&solana_key(session)?, transaction)
            }
            SignRequest::Transactions { transactions } => {
                let key = solana_key(session)?;
                let signed = transactions
                    .iter()
                    .map(|tx| {
                        sign_transaction(&key, tx)
                            .map(|v| v.get("signedTransaction").cloned().unwrap_or(Value::Null))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(json!({ "signedTransactions": signed }))
            }
        }
    }
}
