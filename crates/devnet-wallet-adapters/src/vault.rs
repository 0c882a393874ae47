use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use alloy::primitives::hex;
use alloy::signers::local::PrivateKeySigner;
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::SigningKey;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;

use devnet_wallet_core::ports::{load_json, store_json};
use devnet_wallet_core::{keys, ClockPort, PortError, SessionRecord, StoragePort, TimestampMs, WalletState};

type HmacSha256 = Hmac<Sha256>;

const PBKDF2_ROUNDS: u32 = 600_000;
const BLOB_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KdfAlgorithm {
    Argon2idV1,
    Pbkdf2HmacSha256V1,
}

/// Argon2id cost parameters, recorded in the blob so unlock repeats them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfCost {
    pub memory_kib: u32,
    pub iterations: u32,
}

impl Default for KdfCost {
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
        }
    }
}

#[derive(Clone)]
struct DerivedKeys {
    algorithm: KdfAlgorithm,
    enc_key: [u8; 32],
    mac_key: [u8; 32],
}

/// What the vault protects. Never persisted in the clear.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSecrets {
    pub evm_private_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solana_secret_key: Option<Vec<u8>>,
}

impl std::fmt::Debug for WalletSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSecrets").finish_non_exhaustive()
    }
}

impl WalletSecrets {
    /// Fresh EVM and Solana keys from the OS RNG.
    pub fn generate() -> Result<Self, PortError> {
        let evm = random_bytes::<32>()?;
        let signer = PrivateKeySigner::from_slice(&evm)
            .map_err(|e| PortError::Validation(format!("generated key rejected: {e}")))?;
        let solana = SigningKey::from_bytes(&random_bytes::<32>()?);
        Ok(Self {
            evm_private_key: hex::encode_prefixed(signer.to_bytes()),
            solana_secret_key: Some(solana.to_keypair_bytes().to_vec()),
        })
    }

    pub fn public_state(&self) -> Result<WalletState, PortError> {
        let signer = crate::evm::parse_signer(&self.evm_private_key)?;
        let solana_public_key = match &self.solana_secret_key {
            None => None,
            Some(_) => {
                let session = self.session(TimestampMs(0));
                let key = crate::message_signer::solana_key(&session)?;
                Some(bs58::encode(key.verifying_key().to_bytes()).into_string())
            }
        };
        Ok(WalletState {
            evm_address: Some(signer.address().to_string()),
            solana_public_key,
        })
    }

    fn session(&self, unlocked_at: TimestampMs) -> SessionRecord {
        SessionRecord {
            evm_private_key: self.evm_private_key.clone(),
            solana_secret_key: self.solana_secret_key.clone(),
            unlocked_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultBlob {
    pub version: u8,
    pub kdf: KdfAlgorithm,
    pub cost: KdfCost,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
    pub mac: String,
}

fn random_bytes<const N: usize>() -> Result<[u8; N], PortError> {
    let mut out = [0u8; N];
    getrandom::getrandom(&mut out)
        .map_err(|e| PortError::Transport(format!("random generation failed: {e}")))?;
    Ok(out)
}

fn decode_field<const N: usize>(name: &str, encoded: &str) -> Result<[u8; N], PortError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| PortError::Validation(format!("vault {name} is not base64: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| PortError::Validation(format!("vault {name} has the wrong length")))
}

fn derive_root_key(
    passphrase: &[u8],
    salt: &[u8; 16],
    cost: KdfCost,
    preferred: KdfAlgorithm,
) -> ([u8; 32], KdfAlgorithm) {
    let mut root = [0u8; 32];
    if preferred == KdfAlgorithm::Argon2idV1 {
        if let Ok(params) = Params::new(cost.memory_kib, cost.iterations, 1, Some(32)) {
            let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
            if argon.hash_password_into(passphrase, salt, &mut root).is_ok() {
                return (root, KdfAlgorithm::Argon2idV1);
            }
        }
        tracing::warn!("argon2id unavailable, deriving vault key with pbkdf2");
    }
    pbkdf2_hmac::<Sha256>(passphrase, salt, PBKDF2_ROUNDS, &mut root);
    (root, KdfAlgorithm::Pbkdf2HmacSha256V1)
}

fn derive_keys(
    passphrase: &[u8],
    salt: &[u8; 16],
    cost: KdfCost,
    preferred: KdfAlgorithm,
) -> Result<DerivedKeys, PortError> {
    let (root, algorithm) = derive_root_key(passphrase, salt, cost, preferred);
    let hk = Hkdf::<Sha256>::new(None, &root);
    let mut enc_key = [0u8; 32];
    let mut mac_key = [0u8; 32];
    hk.expand(b"enc_key_v1", &mut enc_key)
        .map_err(|_| PortError::Validation("hkdf expand for enc_key_v1 failed".to_owned()))?;
    hk.expand(b"mac_key_v1", &mut mac_key)
        .map_err(|_| PortError::Validation("hkdf expand for mac_key_v1 failed".to_owned()))?;
    Ok(DerivedKeys {
        algorithm,
        enc_key,
        mac_key,
    })
}

/// Bytes covered by the MAC: every blob field except the MAC itself.
fn mac_payload(blob: &VaultBlob) -> Result<Vec<u8>, PortError> {
    serde_json::to_vec(&json!({
        "ciphertext": blob.ciphertext,
        "cost": blob.cost,
        "kdf": blob.kdf,
        "nonce": blob.nonce,
        "salt": blob.salt,
        "version": blob.version,
    }))
    .map_err(|e| PortError::Validation(format!("mac payload serialization failed: {e}")))
}

fn mac_for(mac_key: &[u8; 32]) -> Result<HmacSha256, PortError> {
    <HmacSha256 as Mac>::new_from_slice(mac_key)
        .map_err(|e| PortError::Validation(format!("hmac init failed: {e}")))
}

pub fn seal(secrets: &WalletSecrets, password: &str, cost: KdfCost) -> Result<VaultBlob, PortError> {
    let salt = random_bytes::<16>()?;
    let nonce = random_bytes::<12>()?;
    let derived = derive_keys(password.as_bytes(), &salt, cost, KdfAlgorithm::Argon2idV1)?;
    let plaintext = serde_json::to_vec(secrets)
        .map_err(|e| PortError::Validation(format!("secret serialization failed: {e}")))?;
    let cipher = Aes256Gcm::new_from_slice(&derived.enc_key)
        .map_err(|e| PortError::Validation(format!("aes-gcm init failed: {e}")))?;
    let ciphertext = cipher
        .encrypt(&Nonce::<aes_gcm::aead::consts::U12>::from(nonce), plaintext.as_slice())
        .map_err(|e| PortError::Transport(format!("aes-gcm encrypt failed: {e}")))?;

    let mut blob = VaultBlob {
        version: BLOB_VERSION,
        kdf: derived.algorithm,
        cost,
        salt: BASE64.encode(salt),
        nonce: BASE64.encode(nonce),
        ciphertext: BASE64.encode(ciphertext),
        mac: String::new(),
    };
    let mut mac = mac_for(&derived.mac_key)?;
    mac.update(&mac_payload(&blob)?);
    blob.mac = BASE64.encode(mac.finalize().into_bytes());
    Ok(blob)
}

/// A wrong password fails the MAC check before any decryption is attempted.
pub fn open(blob: &VaultBlob, password: &str) -> Result<WalletSecrets, PortError> {
    if blob.version != BLOB_VERSION {
        return Err(PortError::Validation(format!(
            "unsupported vault version {}",
            blob.version
        )));
    }
    let salt = decode_field::<16>("salt", &blob.salt)?;
    let nonce = decode_field::<12>("nonce", &blob.nonce)?;
    let expected = BASE64
        .decode(&blob.mac)
        .map_err(|e| PortError::Validation(format!("vault mac is not base64: {e}")))?;
    let derived = derive_keys(password.as_bytes(), &salt, blob.cost, blob.kdf)?;

    let mut mac = mac_for(&derived.mac_key)?;
    mac.update(&mac_payload(blob)?);
    mac.verify_slice(&expected)
        .map_err(|_| PortError::Validation("incorrect password".to_owned()))?;

    let ciphertext = BASE64
        .decode(&blob.ciphertext)
        .map_err(|e| PortError::Validation(format!("vault ciphertext is not base64: {e}")))?;
    let cipher = Aes256Gcm::new_from_slice(&derived.enc_key)
        .map_err(|e| PortError::Validation(format!("aes-gcm init failed: {e}")))?;
    let plaintext = cipher
        .decrypt(&Nonce::<aes_gcm::aead::consts::U12>::from(nonce), ciphertext.as_slice())
        .map_err(|e| PortError::Validation(format!("aes-gcm decrypt failed: {e}")))?;
    serde_json::from_slice(&plaintext)
        .map_err(|e| PortError::Validation(format!("vault contents malformed: {e}")))
}

/// Password-protected wallet storage. Unlocking publishes the session record
/// the extension core signs with; locking removes it.
pub struct Vault<S: ?Sized, C: ?Sized> {
    storage: Arc<S>,
    clock: Arc<C>,
    cost: KdfCost,
}

impl<S, C> Vault<S, C>
where
    S: StoragePort + ?Sized,
    C: ClockPort + ?Sized,
{
    pub fn new(storage: Arc<S>, clock: Arc<C>) -> Self {
        Self {
            storage,
            clock,
            cost: KdfCost::default(),
        }
    }

    pub fn with_kdf_cost(mut self, cost: KdfCost) -> Self {
        self.cost = cost;
        self
    }

    pub async fn is_initialized(&self) -> Result<bool, PortError> {
        let flag: Option<bool> = load_json(&*self.storage, keys::ENCRYPTED_FLAG).await?;
        Ok(flag.unwrap_or(false) && self.storage.get(keys::ENCRYPTED_WALLET).await?.is_some())
    }

    /// Encrypt and persist `secrets`, replacing any existing wallet. The
    /// vault stays locked.
    pub async fn create(&self, secrets: &WalletSecrets, password: &str) -> Result<WalletState, PortError> {
        if password.is_empty() {
            return Err(PortError::Validation("password must not be empty".to_owned()));
        }
        let state = secrets.public_state()?;
        let blob = seal(secrets, password, self.cost)?;
        store_json(&*self.storage, keys::ENCRYPTED_WALLET, &blob).await?;
        self.storage.set(keys::ENCRYPTED_FLAG, Value::Bool(true)).await?;
        store_json(&*self.storage, keys::WALLET_STATE, &state).await?;
        self.storage.remove(keys::SESSION).await?;
        tracing::info!(address = ?state.evm_address, kdf = ?blob.kdf, "wallet vault created");
        Ok(state)
    }

    pub async fn unlock(&self, password: &str) -> Result<WalletState, PortError> {
        let blob: VaultBlob = load_json(&*self.storage, keys::ENCRYPTED_WALLET)
            .await?
            .ok_or_else(|| PortError::NotFound("no wallet vault".to_owned()))?;
        let secrets = open(&blob, password)?;
        let state = secrets.public_state()?;
        let session = secrets.session(TimestampMs(self.clock.now_ms()?));
        store_json(&*self.storage, keys::SESSION, &session).await?;
        store_json(&*self.storage, keys::WALLET_STATE, &state).await?;
        tracing::info!(address = ?state.evm_address, "wallet unlocked");
        Ok(state)
    }

    pub async fn lock(&self) -> Result<(), PortError> {
        self.storage.remove(keys::SESSION).await?;
        tracing::info!("wallet locked");
        Ok(())
    }
}
