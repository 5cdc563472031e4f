//! Password-based authenticated encryption of private keys.
//!
//! PBKDF2-HMAC-SHA256 stretches the password with a per-secret random salt,
//! the derived 256-bit key drives AES-256-GCM with a random 96-bit IV. The GCM
//! tag is the only password check there is: a wrong password and a corrupted
//! record fail in exactly the same way.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use zeroize::Zeroizing;

/// Record layout version. Version 1 pins the KDF parameters below.
pub const SCHEMA_VERSION: u32 = 1;

/// PBKDF2 rounds for schema version 1.
pub const KDF_ITERATIONS: u32 = 100_000;

const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Errors surfaced by the vault.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Wrong password, tampered ciphertext or malformed record.
    #[error("incorrect password")]
    Authentication,

    /// The cipher refused to encrypt (never expected with valid parameters).
    #[error("encryption failed")]
    Encryption,
}

/// An encrypted private key as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedKeyData {
    /// Hex encoded ciphertext including the 16-byte GCM tag.
    pub ciphertext: String,
    /// Hex encoded 12-byte IV.
    pub iv: String,
    /// Hex encoded 16-byte KDF salt.
    pub salt: String,
    pub schema_version: u32,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

/// Encrypt `secret` under `password` with a fresh salt and IV.
pub fn encrypt(secret: &[u8], password: &SecretString) -> Result<EncryptedKeyData, VaultError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let key = derive_key(password, &salt);
    let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| VaultError::Encryption)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), secret)
        .map_err(|_| VaultError::Encryption)?;

    Ok(EncryptedKeyData {
        ciphertext: hex::encode(ciphertext),
        iv: hex::encode(iv),
        salt: hex::encode(salt),
        schema_version: SCHEMA_VERSION,
        created_at: unix_now(),
    })
}

/// Decrypt a record. Every failure maps to [`VaultError::Authentication`].
pub fn decrypt(
    data: &EncryptedKeyData,
    password: &SecretString,
) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    if data.schema_version != SCHEMA_VERSION {
        return Err(VaultError::Authentication);
    }

    let salt = hex::decode(&data.salt).map_err(|_| VaultError::Authentication)?;
    let iv = hex::decode(&data.iv).map_err(|_| VaultError::Authentication)?;
    let ciphertext = hex::decode(&data.ciphertext).map_err(|_| VaultError::Authentication)?;
    if salt.len() != SALT_LEN || iv.len() != IV_LEN {
        return Err(VaultError::Authentication);
    }

    let key = derive_key(password, &salt);
    let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| VaultError::Authentication)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
        .map_err(|_| VaultError::Authentication)?;

    Ok(Zeroizing::new(plaintext))
}

/// Check a password by decrypting and discarding the plaintext.
pub fn verify(data: &EncryptedKeyData, password: &SecretString) -> bool {
    decrypt(data, password).is_ok()
}

fn derive_key(password: &SecretString, salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(
        password.expose_secret().as_bytes(),
        salt,
        KDF_ITERATIONS,
        &mut key[..],
    );
    key
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
