//! Encrypted key store: `{address → EncryptedKeyData}` plus last access time.

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::storage::{MemoryStore, StateStore, StorageError};
use crate::vault::cipher::{self, unix_now, EncryptedKeyData, VaultError};

/// Minimum length for a newly chosen wallet password.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Errors raised by key store operations.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid private key")]
    InvalidKey,

    #[error("key for {0} already exists")]
    DuplicateKey(Address),

    #[error("no key stored for {0}")]
    UnknownAccount(Address),

    #[error("no keys stored")]
    NoKeys,

    #[error("password must be at least {MIN_PASSWORD_LEN} characters")]
    WeakPassword,

    #[error("key derivation task failed: {0}")]
    Worker(String),
}

/// Persisted form of the key store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStoreSnapshot {
    pub keys: BTreeMap<Address, EncryptedKeyData>,
    pub last_access: Option<u64>,
}

/// The wallet's encrypted keys. All keys share one password.
pub struct KeyStore {
    inner: RwLock<KeyStoreSnapshot>,
    /// Held from reading the snapshot until the next one is swapped in.
    write: Mutex<()>,
    store: Arc<dyn StateStore<KeyStoreSnapshot>>,
}

impl KeyStore {
    /// Open the key store, reloading any persisted snapshot.
    pub fn open(store: Arc<dyn StateStore<KeyStoreSnapshot>>) -> Result<Self, KeyStoreError> {
        let snapshot = store.load()?.unwrap_or_default();
        tracing::info!(keys = snapshot.keys.len(), "Key store opened");
        Ok(Self {
            inner: RwLock::new(snapshot),
            write: Mutex::new(()),
            store,
        })
    }

    /// A key store that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(KeyStoreSnapshot::default()),
            write: Mutex::new(()),
            store: Arc::new(MemoryStore::<KeyStoreSnapshot>::new()),
        }
    }

    /// Addresses with a stored key, in ascending order.
    pub fn addresses(&self) -> Vec<Address> {
        self.read().keys.keys().copied().collect()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.read().keys.contains_key(address)
    }

    pub fn is_empty(&self) -> bool {
        self.read().keys.is_empty()
    }

    pub fn last_access(&self) -> Option<u64> {
        self.read().last_access
    }

    /// Import a hex private key (with or without `0x`).
    pub fn import_key(
        &self,
        private_key_hex: &str,
        password: &SecretString,
    ) -> Result<Address, KeyStoreError> {
        let key_hex = private_key_hex.trim();
        let key_hex = key_hex.strip_prefix("0x").unwrap_or(key_hex);
        let signer = PrivateKeySigner::from_str(key_hex).map_err(|_| KeyStoreError::InvalidKey)?;
        self.insert_signer(&signer, password)
    }

    /// Generate a fresh random key.
    pub fn generate_key(&self, password: &SecretString) -> Result<Address, KeyStoreError> {
        let signer = PrivateKeySigner::random();
        self.insert_signer(&signer, password)
    }

    fn insert_signer(
        &self,
        signer: &PrivateKeySigner,
        password: &SecretString,
    ) -> Result<Address, KeyStoreError> {
        let address = signer.address();
        let _guard = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        if self.contains(&address) {
            return Err(KeyStoreError::DuplicateKey(address));
        }

        if self.is_empty() {
            check_password_strength(password)?;
        } else if !self.verify_any(password)? {
            return Err(VaultError::Authentication.into());
        }

        let secret = Zeroizing::new(signer.to_bytes().0);
        let record = cipher::encrypt(secret.as_slice(), password)?;

        let mut next = self.read().clone();
        next.keys.insert(address, record);
        self.commit(next)?;

        tracing::info!(address = %address, "Key stored");
        Ok(address)
    }

    /// Check `password` against one stored key.
    pub fn verify_any(&self, password: &SecretString) -> Result<bool, KeyStoreError> {
        let record = self
            .read()
            .keys
            .values()
            .next()
            .cloned()
            .ok_or(KeyStoreError::NoKeys)?;
        Ok(cipher::verify(&record, password))
    }

    /// Decrypt the key for `address` into a signer.
    ///
    /// The signer zeroizes its key on drop; callers must not keep it beyond
    /// the operation that needed it.
    pub fn decrypt_signer(
        &self,
        address: &Address,
        password: &SecretString,
    ) -> Result<PrivateKeySigner, KeyStoreError> {
        let record = self
            .read()
            .keys
            .get(address)
            .cloned()
            .ok_or(KeyStoreError::UnknownAccount(*address))?;

        let secret = cipher::decrypt(&record, password)?;
        let signer =
            PrivateKeySigner::from_slice(&secret).map_err(|_| VaultError::Authentication)?;

        let _guard = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = self.read().clone();
        next.last_access = Some(unix_now());
        if let Err(e) = self.commit(next) {
            tracing::warn!(error = %e, "Failed to record key access time");
        }

        Ok(signer)
    }

    /// Re-encrypt every key under `new_password` with fresh salts and IVs.
    ///
    /// Nothing changes unless every key decrypts with `old_password` and the
    /// new snapshot is persisted.
    pub fn change_password(
        &self,
        old_password: &SecretString,
        new_password: &SecretString,
    ) -> Result<(), KeyStoreError> {
        check_password_strength(new_password)?;

        let _guard = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.read().clone();
        if current.keys.is_empty() {
            return Err(KeyStoreError::NoKeys);
        }

        let mut next = KeyStoreSnapshot {
            keys: BTreeMap::new(),
            last_access: Some(unix_now()),
        };
        for (address, record) in &current.keys {
            let secret = cipher::decrypt(record, old_password)?;
            next.keys.insert(*address, cipher::encrypt(&secret, new_password)?);
        }

        self.commit(next)?;
        tracing::info!(keys = current.keys.len(), "Wallet password changed");
        Ok(())
    }

    /// Run `work` on the blocking pool. Key derivation is slow enough to
    /// stall the async runtime.
    pub async fn run_blocking<T, F>(self: &Arc<Self>, work: F) -> Result<T, KeyStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&KeyStore) -> Result<T, KeyStoreError> + Send + 'static,
    {
        let keys = Arc::clone(self);
        tokio::task::spawn_blocking(move || work(&keys))
            .await
            .map_err(|e| KeyStoreError::Worker(e.to_string()))?
    }

    /// Callers hold `write`.
    fn commit(&self, next: KeyStoreSnapshot) -> Result<(), KeyStoreError> {
        self.store.save(&next)?;
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = next;
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, KeyStoreSnapshot> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("addresses", &self.addresses())
            .finish()
    }
}

fn check_password_strength(password: &SecretString) -> Result<(), KeyStoreError> {
    if password.expose_secret().chars().count() < MIN_PASSWORD_LEN {
        return Err(KeyStoreError::WeakPassword);
    }
    Ok(())
}
