//! The wallet-wide active chain, persisted across restarts.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::chains::registry::ChainRegistry;
use crate::storage::{MemoryStore, StateStore, StorageError};

/// Persisted form of the active chain selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveChainSnapshot {
    pub chain_id: u64,
}

/// Currently selected chain.
pub struct ActiveChain {
    current: AtomicU64,
    store: Arc<dyn StateStore<ActiveChainSnapshot>>,
}

impl ActiveChain {
    /// Reload the stored selection, falling back to `default_id` when nothing
    /// is stored or the stored chain is no longer supported.
    pub fn load(
        store: Arc<dyn StateStore<ActiveChainSnapshot>>,
        registry: &ChainRegistry,
        default_id: u64,
    ) -> Result<Self, StorageError> {
        let chain_id = match store.load()? {
            Some(snapshot) if registry.is_supported(snapshot.chain_id) => snapshot.chain_id,
            Some(snapshot) => {
                tracing::warn!(
                    stored = snapshot.chain_id,
                    fallback = default_id,
                    "Stored active chain is unsupported, using default"
                );
                default_id
            }
            None => default_id,
        };
        tracing::info!(chain_id, "Active chain loaded");
        Ok(Self {
            current: AtomicU64::new(chain_id),
            store,
        })
    }

    /// An unpersisted selection starting at `chain_id`.
    pub fn in_memory(chain_id: u64) -> Self {
        Self {
            current: AtomicU64::new(chain_id),
            store: Arc::new(MemoryStore::<ActiveChainSnapshot>::new()),
        }
    }

    pub fn get(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Persist and switch. The in-memory value only changes once saved.
    pub fn set(&self, chain_id: u64) -> Result<(), StorageError> {
        self.store.save(&ActiveChainSnapshot { chain_id })?;
        self.current.store(chain_id, Ordering::SeqCst);
        Ok(())
    }
}

impl std::fmt::Debug for ActiveChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveChain")
            .field("chain_id", &self.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::JsonFileStore;

    #[test]
    fn test_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("active_chain.json");
        let registry = ChainRegistry::builtin();

        let active = ActiveChain::load(
            Arc::new(JsonFileStore::<ActiveChainSnapshot>::new(&path)),
            &registry,
            1,
        )
        .unwrap();
        assert_eq!(active.get(), 1);
        active.set(56).unwrap();

        let reloaded = ActiveChain::load(
            Arc::new(JsonFileStore::<ActiveChainSnapshot>::new(&path)),
            &registry,
            1,
        )
        .unwrap();
        assert_eq!(reloaded.get(), 56);
    }

    #[test]
    fn test_unsupported_stored_chain_falls_back() {
        let store = MemoryStore::with_value(ActiveChainSnapshot { chain_id: 9999 });
        let active = ActiveChain::load(Arc::new(store), &ChainRegistry::builtin(), 137).unwrap();
        assert_eq!(active.get(), 137);
    }

    #[test]
    fn test_failed_save_keeps_previous_chain() {
        let store = Arc::new(MemoryStore::<ActiveChainSnapshot>::new());
        let active = ActiveChain::load(store.clone(), &ChainRegistry::builtin(), 1).unwrap();
        store.set_unavailable(true);
        assert!(active.set(56).is_err());
        assert_eq!(active.get(), 1);
    }
}
