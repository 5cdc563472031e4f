//! In-memory store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{StateStore, StorageError};

/// Keeps the snapshot in process memory.
///
/// Can be switched into a failing mode to exercise storage outages.
#[derive(Debug)]
pub struct MemoryStore<T> {
    value: Mutex<Option<T>>,
    unavailable: AtomicBool,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Start with an existing snapshot, as if reloaded after a restart.
    pub fn with_value(value: T) -> Self {
        Self {
            value: Mutex::new(Some(value)),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent load/save fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory store disabled".to_string()));
        }
        Ok(())
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StateStore<T> for MemoryStore<T>
where
    T: Clone + Send,
{
    fn load(&self) -> Result<Option<T>, StorageError> {
        self.check()?;
        let guard = self
            .value
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store poisoned".to_string()))?;
        Ok(guard.clone())
    }

    fn save(&self, value: &T) -> Result<(), StorageError> {
        self.check()?;
        let mut guard = self
            .value
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store poisoned".to_string()))?;
        *guard = Some(value.clone());
        Ok(())
    }
}
