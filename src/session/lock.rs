//! Session lock state machine.
//!
//! ```text
//! Locked ──unlock(ok)──▶ Unlocked ──lock() / inactivity──▶ Locked
//!   │
//!   └─unlock(wrong) × max_failed_attempts──▶ Locked + lockout window
//! ```
//!
//! State is process-local and starts `Locked` on every run. Password checks
//! run on the blocking pool; `state` is only ever held for bookkeeping, so
//! reads like [`SessionLockManager::is_unlocked`] never wait on one.

use secrecy::SecretString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::SessionConfig;
use crate::observability::metrics;
use crate::session::SessionError;
use crate::vault::{KeyStore, KeyStoreError};

#[derive(Debug)]
struct LockState {
    locked: bool,
    failed_attempts: u32,
    lockout_until: Option<Instant>,
    last_activity: Instant,
}

/// Point-in-time view of the session, safe to hand to management clients.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub locked: bool,
    pub failed_attempts: u32,
    /// Seconds until unlock attempts are accepted again.
    pub lockout_remaining_secs: Option<u64>,
    pub idle_secs: u64,
}

/// Gatekeeper for every operation that needs decrypted key material.
pub struct SessionLockManager {
    state: Mutex<LockState>,
    /// Serializes unlock attempts so failures are counted one by one.
    attempts: tokio::sync::Mutex<()>,
    keys: Arc<KeyStore>,
    auto_lock_after: Duration,
    max_failed_attempts: u32,
    lockout: Duration,
}

impl SessionLockManager {
    pub fn new(keys: Arc<KeyStore>, config: &SessionConfig) -> Self {
        metrics::record_session_unlocked(false);
        Self {
            state: Mutex::new(LockState {
                locked: true,
                failed_attempts: 0,
                lockout_until: None,
                last_activity: Instant::now(),
            }),
            attempts: tokio::sync::Mutex::new(()),
            keys,
            auto_lock_after: config.auto_lock_after(),
            max_failed_attempts: config.max_failed_attempts,
            lockout: config.lockout(),
        }
    }

    /// Try to unlock with `password`, verified against a stored key.
    pub async fn unlock(&self, password: &SecretString) -> Result<(), SessionError> {
        self.unlock_at(password, Instant::now()).await
    }

    pub(crate) async fn unlock_at(
        &self,
        password: &SecretString,
        now: Instant,
    ) -> Result<(), SessionError> {
        let _attempt = self.attempts.lock().await;

        {
            let mut state = self.state();
            if let Some(until) = state.lockout_until {
                if now < until {
                    metrics::record_unlock_attempt("locked_out");
                    return Err(SessionError::LockedOut {
                        remaining_secs: until.saturating_duration_since(now).as_secs().max(1),
                    });
                }
                state.lockout_until = None;
                state.failed_attempts = 0;
            }
        }

        let candidate = password.clone();
        let verified = match self
            .keys
            .run_blocking(move |keys| keys.verify_any(&candidate))
            .await
        {
            Ok(verified) => verified,
            Err(KeyStoreError::NoKeys) => return Err(SessionError::NoKeys),
            Err(e) => return Err(SessionError::KeyStore(e)),
        };

        let mut state = self.state();
        if verified {
            state.locked = false;
            state.failed_attempts = 0;
            state.last_activity = now;
            metrics::record_unlock_attempt("success");
            metrics::record_session_unlocked(true);
            tracing::info!("Session unlocked");
            return Ok(());
        }

        state.failed_attempts += 1;
        metrics::record_unlock_attempt("failure");
        if state.failed_attempts >= self.max_failed_attempts {
            state.lockout_until = Some(now + self.lockout);
            tracing::warn!(
                failed_attempts = state.failed_attempts,
                lockout_secs = self.lockout.as_secs(),
                "Too many failed unlock attempts, locking out"
            );
        } else {
            tracing::warn!(failed_attempts = state.failed_attempts, "Unlock failed");
        }
        Err(SessionError::IncorrectPassword)
    }

    /// Lock immediately. Idempotent.
    pub fn lock(&self) {
        let mut state = self.state();
        if !state.locked {
            tracing::info!("Session locked");
        }
        state.locked = true;
        metrics::record_session_unlocked(false);
    }

    pub fn is_unlocked(&self) -> bool {
        // A poisoned lock reads as locked.
        match self.state.lock() {
            Ok(state) => !state.locked,
            Err(_) => false,
        }
    }

    /// Fail with [`SessionError::Locked`] unless the session is unlocked.
    pub fn ensure_unlocked(&self) -> Result<(), SessionError> {
        if self.is_unlocked() {
            Ok(())
        } else {
            Err(SessionError::Locked)
        }
    }

    /// Record user activity, postponing auto-lock.
    pub fn touch(&self) {
        self.state().last_activity = Instant::now();
    }

    pub fn failed_attempts(&self) -> u32 {
        self.state().failed_attempts
    }

    pub fn status(&self) -> SessionStatus {
        let now = Instant::now();
        let state = self.state();
        SessionStatus {
            locked: state.locked,
            failed_attempts: state.failed_attempts,
            lockout_remaining_secs: state
                .lockout_until
                .filter(|until| *until > now)
                .map(|until| until.saturating_duration_since(now).as_secs().max(1)),
            idle_secs: now.saturating_duration_since(state.last_activity).as_secs(),
        }
    }

    /// Lock if the session has been idle past the auto-lock threshold.
    /// Returns true when this call locked the session.
    pub fn enforce_auto_lock(&self) -> bool {
        self.enforce_auto_lock_at(Instant::now())
    }

    pub(crate) fn enforce_auto_lock_at(&self, now: Instant) -> bool {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => {
                let mut state = poisoned.into_inner();
                state.locked = true;
                metrics::record_session_unlocked(false);
                return true;
            }
        };
        if state.locked {
            return false;
        }
        let idle = now.saturating_duration_since(state.last_activity);
        if idle < self.auto_lock_after {
            return false;
        }
        state.locked = true;
        metrics::record_session_unlocked(false);
        tracing::info!(idle_secs = idle.as_secs(), "Session auto-locked after inactivity");
        true
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SessionLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLockManager")
            .field("unlocked", &self.is_unlocked())
            .finish()
    }
}
