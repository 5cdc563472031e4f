//! Background auto-lock task.
//!
//! Only ever touches session lock state. Pending approvals survive an
//! auto-lock and go through the unlock step when the user returns.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::session::SessionLockManager;

pub struct AutoLockMonitor {
    session: Arc<SessionLockManager>,
    interval: Duration,
}

impl AutoLockMonitor {
    pub fn new(session: Arc<SessionLockManager>, interval: Duration) -> Self {
        Self { session, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Auto-lock monitor starting");

        let mut ticker = time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.session.enforce_auto_lock();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Auto-lock monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
