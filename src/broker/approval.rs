//! The approval surface seam.
//!
//! The broker never waits on the user. It opens a prompt and returns; the
//! surface later calls back into the broker with the decision.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::broker::ledger::PendingRequest;

/// Which screen the approval surface should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStage {
    /// Ask for the wallet password first, then review.
    Unlock,
    /// Show the request for approve/reject.
    Review,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalOutcome {
    Approved,
    Rejected,
    Failed,
}

/// Events streamed to approval clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ApprovalEvent {
    Opened {
        stage: ApprovalStage,
        request: Box<PendingRequest>,
    },
    #[serde(rename_all = "camelCase")]
    Closed {
        request_id: Uuid,
        outcome: ApprovalOutcome,
    },
}

/// Where prompts are shown.
pub trait ApprovalSurface: Send + Sync {
    fn open(&self, request: &PendingRequest, stage: ApprovalStage);

    fn close(&self, request_id: Uuid, outcome: ApprovalOutcome);
}

/// Fan-out of approval events to every subscribed client.
#[derive(Debug, Clone)]
pub struct ApprovalChannel {
    tx: broadcast::Sender<ApprovalEvent>,
}

impl ApprovalChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalEvent> {
        self.tx.subscribe()
    }
}

impl Default for ApprovalChannel {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ApprovalSurface for ApprovalChannel {
    fn open(&self, request: &PendingRequest, stage: ApprovalStage) {
        tracing::info!(
            request_id = %request.id,
            method = %request.method,
            origin = %request.origin,
            ?stage,
            "Approval requested"
        );
        // No subscriber yet is fine; clients list pending requests on connect.
        let _ = self.tx.send(ApprovalEvent::Opened {
            stage,
            request: Box::new(request.clone()),
        });
    }

    fn close(&self, request_id: Uuid, outcome: ApprovalOutcome) {
        let _ = self.tx.send(ApprovalEvent::Closed {
            request_id,
            outcome,
        });
    }
}
