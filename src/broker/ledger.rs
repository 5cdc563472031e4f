//! In-flight approval requests.
//!
//! # Design Decisions
//! - Keyed by random UUIDs so concurrent requests from any number of origins
//!   and tabs never collide
//! - `take` removes atomically; whoever takes an entry owns its single
//!   resolution, and a second resolution finds nothing
//! - Entries have no expiry. Rejecting is the cleanup path, and the size is
//!   exported as the `bridge_pending_requests` gauge

use alloy::dyn_abi::TypedData;
use alloy::primitives::{Address, Bytes};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::blockchain::PreparedTransaction;
use crate::broker::contexts::ContextRef;
use crate::connections::Capability;
use crate::observability::metrics;

/// What the broker does once the user approves.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingAction {
    Connect,
    RequestPermissions {
        capabilities: BTreeSet<Capability>,
    },
    SendTransaction {
        prepared: PreparedTransaction,
    },
    SignMessage {
        account: Address,
        message: Bytes,
    },
    SignTypedData {
        account: Address,
        typed_data: Box<TypedData>,
    },
}

/// A request waiting for the user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    pub id: Uuid,
    pub method: String,
    pub params: Value,
    pub origin: String,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
    pub context: ContextRef,
    pub requested_account: Option<Address>,
    pub required_permission: Option<Capability>,
    pub action: PendingAction,
}

#[derive(Debug, Default)]
pub struct PendingRequestLedger {
    entries: DashMap<Uuid, PendingRequest>,
}

impl PendingRequestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, request: PendingRequest) {
        tracing::debug!(request_id = %request.id, method = %request.method, origin = %request.origin, "Pending request created");
        self.entries.insert(request.id, request);
        metrics::record_pending_requests(self.entries.len());
    }

    pub fn get(&self, id: &Uuid) -> Option<PendingRequest> {
        self.entries.get(id).map(|r| r.value().clone())
    }

    /// Remove and return the entry. At most one caller ever gets `Some`.
    pub fn take(&self, id: &Uuid) -> Option<PendingRequest> {
        let taken = self.entries.remove(id).map(|(_, request)| request);
        metrics::record_pending_requests(self.entries.len());
        taken
    }

    /// Pending requests, oldest first.
    pub fn list(&self) -> Vec<PendingRequest> {
        let mut all: Vec<_> = self.entries.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn request(created_at: u64) -> PendingRequest {
        PendingRequest {
            id: Uuid::new_v4(),
            method: "eth_requestAccounts".to_string(),
            params: json!([]),
            origin: "https://dapp.example".to_string(),
            created_at,
            context: ContextRef::new(1, "main"),
            requested_account: None,
            required_permission: None,
            action: PendingAction::Connect,
        }
    }

    #[test]
    fn test_take_is_at_most_once() {
        let ledger = PendingRequestLedger::new();
        let req = request(1);
        let id = req.id;
        ledger.insert(req);

        assert!(ledger.get(&id).is_some());
        assert!(ledger.take(&id).is_some());
        assert!(ledger.take(&id).is_none());
        assert!(ledger.get(&id).is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_concurrent_take() {
        let ledger = Arc::new(PendingRequestLedger::new());
        let req = request(1);
        let id = req.id;
        ledger.insert(req);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || ledger.take(&id).is_some())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_list_oldest_first() {
        let ledger = PendingRequestLedger::new();
        ledger.insert(request(30));
        ledger.insert(request(10));
        ledger.insert(request(20));
        let order: Vec<_> = ledger.list().iter().map(|r| r.created_at).collect();
        assert_eq!(order, vec![10, 20, 30]);
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn test_serializes_action_kind() {
        let json = serde_json::to_value(request(1)).unwrap();
        assert_eq!(json["action"]["kind"], "connect");
        assert_eq!(json["context"]["tabId"], 1);
    }
}
