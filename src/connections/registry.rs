//! Per-origin connection state.
//!
//! # Responsibilities
//! - Normalize origins before every lookup or write
//! - Persist the full registry on every mutation, reload at startup
//! - Resolve which granted account a request acts as
//!
//! # Design Decisions
//! - Mutations are serialized and saved before they become visible, so a
//!   failed write never leaves the in-memory view ahead of disk
//! - Reads go straight to the concurrent map

use alloy::primitives::Address;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use crate::connections::origin::normalize_origin;
use crate::connections::types::{Capability, Connection};
use crate::connections::ConnectionError;
use crate::observability::metrics;
use crate::storage::{MemoryStore, StateStore};
use crate::vault::cipher::unix_now;

/// Persisted form of the registry, keyed by normalized origin.
pub type ConnectionsSnapshot = BTreeMap<String, Connection>;

/// Registry of connected origins.
pub struct ConnectionRegistry {
    connections: DashMap<String, Connection>,
    store: Arc<dyn StateStore<ConnectionsSnapshot>>,
    write: Mutex<()>,
}

impl ConnectionRegistry {
    /// Open the registry, reloading persisted connections.
    pub fn open(store: Arc<dyn StateStore<ConnectionsSnapshot>>) -> Result<Self, ConnectionError> {
        let snapshot = store.load()?.unwrap_or_default();
        let connections = DashMap::new();
        for (origin, connection) in snapshot {
            connections.insert(origin, connection);
        }
        tracing::info!(connections = connections.len(), "Connection registry loaded");
        metrics::record_connections(connections.len());
        Ok(Self {
            connections,
            store,
            write: Mutex::new(()),
        })
    }

    /// A registry that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            connections: DashMap::new(),
            store: Arc::new(MemoryStore::<ConnectionsSnapshot>::new()),
            write: Mutex::new(()),
        }
    }

    /// Look up the connection for an origin or page URL.
    pub fn get(&self, origin: &str) -> Option<Connection> {
        let origin = normalize_origin(origin).ok()?;
        self.connections.get(&origin).map(|r| r.value().clone())
    }

    /// All connections, ordered by origin.
    pub fn list(&self) -> Vec<Connection> {
        let mut all: Vec<_> = self.connections.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.origin.cmp(&b.origin));
        all
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Create or replace the connection for `origin`.
    ///
    /// Only approval paths call this. The original `connected_at` is kept
    /// when the origin was already connected.
    pub fn upsert(
        &self,
        origin: &str,
        accounts: Vec<Address>,
        permissions: BTreeSet<Capability>,
        chain_id: u64,
    ) -> Result<Connection, ConnectionError> {
        let origin = normalize_origin(origin)?;
        self.mutate(|snapshot| {
            let connected_at = snapshot
                .get(&origin)
                .map(|c| c.connected_at)
                .unwrap_or_else(unix_now);
            let connection = Connection {
                origin: origin.clone(),
                accounts,
                permissions,
                chain_id,
                connected_at,
            };
            snapshot.insert(origin.clone(), connection.clone());
            Ok(connection)
        })
    }

    /// Record the chain an origin is now operating on.
    pub fn set_chain(&self, origin: &str, chain_id: u64) -> Result<(), ConnectionError> {
        let origin = normalize_origin(origin)?;
        self.mutate(|snapshot| {
            let connection = snapshot
                .get_mut(&origin)
                .ok_or_else(|| ConnectionError::NotConnected(origin.clone()))?;
            connection.chain_id = chain_id;
            Ok(())
        })
    }

    /// Disconnect one origin. Returns the removed connection, if any.
    pub fn remove(&self, origin: &str) -> Result<Option<Connection>, ConnectionError> {
        let origin = normalize_origin(origin)?;
        self.mutate(|snapshot| Ok(snapshot.remove(&origin)))
    }

    /// Disconnect every origin.
    pub fn remove_all(&self) -> Result<Vec<Connection>, ConnectionError> {
        self.mutate(|snapshot| Ok(std::mem::take(snapshot).into_values().collect()))
    }

    /// Resolve the account a request from `origin` acts as.
    ///
    /// A non-empty `preferred` account must be one of the granted accounts
    /// (compared case-insensitively); it is never substituted. Without a
    /// preference the first granted account is used.
    pub fn resolve_account(
        &self,
        origin: &str,
        preferred: Option<&str>,
    ) -> Result<Address, ConnectionError> {
        let connection = self
            .get(origin)
            .ok_or_else(|| ConnectionError::NotConnected(origin.to_string()))?;

        match preferred.map(str::trim).filter(|p| !p.is_empty()) {
            Some(wanted) => connection
                .accounts
                .iter()
                .find(|a| a.to_string().eq_ignore_ascii_case(wanted))
                .copied()
                .ok_or_else(|| ConnectionError::AccountNotAuthorized(wanted.to_string())),
            None => connection
                .accounts
                .first()
                .copied()
                .ok_or(ConnectionError::NoAccounts),
        }
    }

    fn mutate<R>(
        &self,
        apply: impl FnOnce(&mut ConnectionsSnapshot) -> Result<R, ConnectionError>,
    ) -> Result<R, ConnectionError> {
        let _guard = self.write.lock().unwrap_or_else(PoisonError::into_inner);

        let mut snapshot: ConnectionsSnapshot = self
            .connections
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        let result = apply(&mut snapshot)?;
        self.store.save(&snapshot)?;

        self.connections.retain(|origin, _| snapshot.contains_key(origin));
        for (origin, connection) in snapshot {
            self.connections.insert(origin, connection);
        }
        metrics::record_connections(self.connections.len());
        Ok(result)
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.connections.len())
            .finish()
    }
}
