//! Startup orchestration.
//!
//! # Responsibilities
//! - Open every persisted store under the configured data directory
//! - Build the services in dependency order and wire them together
//! - Start background tasks (auto-lock monitor, metrics exporter)
//! - Bind the listener and serve until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The chain RPC is injected so tests can run without a node

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::blockchain::{ChainRpc, RpcGateway, TransactionPreparer};
use crate::broker::{ApprovalChannel, Broker, BrokerParts, ContextHub};
use crate::chains::{ActiveChain, ActiveChainSnapshot, ChainRegistry};
use crate::config::loader::ConfigError;
use crate::config::BridgeConfig;
use crate::connections::{ConnectionError, ConnectionRegistry, ConnectionsSnapshot};
use crate::http::{AppState, HttpServer};
use crate::lifecycle::{signals, Shutdown};
use crate::observability::metrics;
use crate::session::{AutoLockMonitor, SessionLockManager};
use crate::storage::{JsonFileStore, StorageError};
use crate::vault::{KeyStore, KeyStoreError, KeyStoreSnapshot};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("key store: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("connections: {0}")]
    Connections(#[from] ConnectionError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Every long-lived service of the bridge, wired together.
#[derive(Clone)]
pub struct Services {
    pub keys: Arc<KeyStore>,
    pub chains: Arc<ChainRegistry>,
    pub active_chain: Arc<ActiveChain>,
    pub connections: Arc<ConnectionRegistry>,
    pub session: Arc<SessionLockManager>,
    pub preparer: Arc<TransactionPreparer>,
    pub contexts: Arc<ContextHub>,
    pub approvals: ApprovalChannel,
    pub broker: Arc<Broker>,
}

impl Services {
    /// Open the stores from `config.storage` and build the services.
    pub fn open(config: &BridgeConfig, rpc: Arc<dyn ChainRpc>) -> Result<Self, StartupError> {
        let storage = &config.storage;
        std::fs::create_dir_all(&storage.data_dir)?;

        let keys = Arc::new(KeyStore::open(Arc::new(
            JsonFileStore::<KeyStoreSnapshot>::new(storage.keystore_path()),
        ))?);

        let chains = Arc::new(ChainRegistry::from_config(&config.chains));
        let active_chain = Arc::new(ActiveChain::load(
            Arc::new(JsonFileStore::<ActiveChainSnapshot>::new(storage.active_chain_path())),
            &chains,
            config.chains.default_chain_id,
        )?);

        let connections = Arc::new(ConnectionRegistry::open(Arc::new(
            JsonFileStore::<ConnectionsSnapshot>::new(storage.connections_path()),
        ))?);

        let session = Arc::new(SessionLockManager::new(keys.clone(), &config.session));
        let preparer = Arc::new(TransactionPreparer::new(
            rpc,
            chains.clone(),
            keys.clone(),
            session.clone(),
            config.transactions.clone(),
        ));
        let contexts = Arc::new(ContextHub::new());
        let approvals = ApprovalChannel::default();

        let broker = Arc::new(Broker::new(BrokerParts {
            keys: keys.clone(),
            chains: chains.clone(),
            active_chain: active_chain.clone(),
            connections: connections.clone(),
            session: session.clone(),
            preparer: preparer.clone(),
            contexts: contexts.clone(),
            surface: Arc::new(approvals.clone()),
        }));

        tracing::info!(
            data_dir = %storage.data_dir.display(),
            keys = keys.addresses().len(),
            connections = connections.len(),
            active_chain = active_chain.get(),
            "Services initialized"
        );

        Ok(Self {
            keys,
            chains,
            active_chain,
            connections,
            session,
            preparer,
            contexts,
            approvals,
            broker,
        })
    }
}

/// Run the daemon until a termination signal arrives.
pub async fn run(config: BridgeConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let chains = Arc::new(ChainRegistry::from_config(&config.chains));
    let rpc = Arc::new(RpcGateway::new(
        chains,
        Duration::from_secs(config.chains.rpc_timeout_secs),
    ));
    let services = Services::open(&config, rpc)?;

    let shutdown = Shutdown::new();
    let monitor = AutoLockMonitor::new(services.session.clone(), config.session.check_interval());
    let monitor_handle = tokio::spawn(monitor.run(shutdown.subscribe()));
    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let state = AppState::new(services, &config.admin);
    let server = HttpServer::new(&config.listener, state);
    server.run(listener, shutdown.subscribe()).await?;

    let _ = monitor_handle.await;
    tracing::info!("Shutdown complete");
    Ok(())
}
