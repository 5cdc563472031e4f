//! Shared fixtures for broker and HTTP integration tests.

#![allow(dead_code)]

use alloy::primitives::{keccak256, Address, Bytes, TxHash, U256};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use dapp_bridge::blockchain::{BlockchainError, BlockchainResult, ChainRpc, TransactionPreparer};
use dapp_bridge::broker::{
    ApprovalOutcome, ApprovalStage, ApprovalSurface, Broker, BrokerParts, BrokerRequest,
    ContextHub, ContextMessage, ContextRef, PendingRequest,
};
use dapp_bridge::chains::{ActiveChain, ChainRegistry};
use dapp_bridge::config::{BridgeConfig, SessionConfig, TransactionConfig};
use dapp_bridge::connections::ConnectionRegistry;
use dapp_bridge::session::SessionLockManager;
use dapp_bridge::vault::KeyStore;

// Anvil's well-known development key. Never use for real funds.
pub const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const PASSWORD: &str = "correct horse battery";
pub const ORIGIN: &str = "https://app.example.com";
pub const RECIPIENT: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
pub const ADMIN_KEY: &str = "test-admin-key";

pub fn password(s: &str) -> SecretString {
    SecretString::from(s.to_string())
}

pub fn eth(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
}

/// Chain RPC double with a settable native balance.
pub struct MockRpc {
    pub balance: Mutex<U256>,
    pub gas_price: u128,
    pub sent: Mutex<Vec<Bytes>>,
}

impl MockRpc {
    pub fn new(balance: U256) -> Self {
        Self {
            balance: Mutex::new(balance),
            gas_price: 1_000_000_000,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_balance(&self, balance: U256) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ChainRpc for MockRpc {
    async fn balance(&self, _: u64, _: Address) -> BlockchainResult<U256> {
        Ok(*self.balance.lock().unwrap())
    }
    async fn token_balance(&self, _: u64, _: Address, _: Address) -> BlockchainResult<U256> {
        Ok(U256::from(1_000_000_000u64))
    }
    async fn token_decimals(&self, _: u64, _: Address) -> BlockchainResult<u8> {
        Ok(6)
    }
    async fn gas_price(&self, _: u64) -> BlockchainResult<u128> {
        Ok(self.gas_price)
    }
    async fn estimate_gas(&self, _: u64, _: &TransactionRequest) -> BlockchainResult<u64> {
        Ok(21_000)
    }
    async fn nonce(&self, _: u64, _: Address) -> BlockchainResult<u64> {
        Ok(0)
    }
    async fn send_raw(&self, _: u64, raw: Bytes) -> BlockchainResult<TxHash> {
        if raw.is_empty() {
            return Err(BlockchainError::InvalidResponse("empty transaction".to_string()));
        }
        let hash = keccak256(&raw);
        self.sent.lock().unwrap().push(raw);
        Ok(hash)
    }
}

/// Approval surface that records every prompt it is asked to show.
#[derive(Default)]
pub struct RecordingSurface {
    pub opened: Mutex<Vec<(Uuid, ApprovalStage)>>,
    pub closed: Mutex<Vec<(Uuid, ApprovalOutcome)>>,
}

impl RecordingSurface {
    pub fn last_opened(&self) -> Option<(Uuid, ApprovalStage)> {
        self.opened.lock().unwrap().last().copied()
    }

    pub fn closed(&self) -> Vec<(Uuid, ApprovalOutcome)> {
        self.closed.lock().unwrap().clone()
    }
}

impl ApprovalSurface for RecordingSurface {
    fn open(&self, request: &PendingRequest, stage: ApprovalStage) {
        self.opened.lock().unwrap().push((request.id, stage));
    }

    fn close(&self, request_id: Uuid, outcome: ApprovalOutcome) {
        self.closed.lock().unwrap().push((request_id, outcome));
    }
}

/// A broker over in-memory stores with one imported key.
pub struct Harness {
    pub keys: Arc<KeyStore>,
    pub active_chain: Arc<ActiveChain>,
    pub connections: Arc<ConnectionRegistry>,
    pub session: Arc<SessionLockManager>,
    pub contexts: Arc<ContextHub>,
    pub surface: Arc<RecordingSurface>,
    pub rpc: Arc<MockRpc>,
    pub broker: Broker,
    pub account: Address,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_balance(eth(10))
    }

    pub fn with_balance(balance: U256) -> Self {
        let keys = Arc::new(KeyStore::in_memory());
        let account = keys.import_key(KEY, &password(PASSWORD)).unwrap();
        let chains = Arc::new(ChainRegistry::builtin());
        let active_chain = Arc::new(ActiveChain::in_memory(1));
        let connections = Arc::new(ConnectionRegistry::in_memory());
        let session = Arc::new(SessionLockManager::new(keys.clone(), &SessionConfig::default()));
        let rpc = Arc::new(MockRpc::new(balance));
        let preparer = Arc::new(TransactionPreparer::new(
            rpc.clone(),
            chains.clone(),
            keys.clone(),
            session.clone(),
            TransactionConfig::default(),
        ));
        let contexts = Arc::new(ContextHub::new());
        let surface = Arc::new(RecordingSurface::default());

        let broker = Broker::new(BrokerParts {
            keys: keys.clone(),
            chains,
            active_chain: active_chain.clone(),
            connections: connections.clone(),
            session: session.clone(),
            preparer,
            contexts: contexts.clone(),
            surface: surface.clone(),
        });

        Self {
            keys,
            active_chain,
            connections,
            session,
            contexts,
            surface,
            rpc,
            broker,
            account,
        }
    }

    pub fn context() -> ContextRef {
        ContextRef::new(1, "main")
    }

    pub fn attach(&self) -> mpsc::UnboundedReceiver<ContextMessage> {
        self.attach_as(Self::context(), ORIGIN)
    }

    /// Attach `context` for a page of `origin`.
    pub fn attach_as(&self, context: ContextRef, origin: &str) -> mpsc::UnboundedReceiver<ContextMessage> {
        self.contexts.register(context, origin).unwrap().messages
    }

    pub fn request(&self, method: &str, params: Value) -> BrokerRequest {
        BrokerRequest {
            method: method.to_string(),
            params,
            origin: ORIGIN.to_string(),
            context: Self::context(),
        }
    }

    pub async fn unlock(&self) {
        self.session.unlock(&password(PASSWORD)).await.unwrap();
    }

    /// Unlock and connect `ORIGIN` with every capability.
    pub async fn connect(&self) {
        use dapp_bridge::broker::{ApprovalInput, DispatchOutcome};

        self.unlock().await;
        let outcome = self
            .broker
            .dispatch(self.request("eth_requestAccounts", Value::Null))
            .await
            .unwrap();
        let DispatchOutcome::Pending { request_id } = outcome else {
            panic!("expected a pending request, got {outcome:?}");
        };
        self.broker
            .approve(
                request_id,
                ApprovalInput::Connect {
                    accounts: None,
                    capabilities: None,
                },
            )
            .await
            .unwrap();
    }
}

/// Drain every message queued for a context.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<ContextMessage>) -> Vec<ContextMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

/// The response for `request_id` among `messages`.
pub fn response_for(messages: &[ContextMessage], request_id: Uuid) -> Option<ContextMessage> {
    messages
        .iter()
        .find(|m| matches!(m, ContextMessage::Response { request_id: id, .. } if *id == request_id))
        .cloned()
}

/// Names of the events among `messages`, in order.
pub fn event_names(messages: &[ContextMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            ContextMessage::Event { event, .. } => Some(event.clone()),
            _ => None,
        })
        .collect()
}

/// A daemon configuration rooted in `dir`, listening on an ephemeral port.
pub fn test_config(dir: &std::path::Path) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.storage.data_dir = dir.to_path_buf();
    config.admin.api_key = ADMIN_KEY.to_string();
    config
}
