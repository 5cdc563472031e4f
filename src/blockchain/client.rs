//! Per-chain RPC client with timeouts and failover.
//!
//! # Responsibilities
//! - Connect to a chain's primary JSON-RPC endpoint plus failovers
//! - Query chain state (balances, nonce, gas price, eth_call)
//! - Estimate gas and broadcast signed transactions
//! - Bound every call with a timeout; try the next provider on failure

use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::transports::TransportResult;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::blockchain::types::{BlockchainError, BlockchainResult};
use crate::chains::Chain;

type SharedProvider = Arc<dyn Provider + Send + Sync>;

/// RPC client for one chain, with failover support.
#[derive(Clone)]
pub struct BlockchainClient {
    chain_id: u64,
    rpc_url: String,
    /// Primary first, then failovers in configured order.
    providers: Vec<SharedProvider>,
    timeout_duration: Duration,
}

impl BlockchainClient {
    /// Create a client for `chain`. No network I/O happens here.
    pub fn new(chain: &Chain, rpc_timeout: Duration) -> BlockchainResult<Self> {
        let mut providers = Vec::new();

        let primary_url: url::Url = chain.rpc_url.parse().map_err(|e| {
            BlockchainError::Rpc(format!("Invalid RPC URL '{}': {}", chain.rpc_url, e))
        })?;
        providers.push(Arc::new(ProviderBuilder::new().connect_http(primary_url)) as SharedProvider);

        for url_str in &chain.failover_urls {
            if let Ok(url) = url_str.parse() {
                providers.push(Arc::new(ProviderBuilder::new().connect_http(url)) as SharedProvider);
            } else {
                tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL");
            }
        }

        tracing::debug!(
            chain_id = chain.id,
            rpc_url = %chain.rpc_url,
            providers = providers.len(),
            "Blockchain client created"
        );

        Ok(Self {
            chain_id: chain.id,
            rpc_url: chain.rpc_url.clone(),
            providers,
            timeout_duration: rpc_timeout,
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Native balance of an address, in wei.
    pub async fn get_balance(&self, address: Address) -> BlockchainResult<U256> {
        self.with_failover("eth_getBalance", |p| async move { p.get_balance(address).await })
            .await
    }

    /// Pending-inclusive transaction count, used as the next nonce.
    pub async fn get_transaction_count(&self, address: Address) -> BlockchainResult<u64> {
        self.with_failover("eth_getTransactionCount", |p| async move {
            p.get_transaction_count(address).pending().await
        })
        .await
    }

    /// Current gas price in wei.
    pub async fn get_gas_price(&self) -> BlockchainResult<u128> {
        self.with_failover("eth_gasPrice", |p| async move { p.get_gas_price().await })
            .await
    }

    pub async fn estimate_gas(&self, tx: &TransactionRequest) -> BlockchainResult<u64> {
        self.with_failover("eth_estimateGas", |p| {
            let tx = tx.clone();
            async move { p.estimate_gas(tx).await }
        })
        .await
    }

    /// Execute a read-only call against the latest block.
    pub async fn call(&self, tx: &TransactionRequest) -> BlockchainResult<Bytes> {
        self.with_failover("eth_call", |p| {
            let tx = tx.clone();
            async move { p.call(tx).await }
        })
        .await
    }

    /// Broadcast a signed, EIP-2718 encoded transaction.
    pub async fn send_raw_transaction(&self, raw: &[u8]) -> BlockchainResult<TxHash> {
        self.with_failover("eth_sendRawTransaction", |p| async move {
            let pending = p.send_raw_transaction(raw).await?;
            Ok(*pending.tx_hash())
        })
        .await
    }

    async fn with_failover<T, F, Fut>(&self, method: &'static str, call: F) -> BlockchainResult<T>
    where
        F: Fn(SharedProvider) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let mut last_error = None;
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, call(provider.clone())).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => {
                    tracing::warn!(
                        chain_id = self.chain_id,
                        provider_idx = i,
                        method,
                        error = %e,
                        "RPC error, trying next provider"
                    );
                    last_error = Some(BlockchainError::Rpc(e.to_string()));
                }
                Err(_) => {
                    tracing::warn!(
                        chain_id = self.chain_id,
                        provider_idx = i,
                        method,
                        "RPC timeout, trying next provider"
                    );
                    last_error = Some(BlockchainError::Timeout(self.timeout_duration.as_secs()));
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| BlockchainError::Rpc("no RPC providers configured".to_string())))
    }
}

impl std::fmt::Debug for BlockchainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainClient")
            .field("chain_id", &self.chain_id)
            .field("rpc_url", &self.rpc_url)
            .field("providers", &self.providers.len())
            .field("timeout_secs", &self.timeout_duration.as_secs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_chain(failovers: Vec<String>) -> Chain {
        Chain {
            id: 31337,
            name: "Anvil".to_string(),
            rpc_url: "http://127.0.0.1:1".to_string(),
            failover_urls: failovers,
            symbol: "ETH".to_string(),
            decimals: 18,
        }
    }

    #[test]
    fn test_client_creation_is_offline() {
        let client = BlockchainClient::new(
            &local_chain(vec!["not a url".to_string(), "http://127.0.0.1:2".to_string()]),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(client.chain_id(), 31337);
        assert_eq!(client.providers.len(), 2);
    }

    #[test]
    fn test_invalid_primary_url() {
        let mut chain = local_chain(Vec::new());
        chain.rpc_url = "::nope::".to_string();
        assert!(matches!(
            BlockchainClient::new(&chain, Duration::from_secs(1)),
            Err(BlockchainError::Rpc(_))
        ));
    }

    #[tokio::test]
    async fn test_all_providers_fail() {
        let client = BlockchainClient::new(
            &local_chain(vec!["http://127.0.0.1:2".to_string()]),
            Duration::from_secs(2),
        )
        .unwrap();
        assert!(client.get_gas_price().await.is_err());
    }
}
