//! Chain RPC seam.
//!
//! Everything above this module talks to chains through [`ChainRpc`], so the
//! broker and transaction preparer can be exercised without a node.

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::blockchain::client::BlockchainClient;
use crate::blockchain::types::{BlockchainError, BlockchainResult, IERC20};
use crate::chains::ChainRegistry;

/// Chain access needed by the wallet.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn balance(&self, chain_id: u64, address: Address) -> BlockchainResult<U256>;

    async fn token_balance(
        &self,
        chain_id: u64,
        token: Address,
        owner: Address,
    ) -> BlockchainResult<U256>;

    async fn token_decimals(&self, chain_id: u64, token: Address) -> BlockchainResult<u8>;

    async fn gas_price(&self, chain_id: u64) -> BlockchainResult<u128>;

    async fn estimate_gas(&self, chain_id: u64, tx: &TransactionRequest) -> BlockchainResult<u64>;

    async fn nonce(&self, chain_id: u64, address: Address) -> BlockchainResult<u64>;

    async fn send_raw(&self, chain_id: u64, raw: Bytes) -> BlockchainResult<TxHash>;
}

/// [`ChainRpc`] over alloy HTTP providers, one lazily created client per chain.
pub struct RpcGateway {
    registry: Arc<ChainRegistry>,
    clients: DashMap<u64, BlockchainClient>,
    rpc_timeout: Duration,
}

impl RpcGateway {
    pub fn new(registry: Arc<ChainRegistry>, rpc_timeout: Duration) -> Self {
        Self {
            registry,
            clients: DashMap::new(),
            rpc_timeout,
        }
    }

    fn client(&self, chain_id: u64) -> BlockchainResult<BlockchainClient> {
        if let Some(client) = self.clients.get(&chain_id) {
            return Ok(client.clone());
        }
        let chain = self
            .registry
            .by_id(chain_id)
            .ok_or(BlockchainError::UnsupportedChain(chain_id))?;
        let client = BlockchainClient::new(chain, self.rpc_timeout)?;
        self.clients.insert(chain_id, client.clone());
        Ok(client)
    }

    async fn read_word(&self, chain_id: u64, to: Address, data: Vec<u8>) -> BlockchainResult<U256> {
        let request = TransactionRequest::default().with_to(to).with_input(data);
        let output = self.client(chain_id)?.call(&request).await?;
        decode_word(&output)
    }
}

#[async_trait]
impl ChainRpc for RpcGateway {
    async fn balance(&self, chain_id: u64, address: Address) -> BlockchainResult<U256> {
        self.client(chain_id)?.get_balance(address).await
    }

    async fn token_balance(
        &self,
        chain_id: u64,
        token: Address,
        owner: Address,
    ) -> BlockchainResult<U256> {
        let data = IERC20::balanceOfCall { owner }.abi_encode();
        self.read_word(chain_id, token, data).await
    }

    async fn token_decimals(&self, chain_id: u64, token: Address) -> BlockchainResult<u8> {
        let data = IERC20::decimalsCall {}.abi_encode();
        let word = self.read_word(chain_id, token, data).await?;
        u8::try_from(word)
            .map_err(|_| BlockchainError::InvalidResponse(format!("decimals out of range: {word}")))
    }

    async fn gas_price(&self, chain_id: u64) -> BlockchainResult<u128> {
        self.client(chain_id)?.get_gas_price().await
    }

    async fn estimate_gas(&self, chain_id: u64, tx: &TransactionRequest) -> BlockchainResult<u64> {
        self.client(chain_id)?.estimate_gas(tx).await
    }

    async fn nonce(&self, chain_id: u64, address: Address) -> BlockchainResult<u64> {
        self.client(chain_id)?.get_transaction_count(address).await
    }

    async fn send_raw(&self, chain_id: u64, raw: Bytes) -> BlockchainResult<TxHash> {
        self.client(chain_id)?.send_raw_transaction(&raw).await
    }
}

impl std::fmt::Debug for RpcGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcGateway")
            .field("clients", &self.clients.len())
            .field("timeout_secs", &self.rpc_timeout.as_secs())
            .finish()
    }
}

/// First 32-byte ABI word of a call result.
fn decode_word(output: &[u8]) -> BlockchainResult<U256> {
    if output.len() < 32 {
        return Err(BlockchainError::InvalidResponse(format!(
            "expected a 32-byte word, got {} bytes",
            output.len()
        )));
    }
    Ok(U256::from_be_slice(&output[..32]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_word() {
        let mut word = [0u8; 32];
        word[31] = 18;
        assert_eq!(decode_word(&word).unwrap(), U256::from(18u64));
        assert!(decode_word(&word[..8]).is_err());
    }

    #[test]
    fn test_unknown_chain_is_rejected_without_io() {
        let gateway = RpcGateway::new(Arc::new(ChainRegistry::builtin()), Duration::from_secs(1));
        assert!(matches!(
            gateway.client(9999),
            Err(BlockchainError::UnsupportedChain(9999))
        ));
        assert!(gateway.client(1).is_ok());
        assert_eq!(gateway.clients.len(), 1);
    }
}
