//! Chain-facing types and error definitions.

use alloy::sol;
use thiserror::Error;

/// Errors that can occur during blockchain operations.
#[derive(Debug, Error)]
pub enum BlockchainError {
    /// RPC connection or request failed on every provider.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),

    /// No chain with this id is configured.
    #[error("unsupported chain id {0}")]
    UnsupportedChain(u64),

    /// The node answered with something we could not interpret.
    #[error("invalid RPC response: {0}")]
    InvalidResponse(String),

    /// Building or signing a payload failed.
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Result type for blockchain operations.
pub type BlockchainResult<T> = Result<T, BlockchainError>;

sol! {
    /// Minimal ERC-20 surface used for token sends and balance checks.
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
        function balanceOf(address owner) external view returns (uint256);
        function decimals() external view returns (uint8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, U256};
    use alloy::sol_types::SolCall;

    #[test]
    fn test_transfer_selector() {
        let call = IERC20::transferCall {
            to: address!("70997970c51812dc3a010c7d01b50e0d17dc79c8"),
            amount: U256::from(1u64),
        };
        let data = call.abi_encode();
        assert_eq!(&data[..4], &[0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(data.len(), 4 + 32 + 32);
    }

    #[test]
    fn test_error_display() {
        let err = BlockchainError::Timeout(10);
        assert_eq!(err.to_string(), "RPC timeout after 10 seconds");
        assert_eq!(
            BlockchainError::UnsupportedChain(9999).to_string(),
            "unsupported chain id 9999"
        );
    }
}
