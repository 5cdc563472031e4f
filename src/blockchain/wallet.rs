//! Signing with a freshly decrypted key.
//!
//! # Security
//! - Signers come from the key store for one operation and are dropped after
//! - Keys are never logged or serialized

use alloy::dyn_abi::TypedData;
use alloy::hex;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;

use crate::blockchain::types::{BlockchainError, BlockchainResult};

/// EIP-191 `personal_sign` over raw message bytes. Returns a 0x-prefixed
/// 65-byte signature.
pub async fn sign_personal_message(
    signer: &PrivateKeySigner,
    message: &[u8],
) -> BlockchainResult<String> {
    let signature = signer
        .sign_message(message)
        .await
        .map_err(|e| BlockchainError::Signing(format!("Message signing failed: {}", e)))?;
    Ok(hex::encode_prefixed(signature.as_bytes()))
}

/// EIP-712 typed data signature.
pub async fn sign_typed_data(
    signer: &PrivateKeySigner,
    typed_data: &TypedData,
) -> BlockchainResult<String> {
    let hash = typed_data
        .eip712_signing_hash()
        .map_err(|e| BlockchainError::Signing(format!("Invalid typed data: {}", e)))?;
    let signature = signer
        .sign_hash(&hash)
        .await
        .map_err(|e| BlockchainError::Signing(format!("Typed data signing failed: {}", e)))?;
    Ok(hex::encode_prefixed(signature.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Signature;
    use std::str::FromStr;

    // Anvil's first account.
    const TEST_PRIVATE_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn signer() -> PrivateKeySigner {
        PrivateKeySigner::from_str(TEST_PRIVATE_KEY).unwrap()
    }

    #[tokio::test]
    async fn test_personal_sign_recovers() {
        let signer = signer();
        let sig_hex = sign_personal_message(&signer, b"Hello, World!").await.unwrap();
        assert!(sig_hex.starts_with("0x"));
        assert_eq!(sig_hex.len(), 2 + 130);

        let bytes = hex::decode(&sig_hex).unwrap();
        let signature = Signature::try_from(bytes.as_slice()).unwrap();
        let recovered = signature
            .recover_address_from_msg(b"Hello, World!".as_slice())
            .unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[tokio::test]
    async fn test_typed_data_sign() {
        let json = serde_json::json!({
            "types": {
                "EIP712Domain": [
                    {"name": "name", "type": "string"},
                    {"name": "chainId", "type": "uint256"}
                ],
                "Mail": [{"name": "contents", "type": "string"}]
            },
            "primaryType": "Mail",
            "domain": {"name": "Test", "chainId": 1},
            "message": {"contents": "hello"}
        });
        let typed: TypedData = serde_json::from_value(json).unwrap();

        let sig_hex = sign_typed_data(&signer(), &typed).await.unwrap();
        assert_eq!(sig_hex.len(), 2 + 130);

        let bytes = hex::decode(&sig_hex).unwrap();
        let signature = Signature::try_from(bytes.as_slice()).unwrap();
        let hash = typed.eip712_signing_hash().unwrap();
        assert_eq!(
            signature.recover_address_from_prehash(&hash).unwrap(),
            signer().address()
        );
    }
}
