//! Page-facing error shape.
//!
//! Every failure that reaches a page is a `{code, message}` pair:
//!
//! | code   | meaning                                        |
//! |--------|------------------------------------------------|
//! | 4001   | user rejected the request                      |
//! | 4100   | not connected, missing permission, locked, or  |
//! |        | incorrect password                             |
//! | 4900   | `disconnect` event payload                     |
//! | -32601 | method not supported                           |
//! | -32602 | invalid params, unknown chain, unknown request |
//! | -32603 | internal or execution failure                  |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blockchain::{BlockchainError, TransactionError};
use crate::connections::ConnectionError;
use crate::session::SessionError;
use crate::storage::StorageError;
use crate::vault::{KeyStoreError, VaultError};

pub const USER_REJECTED: i64 = 4001;
pub const UNAUTHORIZED: i64 = 4100;
pub const DISCONNECTED: i64 = 4900;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message} ({code})")]
pub struct ProviderError {
    pub code: i64,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn user_rejected() -> Self {
        Self::new(USER_REJECTED, "User rejected the request.")
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(UNAUTHORIZED, message)
    }

    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::new(DISCONNECTED, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("The method \"{method}\" is not supported."))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }
}

impl From<ConnectionError> for ProviderError {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::InvalidOrigin(_) => Self::invalid_params(e.to_string()),
            ConnectionError::NotConnected(_)
            | ConnectionError::AccountNotAuthorized(_)
            | ConnectionError::NoAccounts => Self::unauthorized(e.to_string()),
            ConnectionError::Storage(_) => Self::internal(e.to_string()),
        }
    }
}

impl From<SessionError> for ProviderError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::KeyStore(inner) => inner.into(),
            other => Self::unauthorized(other.to_string()),
        }
    }
}

impl From<KeyStoreError> for ProviderError {
    fn from(e: KeyStoreError) -> Self {
        match e {
            KeyStoreError::Vault(VaultError::Authentication) => Self::unauthorized(e.to_string()),
            KeyStoreError::InvalidKey
            | KeyStoreError::DuplicateKey(_)
            | KeyStoreError::WeakPassword => Self::invalid_params(e.to_string()),
            KeyStoreError::UnknownAccount(_) | KeyStoreError::NoKeys => {
                Self::unauthorized(e.to_string())
            }
            KeyStoreError::Vault(_) | KeyStoreError::Storage(_) | KeyStoreError::Worker(_) => {
                Self::internal(e.to_string())
            }
        }
    }
}

impl From<TransactionError> for ProviderError {
    fn from(e: TransactionError) -> Self {
        match e {
            TransactionError::InvalidAddress(_)
            | TransactionError::InvalidAmount(_)
            | TransactionError::NonPositiveAmount
            | TransactionError::UnsupportedChain(_) => Self::invalid_params(e.to_string()),
            TransactionError::Session(inner) => inner.into(),
            TransactionError::KeyStore(inner) => inner.into(),
            TransactionError::InsufficientBalance { .. } | TransactionError::Blockchain(_) => {
                Self::internal(e.to_string())
            }
        }
    }
}

impl From<BlockchainError> for ProviderError {
    fn from(e: BlockchainError) -> Self {
        Self::internal(e.to_string())
    }
}

impl From<StorageError> for ProviderError {
    fn from(e: StorageError) -> Self {
        Self::internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(ProviderError::user_rejected()).unwrap();
        assert_eq!(json["code"], 4001);
        assert_eq!(json["message"], "User rejected the request.");
    }

    #[test]
    fn test_vault_errors_are_generic() {
        let err: ProviderError =
            KeyStoreError::Vault(VaultError::Authentication).into();
        assert_eq!(err.code, UNAUTHORIZED);
        assert_eq!(err.message, "incorrect password");

        let err: ProviderError = SessionError::IncorrectPassword.into();
        assert_eq!(err.message, "incorrect password");
    }

    #[test]
    fn test_codes() {
        assert_eq!(ProviderError::from(SessionError::Locked).code, UNAUTHORIZED);
        assert_eq!(
            ProviderError::from(TransactionError::UnsupportedChain(9)).code,
            INVALID_PARAMS
        );
        assert_eq!(
            ProviderError::from(BlockchainError::Rpc("down".into())).code,
            INTERNAL_ERROR
        );
        assert_eq!(ProviderError::method_not_found("eth_foo").code, METHOD_NOT_FOUND);
    }
}
