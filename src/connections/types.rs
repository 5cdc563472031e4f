//! Connection and capability types.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A right an origin can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// See the connected accounts.
    EthAccounts,
    /// Ask for transactions to be signed and broadcast.
    SendTransaction,
    /// Ask for personal messages to be signed.
    SignMessage,
    /// Ask for EIP-712 typed data to be signed.
    SignTypedData,
    /// Switch the wallet's active chain.
    SwitchChain,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::EthAccounts,
        Capability::SendTransaction,
        Capability::SignMessage,
        Capability::SignTypedData,
        Capability::SwitchChain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EthAccounts => "eth_accounts",
            Self::SendTransaction => "send_transaction",
            Self::SignMessage => "sign_message",
            Self::SignTypedData => "sign_typed_data",
            Self::SwitchChain => "switch_chain",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    /// Capabilities granted by a connect approval that does not narrow them.
    pub fn defaults() -> BTreeSet<Capability> {
        Self::ALL.into_iter().collect()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The approved relationship between one origin and the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Normalized origin (scheme + host + port).
    pub origin: String,
    /// Granted accounts, first is the default.
    pub accounts: Vec<Address>,
    pub permissions: BTreeSet<Capability>,
    pub chain_id: u64,
    /// Seconds since the Unix epoch.
    pub connected_at: u64,
}

impl Connection {
    pub fn has(&self, capability: Capability) -> bool {
        self.permissions.contains(&capability)
    }
}
