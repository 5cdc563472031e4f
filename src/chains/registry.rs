//! Static table of supported chains and chain id normalization.
//!
//! # Design Decisions
//! - Requests arrive from untrusted pages with ids as JSON numbers, decimal
//!   strings or `0x` hex strings; all three normalize to the same `u64`
//! - Anything unparseable, zero or negative normalizes to `None`, never to a
//!   default chain

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::ChainsConfig;

/// An EVM chain the wallet can act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chain {
    pub id: u64,
    pub name: String,
    pub rpc_url: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failover_urls: Vec<String>,
    pub symbol: String,
    pub decimals: u8,
}

impl Chain {
    fn builtin(id: u64, name: &str, rpc_url: &str, symbol: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            rpc_url: rpc_url.to_string(),
            failover_urls: Vec::new(),
            symbol: symbol.to_string(),
            decimals: 18,
        }
    }

    /// The id as a `0x` hex quantity, the form pages expect.
    pub fn id_hex(&self) -> String {
        chain_id_hex(self.id)
    }
}

/// Lookup table of supported chains.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: BTreeMap<u64, Chain>,
}

impl ChainRegistry {
    /// The built-in chain table with public RPC endpoints.
    pub fn builtin() -> Self {
        let chains = [
            Chain::builtin(1, "Ethereum Mainnet", "https://eth.llamarpc.com", "ETH"),
            Chain::builtin(10, "OP Mainnet", "https://mainnet.optimism.io", "ETH"),
            Chain::builtin(56, "BNB Smart Chain", "https://bsc-dataseed.bnbchain.org", "BNB"),
            Chain::builtin(97, "BNB Smart Chain Testnet", "https://data-seed-prebsc-1-s1.bnbchain.org:8545", "tBNB"),
            Chain::builtin(137, "Polygon", "https://polygon-rpc.com", "POL"),
            Chain::builtin(8453, "Base", "https://mainnet.base.org", "ETH"),
            Chain::builtin(42161, "Arbitrum One", "https://arb1.arbitrum.io/rpc", "ETH"),
            Chain::builtin(43114, "Avalanche C-Chain", "https://api.avax.network/ext/bc/C/rpc", "AVAX"),
            Chain::builtin(11155111, "Sepolia", "https://rpc.sepolia.org", "ETH"),
        ];
        Self {
            chains: chains.into_iter().map(|c| (c.id, c)).collect(),
        }
    }

    /// Built-in table with configured endpoint overrides applied.
    ///
    /// Overrides for chains outside the table are ignored; validation
    /// rejects them before this point.
    pub fn from_config(config: &ChainsConfig) -> Self {
        let mut registry = Self::builtin();
        for o in &config.overrides {
            if let Some(chain) = registry.chains.get_mut(&o.chain_id) {
                if let Some(url) = &o.rpc_url {
                    chain.rpc_url = url.clone();
                }
                chain.failover_urls = o.failover_urls.clone();
            }
        }
        registry
    }

    pub fn by_id(&self, id: u64) -> Option<&Chain> {
        self.chains.get(&id)
    }

    pub fn is_supported(&self, id: u64) -> bool {
        self.chains.contains_key(&id)
    }

    /// Normalize `raw` and look it up.
    pub fn resolve(&self, raw: &Value) -> Option<&Chain> {
        resolve_chain_id(raw).and_then(|id| self.by_id(id))
    }

    pub fn all(&self) -> impl Iterator<Item = &Chain> {
        self.chains.values()
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Normalize a chain id given as a JSON number, decimal string or hex string.
pub fn resolve_chain_id(raw: &Value) -> Option<u64> {
    let id = match raw {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => parse_chain_id(s)?,
        _ => return None,
    };
    (id > 0).then_some(id)
}

/// Parse a decimal or `0x`-prefixed hex chain id string.
pub fn parse_chain_id(raw: &str) -> Option<u64> {
    let s = raw.trim();
    let id = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) if !hex.is_empty() => u64::from_str_radix(hex, 16).ok()?,
        Some(_) => return None,
        None if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => s.parse().ok()?,
        None => return None,
    };
    (id > 0).then_some(id)
}

/// Format a chain id as a `0x` hex quantity.
pub fn chain_id_hex(id: u64) -> String {
    format!("{:#x}", id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_accepts_every_encoding() {
        assert_eq!(resolve_chain_id(&json!(56)), Some(56));
        assert_eq!(resolve_chain_id(&json!("56")), Some(56));
        assert_eq!(resolve_chain_id(&json!("0x38")), Some(56));
        assert_eq!(resolve_chain_id(&json!("0X38")), Some(56));
        assert_eq!(resolve_chain_id(&json!(" 0x1 ")), Some(1));
    }

    #[test]
    fn test_resolve_fails_closed() {
        assert_eq!(resolve_chain_id(&json!(0)), None);
        assert_eq!(resolve_chain_id(&json!(-1)), None);
        assert_eq!(resolve_chain_id(&json!(1.5)), None);
        assert_eq!(resolve_chain_id(&json!("0x")), None);
        assert_eq!(resolve_chain_id(&json!("0x0")), None);
        assert_eq!(resolve_chain_id(&json!("-5")), None);
        assert_eq!(resolve_chain_id(&json!("mainnet")), None);
        assert_eq!(resolve_chain_id(&json!("0xffffffffffffffffff")), None);
        assert_eq!(resolve_chain_id(&json!(null)), None);
        assert_eq!(resolve_chain_id(&json!({"chainId": 1})), None);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ChainRegistry::builtin();
        assert!(registry.is_supported(1));
        assert!(registry.is_supported(56));
        assert!(!registry.is_supported(9999));
        assert_eq!(registry.by_id(56).unwrap().symbol, "BNB");
        assert_eq!(registry.resolve(&json!("0x89")).unwrap().name, "Polygon");
        assert!(registry.resolve(&json!("9999")).is_none());
    }

    #[test]
    fn test_hex_formatting() {
        assert_eq!(chain_id_hex(1), "0x1");
        assert_eq!(chain_id_hex(56), "0x38");
        assert_eq!(ChainRegistry::builtin().by_id(137).unwrap().id_hex(), "0x89");
    }

    #[test]
    fn test_config_overrides() {
        let config = ChainsConfig {
            overrides: vec![crate::config::ChainOverride {
                chain_id: 56,
                rpc_url: Some("http://localhost:8545".to_string()),
                failover_urls: vec!["http://localhost:8546".to_string()],
            }],
            ..ChainsConfig::default()
        };
        let registry = ChainRegistry::from_config(&config);
        let bsc = registry.by_id(56).unwrap();
        assert_eq!(bsc.rpc_url, "http://localhost:8545");
        assert_eq!(bsc.failover_urls.len(), 1);
    }
}
