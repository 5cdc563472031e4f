//! Transaction preparation, fee presets, signing and broadcast.
//!
//! # Responsibilities
//! - Validate a send (address shape, positive amount, known balance)
//! - Estimate gas with a safety margin and build three fee presets
//! - After approval: re-check the live balance, decrypt the key, sign a
//!   legacy transaction and broadcast it
//!
//! # Security
//! - Signing requires an unlocked session; this module never unlocks
//! - The decrypted signer lives only inside `sign_and_broadcast`

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::utils::{format_units, parse_units, ParseUnits};
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::blockchain::gateway::ChainRpc;
use crate::blockchain::types::{BlockchainError, IERC20};
use crate::chains::{Chain, ChainRegistry};
use crate::config::TransactionConfig;
use crate::observability::metrics;
use crate::session::{SessionError, SessionLockManager};
use crate::vault::{KeyStore, KeyStoreError};

/// Errors raised while preparing or sending a transaction.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("invalid amount '{0}'")]
    InvalidAmount(String),

    #[error("amount must be greater than zero")]
    NonPositiveAmount,

    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: String, available: String },

    #[error("unsupported chain id {0}")]
    UnsupportedChain(u64),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    #[error(transparent)]
    Blockchain(#[from] BlockchainError),
}

/// Fee-rate tier chosen by the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeTier {
    Slow,
    #[default]
    Standard,
    Fast,
}

impl FeeTier {
    pub const ALL: [FeeTier; 3] = [FeeTier::Slow, FeeTier::Standard, FeeTier::Fast];

    fn index(self) -> usize {
        match self {
            Self::Slow => 0,
            Self::Standard => 1,
            Self::Fast => 2,
        }
    }
}

/// ERC-20 leg of a token send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransfer {
    pub contract: Address,
    pub recipient: Address,
    pub amount: U256,
    pub decimals: u8,
}

/// A validated, unsigned send. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedTransaction {
    pub chain_id: u64,
    pub from: Address,
    /// Transaction target: the recipient, or the token contract.
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub token: Option<TokenTransfer>,
    /// Human-readable amount, e.g. `1.5`.
    pub formatted_amount: String,
    /// Native symbol for native sends.
    pub symbol: Option<String>,
}

impl PreparedTransaction {
    fn request(&self) -> TransactionRequest {
        TransactionRequest::default()
            .with_from(self.from)
            .with_to(self.to)
            .with_value(self.value)
            .with_input(self.data.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeePreset {
    pub tier: FeeTier,
    /// Gas price in wei.
    pub gas_price: u128,
    /// `gas_limit × gas_price`, in wei.
    pub total_fee: U256,
    pub total_fee_formatted: String,
    pub confirmation_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeEstimate {
    pub gas_limit: u64,
    /// False when the node could not estimate and a fallback limit is used.
    pub gas_limit_estimated: bool,
    pub presets: [FeePreset; 3],
    pub nonce: u64,
}

impl FeeEstimate {
    pub fn preset(&self, tier: FeeTier) -> &FeePreset {
        &self.presets[tier.index()]
    }
}

/// Builds, prices and (after approval) signs transactions.
pub struct TransactionPreparer {
    rpc: Arc<dyn ChainRpc>,
    chains: Arc<ChainRegistry>,
    keys: Arc<KeyStore>,
    session: Arc<SessionLockManager>,
    config: TransactionConfig,
}

impl TransactionPreparer {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        chains: Arc<ChainRegistry>,
        keys: Arc<KeyStore>,
        session: Arc<SessionLockManager>,
        config: TransactionConfig,
    ) -> Self {
        Self {
            rpc,
            chains,
            keys,
            session,
            config,
        }
    }

    /// Validate a wallet-initiated send of `amount` (decimal, in whole
    /// units) of the native asset, or of `token` when given.
    pub async fn prepare(
        &self,
        chain_id: u64,
        from: Address,
        to: &str,
        amount: &str,
        token: Option<&str>,
    ) -> Result<PreparedTransaction, TransactionError> {
        let chain = self.chain(chain_id)?;
        let recipient = parse_address(to)?;

        match token.map(str::trim).filter(|t| !t.is_empty()) {
            None => {
                let value = parse_amount(amount, chain.decimals)?;
                let balance = self.rpc.balance(chain_id, from).await?;
                ensure_covers(balance, value, chain.decimals)?;

                Ok(PreparedTransaction {
                    chain_id,
                    from,
                    to: recipient,
                    value,
                    data: Bytes::new(),
                    token: None,
                    formatted_amount: format_amount(value, chain.decimals),
                    symbol: Some(chain.symbol.clone()),
                })
            }
            Some(token) => {
                let contract = parse_address(token)?;
                let decimals = self.rpc.token_decimals(chain_id, contract).await?;
                let amount = parse_amount(amount, decimals)?;
                let balance = self.rpc.token_balance(chain_id, contract, from).await?;
                ensure_covers(balance, amount, decimals)?;

                let data = IERC20::transferCall {
                    to: recipient,
                    amount,
                }
                .abi_encode();

                Ok(PreparedTransaction {
                    chain_id,
                    from,
                    to: contract,
                    value: U256::ZERO,
                    data: data.into(),
                    token: Some(TokenTransfer {
                        contract,
                        recipient,
                        amount,
                        decimals,
                    }),
                    formatted_amount: format_amount(amount, decimals),
                    symbol: None,
                })
            }
        }
    }

    /// Wrap a call supplied by a page (`eth_sendTransaction`).
    pub fn prepare_call(
        &self,
        chain_id: u64,
        from: Address,
        to: Address,
        value: U256,
        data: Bytes,
    ) -> Result<PreparedTransaction, TransactionError> {
        let chain = self.chain(chain_id)?;
        Ok(PreparedTransaction {
            chain_id,
            from,
            to,
            value,
            data,
            token: None,
            formatted_amount: format_amount(value, chain.decimals),
            symbol: Some(chain.symbol.clone()),
        })
    }

    /// Gas limit, three fee presets and the next nonce.
    pub async fn estimate(
        &self,
        prepared: &PreparedTransaction,
    ) -> Result<FeeEstimate, TransactionError> {
        let chain = self.chain(prepared.chain_id)?;
        let chain_id = prepared.chain_id;

        let (gas_limit, gas_limit_estimated) =
            match self.rpc.estimate_gas(chain_id, &prepared.request()).await {
                Ok(estimate) => (
                    estimate.saturating_mul(100 + self.config.gas_limit_margin_percent) / 100,
                    true,
                ),
                Err(e) => {
                    let fallback = if prepared.data.is_empty() {
                        self.config.fallback_native_gas_limit
                    } else {
                        self.config.fallback_call_gas_limit
                    };
                    tracing::warn!(
                        chain_id,
                        error = %e,
                        fallback,
                        "Gas estimation failed, using fallback limit"
                    );
                    (fallback, false)
                }
            };

        let gas_price = self.rpc.gas_price(chain_id).await?;
        let nonce = self.rpc.nonce(chain_id, prepared.from).await?;

        let presets = FeeTier::ALL.map(|tier| {
            let (percent, confirmation_secs) = match tier {
                FeeTier::Slow => (self.config.slow_percent, self.config.slow_confirmation_secs),
                FeeTier::Standard => (
                    self.config.standard_percent,
                    self.config.standard_confirmation_secs,
                ),
                FeeTier::Fast => (self.config.fast_percent, self.config.fast_confirmation_secs),
            };
            let rate = gas_price.saturating_mul(percent as u128) / 100;
            let total_fee = U256::from(rate).saturating_mul(U256::from(gas_limit));
            FeePreset {
                tier,
                gas_price: rate,
                total_fee,
                total_fee_formatted: format_amount(total_fee, chain.decimals),
                confirmation_secs,
            }
        });

        Ok(FeeEstimate {
            gas_limit,
            gas_limit_estimated,
            presets,
            nonce,
        })
    }

    /// Sign `prepared` at the chosen tier and broadcast it.
    ///
    /// The balance is fetched again here, so a send that passed `prepare`
    /// against an older balance can still be refused.
    pub async fn sign_and_broadcast(
        &self,
        prepared: &PreparedTransaction,
        tier: FeeTier,
        password: &SecretString,
    ) -> Result<TxHash, TransactionError> {
        let result = self.sign_and_broadcast_inner(prepared, tier, password).await;
        match &result {
            Ok(hash) => {
                metrics::record_transaction("broadcast");
                tracing::info!(
                    tx_hash = %hash,
                    chain_id = prepared.chain_id,
                    from = %prepared.from,
                    "Transaction broadcast"
                );
            }
            Err(e) => {
                metrics::record_transaction("failed");
                tracing::warn!(chain_id = prepared.chain_id, error = %e, "Transaction not sent");
            }
        }
        result
    }

    async fn sign_and_broadcast_inner(
        &self,
        prepared: &PreparedTransaction,
        tier: FeeTier,
        password: &SecretString,
    ) -> Result<TxHash, TransactionError> {
        self.session.ensure_unlocked()?;

        let estimate = self.estimate(prepared).await?;
        let preset = estimate.preset(tier);
        self.check_live_balance(prepared, preset.total_fee).await?;

        let (from, password) = (prepared.from, password.clone());
        let signer = self
            .keys
            .run_blocking(move |keys| keys.decrypt_signer(&from, &password))
            .await?;
        let wallet = EthereumWallet::from(signer);
        let request = prepared
            .request()
            .with_nonce(estimate.nonce)
            .with_gas_price(preset.gas_price)
            .with_gas_limit(estimate.gas_limit)
            .with_chain_id(prepared.chain_id);
        let envelope = request
            .build(&wallet)
            .await
            .map_err(|e| BlockchainError::Signing(e.to_string()))?;
        drop(wallet);

        let raw = envelope.encoded_2718();
        let hash = self.rpc.send_raw(prepared.chain_id, raw.into()).await?;
        self.session.touch();
        Ok(hash)
    }

    async fn check_live_balance(
        &self,
        prepared: &PreparedTransaction,
        fee: U256,
    ) -> Result<(), TransactionError> {
        let decimals = self.chain(prepared.chain_id)?.decimals;
        let native = self.rpc.balance(prepared.chain_id, prepared.from).await?;

        match &prepared.token {
            None => ensure_covers(native, prepared.value.saturating_add(fee), decimals),
            Some(token) => {
                let held = self
                    .rpc
                    .token_balance(prepared.chain_id, token.contract, prepared.from)
                    .await?;
                ensure_covers(held, token.amount, token.decimals)?;
                ensure_covers(native, fee, decimals)
            }
        }
    }

    fn chain(&self, chain_id: u64) -> Result<&Chain, TransactionError> {
        self.chains
            .by_id(chain_id)
            .ok_or(TransactionError::UnsupportedChain(chain_id))
    }
}

/// Parse a `0x`-prefixed 20-byte hex address.
pub fn parse_address(raw: &str) -> Result<Address, TransactionError> {
    let trimmed = raw.trim();
    if !trimmed.starts_with("0x") || trimmed.len() != 42 {
        return Err(TransactionError::InvalidAddress(raw.to_string()));
    }
    Address::from_str(trimmed).map_err(|_| TransactionError::InvalidAddress(raw.to_string()))
}

/// Parse a positive decimal amount into base units.
pub fn parse_amount(raw: &str, decimals: u8) -> Result<U256, TransactionError> {
    let parsed = parse_units(raw.trim(), decimals)
        .map_err(|_| TransactionError::InvalidAmount(raw.to_string()))?;
    match parsed {
        ParseUnits::U256(value) if !value.is_zero() => Ok(value),
        _ => Err(TransactionError::NonPositiveAmount),
    }
}

/// Format base units as a trimmed decimal string (`1.5`, `2`).
pub fn format_amount(value: U256, decimals: u8) -> String {
    let formatted = format_units(value, decimals).unwrap_or_else(|_| value.to_string());
    if formatted.contains('.') {
        formatted
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        formatted
    }
}

fn ensure_covers(available: U256, needed: U256, decimals: u8) -> Result<(), TransactionError> {
    if needed > available {
        return Err(TransactionError::InsufficientBalance {
            needed: format_amount(needed, decimals),
            available: format_amount(available, decimals),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::types::BlockchainResult;
    use crate::config::SessionConfig;
    use alloy::primitives::keccak256;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const RECIPIENT: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
    const TOKEN: &str = "0xdAC17F958D2ee523a2206206994597C13D831ec7";
    const PASSWORD: &str = "correct horse";

    struct MockRpc {
        balance: Mutex<U256>,
        token_balance: U256,
        gas_price: u128,
        gas_estimate: Option<u64>,
        sent: Mutex<Vec<Bytes>>,
    }

    impl MockRpc {
        fn new(balance: U256) -> Self {
            Self {
                balance: Mutex::new(balance),
                token_balance: U256::from(1_000_000_000u64),
                gas_price: 1_000_000_000,
                gas_estimate: Some(21_000),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChainRpc for MockRpc {
        async fn balance(&self, _: u64, _: Address) -> BlockchainResult<U256> {
            Ok(*self.balance.lock().unwrap())
        }
        async fn token_balance(&self, _: u64, _: Address, _: Address) -> BlockchainResult<U256> {
            Ok(self.token_balance)
        }
        async fn token_decimals(&self, _: u64, _: Address) -> BlockchainResult<u8> {
            Ok(6)
        }
        async fn gas_price(&self, _: u64) -> BlockchainResult<u128> {
            Ok(self.gas_price)
        }
        async fn estimate_gas(&self, _: u64, _: &TransactionRequest) -> BlockchainResult<u64> {
            self.gas_estimate
                .ok_or_else(|| BlockchainError::Rpc("execution reverted".to_string()))
        }
        async fn nonce(&self, _: u64, _: Address) -> BlockchainResult<u64> {
            Ok(7)
        }
        async fn send_raw(&self, _: u64, raw: Bytes) -> BlockchainResult<TxHash> {
            let hash = keccak256(&raw);
            self.sent.lock().unwrap().push(raw);
            Ok(hash)
        }
    }

    fn eth(n: u64) -> U256 {
        U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
    }

    struct Fixture {
        rpc: Arc<MockRpc>,
        session: Arc<SessionLockManager>,
        preparer: TransactionPreparer,
        from: Address,
    }

    fn fixture(rpc: MockRpc) -> Fixture {
        let keys = Arc::new(KeyStore::in_memory());
        let from = keys
            .import_key(KEY, &SecretString::from(PASSWORD.to_string()))
            .unwrap();
        let session = Arc::new(SessionLockManager::new(keys.clone(), &SessionConfig::default()));
        let rpc = Arc::new(rpc);
        let preparer = TransactionPreparer::new(
            rpc.clone(),
            Arc::new(ChainRegistry::builtin()),
            keys,
            session.clone(),
            TransactionConfig::default(),
        );
        Fixture {
            rpc,
            session,
            preparer,
            from,
        }
    }

    fn password() -> SecretString {
        SecretString::from(PASSWORD.to_string())
    }

    #[test]
    fn test_parse_address() {
        assert!(parse_address(RECIPIENT).is_ok());
        assert!(parse_address("70997970C51812dc3A010C7d01b50e0d17dc79C8").is_err());
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("0xZZ997970C51812dc3A010C7d01b50e0d17dc79C8").is_err());
    }

    #[test]
    fn test_parse_and_format_amount() {
        assert_eq!(parse_amount("1.5", 18).unwrap(), eth(3) / U256::from(2u64));
        assert!(matches!(parse_amount("0", 18), Err(TransactionError::NonPositiveAmount)));
        assert!(matches!(parse_amount("-1", 18), Err(TransactionError::NonPositiveAmount)));
        assert!(matches!(parse_amount("abc", 18), Err(TransactionError::InvalidAmount(_))));

        assert_eq!(format_amount(eth(3) / U256::from(2u64), 18), "1.5");
        assert_eq!(format_amount(eth(2), 18), "2");
        assert_eq!(format_amount(U256::from(2_500_000u64), 6), "2.5");
    }

    #[tokio::test]
    async fn test_prepare_native() {
        let f = fixture(MockRpc::new(eth(2)));
        let prepared = f.preparer.prepare(1, f.from, RECIPIENT, "1.5", None).await.unwrap();
        assert_eq!(prepared.value, eth(3) / U256::from(2u64));
        assert!(prepared.data.is_empty());
        assert_eq!(prepared.formatted_amount, "1.5");
        assert_eq!(prepared.symbol.as_deref(), Some("ETH"));

        let err = f.preparer.prepare(1, f.from, RECIPIENT, "3", None).await.unwrap_err();
        assert!(matches!(err, TransactionError::InsufficientBalance { .. }));

        let err = f.preparer.prepare(9999, f.from, RECIPIENT, "1", None).await.unwrap_err();
        assert!(matches!(err, TransactionError::UnsupportedChain(9999)));
    }

    #[tokio::test]
    async fn test_prepare_token() {
        let f = fixture(MockRpc::new(eth(1)));
        let prepared = f
            .preparer
            .prepare(1, f.from, RECIPIENT, "250", Some(TOKEN))
            .await
            .unwrap();
        assert_eq!(prepared.to, parse_address(TOKEN).unwrap());
        assert_eq!(prepared.value, U256::ZERO);
        assert_eq!(&prepared.data[..4], &[0xa9, 0x05, 0x9c, 0xbb]);
        let token = prepared.token.unwrap();
        assert_eq!(token.amount, U256::from(250_000_000u64));
        assert_eq!(token.recipient, parse_address(RECIPIENT).unwrap());

        let err = f
            .preparer
            .prepare(1, f.from, RECIPIENT, "5000", Some(TOKEN))
            .await
            .unwrap_err();
        assert!(matches!(err, TransactionError::InsufficientBalance { .. }));
    }

    #[tokio::test]
    async fn test_estimate_presets() {
        let f = fixture(MockRpc::new(eth(2)));
        let prepared = f.preparer.prepare(1, f.from, RECIPIENT, "1", None).await.unwrap();
        let estimate = f.preparer.estimate(&prepared).await.unwrap();

        assert_eq!(estimate.gas_limit, 25_200);
        assert!(estimate.gas_limit_estimated);
        assert_eq!(estimate.nonce, 7);

        let slow = estimate.preset(FeeTier::Slow);
        let standard = estimate.preset(FeeTier::Standard);
        let fast = estimate.preset(FeeTier::Fast);
        assert_eq!(slow.gas_price, 900_000_000);
        assert_eq!(standard.gas_price, 1_000_000_000);
        assert_eq!(fast.gas_price, 1_200_000_000);
        assert_eq!(standard.total_fee, U256::from(25_200u64 * 1_000_000_000));
        assert!(fast.confirmation_secs < slow.confirmation_secs);
    }

    #[tokio::test]
    async fn test_estimate_fallback() {
        let mut rpc = MockRpc::new(eth(2));
        rpc.gas_estimate = None;
        let f = fixture(rpc);

        let native = f.preparer.prepare(1, f.from, RECIPIENT, "1", None).await.unwrap();
        let estimate = f.preparer.estimate(&native).await.unwrap();
        assert_eq!(estimate.gas_limit, 21_000);
        assert!(!estimate.gas_limit_estimated);

        let token = f
            .preparer
            .prepare(1, f.from, RECIPIENT, "1", Some(TOKEN))
            .await
            .unwrap();
        assert_eq!(f.preparer.estimate(&token).await.unwrap().gas_limit, 100_000);
    }

    #[tokio::test]
    async fn test_sign_and_broadcast() {
        let f = fixture(MockRpc::new(eth(2)));
        f.session.unlock(&password()).await.unwrap();

        let prepared = f.preparer.prepare(1, f.from, RECIPIENT, "1", None).await.unwrap();
        let hash = f
            .preparer
            .sign_and_broadcast(&prepared, FeeTier::Fast, &password())
            .await
            .unwrap();

        let sent = f.rpc.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(hash, keccak256(&sent[0]));
        // Legacy transactions are a bare RLP list.
        assert!(sent[0][0] >= 0xc0);
    }

    #[tokio::test]
    async fn test_requires_unlocked_session() {
        let f = fixture(MockRpc::new(eth(2)));
        let prepared = f.preparer.prepare(1, f.from, RECIPIENT, "1", None).await.unwrap();
        let err = f
            .preparer
            .sign_and_broadcast(&prepared, FeeTier::Standard, &password())
            .await
            .unwrap_err();
        assert!(matches!(err, TransactionError::Session(SessionError::Locked)));
        assert!(f.rpc.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_password_never_signs() {
        let f = fixture(MockRpc::new(eth(2)));
        f.session.unlock(&password()).await.unwrap();
        let prepared = f.preparer.prepare(1, f.from, RECIPIENT, "1", None).await.unwrap();
        let err = f
            .preparer
            .sign_and_broadcast(&prepared, FeeTier::Standard, &SecretString::from("nope nope".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "incorrect password");
        assert!(f.rpc.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_balance_rejected_at_broadcast() {
        let f = fixture(MockRpc::new(eth(2)));
        f.session.unlock(&password()).await.unwrap();

        let prepared = f.preparer.prepare(1, f.from, RECIPIENT, "1.5", None).await.unwrap();
        *f.rpc.balance.lock().unwrap() = eth(1);

        let err = f
            .preparer
            .sign_and_broadcast(&prepared, FeeTier::Standard, &password())
            .await
            .unwrap_err();
        assert!(matches!(err, TransactionError::InsufficientBalance { .. }));
        assert!(f.rpc.sent.lock().unwrap().is_empty());
    }
}
