//! The broker: permissioned dispatch and approval resolution.
//!
//! # Data Flow
//! ```text
//! dispatch(method, params, origin, context)
//!     → command.rs (normalize params into a typed command)
//!     → permissions.rs (connection / capability check)
//!     → account + chain resolution
//!     → immediate result, or PendingRequest + approval prompt
//!
//! approve(id, input) / reject(id)
//!     → ledger take (exactly once)
//!     → execute (connect, sign, send)
//!     → response to the originating context, events to tabs
//! ```

use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::blockchain::{wallet, FeeTier, TransactionPreparer};
use crate::broker::approval::{ApprovalOutcome, ApprovalStage, ApprovalSurface};
use crate::broker::command::{RpcCommand, TransactionCall};
use crate::broker::contexts::{ContextHub, ContextMessage, ContextRef};
use crate::broker::error::ProviderError;
use crate::broker::ledger::{PendingAction, PendingRequest, PendingRequestLedger};
use crate::broker::permissions::{self, MethodPolicy, Requirement};
use crate::chains::{chain_id_hex, resolve_chain_id, ActiveChain, ChainRegistry};
use crate::connections::{normalize_origin, Capability, Connection, ConnectionRegistry};
use crate::observability::metrics;
use crate::session::{SessionError, SessionLockManager};
use crate::vault::cipher::unix_now;
use crate::vault::{KeyStore, KeyStoreError, VaultError};

/// An inbound provider call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub origin: String,
    pub context: ContextRef,
}

/// What `dispatch` hands back to the caller right away.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Result(Value),
    /// The final answer arrives later as a response message.
    Pending { request_id: Uuid },
}

/// The user's decision input, typed per request kind.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalInput {
    /// Connect or permission requests. Missing fields take the defaults:
    /// every wallet account, and every capability (or the requested ones).
    Connect {
        #[serde(default)]
        accounts: Option<Vec<Address>>,
        #[serde(default)]
        capabilities: Option<BTreeSet<Capability>>,
    },
    Transaction {
        #[serde(default)]
        tier: FeeTier,
        password: SecretString,
    },
    Sign { password: SecretString },
}

impl ApprovalInput {
    fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Transaction { .. } => "transaction",
            Self::Sign { .. } => "sign",
        }
    }
}

/// Errors returned to the approval surface.
///
/// Except for `Execution`, the pending request stays in the ledger and the
/// page has not been answered.
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("unknown request id {0}")]
    NotFound(Uuid),

    #[error("wallet is locked")]
    Locked,

    #[error("incorrect password")]
    IncorrectPassword,

    #[error("too many failed attempts, try again in {0}s")]
    LockedOut(u64),

    #[error("expected {expected} approval input, got {got}")]
    InputMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("{0}")]
    Invalid(String),

    /// The request was resolved with this error.
    #[error(transparent)]
    Execution(ProviderError),
}

impl From<ApprovalError> for ProviderError {
    fn from(e: ApprovalError) -> Self {
        match e {
            ApprovalError::NotFound(_)
            | ApprovalError::InputMismatch { .. }
            | ApprovalError::Invalid(_) => ProviderError::invalid_params(e.to_string()),
            ApprovalError::Locked
            | ApprovalError::IncorrectPassword
            | ApprovalError::LockedOut(_) => ProviderError::unauthorized(e.to_string()),
            ApprovalError::Execution(inner) => inner,
        }
    }
}

impl From<SessionError> for ApprovalError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Locked => Self::Locked,
            SessionError::IncorrectPassword => Self::IncorrectPassword,
            SessionError::LockedOut { remaining_secs } => Self::LockedOut(remaining_secs),
            SessionError::NoKeys => Self::Invalid(e.to_string()),
            SessionError::KeyStore(inner) => Self::Execution(inner.into()),
        }
    }
}

/// Shared handles the broker works with.
pub struct BrokerParts {
    pub keys: Arc<KeyStore>,
    pub chains: Arc<ChainRegistry>,
    pub active_chain: Arc<ActiveChain>,
    pub connections: Arc<ConnectionRegistry>,
    pub session: Arc<SessionLockManager>,
    pub preparer: Arc<TransactionPreparer>,
    pub contexts: Arc<ContextHub>,
    pub surface: Arc<dyn ApprovalSurface>,
}

pub struct Broker {
    keys: Arc<KeyStore>,
    chains: Arc<ChainRegistry>,
    active_chain: Arc<ActiveChain>,
    connections: Arc<ConnectionRegistry>,
    session: Arc<SessionLockManager>,
    preparer: Arc<TransactionPreparer>,
    contexts: Arc<ContextHub>,
    surface: Arc<dyn ApprovalSurface>,
    ledger: PendingRequestLedger,
}

impl Broker {
    pub fn new(parts: BrokerParts) -> Self {
        Self {
            keys: parts.keys,
            chains: parts.chains,
            active_chain: parts.active_chain,
            connections: parts.connections,
            session: parts.session,
            preparer: parts.preparer,
            contexts: parts.contexts,
            surface: parts.surface,
            ledger: PendingRequestLedger::new(),
        }
    }

    pub fn ledger(&self) -> &PendingRequestLedger {
        &self.ledger
    }

    pub fn contexts(&self) -> &Arc<ContextHub> {
        &self.contexts
    }

    /// Handle one provider call.
    pub async fn dispatch(&self, request: BrokerRequest) -> Result<DispatchOutcome, ProviderError> {
        let label = permissions::policy(&request.method)
            .map(|_| request.method.clone())
            .unwrap_or_else(|| "unsupported".to_string());

        let outcome = self.dispatch_inner(request).await;
        let outcome_label = match &outcome {
            Ok(DispatchOutcome::Result(_)) => "result",
            Ok(DispatchOutcome::Pending { .. }) => "pending",
            Err(_) => "error",
        };
        metrics::record_rpc_request(&label, outcome_label);
        outcome
    }

    async fn dispatch_inner(&self, request: BrokerRequest) -> Result<DispatchOutcome, ProviderError> {
        let origin = normalize_origin(&request.origin)?;
        let policy = permissions::policy(&request.method)
            .ok_or_else(|| ProviderError::method_not_found(&request.method))?;
        let command = RpcCommand::parse(&request.method, &request.params)?;

        let connection = self.connections.get(&origin);
        match policy.requirement {
            Requirement::Public => {}
            Requirement::Connection => {
                if connection.is_none() {
                    return Err(not_connected(&origin));
                }
            }
            Requirement::Capability(capability) => {
                let connection = connection.as_ref().ok_or_else(|| not_connected(&origin))?;
                if !connection.has(capability) {
                    tracing::info!(origin = %origin, %capability, method = %request.method, "Missing permission");
                    return Err(ProviderError::unauthorized(format!(
                        "missing permission: {capability}"
                    )));
                }
            }
        }

        let step = match command {
            RpcCommand::Accounts => Step::Done(self.visible_accounts(connection.as_ref())),
            RpcCommand::ChainId => Step::Done(json!(chain_id_hex(self.active_chain.get()))),
            RpcCommand::NetVersion => Step::Done(json!(self.active_chain.get().to_string())),
            RpcCommand::GetPermissions => {
                Step::Done(connection.as_ref().map(permissions_json).unwrap_or_else(|| json!([])))
            }
            RpcCommand::RequestAccounts => match connection.as_ref() {
                Some(connection)
                    if self.session.is_unlocked() && connection.has(Capability::EthAccounts) =>
                {
                    Step::Done(accounts_json(&connection.accounts))
                }
                _ => Step::approve(None, None, PendingAction::Connect),
            },
            RpcCommand::RequestPermissions { capabilities } => {
                Step::approve(None, None, PendingAction::RequestPermissions { capabilities })
            }
            RpcCommand::SendTransaction(call) => {
                let account = self.connections.resolve_account(&origin, call.from.as_deref())?;
                let chain_id = self.check_transaction_chain(&call)?;
                let prepared = self
                    .preparer
                    .prepare_call(chain_id, account, call.to, call.value, call.data)?;
                Step::approve(
                    Some(account),
                    Some(Capability::SendTransaction),
                    PendingAction::SendTransaction { prepared },
                )
            }
            RpcCommand::PersonalSign { message, account } => {
                let account = self.connections.resolve_account(&origin, account.as_deref())?;
                Step::approve(
                    Some(account),
                    Some(Capability::SignMessage),
                    PendingAction::SignMessage { account, message },
                )
            }
            RpcCommand::SignTypedData {
                account,
                typed_data,
            } => {
                let account = self.connections.resolve_account(&origin, account.as_deref())?;
                let active = self.active_chain.get();
                if let Some(domain_chain) = typed_data.domain.chain_id {
                    if domain_chain != U256::from(active) {
                        return Err(ProviderError::invalid_params(format!(
                            "typed data chainId {domain_chain} does not match the active chain {active}"
                        )));
                    }
                }
                Step::approve(
                    Some(account),
                    Some(Capability::SignTypedData),
                    PendingAction::SignTypedData {
                        account,
                        typed_data,
                    },
                )
            }
            RpcCommand::SwitchChain { chain_id } => {
                self.switch_chain(&origin, &chain_id)?;
                Step::Done(Value::Null)
            }
            RpcCommand::RevokePermissions => {
                self.disconnect(&origin)?;
                Step::Done(Value::Null)
            }
        };

        match step {
            Step::Done(value) => Ok(DispatchOutcome::Result(value)),
            Step::Approve(plan) => self.open_pending(&request, policy, origin, plan),
        }
    }

    /// Approve a pending request and carry it out.
    ///
    /// Returns the result delivered to the page.
    pub async fn approve(&self, id: Uuid, input: ApprovalInput) -> Result<Value, ApprovalError> {
        let entry = self.ledger.get(&id).ok_or(ApprovalError::NotFound(id))?;

        let expected = match &entry.action {
            PendingAction::Connect | PendingAction::RequestPermissions { .. } => "connect",
            PendingAction::SendTransaction { .. } => "transaction",
            PendingAction::SignMessage { .. } | PendingAction::SignTypedData { .. } => "sign",
        };
        if expected != input.kind() {
            return Err(ApprovalError::InputMismatch {
                expected,
                got: input.kind(),
            });
        }
        self.session.ensure_unlocked()?;

        let execution = match (&entry.action, input) {
            (
                PendingAction::Connect,
                ApprovalInput::Connect {
                    accounts,
                    capabilities,
                },
            ) => {
                let grant = self.connect_grant(&entry, accounts, capabilities.unwrap_or_else(Capability::defaults))?;
                self.take(id)?;
                self.execute_connect(&entry, grant, false)
            }
            (
                PendingAction::RequestPermissions { capabilities: requested },
                ApprovalInput::Connect {
                    accounts,
                    capabilities,
                },
            ) => {
                let granted = capabilities.unwrap_or_else(|| requested.clone());
                let grant = self.connect_grant(&entry, accounts, granted)?;
                self.take(id)?;
                self.execute_connect(&entry, grant, true)
            }
            (PendingAction::SendTransaction { prepared }, ApprovalInput::Transaction { tier, password }) => {
                let candidate = password.clone();
                let verified = self
                    .keys
                    .run_blocking(move |keys| keys.verify_any(&candidate))
                    .await
                    .map_err(key_error)?;
                if !verified {
                    return Err(ApprovalError::IncorrectPassword);
                }
                self.take(id)?;
                self.preparer
                    .sign_and_broadcast(prepared, tier, &password)
                    .await
                    .map(|hash| json!(hash.to_string()))
                    .map_err(|e| ProviderError::internal(e.to_string()))
            }
            (PendingAction::SignMessage { account, message }, ApprovalInput::Sign { password }) => {
                let signer = self.decrypt_signer(*account, password).await?;
                self.take(id)?;
                self.session.touch();
                wallet::sign_personal_message(&signer, message)
                    .await
                    .map(|sig| json!(sig))
                    .map_err(|e| ProviderError::internal(e.to_string()))
            }
            (
                PendingAction::SignTypedData {
                    account,
                    typed_data,
                },
                ApprovalInput::Sign { password },
            ) => {
                let signer = self.decrypt_signer(*account, password).await?;
                self.take(id)?;
                self.session.touch();
                wallet::sign_typed_data(&signer, typed_data)
                    .await
                    .map(|sig| json!(sig))
                    .map_err(|e| ProviderError::internal(e.to_string()))
            }
            (_, input) => {
                return Err(ApprovalError::InputMismatch {
                    expected,
                    got: input.kind(),
                })
            }
        };

        let outcome = if execution.is_ok() {
            ApprovalOutcome::Approved
        } else {
            ApprovalOutcome::Failed
        };
        self.resolve(&entry, execution.clone(), outcome);
        execution.map_err(ApprovalError::Execution)
    }

    /// Reject a pending request. The page receives a user-rejected error.
    pub fn reject(&self, id: Uuid) -> Result<(), ApprovalError> {
        let entry = self.take(id)?;
        self.resolve(&entry, Err(ProviderError::user_rejected()), ApprovalOutcome::Rejected);
        Ok(())
    }

    /// Unlock from the prompt of a pending request, then move that same
    /// request on to review.
    pub async fn unlock_for_request(
        &self,
        id: Uuid,
        password: &SecretString,
    ) -> Result<(), ApprovalError> {
        let entry = self.ledger.get(&id).ok_or(ApprovalError::NotFound(id))?;
        if !self.session.is_unlocked() {
            self.session.unlock(password).await?;
        }
        self.surface.open(&entry, ApprovalStage::Review);
        Ok(())
    }

    /// Unlock outside any request.
    pub async fn unlock(&self, password: &SecretString) -> Result<(), SessionError> {
        self.session.unlock(password).await
    }

    /// Lock the wallet. Pages see no accounts until it is unlocked again.
    pub fn lock(&self) {
        self.session.lock();
        self.emit_accounts_changed();
    }

    /// Switch the wallet-wide active chain.
    pub fn switch_chain(&self, origin: &str, raw: &Value) -> Result<(), ProviderError> {
        let chain_id = resolve_chain_id(raw)
            .ok_or_else(|| ProviderError::invalid_params(format!("invalid chain id {raw}")))?;
        if !self.chains.is_supported(chain_id) {
            return Err(ProviderError::invalid_params(format!(
                "unsupported chain id {}",
                chain_id_hex(chain_id)
            )));
        }

        if self.active_chain.get() != chain_id {
            self.active_chain.set(chain_id)?;
            tracing::info!(origin = %origin, chain_id, "Active chain switched");
            self.contexts
                .broadcast_all(ContextMessage::event("chainChanged", json!(chain_id_hex(chain_id))));
        }
        if self.connections.get(origin).is_some() {
            self.connections.set_chain(origin, chain_id)?;
        }
        Ok(())
    }

    /// Remove the connection for `origin`.
    pub fn disconnect(&self, origin: &str) -> Result<Option<Connection>, ProviderError> {
        let removed = self.connections.remove(origin)?;
        if let Some(connection) = &removed {
            tracing::info!(origin = %connection.origin, "Origin disconnected");
            self.broadcast_disconnect(connection);
            self.emit_accounts_changed();
        }
        Ok(removed)
    }

    /// Remove every connection.
    pub fn disconnect_all(&self) -> Result<Vec<Connection>, ProviderError> {
        let removed = self.connections.remove_all()?;
        for connection in &removed {
            self.broadcast_disconnect(connection);
        }
        self.emit_accounts_changed();
        tracing::info!(count = removed.len(), "All origins disconnected");
        Ok(removed)
    }

    /// `disconnect` goes to the removed origin's contexts in every tab.
    fn broadcast_disconnect(&self, connection: &Connection) {
        let event = ContextMessage::event(
            "disconnect",
            json!(ProviderError::disconnected(format!(
                "{} was disconnected from the wallet",
                connection.origin
            ))),
        );
        self.contexts
            .broadcast_with(|_, origin| (origin == connection.origin).then(|| event.clone()));
    }

    /// Send every context the accounts visible to its own origin.
    fn emit_accounts_changed(&self) {
        self.contexts.broadcast_with(|_, origin| {
            let connection = self.connections.get(origin);
            Some(ContextMessage::event(
                "accountsChanged",
                self.visible_accounts(connection.as_ref()),
            ))
        });
    }

    async fn decrypt_signer(
        &self,
        account: Address,
        password: SecretString,
    ) -> Result<PrivateKeySigner, ApprovalError> {
        self.keys
            .run_blocking(move |keys| keys.decrypt_signer(&account, &password))
            .await
            .map_err(key_error)
    }

    fn visible_accounts(&self, connection: Option<&Connection>) -> Value {
        match connection {
            Some(connection)
                if self.session.is_unlocked() && connection.has(Capability::EthAccounts) =>
            {
                accounts_json(&connection.accounts)
            }
            _ => json!([]),
        }
    }

    fn check_transaction_chain(&self, call: &TransactionCall) -> Result<u64, ProviderError> {
        let active = self.active_chain.get();
        let Some(raw) = &call.chain_id else {
            return Ok(active);
        };
        let requested = resolve_chain_id(raw)
            .ok_or_else(|| ProviderError::invalid_params(format!("invalid chain id {raw}")))?;
        if !self.chains.is_supported(requested) {
            return Err(ProviderError::invalid_params(format!(
                "unsupported chain id {}",
                chain_id_hex(requested)
            )));
        }
        if requested != active {
            return Err(ProviderError::invalid_params(format!(
                "chain mismatch: transaction targets {} but the active chain is {}",
                chain_id_hex(requested),
                chain_id_hex(active)
            )));
        }
        Ok(active)
    }

    fn open_pending(
        &self,
        request: &BrokerRequest,
        policy: MethodPolicy,
        origin: String,
        plan: ApprovalPlan,
    ) -> Result<DispatchOutcome, ProviderError> {
        if !policy.approval {
            tracing::error!(method = %request.method, "Approval requested for a method without approval");
            return Err(ProviderError::internal(format!(
                "{} does not take approval",
                request.method
            )));
        }

        let pending = PendingRequest {
            id: Uuid::new_v4(),
            method: request.method.clone(),
            params: request.params.clone(),
            origin,
            created_at: unix_now(),
            context: request.context.clone(),
            requested_account: plan.account,
            required_permission: plan.permission,
            action: plan.action,
        };
        let request_id = pending.id;
        let stage = if self.session.is_unlocked() {
            ApprovalStage::Review
        } else {
            ApprovalStage::Unlock
        };

        self.ledger.insert(pending.clone());
        self.surface.open(&pending, stage);
        Ok(DispatchOutcome::Pending { request_id })
    }

    fn take(&self, id: Uuid) -> Result<PendingRequest, ApprovalError> {
        self.ledger.take(&id).ok_or(ApprovalError::NotFound(id))
    }

    fn resolve(
        &self,
        entry: &PendingRequest,
        outcome: Result<Value, ProviderError>,
        decision: ApprovalOutcome,
    ) {
        let label = match decision {
            ApprovalOutcome::Approved => "approved",
            ApprovalOutcome::Rejected => "rejected",
            ApprovalOutcome::Failed => "failed",
        };
        metrics::record_approval(label);
        tracing::info!(
            request_id = %entry.id,
            method = %entry.method,
            origin = %entry.origin,
            outcome = label,
            "Pending request resolved"
        );
        self.contexts.deliver(
            &entry.context,
            &entry.origin,
            ContextMessage::response(entry.id, outcome),
        );
        self.surface.close(entry.id, decision);
    }

    fn connect_grant(
        &self,
        entry: &PendingRequest,
        accounts: Option<Vec<Address>>,
        capabilities: BTreeSet<Capability>,
    ) -> Result<ConnectGrant, ApprovalError> {
        let accounts = accounts.unwrap_or_else(|| self.keys.addresses());
        if accounts.is_empty() {
            return Err(ApprovalError::Invalid("no accounts selected".to_string()));
        }
        if let Some(unknown) = accounts.iter().find(|a| !self.keys.contains(a)) {
            return Err(ApprovalError::Invalid(format!("unknown account {unknown}")));
        }
        if capabilities.is_empty() {
            return Err(ApprovalError::Invalid("no permissions selected".to_string()));
        }

        let mut permissions = capabilities;
        if let Some(existing) = self.connections.get(&entry.origin) {
            permissions.extend(existing.permissions);
        }
        Ok(ConnectGrant {
            accounts,
            permissions,
        })
    }

    fn execute_connect(
        &self,
        entry: &PendingRequest,
        grant: ConnectGrant,
        permissions_request: bool,
    ) -> Result<Value, ProviderError> {
        let previous = self.connections.get(&entry.origin);
        let chain_id = self.active_chain.get();
        let connection =
            self.connections
                .upsert(&entry.origin, grant.accounts, grant.permissions, chain_id)?;
        tracing::info!(
            origin = %connection.origin,
            accounts = connection.accounts.len(),
            "Origin connected"
        );

        if previous.is_none() {
            self.contexts.broadcast_tab(
                entry.context.tab_id,
                ContextMessage::event("connect", json!({ "chainId": chain_id_hex(chain_id) })),
            );
        }
        if previous.map(|p| p.accounts) != Some(connection.accounts.clone()) {
            self.emit_accounts_changed();
        }

        Ok(if permissions_request {
            permissions_json(&connection)
        } else {
            accounts_json(&connection.accounts)
        })
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("pending", &self.ledger.len())
            .field("contexts", &self.contexts.len())
            .finish()
    }
}

/// Where `dispatch` lands once a command is checked.
enum Step {
    Done(Value),
    Approve(ApprovalPlan),
}

impl Step {
    fn approve(
        account: Option<Address>,
        permission: Option<Capability>,
        action: PendingAction,
    ) -> Self {
        Self::Approve(ApprovalPlan {
            account,
            permission,
            action,
        })
    }
}

struct ApprovalPlan {
    account: Option<Address>,
    permission: Option<Capability>,
    action: PendingAction,
}

struct ConnectGrant {
    accounts: Vec<Address>,
    permissions: BTreeSet<Capability>,
}

fn not_connected(origin: &str) -> ProviderError {
    ProviderError::unauthorized(format!("origin {origin} is not connected"))
}

fn key_error(e: KeyStoreError) -> ApprovalError {
    match e {
        KeyStoreError::Vault(VaultError::Authentication) => ApprovalError::IncorrectPassword,
        other => ApprovalError::Invalid(other.to_string()),
    }
}

fn accounts_json(accounts: &[Address]) -> Value {
    json!(accounts.iter().map(|a| a.to_string()).collect::<Vec<_>>())
}

/// EIP-2255 style permission list.
fn permissions_json(connection: &Connection) -> Value {
    json!(connection
        .permissions
        .iter()
        .map(|capability| json!({
            "parentCapability": capability.as_str(),
            "invoker": connection.origin,
            "date": connection.connected_at * 1000,
        }))
        .collect::<Vec<_>>())
}
