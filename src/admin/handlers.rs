use alloy::primitives::Address;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::blockchain::FeeTier;
use crate::broker::{ApprovalEvent, ApprovalInput, ApprovalStage, PendingRequest};
use crate::chains::chain_id_hex;
use crate::connections::Connection;
use crate::http::{ApiError, AppState};
use crate::session::SessionStatus;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub locked: bool,
    pub chain_id: String,
    pub accounts: Vec<Address>,
    pub connections: usize,
    pub pending_requests: usize,
    pub page_contexts: usize,
    pub uptime_secs: u64,
}

#[derive(Deserialize)]
pub struct PasswordBody {
    pub password: SecretString,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportKeyBody {
    /// Hex private key. A new key is generated when absent.
    #[serde(default)]
    pub private_key: Option<SecretString>,
    pub password: SecretString,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordBody {
    pub old_password: SecretString,
    pub new_password: SecretString,
}

#[derive(Deserialize)]
pub struct OriginQuery {
    pub origin: Option<String>,
}

/// A wallet-initiated send on the active chain.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBody {
    /// Defaults to the first wallet account.
    #[serde(default)]
    pub from: Option<Address>,
    pub to: String,
    pub amount: String,
    /// ERC-20 contract address for token sends.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub tier: FeeTier,
    #[serde(default)]
    pub password: Option<SecretString>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let services = &state.services;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        locked: !services.session.is_unlocked(),
        chain_id: chain_id_hex(services.active_chain.get()),
        accounts: services.keys.addresses(),
        connections: services.connections.len(),
        pending_requests: services.broker.ledger().len(),
        page_contexts: services.contexts.len(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

pub async fn list_approvals(State(state): State<AppState>) -> Json<Vec<PendingRequest>> {
    Json(state.services.broker.ledger().list())
}

/// Stream of prompt events. Requests already waiting are replayed first.
pub async fn approval_events(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| stream_approval_events(socket, state))
}

async fn stream_approval_events(mut socket: WebSocket, state: AppState) {
    let mut events = state.services.approvals.subscribe();

    let stage = if state.services.session.is_unlocked() {
        ApprovalStage::Review
    } else {
        ApprovalStage::Unlock
    };
    for request in state.services.broker.ledger().list() {
        let event = ApprovalEvent::Opened {
            stage,
            request: Box::new(request),
        };
        if send_event(&mut socket, &event).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if send_event(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Approval client lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    }
    tracing::debug!("Approval client disconnected");
}

async fn send_event(socket: &mut WebSocket, event: &ApprovalEvent) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).unwrap_or_default();
    socket.send(Message::Text(text.into())).await
}

pub async fn approve_request(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<ApprovalInput>,
) -> Result<Json<Value>, ApiError> {
    let result = state.services.broker.approve(id, input).await?;
    Ok(Json(json!({ "requestId": id, "result": result })))
}

pub async fn reject_request(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    state.services.broker.reject(id)?;
    Ok(Json(json!({ "requestId": id, "rejected": true })))
}

pub async fn unlock_for_request(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<PasswordBody>,
) -> Result<Json<SessionStatus>, ApiError> {
    state
        .services
        .broker
        .unlock_for_request(id, &body.password)
        .await?;
    Ok(Json(state.services.session.status()))
}

pub async fn get_session(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.services.session.status())
}

pub async fn unlock_session(
    State(state): State<AppState>,
    Json(body): Json<PasswordBody>,
) -> Result<Json<SessionStatus>, ApiError> {
    state.services.broker.unlock(&body.password).await?;
    Ok(Json(state.services.session.status()))
}

pub async fn lock_session(State(state): State<AppState>) -> Json<SessionStatus> {
    state.services.broker.lock();
    Json(state.services.session.status())
}

pub async fn list_connections(State(state): State<AppState>) -> Json<Vec<Connection>> {
    Json(state.services.connections.list())
}

/// `?origin=..` disconnects one origin; without it, every origin.
pub async fn delete_connections(
    State(state): State<AppState>,
    Query(query): Query<OriginQuery>,
) -> Result<Json<Value>, ApiError> {
    let removed = match query.origin {
        Some(origin) => state
            .services
            .broker
            .disconnect(&origin)?
            .into_iter()
            .collect::<Vec<_>>(),
        None => state.services.broker.disconnect_all()?,
    };
    Ok(Json(json!({ "removed": removed })))
}

pub async fn import_key(
    State(state): State<AppState>,
    Json(body): Json<ImportKeyBody>,
) -> Result<Json<Value>, ApiError> {
    let ImportKeyBody {
        private_key,
        password,
    } = body;
    let address = state
        .services
        .keys
        .run_blocking(move |keys| match &private_key {
            Some(key) => keys.import_key(key.expose_secret(), &password),
            None => keys.generate_key(&password),
        })
        .await?;
    Ok(Json(json!({ "address": address })))
}

pub async fn change_password(
    State(state): State<AppState>,
    Json(body): Json<ChangePasswordBody>,
) -> Result<Json<Value>, ApiError> {
    let ChangePasswordBody {
        old_password,
        new_password,
    } = body;
    state
        .services
        .keys
        .run_blocking(move |keys| keys.change_password(&old_password, &new_password))
        .await?;
    Ok(Json(json!({ "changed": true })))
}

pub async fn estimate_send(
    State(state): State<AppState>,
    Json(body): Json<SendBody>,
) -> Result<Json<Value>, ApiError> {
    let services = &state.services;
    let from = sender(&state, body.from)?;
    let prepared = services
        .preparer
        .prepare(services.active_chain.get(), from, &body.to, &body.amount, body.token.as_deref())
        .await?;
    let estimate = services.preparer.estimate(&prepared).await?;
    Ok(Json(json!({ "transaction": prepared, "estimate": estimate })))
}

pub async fn send(
    State(state): State<AppState>,
    Json(body): Json<SendBody>,
) -> Result<Json<Value>, ApiError> {
    let services = &state.services;
    let password = body
        .password
        .as_ref()
        .ok_or_else(|| ApiError::bad_request("password is required"))?;
    let from = sender(&state, body.from)?;
    let prepared = services
        .preparer
        .prepare(services.active_chain.get(), from, &body.to, &body.amount, body.token.as_deref())
        .await?;
    let hash = services
        .preparer
        .sign_and_broadcast(&prepared, body.tier, password)
        .await?;
    Ok(Json(json!({ "txHash": hash, "transaction": prepared })))
}

fn sender(state: &AppState, from: Option<Address>) -> Result<Address, ApiError> {
    let keys = &state.services.keys;
    match from {
        Some(address) if keys.contains(&address) => Ok(address),
        Some(address) => Err(ApiError::bad_request(format!("no key stored for {address}"))),
        None => keys
            .addresses()
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::bad_request("no keys stored")),
    }
}
