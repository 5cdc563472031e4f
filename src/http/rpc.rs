//! `POST /rpc`: one provider call per HTTP request.
//!
//! Immediate results come back in the body. Calls that need approval come
//! back as `{ "pending": true, "requestId": .. }`; their final answer is
//! delivered to the caller's context over `/ws`.

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::broker::{BrokerRequest, ContextRef, DispatchOutcome, ProviderError};
use crate::http::AppState;

/// A provider call as sent by a page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcCall {
    /// Caller's correlation id, echoed back.
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    /// Used only when the request carries no `Origin` header.
    #[serde(default)]
    pub origin: Option<String>,
    pub tab_id: u64,
    pub context_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReply {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderError>,
}

impl RpcReply {
    pub fn from_outcome(id: Value, outcome: Result<DispatchOutcome, ProviderError>) -> Self {
        let mut reply = Self {
            id,
            result: None,
            pending: false,
            request_id: None,
            error: None,
        };
        match outcome {
            Ok(DispatchOutcome::Result(value)) => reply.result = Some(value),
            Ok(DispatchOutcome::Pending { request_id }) => {
                reply.pending = true;
                reply.request_id = Some(request_id);
            }
            Err(error) => reply.error = Some(error),
        }
        reply
    }
}

/// The origin to act for: the `Origin` header if present, else `fallback`.
pub fn request_origin(headers: &HeaderMap, fallback: Option<String>) -> Option<String> {
    match headers.get(header::ORIGIN) {
        Some(value) => value.to_str().ok().map(str::to_string),
        None => fallback,
    }
}

/// Dispatch one call on behalf of a page context.
pub async fn dispatch_call(state: &AppState, origin: Option<String>, call: RpcCall) -> RpcReply {
    let Some(origin) = origin else {
        return RpcReply::from_outcome(call.id, Err(ProviderError::invalid_params("missing origin")));
    };
    let request = BrokerRequest {
        method: call.method,
        params: call.params,
        origin,
        context: ContextRef::new(call.tab_id, call.context_id),
    };
    let outcome = state.services.broker.dispatch(request).await;
    RpcReply::from_outcome(call.id, outcome)
}

pub async fn handle_rpc(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(call): Json<RpcCall>,
) -> Json<RpcReply> {
    let origin = request_origin(&headers, call.origin.clone());
    Json(dispatch_call(&state, origin, call).await)
}
