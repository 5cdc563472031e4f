//! `GET /ws`: the channel for one page context.
//!
//! # Data Flow
//! ```text
//! page ── {id, method, params} ──▶ broker.dispatch ──▶ {type: "reply", ..}
//! broker ── response / event ──▶ ContextHub ──▶ {type: "response" | "event", ..}
//! ```
//!
//! A context is identified by `?tabId=..&contextId=..` and bound to the
//! page's origin. Reconnecting with the same pair from the same origin picks
//! up responses that were resolved while it was away; another origin cannot
//! claim a pair that is still attached.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;

use crate::broker::{Attachment, ContextRef, ProviderError};
use crate::connections::normalize_origin;
use crate::http::rpc::{dispatch_call, request_origin, RpcCall};
use crate::http::{ApiError, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketParams {
    pub tab_id: u64,
    pub context_id: String,
    #[serde(default)]
    pub origin: Option<String>,
}

/// A call sent over the socket. Context comes from the connection.
#[derive(Debug, Deserialize)]
struct SocketCall {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

pub async fn page_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SocketParams>,
) -> Response {
    let origin = match request_origin(&headers, params.origin.clone()) {
        Some(raw) => match normalize_origin(&raw) {
            Ok(origin) => origin,
            Err(e) => return ApiError::from(ProviderError::from(e)).into_response(),
        },
        None => return ApiError::bad_request("origin is required").into_response(),
    };
    let context = ContextRef::new(params.tab_id, params.context_id);
    let attachment = match state.services.contexts.register(context.clone(), &origin) {
        Ok(attachment) => attachment,
        Err(e) => {
            return ApiError::new(StatusCode::CONFLICT, ProviderError::unauthorized(e.to_string()))
                .into_response()
        }
    };
    ws.on_upgrade(move |socket| run_page_socket(socket, state, context, origin, attachment))
}

async fn run_page_socket(
    socket: WebSocket,
    state: AppState,
    context: ContextRef,
    origin: String,
    attachment: Attachment,
) {
    let (mut sender, mut receiver) = socket.split();
    let Attachment {
        id: attachment_id,
        mut messages,
    } = attachment;
    tracing::info!(tab_id = context.tab_id, context_id = %context.context_id, "Page context attached");

    loop {
        tokio::select! {
            Some(message) = messages.recv() => {
                let Ok(text) = serde_json::to_string(&message) else { continue };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = match serde_json::from_str::<SocketCall>(text.as_str()) {
                        Ok(call) => {
                            let call = RpcCall {
                                id: call.id,
                                method: call.method,
                                params: call.params,
                                origin: None,
                                tab_id: context.tab_id,
                                context_id: context.context_id.clone(),
                            };
                            let reply = dispatch_call(&state, Some(origin.clone()), call).await;
                            tagged_reply(serde_json::to_value(reply).unwrap_or_default())
                        }
                        Err(e) => tagged_reply(serde_json::json!({
                            "error": {"code": -32700, "message": format!("parse error: {e}")}
                        })),
                    };
                    if sender.send(Message::Text(reply.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "Page socket error");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    state.services.contexts.unregister(&context, attachment_id);
    tracing::info!(tab_id = context.tab_id, context_id = %context.context_id, "Page context detached");
}

fn tagged_reply(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        map.insert("type".to_string(), Value::String("reply".to_string()));
    }
    value
}
