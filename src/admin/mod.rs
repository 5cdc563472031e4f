//! Management API: the approval surface and wallet administration.
//!
//! Every route here sits behind bearer-token auth. The page-facing routes
//! live in [`crate::http`].

pub mod auth;
pub mod handlers;

use axum::routing::{get, post};
use axum::{middleware, Router};

use self::auth::admin_auth;
use self::handlers::*;
use crate::http::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/approvals", get(list_approvals))
        .route("/approvals/events", get(approval_events))
        .route("/approvals/{id}/approve", post(approve_request))
        .route("/approvals/{id}/reject", post(reject_request))
        .route("/approvals/{id}/unlock", post(unlock_for_request))
        .route("/session", get(get_session))
        .route("/session/unlock", post(unlock_session))
        .route("/session/lock", post(lock_session))
        .route("/connections", get(list_connections).delete(delete_connections))
        .route("/keys/import", post(import_key))
        .route("/keys/password", post(change_password))
        .route("/wallet/estimate", post(estimate_send))
        .route("/wallet/send", post(send))
        .route_layer(middleware::from_fn_with_state(state, admin_auth))
}
