//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router for page and management routes
//! - Wire up middleware (request id, tracing, timeout, body limit)
//! - Serve until the shutdown signal fires

use axum::body::Body;
use axum::http::Request;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::admin;
use crate::config::{AdminConfig, ListenerConfig};
use crate::http::{rpc, websocket};
use crate::lifecycle::{shutdown, Services};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub admin_api_key: Arc<str>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(services: Services, admin: &AdminConfig) -> Self {
        Self {
            services,
            admin_api_key: Arc::from(admin.api_key.as_str()),
            started_at: Instant::now(),
        }
    }
}

/// HTTP server for the bridge.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &ListenerConfig, state: AppState) -> Self {
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// The fully layered router, for serving or in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    #[allow(deprecated)]
    fn build_router(config: &ListenerConfig, state: AppState) -> Router {
        Router::new()
            .route("/rpc", post(rpc::handle_rpc))
            .route("/ws", get(websocket::page_socket))
            .merge(admin::router(state.clone()))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
            .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "http",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = %request_id,
                )
            }))
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown::wait(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::RpcGateway;
    use crate::chains::ChainRegistry;
    use crate::config::BridgeConfig;
    use axum::http::{header, StatusCode};
    use tower::ServiceExt;

    fn test_router(dir: &std::path::Path) -> Router {
        let mut config = BridgeConfig::default();
        config.storage.data_dir = dir.to_path_buf();
        config.admin.api_key = "unit-test-key".to_string();
        let rpc = Arc::new(RpcGateway::new(
            Arc::new(ChainRegistry::builtin()),
            Duration::from_secs(1),
        ));
        let services = Services::open(&config, rpc).unwrap();
        HttpServer::new(&config.listener, AppState::new(services, &config.admin)).router()
    }

    #[tokio::test]
    async fn test_management_routes_require_auth() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(dir.path());

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/session").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/session")
                    .header(header::AUTHORIZATION, "Bearer unit-test-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rpc_response_carries_request_id() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{"method":"eth_chainId","origin":"https://app.example.com","tabId":1,"contextId":"main"}"#;
        let response = test_router(dir.path())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/rpc")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let body = "x".repeat(2 * 1024 * 1024);
        let response = test_router(dir.path())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/rpc")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::CONTENT_LENGTH, body.len())
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
