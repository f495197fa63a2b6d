//! HTTP surface: unauthenticated probes plus the key-protected `/api/v1`.

pub mod auth;
pub mod handlers;
pub mod response;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::app::App;
use crate::config::Config;
use crate::filter::SuffixFilter;
use crate::sync::SyncCoordinator;

/// Request bodies are tiny JSON documents.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct ApiState {
    pub app: Arc<App>,
    pub coordinator: Arc<SyncCoordinator>,
    pub filter: Arc<SuffixFilter>,
    pub api_key: Arc<str>,
    pub max_messages: usize,
    pub max_hours: u64,
}

impl ApiState {
    pub fn new(config: &Config, app: Arc<App>, coordinator: Arc<SyncCoordinator>) -> Self {
        Self {
            app,
            coordinator,
            filter: Arc::new(SuffixFilter::new(
                config.phone_whitelist.clone(),
                config.phone_blacklist.clone(),
            )),
            api_key: Arc::from(config.api_key.as_str()),
            max_messages: config.max_messages,
            max_hours: config.max_hours,
        }
    }
}

pub fn build_router(state: ApiState, request_timeout: Duration) -> Router {
    let api = Router::new()
        .route("/messages", get(handlers::list_messages))
        .route("/messages/search", get(handlers::search_messages))
        .route("/messages/send", post(handlers::send_message))
        .route("/messages/{message_id}/media", get(handlers::media))
        .route("/chats", get(handlers::list_chats))
        .route("/contacts", get(handlers::search_contacts))
        .route("/auth/status", get(handlers::auth_status))
        .route("/auth/qr/image", get(handlers::qr_image))
        .route("/sync/status", get(handlers::sync_status))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .nest("/api/v1", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    request_timeout,
                )),
        )
        .with_state(state)
}

#[derive(Debug, Clone)]
pub struct ApiServer {
    bind_address: String,
}

impl ApiServer {
    pub fn new(bind_address: String) -> Self {
        Self { bind_address }
    }

    /// Serve until `cancel` fires, then drain in-flight requests.
    pub async fn start(&self, router: Router, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_address)
            .await
            .with_context(|| format!("Failed to bind to {}", self.bind_address))?;

        info!("API server listening on {}", self.bind_address);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .with_context(|| "API server error")?;

        info!("API server stopped");
        Ok(())
    }
}
