//! HTTP surface: health check, room stats, and the WebSocket upgrade
//! endpoint that feeds the signaling broker.
//!
//! Slug/token issuance, rate limiting and TLS live in front of this process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::signaling::{Role, SignalingServer};

pub struct VestibuleServer {
    signaling: Arc<SignalingServer>,
    addr: String,
    shutdown_grace: Duration,
}

impl VestibuleServer {
    pub fn new(config: &Config) -> Self {
        Self {
            signaling: Arc::new(SignalingServer::new()),
            addr: config.server.bind_address(),
            shutdown_grace: Duration::from_secs(config.server.shutdown_grace_secs),
        }
    }

    /// Handle on the broker, e.g. for stats queries from the embedding
    /// process.
    pub fn signaling(&self) -> Arc<SignalingServer> {
        self.signaling.clone()
    }

    /// Serve until ctrl-c, then close every signaling connection within the
    /// configured grace period.
    pub async fn run(self) -> Result<()> {
        let app = router(self.signaling.clone());

        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        info!("listening on {}", self.addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.signaling, self.shutdown_grace))
            .await?;

        Ok(())
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

async fn shutdown_signal(signaling: Arc<SignalingServer>, grace: Duration) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");

    if tokio::time::timeout(grace, signaling.shutdown()).await.is_err() {
        warn!("shutdown grace period expired");
    }
}

/// Build the application router. Public so tests can serve it on an
/// ephemeral port.
pub fn router(signaling: Arc<SignalingServer>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/rooms/:slug/stats", get(room_stats))
        .route("/ws", get(ws_handler))
        .with_state(signaling)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339(),
    }))
}

async fn room_stats(
    Path(slug): Path<String>,
    State(signaling): State<Arc<SignalingServer>>,
) -> Response {
    match signaling.get_room_stats(&slug).await {
        Some(stats) => Json(stats).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "room not found" })),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct WsQuery {
    #[serde(default)]
    slug: String,
    #[serde(default)]
    role: String,
    name: Option<String>,
}

/// WebSocket upgrade handler. Bad params are rejected before the upgrade.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(signaling): State<Arc<SignalingServer>>,
) -> Response {
    if query.slug.is_empty() || query.role.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing slug or role").into_response();
    }

    let Some(role) = Role::parse(&query.role) else {
        return (StatusCode::BAD_REQUEST, "Invalid role").into_response();
    };

    let name = query.name.filter(|name| !name.is_empty());
    ws.on_upgrade(move |socket| signaling.handle_connection(socket, query.slug, role, name))
}
