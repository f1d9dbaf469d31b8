//! Web layer: axum HTTP + WebSocket endpoint for devices and admins.
//!
//! - `WS /ws` — the hub's command channel; `?auth_token=<jwt>` admits
//!   the connection as an admin, anything else starts unauthenticated
//! - `GET /api/status` — registry counters

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::auth;
use crate::hub::{run_connection, HubState};

/// Build the application router over shared hub state.
pub fn router(state: Arc<HubState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/api/status", get(api_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: Arc<HubState>, bind: SocketAddr) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .context(format!("failed to bind to {}", bind))?;

    info!("hub listening on http://{}", bind);

    axum::serve(listener, app).await.context("web server error")?;

    Ok(())
}

/// WebSocket upgrade handler. The auth gate runs here, before the
/// upgrade: a valid `auth_token` query parameter yields an admin
/// identity, an invalid one is ignored rather than refused so the
/// connection can still authorize as a device.
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<HubState>>,
) -> impl IntoResponse {
    let identity = params
        .get("auth_token")
        .and_then(|token| auth::verify_token(token, &state.config.auth_secret));
    if let Some(ref identity) = identity {
        debug!(user = %identity.user_id, "admin token accepted");
    }
    ws.on_upgrade(move |socket| run_connection(socket, identity, state))
}

/// GET /api/status — registry counters
async fn api_status(State(state): State<Arc<HubState>>) -> Json<serde_json::Value> {
    let stats = state.registry.stats().await;
    Json(serde_json::json!(stats))
}
