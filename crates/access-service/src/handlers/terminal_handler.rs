//! Browser terminal endpoints.
//!
//! `GET /terminal/{tenant_id}?token=` upgrades to a WebSocket bridged to a
//! PTY shell on the tenant's node. Browsers cannot set headers on WebSocket
//! requests, so the API key travels in the query string.

use crate::errors::AccessError;
use crate::routes::AppState;
use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Default, Deserialize)]
pub struct TerminalQuery {
    pub token: Option<String>,
}

/// GET /terminal/{tenant_id}
#[instrument(skip_all, name = "access.terminal.connect")]
pub async fn terminal_connect(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Query(query): Query<TerminalQuery>,
    upgrade: Option<WebSocketUpgrade>,
) -> Result<Response, AccessError> {
    let target = state
        .terminal
        .prepare(&tenant_id, query.token.as_deref())
        .await?;

    let Some(upgrade) = upgrade else {
        return Err(AccessError::BadRequest(
            "WebSocket upgrade required".to_string(),
        ));
    };

    let bridge = state.terminal.clone();
    Ok(upgrade
        .on_upgrade(move |socket| async move { bridge.serve(socket, target).await })
        .into_response())
}

/// GET /internal/v1/terminal/ca-public-key
///
/// The CA public key in OpenSSH format, for node `TrustedUserCAKeys`.
#[instrument(skip_all, name = "access.terminal.ca_public_key")]
pub async fn ca_public_key(State(state): State<Arc<AppState>>) -> Result<String, AccessError> {
    state.terminal.ca_public_key()
}
