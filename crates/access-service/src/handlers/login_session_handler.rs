//! Login session endpoints (API key protected).
//!
//! - `POST /tenants/{id}/login-sessions?database_id=` issues a session handle
//!   that the browser passes to `/oidc/authorize` as `login_hint`.
//! - `POST /internal/v1/login-sessions/validate?session_id=` lets a trusted
//!   proxy consume a session directly.

use crate::errors::AccessError;
use crate::models::{DatabaseConnectionInfo, LoginSessionResponse, ValidateSessionResponse};
use crate::repositories::databases;
use crate::routes::AppState;
use crate::services::directory::ApiKeyIdentity;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

/// Port the tenant database servers listen on.
pub const DATABASE_PORT: u16 = 3306;

#[derive(Debug, Default, Deserialize)]
pub struct CreateLoginSessionQuery {
    pub database_id: Option<String>,
}

#[derive(Default, Deserialize)]
pub struct ValidateLoginSessionQuery {
    pub session_id: Option<String>,
}

/// POST /tenants/{id}/login-sessions
#[instrument(skip_all, name = "access.login_session.create_handler")]
pub async fn create_login_session(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<ApiKeyIdentity>,
    Path(tenant_id): Path<String>,
    Query(query): Query<CreateLoginSessionQuery>,
) -> Result<(StatusCode, Json<LoginSessionResponse>), AccessError> {
    // The session is only useful if a token can be signed afterwards.
    state.keys.ensure_key().await?;

    let session = state
        .sessions
        .create(&tenant_id, query.database_id.as_deref())
        .await?;

    tracing::info!(
        target: "access.login_session",
        api_key_id = %caller.key_id,
        scoped_to_database = session.database_id.is_some(),
        "Login session issued"
    );

    Ok((
        StatusCode::CREATED,
        Json(LoginSessionResponse {
            session_id: session.id,
            expires_at: session.expires_at,
        }),
    ))
}

/// POST /internal/v1/login-sessions/validate
///
/// Consumes the session. When it was scoped to a database, connection details
/// are resolved against the session's own tenant only.
#[instrument(skip_all, name = "access.login_session.validate_handler")]
pub async fn validate_login_session(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ValidateLoginSessionQuery>,
) -> Result<Json<ValidateSessionResponse>, AccessError> {
    let session_id = query
        .session_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AccessError::BadRequest("session_id is required".to_string()))?;

    let session = state.sessions.validate(session_id).await?;

    let database = match session.database_id.as_deref() {
        None => None,
        Some(database_id) => {
            let (database_name, host) =
                databases::get_connection_target(&state.pool, database_id, &session.tenant_id)
                    .await?
                    .ok_or_else(|| {
                        AccessError::NotFound("Database not found for tenant".to_string())
                    })?;
            Some(DatabaseConnectionInfo {
                database_name,
                host,
                port: DATABASE_PORT,
            })
        }
    };

    Ok(Json(ValidateSessionResponse {
        tenant_id: session.tenant_id,
        database,
    }))
}
