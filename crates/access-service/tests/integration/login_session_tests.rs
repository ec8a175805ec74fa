//! Login session lifecycle: single use, expiry, concurrency, and the
//! API-key protected HTTP endpoints.

use access_service::errors::{AccessError, OneTimeTokenError};
use access_service::services::login_session_service::{
    LoginSessionStore, LOGIN_SESSION_TTL_SECONDS,
};
use access_test_utils::{
    revoke_api_key, seed_api_key, seed_database, seed_node, seed_tenant, TestAccessServer,
};
use chrono::{Duration, Utc};
use reqwest::StatusCode;
use sqlx::PgPool;

// ============================================================================
// Store
// ============================================================================

#[sqlx::test(migrations = "../../migrations")]
async fn test_session_validates_once(pool: PgPool) -> Result<(), anyhow::Error> {
    let store = LoginSessionStore::new(pool);
    let session = store.create("tenant-a", None).await?;

    let validated = store.validate(&session.id).await?;
    assert_eq!(validated.tenant_id, "tenant-a");
    assert_eq!(validated.database_id, None);

    let second = store.validate(&session.id).await;
    assert!(matches!(
        second,
        Err(AccessError::OneTimeToken(OneTimeTokenError::AlreadyUsed))
    ));

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_session_lifetime_is_five_minutes(pool: PgPool) -> Result<(), anyhow::Error> {
    let store = LoginSessionStore::new(pool);
    let session = store.create("tenant-a", Some("db-1")).await?;

    assert_eq!(
        (session.expires_at - session.created_at).num_seconds(),
        LOGIN_SESSION_TTL_SECONDS
    );
    assert_eq!(session.database_id.as_deref(), Some("db-1"));
    assert_eq!(session.status, "pending");

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_expired_session_is_refused_and_stays_pending(
    pool: PgPool,
) -> Result<(), anyhow::Error> {
    let store = LoginSessionStore::new(pool.clone());
    let session = store.create("tenant-a", None).await?;

    let later = Utc::now() + Duration::seconds(LOGIN_SESSION_TTL_SECONDS + 1);
    let result = store.validate_at(&session.id, later).await;
    assert!(matches!(
        result,
        Err(AccessError::OneTimeToken(OneTimeTokenError::Expired))
    ));

    let status: String = sqlx::query_scalar("SELECT status FROM oidc_login_sessions WHERE id = $1")
        .bind(&session.id)
        .fetch_one(&pool)
        .await?;
    assert_eq!(status, "pending");

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_session_valid_just_before_expiry(pool: PgPool) -> Result<(), anyhow::Error> {
    let store = LoginSessionStore::new(pool);
    let session = store.create("tenant-a", None).await?;

    let almost = session.expires_at - Duration::seconds(1);
    let validated = store.validate_at(&session.id, almost).await?;
    assert_eq!(validated.tenant_id, "tenant-a");

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_unknown_and_empty_session_not_found(pool: PgPool) -> Result<(), anyhow::Error> {
    let store = LoginSessionStore::new(pool);

    for id in ["does-not-exist", ""] {
        let result = store.validate(id).await;
        assert!(
            matches!(
                result,
                Err(AccessError::OneTimeToken(OneTimeTokenError::NotFound))
            ),
            "id {:?}",
            id
        );
    }

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_concurrent_validation_has_one_winner(pool: PgPool) -> Result<(), anyhow::Error> {
    let store = LoginSessionStore::new(pool);
    let session = store.create("tenant-a", None).await?;

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            let id = session.id.clone();
            tokio::spawn(async move { store.validate(&id).await })
        })
        .collect();

    let mut successes = 0;
    for attempt in attempts {
        match attempt.await? {
            Ok(_) => successes += 1,
            Err(AccessError::OneTimeToken(OneTimeTokenError::AlreadyUsed)) => {}
            Err(other) => panic!("unexpected refusal: {:?}", other),
        }
    }
    assert_eq!(successes, 1);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_empty_tenant_rejected(pool: PgPool) -> Result<(), anyhow::Error> {
    let store = LoginSessionStore::new(pool);
    assert!(matches!(
        store.create("", None).await,
        Err(AccessError::BadRequest(_))
    ));
    Ok(())
}

// ============================================================================
// HTTP
// ============================================================================

async fn create_via_http(
    server: &TestAccessServer,
    api_key: &str,
    tenant_id: &str,
    database_id: Option<&str>,
) -> Result<reqwest::Response, anyhow::Error> {
    let mut url = format!("{}/tenants/{}/login-sessions", server.url(), tenant_id);
    if let Some(db) = database_id {
        url.push_str(&format!("?database_id={}", db));
    }
    Ok(server.client().post(url).bearer_auth(api_key).send().await?)
}

async fn validate_via_http(
    server: &TestAccessServer,
    api_key: &str,
    session_id: &str,
) -> Result<reqwest::Response, anyhow::Error> {
    Ok(server
        .client()
        .post(format!(
            "{}/internal/v1/login-sessions/validate?session_id={}",
            server.url(),
            session_id
        ))
        .bearer_auth(api_key)
        .send()
        .await?)
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_create_requires_api_key(pool: PgPool) -> Result<(), anyhow::Error> {
    let server = TestAccessServer::spawn(pool).await?;

    let response = server
        .client()
        .post(format!("{}/tenants/tenant-a/login-sessions", server.url()))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = create_via_http(&server, "not-a-key", "tenant-a", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_revoked_api_key_rejected(pool: PgPool) -> Result<(), anyhow::Error> {
    let api_key = seed_api_key(&pool, "key-1").await?;
    revoke_api_key(&pool, "key-1").await?;
    let server = TestAccessServer::spawn(pool).await?;

    let response = create_via_http(&server, &api_key, "tenant-a", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_create_returns_201_and_warms_signing_key(pool: PgPool) -> Result<(), anyhow::Error> {
    let api_key = seed_api_key(&pool, "key-1").await?;
    let server = TestAccessServer::spawn(pool.clone()).await?;

    let response = create_via_http(&server, &api_key, "tenant-a", None).await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body: serde_json::Value = response.json().await?;
    let session_id = body["session_id"].as_str().unwrap_or_default();
    assert!(!session_id.is_empty());
    assert!(body["expires_at"].is_string());

    let keys: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM oidc_signing_keys WHERE is_active")
        .fetch_one(&pool)
        .await?;
    assert_eq!(keys, 1);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_validate_endpoint_consumes_once(pool: PgPool) -> Result<(), anyhow::Error> {
    let api_key = seed_api_key(&pool, "key-1").await?;
    let server = TestAccessServer::spawn(pool).await?;

    let created: serde_json::Value = create_via_http(&server, &api_key, "tenant-a", None)
        .await?
        .json()
        .await?;
    let session_id = created["session_id"].as_str().unwrap_or_default().to_string();

    let first = validate_via_http(&server, &api_key, &session_id).await?;
    assert_eq!(first.status(), StatusCode::OK);
    let body: serde_json::Value = first.json().await?;
    assert_eq!(body["tenant_id"], "tenant-a");
    assert!(body.get("database").is_none());

    let second = validate_via_http(&server, &api_key, &session_id).await?;
    assert_eq!(second.status(), StatusCode::FORBIDDEN);

    let unknown = validate_via_http(&server, &api_key, "nope").await?;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_validate_endpoint_requires_session_id(pool: PgPool) -> Result<(), anyhow::Error> {
    let api_key = seed_api_key(&pool, "key-1").await?;
    let server = TestAccessServer::spawn(pool).await?;

    let response = server
        .client()
        .post(format!("{}/internal/v1/login-sessions/validate", server.url()))
        .bearer_auth(&api_key)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_validate_returns_database_for_own_tenant(pool: PgPool) -> Result<(), anyhow::Error> {
    let api_key = seed_api_key(&pool, "key-1").await?;
    seed_tenant(&pool, "tenant-a", true, Some("shard-1")).await?;
    seed_node(&pool, "node-2", Some("10.0.0.2"), "active", "shard-1").await?;
    seed_node(&pool, "node-1", Some("10.0.0.1"), "active", "shard-1").await?;
    seed_database(&pool, "db-1", "tenant-a", "tenant_a_app", "shard-1").await?;
    let server = TestAccessServer::spawn(pool).await?;

    let created: serde_json::Value = create_via_http(&server, &api_key, "tenant-a", Some("db-1"))
        .await?
        .json()
        .await?;
    let session_id = created["session_id"].as_str().unwrap_or_default().to_string();

    let response = validate_via_http(&server, &api_key, &session_id).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["tenant_id"], "tenant-a");
    assert_eq!(body["database"]["database_name"], "tenant_a_app");
    assert_eq!(body["database"]["host"], "10.0.0.1");
    assert_eq!(body["database"]["port"], 3306);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_validate_hides_other_tenants_database(pool: PgPool) -> Result<(), anyhow::Error> {
    let api_key = seed_api_key(&pool, "key-1").await?;
    seed_tenant(&pool, "tenant-a", true, Some("shard-1")).await?;
    seed_tenant(&pool, "tenant-b", true, Some("shard-1")).await?;
    seed_node(&pool, "node-1", Some("10.0.0.1"), "active", "shard-1").await?;
    seed_database(&pool, "db-b", "tenant-b", "tenant_b_app", "shard-1").await?;
    let server = TestAccessServer::spawn(pool).await?;

    // tenant-a's session names tenant-b's database.
    let created: serde_json::Value = create_via_http(&server, &api_key, "tenant-a", Some("db-b"))
        .await?
        .json()
        .await?;
    let session_id = created["session_id"].as_str().unwrap_or_default().to_string();

    let response = validate_via_http(&server, &api_key, &session_id).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response.text().await?;
    assert!(!body.contains("tenant_b_app"));

    Ok(())
}
