//! Signing key lifecycle: lazy creation, convergence across instances,
//! and encryption at rest.

use access_service::services::key_management_service::SigningKeyManager;
use access_test_utils::{test_master_key, TestAccessServer};
use reqwest::StatusCode;
use secrecy::SecretBox;
use sqlx::PgPool;
use std::sync::Arc;

fn manager(pool: &PgPool) -> SigningKeyManager {
    SigningKeyManager::new(
        pool.clone(),
        SecretBox::new(Box::new(test_master_key())),
        "test",
    )
}

async fn active_key_count(pool: &PgPool) -> Result<i64, anyhow::Error> {
    Ok(
        sqlx::query_scalar("SELECT COUNT(*) FROM oidc_signing_keys WHERE is_active")
            .fetch_one(pool)
            .await?,
    )
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_ensure_key_is_idempotent(pool: PgPool) -> Result<(), anyhow::Error> {
    let keys = manager(&pool);

    let first = keys.ensure_key().await?;
    let second = keys.ensure_key().await?;

    assert_eq!(first.key_id, second.key_id);
    assert!(first.key_id.starts_with("oidc-test-"));
    assert_eq!(active_key_count(&pool).await?, 1);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_concurrent_instances_converge_on_one_key(pool: PgPool) -> Result<(), anyhow::Error> {
    // Separate managers model separate service instances: no shared memo.
    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let keys = Arc::new(manager(&pool));
            tokio::spawn(async move { keys.ensure_key().await.map(|k| k.key_id.clone()) })
        })
        .collect();

    let mut key_ids = Vec::new();
    for task in tasks {
        key_ids.push(task.await??);
    }

    key_ids.dedup();
    assert_eq!(key_ids.len(), 1, "all instances must adopt the same key");

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM oidc_signing_keys")
        .fetch_one(&pool)
        .await?;
    assert_eq!(total, 1);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_second_instance_adopts_persisted_key(pool: PgPool) -> Result<(), anyhow::Error> {
    let created = manager(&pool).ensure_key().await?;
    let adopted = manager(&pool).ensure_key().await?;

    assert_eq!(created.key_id, adopted.key_id);
    assert_eq!(created.public_key, adopted.public_key);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_private_key_is_encrypted_at_rest(pool: PgPool) -> Result<(), anyhow::Error> {
    manager(&pool).ensure_key().await?;

    let (ciphertext, nonce, tag): (Vec<u8>, Vec<u8>, Vec<u8>) = sqlx::query_as(
        "SELECT private_key_encrypted, encryption_nonce, encryption_tag FROM oidc_signing_keys",
    )
    .fetch_one(&pool)
    .await?;

    assert_eq!(nonce.len(), 12);
    assert_eq!(tag.len(), 16);
    assert!(!ciphertext.is_empty());

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_wrong_master_key_cannot_unseal(pool: PgPool) -> Result<(), anyhow::Error> {
    manager(&pool).ensure_key().await?;

    let other = SigningKeyManager::new(pool.clone(), SecretBox::new(Box::new(vec![9u8; 32])), "test");
    assert!(other.ensure_key().await.is_err());

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_jwks_endpoint_serves_active_key(pool: PgPool) -> Result<(), anyhow::Error> {
    let server = TestAccessServer::spawn(pool.clone()).await?;

    let response = server
        .client()
        .get(format!("{}/oidc/jwks", server.url()))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("cache-control")
            .and_then(|v| v.to_str().ok()),
        Some("max-age=3600")
    );

    let body: serde_json::Value = response.json().await?;
    let keys = body["keys"].as_array().cloned().unwrap_or_default();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["kty"], "OKP");
    assert_eq!(keys[0]["crv"], "Ed25519");
    assert_eq!(keys[0]["alg"], "EdDSA");
    assert_eq!(keys[0]["use"], "sig");

    let key_id: String = sqlx::query_scalar("SELECT key_id FROM oidc_signing_keys WHERE is_active")
        .fetch_one(&pool)
        .await?;
    assert_eq!(keys[0]["kid"], key_id.as_str());

    Ok(())
}
