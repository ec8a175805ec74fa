//! Seeding helpers for the platform records the access service reads.
//!
//! These tables are owned by other services in production, so the access
//! service has no write paths for them.

use access_service::crypto;
use sqlx::PgPool;

/// bcrypt cost for seeded client secrets; low to keep tests fast.
pub const TEST_BCRYPT_COST: u32 = 4;

pub async fn seed_tenant(
    pool: &PgPool,
    id: &str,
    ssh_enabled: bool,
    shard_id: Option<&str>,
) -> Result<(), anyhow::Error> {
    sqlx::query("INSERT INTO tenants (id, name, ssh_enabled, shard_id) VALUES ($1, $1, $2, $3)")
        .bind(id)
        .bind(ssh_enabled)
        .bind(shard_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Insert a node and assign it to a shard.
pub async fn seed_node(
    pool: &PgPool,
    id: &str,
    ip_address: Option<&str>,
    status: &str,
    shard_id: &str,
) -> Result<(), anyhow::Error> {
    sqlx::query(
        "INSERT INTO nodes (id, hostname, ip_address, status) VALUES ($1, $1, $2::INET, $3)",
    )
    .bind(id)
    .bind(ip_address)
    .bind(status)
    .execute(pool)
    .await?;

    sqlx::query("INSERT INTO node_shard_assignments (node_id, shard_id) VALUES ($1, $2)")
        .bind(id)
        .bind(shard_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Insert an API key and return the raw key a caller would present.
pub async fn seed_api_key(pool: &PgPool, id: &str) -> Result<String, anyhow::Error> {
    let raw_key = format!("test-api-key-{}", id);
    sqlx::query("INSERT INTO api_keys (id, name, key_hash) VALUES ($1, $1, $2)")
        .bind(id)
        .bind(crypto::hash_api_key(&raw_key))
        .execute(pool)
        .await?;
    Ok(raw_key)
}

pub async fn revoke_api_key(pool: &PgPool, id: &str) -> Result<(), anyhow::Error> {
    sqlx::query("UPDATE api_keys SET revoked_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn seed_oidc_client(
    pool: &PgPool,
    id: &str,
    secret: &str,
    redirect_uris: &[&str],
) -> Result<(), anyhow::Error> {
    let secret_hash = crypto::hash_client_secret(secret, TEST_BCRYPT_COST)?;
    let uris: Vec<String> = redirect_uris.iter().map(|u| u.to_string()).collect();
    sqlx::query(
        "INSERT INTO oidc_clients (id, secret_hash, name, redirect_uris) VALUES ($1, $2, $1, $3)",
    )
    .bind(id)
    .bind(secret_hash)
    .bind(uris)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn seed_database(
    pool: &PgPool,
    id: &str,
    tenant_id: &str,
    name: &str,
    shard_id: &str,
) -> Result<(), anyhow::Error> {
    sqlx::query("INSERT INTO databases (id, tenant_id, name, shard_id) VALUES ($1, $2, $3, $4)")
        .bind(id)
        .bind(tenant_id)
        .bind(name)
        .bind(shard_id)
        .execute(pool)
        .await?;
    Ok(())
}
