//! Read contracts onto platform records owned by other services.
//!
//! The terminal bridge and API-key middleware depend on these traits rather
//! than on the repositories directly, so they can be exercised with mocks.

use crate::crypto;
use crate::errors::AccessError;
use crate::models::TenantRecord;
use crate::repositories::{api_keys, nodes, tenants};
use sqlx::PgPool;
use std::net::IpAddr;

/// Identity of a caller that presented a valid API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyIdentity {
    pub key_id: String,
}

/// Tenant lookup.
#[async_trait::async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<TenantRecord>, AccessError>;
}

/// Node lookup: the node that serves a shard.
#[async_trait::async_trait]
pub trait NodeDirectory: Send + Sync {
    /// Address of the lowest-ID active node in the shard, if any.
    async fn active_node_address(&self, shard_id: &str) -> Result<Option<IpAddr>, AccessError>;
}

/// API key validation.
#[async_trait::async_trait]
pub trait ApiKeyValidator: Send + Sync {
    async fn validate(&self, raw_key: &str) -> Result<Option<ApiKeyIdentity>, AccessError>;
}

/// Postgres-backed implementation of all three directories.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TenantDirectory for PgDirectory {
    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<TenantRecord>, AccessError> {
        tenants::get_by_id(&self.pool, tenant_id).await
    }
}

#[async_trait::async_trait]
impl NodeDirectory for PgDirectory {
    async fn active_node_address(&self, shard_id: &str) -> Result<Option<IpAddr>, AccessError> {
        let Some(address) = nodes::first_active_address_in_shard(&self.pool, shard_id).await?
        else {
            return Ok(None);
        };

        address
            .parse::<IpAddr>()
            .map(Some)
            .map_err(|e| AccessError::Database(format!("Invalid node address: {}", e)))
    }
}

#[async_trait::async_trait]
impl ApiKeyValidator for PgDirectory {
    async fn validate(&self, raw_key: &str) -> Result<Option<ApiKeyIdentity>, AccessError> {
        if raw_key.is_empty() {
            return Ok(None);
        }

        let key_hash = crypto::hash_api_key(raw_key);
        let record = api_keys::find_active_by_hash(&self.pool, &key_hash).await?;

        Ok(record.map(|r| ApiKeyIdentity { key_id: r.id }))
    }
}

/// In-memory directories for tests.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock directory backed by maps. Any lookup can be forced to fail.
    #[derive(Default)]
    pub struct MockDirectory {
        tenants: HashMap<String, TenantRecord>,
        shard_nodes: HashMap<String, IpAddr>,
        api_keys: HashMap<String, String>,
        fail: bool,
        lookups: AtomicUsize,
    }

    impl MockDirectory {
        pub fn new() -> Self {
            Self::default()
        }

        /// A mock whose every lookup returns a database error.
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn with_tenant(mut self, id: &str, ssh_enabled: bool, shard_id: Option<&str>) -> Self {
            self.tenants.insert(
                id.to_string(),
                TenantRecord {
                    id: id.to_string(),
                    ssh_enabled,
                    shard_id: shard_id.map(str::to_string),
                },
            );
            self
        }

        pub fn with_node(mut self, shard_id: &str, address: IpAddr) -> Self {
            self.shard_nodes.insert(shard_id.to_string(), address);
            self
        }

        pub fn with_api_key(mut self, raw_key: &str, key_id: &str) -> Self {
            self.api_keys
                .insert(raw_key.to_string(), key_id.to_string());
            self
        }

        /// Total number of lookups of any kind.
        pub fn lookup_count(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }

        fn record(&self) -> Result<(), AccessError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AccessError::Database("Mock directory error".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl TenantDirectory for MockDirectory {
        async fn get_tenant(&self, tenant_id: &str) -> Result<Option<TenantRecord>, AccessError> {
            self.record()?;
            Ok(self.tenants.get(tenant_id).cloned())
        }
    }

    #[async_trait::async_trait]
    impl NodeDirectory for MockDirectory {
        async fn active_node_address(
            &self,
            shard_id: &str,
        ) -> Result<Option<IpAddr>, AccessError> {
            self.record()?;
            Ok(self.shard_nodes.get(shard_id).copied())
        }
    }

    #[async_trait::async_trait]
    impl ApiKeyValidator for MockDirectory {
        async fn validate(&self, raw_key: &str) -> Result<Option<ApiKeyIdentity>, AccessError> {
            self.record()?;
            Ok(self.api_keys.get(raw_key).map(|id| ApiKeyIdentity {
                key_id: id.clone(),
            }))
        }
    }

}
