//! Service-wide ID token signing key.
//!
//! Exactly one active key exists across every instance. It is created lazily
//! on first use; instances racing to create it converge on whichever insert
//! the database accepted.

use crate::crypto::{self, EncryptedKey, IdTokenClaims};
use crate::errors::AccessError;
use crate::models::{JsonWebKey, Jwks, SigningKey};
use crate::observability::metrics;
use crate::repositories::signing_keys;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretBox};
use sqlx::PgPool;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::instrument;

/// The active key, decrypted and ready to sign.
pub struct ActiveSigningKey {
    pub key_id: String,
    /// Raw Ed25519 public key, base64url.
    pub public_key: String,
    private_key_pkcs8: SecretBox<Vec<u8>>,
}

impl fmt::Debug for ActiveSigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSigningKey")
            .field("key_id", &self.key_id)
            .field("public_key", &self.public_key)
            .field("private_key_pkcs8", &"[REDACTED]")
            .finish()
    }
}

impl ActiveSigningKey {
    pub fn to_jwk(&self) -> JsonWebKey {
        JsonWebKey {
            kid: self.key_id.clone(),
            kty: "OKP".to_string(),
            crv: "Ed25519".to_string(),
            x: self.public_key.clone(),
            use_: "sig".to_string(),
            alg: "EdDSA".to_string(),
        }
    }
}

pub struct SigningKeyManager {
    pool: PgPool,
    master_key: SecretBox<Vec<u8>>,
    cluster_name: String,
    active: OnceCell<Arc<ActiveSigningKey>>,
}

impl SigningKeyManager {
    pub fn new(pool: PgPool, master_key: SecretBox<Vec<u8>>, cluster_name: &str) -> Self {
        Self {
            pool,
            master_key,
            cluster_name: cluster_name.to_string(),
            active: OnceCell::new(),
        }
    }

    /// Return the active key, creating it if none exists yet.
    ///
    /// Idempotent. The in-process cell only saves round trips; the partial
    /// unique index is what guarantees a single key.
    #[instrument(skip_all, name = "access.signing_key.ensure")]
    pub async fn ensure_key(&self) -> Result<Arc<ActiveSigningKey>, AccessError> {
        if let Some(key) = self.active.get() {
            metrics::record_signing_key_ensure("cached");
            return Ok(Arc::clone(key));
        }

        let key = self
            .active
            .get_or_try_init(|| async { self.load_or_create().await.map(Arc::new) })
            .await?;

        Ok(Arc::clone(key))
    }

    /// One-entry JWK set for the active key.
    pub async fn public_jwks(&self) -> Result<Jwks, AccessError> {
        let key = self.ensure_key().await?;
        Ok(Jwks {
            keys: vec![key.to_jwk()],
        })
    }

    /// Sign ID token claims with the active key.
    pub async fn sign(&self, claims: &IdTokenClaims) -> Result<String, AccessError> {
        let key = self.ensure_key().await?;
        crypto::sign_id_token(claims, &key.private_key_pkcs8, &key.key_id)
    }

    async fn load_or_create(&self) -> Result<ActiveSigningKey, AccessError> {
        if let Some(existing) = signing_keys::get_active_key(&self.pool).await? {
            metrics::record_signing_key_ensure("existing");
            return self.unseal(&existing);
        }

        let key_id = self.next_key_id()?;
        let generated = crypto::generate_signing_key()?;
        let sealed = crypto::encrypt_private_key(
            generated.private_key_pkcs8.expose_secret(),
            self.master_key.expose_secret(),
            &key_id,
        )?;

        let inserted = signing_keys::insert_if_no_active(
            &self.pool,
            &key_id,
            &generated.public_key,
            &sealed.ciphertext,
            &sealed.nonce,
            &sealed.tag,
        )
        .await?;

        if inserted.is_some() {
            metrics::record_signing_key_ensure("created");
            tracing::info!(target: "access.signing_key", key_id = %key_id, "Signing key created");
            return Ok(ActiveSigningKey {
                key_id,
                public_key: generated.public_key,
                private_key_pkcs8: generated.private_key_pkcs8,
            });
        }

        // Another instance won the insert; drop ours and adopt theirs.
        let winner = signing_keys::get_active_key(&self.pool)
            .await?
            .ok_or_else(|| {
                AccessError::Database("Active signing key vanished after conflict".to_string())
            })?;
        metrics::record_signing_key_ensure("converged");
        tracing::debug!(
            target: "access.signing_key",
            key_id = %winner.key_id,
            "Adopted signing key created concurrently"
        );
        self.unseal(&winner)
    }

    fn unseal(&self, row: &SigningKey) -> Result<ActiveSigningKey, AccessError> {
        let sealed = EncryptedKey {
            ciphertext: row.private_key_encrypted.clone(),
            nonce: row.encryption_nonce.clone(),
            tag: row.encryption_tag.clone(),
        };
        let private_key_pkcs8 =
            crypto::decrypt_private_key(&sealed, self.master_key.expose_secret(), &row.key_id)?;

        Ok(ActiveSigningKey {
            key_id: row.key_id.clone(),
            public_key: row.public_key.clone(),
            private_key_pkcs8,
        })
    }

    /// Key ID format: `oidc-{cluster}-{YYYYMMDD}-{8 hex}`.
    fn next_key_id(&self) -> Result<String, AccessError> {
        let suffix = hex::encode(crypto::generate_random_bytes(4)?);
        Ok(format!(
            "oidc-{}-{}-{}",
            self.cluster_name,
            Utc::now().format("%Y%m%d"),
            suffix
        ))
    }
}
