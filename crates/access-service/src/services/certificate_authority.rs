//! SSH user certificate authority.
//!
//! Every terminal connection gets a brand-new Ed25519 key pair and a user
//! certificate valid for exactly one principal (the tenant) for a
//! minute-scale window. Nothing is cached or persisted.

use crate::crypto;
use crate::observability::metrics;
use russh::keys::ssh_key::{
    certificate::{Builder, CertType},
    private::Ed25519Keypair,
    Certificate, HashAlg, LineEnding, PrivateKey,
};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Certificate nonce length; OpenSSH requires at least 16 bytes.
const CERT_NONCE_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to load CA key: {0}")]
    KeyLoad(String),

    #[error("Principal must not be empty")]
    EmptyPrincipal,

    #[error("Certificate TTL must be positive")]
    InvalidTtl,

    #[error("Certificate signing failed: {0}")]
    Signing(String),
}

/// Per-connection credential: an ephemeral private key plus the certificate
/// the CA issued for it. Lives only as long as one SSH handshake needs it.
pub struct EphemeralCredential {
    private_key: PrivateKey,
    certificate: Certificate,
}

impl fmt::Debug for EphemeralCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralCredential")
            .field("private_key", &"[REDACTED]")
            .field("key_id", &self.certificate.key_id())
            .field("valid_after", &self.certificate.valid_after())
            .field("valid_before", &self.certificate.valid_before())
            .finish()
    }
}

impl EphemeralCredential {
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn into_parts(self) -> (PrivateKey, Certificate) {
        (self.private_key, self.certificate)
    }
}

pub struct CertificateAuthority {
    ca_key: PrivateKey,
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Parse an unencrypted OpenSSH private key.
    pub fn from_openssh(pem: &str) -> Result<Self, CertificateError> {
        let ca_key = PrivateKey::from_openssh(pem.trim())
            .map_err(|e| CertificateError::KeyLoad(e.to_string()))?;

        if ca_key.is_encrypted() {
            return Err(CertificateError::KeyLoad(
                "passphrase-protected CA keys are not supported".to_string(),
            ));
        }

        Ok(Self { ca_key })
    }

    /// CA public key as an OpenSSH line, for `TrustedUserCAKeys` on nodes.
    pub fn public_key_openssh(&self) -> Result<String, CertificateError> {
        self.ca_key
            .public_key()
            .to_openssh()
            .map_err(|e| CertificateError::KeyLoad(e.to_string()))
    }

    pub fn fingerprint(&self) -> String {
        self.ca_key.public_key().fingerprint(HashAlg::Sha256).to_string()
    }

    /// Issue a fresh credential for `principal`, valid from now for `ttl`.
    pub fn sign(
        &self,
        principal: &str,
        ttl: Duration,
    ) -> Result<EphemeralCredential, CertificateError> {
        let result = self.issue(principal, ttl);
        metrics::record_certificate_issued(if result.is_ok() { "success" } else { "error" });
        result
    }

    fn issue(&self, principal: &str, ttl: Duration) -> Result<EphemeralCredential, CertificateError> {
        if principal.is_empty() {
            return Err(CertificateError::EmptyPrincipal);
        }
        if ttl.as_secs() == 0 {
            return Err(CertificateError::InvalidTtl);
        }

        let valid_after = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| CertificateError::Signing(format!("System clock error: {}", e)))?
            .as_secs();
        let valid_before = valid_after
            .checked_add(ttl.as_secs())
            .ok_or(CertificateError::InvalidTtl)?;

        let private_key = generate_ephemeral_key()?;
        let nonce = random_bytes(CERT_NONCE_LEN)?;
        let serial = u64::from_be_bytes(
            random_bytes(8)?
                .try_into()
                .map_err(|_| CertificateError::Signing("serial generation failed".to_string()))?,
        );

        let mut builder = Builder::new(
            nonce,
            private_key.public_key().key_data().clone(),
            valid_after,
            valid_before,
        )
        .map_err(signing_error)?;

        builder
            .serial(serial)
            .map_err(signing_error)?
            .cert_type(CertType::User)
            .map_err(signing_error)?
            .key_id(format!("terminal:{}:{}", principal, serial))
            .map_err(signing_error)?
            .valid_principal(principal)
            .map_err(signing_error)?
            .extension("permit-pty", "")
            .map_err(signing_error)?;

        let certificate = builder.sign(&self.ca_key).map_err(signing_error)?;

        tracing::debug!(
            target: "access.ssh_ca",
            serial = serial,
            ttl_seconds = ttl.as_secs(),
            "Issued terminal certificate"
        );

        Ok(EphemeralCredential {
            private_key,
            certificate,
        })
    }
}

fn signing_error(e: russh::keys::ssh_key::Error) -> CertificateError {
    CertificateError::Signing(e.to_string())
}

fn random_bytes(len: usize) -> Result<Vec<u8>, CertificateError> {
    crypto::generate_random_bytes(len).map_err(|e| CertificateError::Signing(e.to_string()))
}

fn generate_ephemeral_key() -> Result<PrivateKey, CertificateError> {
    let seed: [u8; 32] = random_bytes(32)?
        .try_into()
        .map_err(|_| CertificateError::Signing("key seed generation failed".to_string()))?;
    Ok(PrivateKey::from(Ed25519Keypair::from_seed(&seed)))
}

/// Serialize a private key in OpenSSH PEM form.
pub fn private_key_to_openssh(key: &PrivateKey) -> Result<String, CertificateError> {
    key.to_openssh(LineEnding::LF)
        .map(|pem| pem.to_string())
        .map_err(|e| CertificateError::KeyLoad(e.to_string()))
}
