//! Access service configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use base64::{engine::general_purpose::STANDARD, Engine};
use secrecy::{ExposeSecret, SecretBox, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Default public issuer URL embedded in ID tokens and the discovery document.
pub const DEFAULT_ISSUER_URL: &str = "http://api.hosting.localhost";

/// Default cluster name, used as part of signing key IDs.
pub const DEFAULT_CLUSTER_NAME: &str = "local";

/// Default SSH port on tenant nodes.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default terminal certificate lifetime in seconds.
pub const DEFAULT_TERMINAL_CERT_TTL_SECONDS: u64 = 60;

/// Upper bound for terminal certificate lifetime. Certificates are meant to be
/// minute-scale; anything longer defeats the point of ephemeral credentials.
pub const MAX_TERMINAL_CERT_TTL_SECONDS: u64 = 600;

/// Required length of the decoded master key (AES-256).
pub const MASTER_KEY_LEN: usize = 32;

#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Server bind address (default: "0.0.0.0:8090").
    pub bind_address: String,

    /// Base64-encoded 32-byte key protecting signing keys at rest.
    pub master_key: SecretString,

    /// Issuer URL without trailing slash.
    pub issuer_url: String,

    /// Cluster name used when naming signing keys.
    pub cluster_name: String,

    /// OpenSSH-format CA private key. Terminal access is disabled without it.
    pub ssh_ca_private_key: Option<SecretString>,

    /// Port dialed on tenant nodes for terminal sessions.
    pub ssh_port: u16,

    /// Lifetime of each terminal certificate.
    pub terminal_cert_ttl: Duration,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("master_key", &"[REDACTED]")
            .field("issuer_url", &self.issuer_url)
            .field("cluster_name", &self.cluster_name)
            .field(
                "ssh_ca_private_key",
                &self.ssh_ca_private_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("ssh_port", &self.ssh_port)
            .field("terminal_cert_ttl", &self.terminal_cert_ttl)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid master key: {0}")]
    InvalidMasterKey(String),

    #[error("Invalid issuer URL: {0}")]
    InvalidIssuerUrl(String),

    #[error("Invalid SSH port: {0}")]
    InvalidSshPort(String),

    #[error("Invalid terminal certificate TTL: {0}")]
    InvalidCertTtl(String),

    #[error("Invalid SSH CA private key: {0}")]
    InvalidSshCaKey(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars
            .get("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?
            .clone();

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let master_key_b64 = vars
            .get("ACCESS_MASTER_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("ACCESS_MASTER_KEY".to_string()))?;
        // Decode once here so a bad key fails startup instead of the first login.
        decode_master_key(master_key_b64)?;
        let master_key = SecretString::from(master_key_b64.clone());

        let issuer_url = vars
            .get("OIDC_ISSUER_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_ISSUER_URL.to_string());
        url::Url::parse(&issuer_url).map_err(|e| {
            ConfigError::InvalidIssuerUrl(format!(
                "OIDC_ISSUER_URL must be an absolute URL, got '{}': {}",
                issuer_url, e
            ))
        })?;

        let cluster_name = vars
            .get("CLUSTER_NAME")
            .cloned()
            .unwrap_or_else(|| DEFAULT_CLUSTER_NAME.to_string());

        let ssh_ca_private_key = vars
            .get("SSH_CA_PRIVATE_KEY")
            .filter(|pem| !pem.trim().is_empty())
            .map(|pem| SecretString::from(pem.clone()));

        let ssh_port = if let Some(value_str) = vars.get("TERMINAL_SSH_PORT") {
            let value: u16 = value_str.parse().map_err(|e| {
                ConfigError::InvalidSshPort(format!(
                    "TERMINAL_SSH_PORT must be a valid port number, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidSshPort(
                    "TERMINAL_SSH_PORT must be greater than 0".to_string(),
                ));
            }

            value
        } else {
            DEFAULT_SSH_PORT
        };

        let cert_ttl_seconds = if let Some(value_str) = vars.get("TERMINAL_CERT_TTL_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidCertTtl(format!(
                    "TERMINAL_CERT_TTL_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 || value > MAX_TERMINAL_CERT_TTL_SECONDS {
                return Err(ConfigError::InvalidCertTtl(format!(
                    "TERMINAL_CERT_TTL_SECONDS must be between 1 and {}, got {}",
                    MAX_TERMINAL_CERT_TTL_SECONDS, value
                )));
            }

            value
        } else {
            DEFAULT_TERMINAL_CERT_TTL_SECONDS
        };

        Ok(Config {
            database_url,
            bind_address,
            master_key,
            issuer_url,
            cluster_name,
            ssh_ca_private_key,
            ssh_port,
            terminal_cert_ttl: Duration::from_secs(cert_ttl_seconds),
        })
    }

    /// Decoded master key bytes.
    pub fn master_key_bytes(&self) -> Result<SecretBox<Vec<u8>>, ConfigError> {
        decode_master_key(self.master_key.expose_secret())
    }
}

fn decode_master_key(encoded: &str) -> Result<SecretBox<Vec<u8>>, ConfigError> {
    let bytes = STANDARD.decode(encoded.trim()).map_err(|e| {
        ConfigError::InvalidMasterKey(format!("ACCESS_MASTER_KEY must be base64: {}", e))
    })?;

    if bytes.len() != MASTER_KEY_LEN {
        return Err(ConfigError::InvalidMasterKey(format!(
            "ACCESS_MASTER_KEY must decode to {} bytes, got {}",
            MASTER_KEY_LEN,
            bytes.len()
        )));
    }

    Ok(SecretBox::new(Box::new(bytes)))
}
