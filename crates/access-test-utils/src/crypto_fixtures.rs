//! Deterministic cryptographic fixtures for testing.

use access_service::services::certificate_authority::private_key_to_openssh;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use russh::keys::ssh_key::private::Ed25519Keypair;
use russh::keys::PrivateKey;

/// Raw 32-byte master key used by every test server.
pub fn test_master_key() -> Vec<u8> {
    (0u8..32).map(|i| i.wrapping_mul(7).wrapping_add(3)).collect()
}

/// The master key as `ACCESS_MASTER_KEY` expects it (base64).
pub fn test_master_key_b64() -> String {
    STANDARD.encode(test_master_key())
}

/// Deterministic SSH CA private key for a seed.
pub fn test_ca_key(seed: u8) -> PrivateKey {
    PrivateKey::from(Ed25519Keypair::from_seed(&[seed; 32]))
}

/// The CA key in OpenSSH PEM form, as `SSH_CA_PRIVATE_KEY` expects it.
pub fn test_ca_private_key_pem(seed: u8) -> String {
    private_key_to_openssh(&test_ca_key(seed)).expect("test CA key serializes")
}
