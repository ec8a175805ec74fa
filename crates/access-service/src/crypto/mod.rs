//! Cryptographic primitives for the access service.
//!
//! - Ed25519 signing keys for ID tokens, encrypted at rest with AES-256-GCM
//! - Opaque single-use identifiers (login sessions, authorization codes)
//! - API key digests and OIDC client secret verification

use crate::errors::AccessError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::{
    aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM},
    rand::{SecureRandom, SystemRandom},
    signature::{Ed25519KeyPair, KeyPair},
};
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Size of opaque session IDs and authorization codes (256 bits).
pub const OPAQUE_TOKEN_BYTES: usize = 32;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// ID token claims.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdTokenClaims {
    pub iss: String,
    /// Tenant ID.
    pub sub: String,
    /// OIDC client ID.
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    pub preferred_username: String,
    pub groups: Vec<String>,
}

impl fmt::Debug for IdTokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdTokenClaims")
            .field("iss", &self.iss)
            .field("sub", &"[REDACTED]")
            .field("aud", &self.aud)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("nonce", &self.nonce.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

/// Freshly generated signing key pair.
pub struct GeneratedKey {
    /// Raw 32-byte Ed25519 public key, base64url without padding (the JWK `x`).
    pub public_key: String,
    pub private_key_pkcs8: SecretBox<Vec<u8>>,
}

/// Private key sealed under the master key.
#[derive(Clone)]
pub struct EncryptedKey {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub tag: Vec<u8>,
}

impl fmt::Debug for EncryptedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedKey")
            .field("ciphertext", &"[REDACTED]")
            .field("nonce_len", &self.nonce.len())
            .field("tag_len", &self.tag.len())
            .finish()
    }
}

/// Generate an Ed25519 key pair.
pub fn generate_signing_key() -> Result<GeneratedKey, AccessError> {
    let rng = SystemRandom::new();

    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
        .map_err(|e| AccessError::Crypto(format!("Keypair generation failed: {}", e)))?;
    let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
        .map_err(|e| AccessError::Crypto(format!("Keypair parsing failed: {}", e)))?;

    Ok(GeneratedKey {
        public_key: URL_SAFE_NO_PAD.encode(key_pair.public_key().as_ref()),
        private_key_pkcs8: SecretBox::new(Box::new(pkcs8.as_ref().to_vec())),
    })
}

fn sealing_key(master_key: &[u8]) -> Result<LessSafeKey, AccessError> {
    if master_key.len() != 32 {
        return Err(AccessError::Crypto(format!(
            "Invalid master key length: {} (expected 32)",
            master_key.len()
        )));
    }
    let unbound = UnboundKey::new(&AES_256_GCM, master_key)
        .map_err(|e| AccessError::Crypto(format!("Cipher key creation failed: {}", e)))?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt a private key with AES-256-GCM. The key ID is bound as associated
/// data so a ciphertext cannot be replayed under another key's row.
pub fn encrypt_private_key(
    private_key: &[u8],
    master_key: &[u8],
    key_id: &str,
) -> Result<EncryptedKey, AccessError> {
    let key = sealing_key(master_key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|e| AccessError::Crypto(format!("Nonce generation failed: {}", e)))?;

    let mut in_out = private_key.to_vec();
    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(nonce_bytes),
        Aad::from(key_id.as_bytes()),
        &mut in_out,
    )
    .map_err(|e| AccessError::Crypto(format!("Encryption operation failed: {}", e)))?;

    let tag_start = in_out
        .len()
        .checked_sub(TAG_LEN)
        .ok_or_else(|| AccessError::Crypto("Encryption produced invalid output".to_string()))?;
    let tag = in_out.split_off(tag_start);

    Ok(EncryptedKey {
        ciphertext: in_out,
        nonce: nonce_bytes.to_vec(),
        tag,
    })
}

/// Decrypt a private key sealed by [`encrypt_private_key`].
pub fn decrypt_private_key(
    encrypted: &EncryptedKey,
    master_key: &[u8],
    key_id: &str,
) -> Result<SecretBox<Vec<u8>>, AccessError> {
    let key = sealing_key(master_key)?;

    let nonce_bytes: [u8; NONCE_LEN] = encrypted.nonce.as_slice().try_into().map_err(|_| {
        AccessError::Crypto(format!(
            "Invalid nonce length: {} (expected {})",
            encrypted.nonce.len(),
            NONCE_LEN
        ))
    })?;

    if encrypted.tag.len() != TAG_LEN {
        return Err(AccessError::Crypto(format!(
            "Invalid tag length: {} (expected {})",
            encrypted.tag.len(),
            TAG_LEN
        )));
    }

    let mut in_out = encrypted.ciphertext.clone();
    in_out.extend_from_slice(&encrypted.tag);

    let plaintext = key
        .open_in_place(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(key_id.as_bytes()),
            &mut in_out,
        )
        .map_err(|e| AccessError::Crypto(format!("Decryption operation failed: {}", e)))?;

    Ok(SecretBox::new(Box::new(plaintext.to_vec())))
}

/// Sign ID token claims as a compact EdDSA JWS with `kid` and `typ` headers.
pub fn sign_id_token(
    claims: &IdTokenClaims,
    private_key_pkcs8: &SecretBox<Vec<u8>>,
    key_id: &str,
) -> Result<String, AccessError> {
    let mut header = Header::new(Algorithm::EdDSA);
    header.typ = Some("JWT".to_string());
    header.kid = Some(key_id.to_string());

    let encoding_key = EncodingKey::from_ed_der(private_key_pkcs8.expose_secret());

    encode(&header, claims, &encoding_key)
        .map_err(|e| AccessError::Crypto(format!("Token signing failed: {}", e)))
}

/// Verify an ID token against a base64url raw Ed25519 public key, checking
/// signature, expiry, issuer and audience.
pub fn verify_id_token(
    token: &str,
    public_key: &str,
    issuer: &str,
    audience: &str,
) -> Result<IdTokenClaims, AccessError> {
    let public_key_bytes = URL_SAFE_NO_PAD
        .decode(public_key)
        .map_err(|e| AccessError::Crypto(format!("Invalid public key encoding: {}", e)))?;
    let decoding_key = DecodingKey::from_ed_der(&public_key_bytes);

    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.set_issuer(&[issuer]);
    validation.set_audience(&[audience]);

    decode::<IdTokenClaims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| AccessError::Unauthorized(format!("Invalid ID token: {}", e)))
}

/// Generate cryptographically secure random bytes.
pub fn generate_random_bytes(len: usize) -> Result<Vec<u8>, AccessError> {
    let mut bytes = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|e| AccessError::Crypto(format!("Random generation failed: {}", e)))?;
    Ok(bytes)
}

/// Generate an opaque single-use identifier: 256 random bits, base64url.
pub fn generate_opaque_token() -> Result<String, AccessError> {
    Ok(URL_SAFE_NO_PAD.encode(generate_random_bytes(OPAQUE_TOKEN_BYTES)?))
}

/// Hex SHA-256 digest of an API key, as stored in `api_keys.key_hash`.
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Hash a client secret with bcrypt.
pub fn hash_client_secret(secret: &str, cost: u32) -> Result<String, AccessError> {
    bcrypt::hash(secret, cost)
        .map_err(|e| AccessError::Crypto(format!("Secret hashing failed: {}", e)))
}

/// Verify a client secret against its bcrypt hash.
pub fn verify_client_secret(secret: &str, hash: &str) -> Result<bool, AccessError> {
    bcrypt::verify(secret, hash)
        .map_err(|e| AccessError::Crypto(format!("Secret verification failed: {}", e)))
}
