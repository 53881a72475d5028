//! Session-key wrapping.
//!
//! The authority wraps each freshly minted session key under the public key
//! the client presented at session create; only the holder of the matching
//! private key can recover it. Both halves use RSA-OAEP with SHA-256 for both
//! the mask generation function and the label — the parameters live here so
//! they cannot drift apart.

use rand_core::OsRng;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::secret::SecretBytes;

/// Errors from asymmetric wrap/unwrap.
#[derive(Debug, thiserror::Error)]
pub enum WrapError {
    #[error("public key PEM could not be parsed")]
    InvalidPublicKey,

    #[error("wrapping the session key failed")]
    Wrap,

    #[error("unwrapping the session key failed")]
    Unwrap,
}

fn oaep() -> Oaep {
    Oaep::new::<Sha256>()
}

/// Parse a client-supplied public key. Accepts SPKI (`PUBLIC KEY`) and
/// PKCS#1 (`RSA PUBLIC KEY`) PEM encodings. The input is attacker
/// controlled; parse failures are an error, never a panic.
pub fn parse_public_key_pem(pem: &str) -> Result<RsaPublicKey, WrapError> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|_| WrapError::InvalidPublicKey)
}

/// Wrap raw session-key bytes under the caller's public key.
pub fn wrap_session_key(public_key_pem: &str, key_bytes: &[u8]) -> Result<Vec<u8>, WrapError> {
    let public_key = parse_public_key_pem(public_key_pem)?;
    public_key
        .encrypt(&mut OsRng, oaep(), key_bytes)
        .map_err(|_| WrapError::Wrap)
}

/// Unwrap a wrapped session key with the client's private key. The plaintext
/// is moved straight into a zeroize-on-drop buffer.
pub fn unwrap_session_key(
    private_key: &RsaPrivateKey,
    wrapped: &[u8],
) -> Result<SecretBytes, WrapError> {
    let plaintext = private_key.decrypt(oaep(), wrapped).map_err(|_| WrapError::Unwrap)?;
    Ok(SecretBytes::new(plaintext))
}
