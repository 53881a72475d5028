//! Sealed-blob codec — the single authenticated-encryption framing used
//! everywhere firmware bytes exist in ciphertext.
//!
//! Wire and at-rest format are identical:
//!
//! ```text
//! [ nonce: 12 bytes ][ tag: 16 bytes ][ ciphertext: N bytes ]
//! ```
//!
//! The vault parameterizes this codec with the master key; the transfer
//! endpoint parameterizes it with a per-session key and a fresh nonce per
//! request. Decryption is all-or-nothing: a failed tag check yields
//! [`SealedError::Integrity`] and no plaintext ever escapes.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand_core::{OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::secret::SecretBytes;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
/// Total header length; a blob must be strictly longer than this to carry
/// any plaintext at all.
pub const HEADER_LEN: usize = NONCE_LEN + TAG_LEN;

/// Errors from the sealed-blob codec.
#[derive(Debug, thiserror::Error)]
pub enum SealedError {
    #[error("sealed blob too short: {len} bytes (header alone is {HEADER_LEN})")]
    Malformed { len: usize },

    #[error("authentication failed — blob corrupt or wrong key")]
    Integrity,

    #[error("sealing failed")]
    Seal,

    #[error("key must be {KEY_LEN} bytes, got {actual}")]
    KeyLength { actual: usize },
}

/// A 256-bit symmetric key for the sealed codec, zeroized on drop.
///
/// Both the vault master key and per-session keys are `SealKey`s; cloning one
/// is a deliberate copy and each copy zeroizes independently.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SealKey([u8; KEY_LEN]);

impl SealKey {
    /// Sample a fresh key from the OS entropy source.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, SealedError> {
        let fixed: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| SealedError::KeyLength { actual: bytes.len() })?;
        Ok(Self(fixed))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new_from_slice(&self.0).expect("key length is fixed at 32 bytes")
    }
}

impl std::fmt::Debug for SealKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SealKey(<redacted>)")
    }
}

/// Encrypt `plaintext` under `key` with a freshly sampled nonce and return the
/// framed blob.
pub fn seal(key: &SealKey, plaintext: &[u8]) -> Result<Vec<u8>, SealedError> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    // aes-gcm appends the tag to the ciphertext; split it back out so the
    // header carries nonce and tag up front.
    let ct_and_tag = key
        .cipher()
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| SealedError::Seal)?;
    let split = ct_and_tag.len() - TAG_LEN;

    let mut blob = Vec::with_capacity(HEADER_LEN + split);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ct_and_tag[split..]);
    blob.extend_from_slice(&ct_and_tag[..split]);
    Ok(blob)
}

/// Authenticate and decrypt a framed blob. Returns the plaintext by move;
/// the caller owns its zeroization (the `SecretBytes` wrapper handles drop).
pub fn open(key: &SealKey, blob: &[u8]) -> Result<SecretBytes, SealedError> {
    // A blob of exactly HEADER_LEN has no plaintext length and is malformed,
    // same as anything shorter.
    if blob.len() <= HEADER_LEN {
        return Err(SealedError::Malformed { len: blob.len() });
    }

    let nonce = &blob[..NONCE_LEN];
    let tag = &blob[NONCE_LEN..HEADER_LEN];
    let ciphertext = &blob[HEADER_LEN..];

    // Reassemble into the ct||tag layout aes-gcm expects.
    let mut scratch = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    scratch.extend_from_slice(ciphertext);
    scratch.extend_from_slice(tag);

    let result = key.cipher().decrypt(Nonce::from_slice(nonce), scratch.as_slice());
    scratch.zeroize();

    match result {
        Ok(plaintext) => Ok(SecretBytes::new(plaintext)),
        Err(_) => Err(SealedError::Integrity),
    }
}
