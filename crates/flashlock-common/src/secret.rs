//! Zeroizing byte buffers.
//!
//! Every transient secret in the system (unwrapped session keys, decrypted
//! firmware, private-key serializations, scrub scratch) routes through
//! [`SecretBytes`] so that the overwrite-on-release discipline is enforced in
//! exactly one audited place. The `zeroize` crate guarantees the compiler
//! cannot elide the clearing writes.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// An owned byte buffer that is overwritten with zeros when dropped.
///
/// Cloning is permitted: a clone is a deliberate second copy of the secret,
/// and both copies zeroize independently.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Borrow the secret contents. Callers must not copy them into buffers
    /// that outlive the call without routing the copy through `SecretBytes`.
    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overwrite the contents now, ahead of drop.
    pub fn wipe(&mut self) {
        self.0.zeroize();
    }
}

impl From<Vec<u8>> for SecretBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes(<{} bytes redacted>)", self.0.len())
    }
}
