//! Client key custodian.
//!
//! Owns the installation's long-lived RSA keypair. The private half exists on
//! disk only as ciphertext (`client_key.dat`), sealed through a
//! [`KeyProtection`] backend; in memory it lives solely inside this module.
//! The public half is exported as SPKI PEM and sent with every session
//! create; the server wraps each session key under it.

use std::path::{Path, PathBuf};

use rand_core::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};

use flashlock_common::sealed::{self, SealKey};
use flashlock_common::secret::SecretBytes;
use flashlock_common::wrap;

use crate::error::{AgentError, Result};

const KEY_FILE: &str = "client_key.dat";
const PROTECTION_FILE: &str = "protection.key";

/// Seam for at-rest protection of the private key serialization.
///
/// The shipped implementation is [`UserScopedProtection`]; platform keychain
/// backends (DPAPI, Keychain Services, Secret Service) implement the same
/// trait.
pub trait KeyProtection: Send + Sync {
    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn unprotect(&self, ciphertext: &[u8]) -> Result<SecretBytes>;
}

/// Portable user-scoped protection: a per-user 32-byte secret created with
/// owner-only permissions, used to seal the key blob with the shared
/// authenticated codec. Best-effort posture — an attacker with the user's
/// filesystem access is outside the threat model, same as OS data protection.
pub struct UserScopedProtection {
    secret_path: PathBuf,
}

impl UserScopedProtection {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            secret_path: data_dir.join(PROTECTION_FILE),
        }
    }

    fn protection_key(&self) -> Result<SealKey> {
        if self.secret_path.is_file() {
            let bytes = std::fs::read(&self.secret_path)?;
            return SealKey::from_slice(&bytes).map_err(|_| AgentError::KeyStore {
                message: "user protection secret is corrupt".into(),
            });
        }

        let key = SealKey::generate();
        if let Some(parent) = self.secret_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_restricted(&self.secret_path, key.as_bytes())?;
        tracing::info!(path = %self.secret_path.display(), "created user protection secret");
        Ok(key)
    }
}

impl KeyProtection for UserScopedProtection {
    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = self.protection_key()?;
        sealed::seal(&key, plaintext).map_err(|e| AgentError::KeyStore {
            message: format!("protecting key blob failed: {e}"),
        })
    }

    fn unprotect(&self, ciphertext: &[u8]) -> Result<SecretBytes> {
        let key = self.protection_key()?;
        sealed::open(&key, ciphertext).map_err(|e| AgentError::KeyStore {
            message: format!("unprotecting key blob failed: {e}"),
        })
    }
}

/// The custodian proper. Constructed once per process via [`ensure`]
/// (`KeyCustodian::ensure`).
pub struct KeyCustodian {
    private_key: RsaPrivateKey,
}

impl KeyCustodian {
    /// Load the stored keypair, or generate and persist a fresh one on first
    /// use. Key generation at the configured size can take a moment.
    pub fn ensure(
        data_dir: &Path,
        protection: &dyn KeyProtection,
        bits: usize,
    ) -> Result<Self> {
        let key_path = data_dir.join(KEY_FILE);

        let private_key = if key_path.is_file() {
            let blob = std::fs::read(&key_path)?;
            let der = protection.unprotect(&blob)?;
            let key =
                RsaPrivateKey::from_pkcs8_der(der.expose()).map_err(|_| AgentError::KeyStore {
                    message: "stored private key could not be parsed".into(),
                })?;
            // der zeroizes on drop
            tracing::debug!(path = %key_path.display(), "loaded client keypair");
            key
        } else {
            tracing::info!(bits, "generating client keypair (first use)");
            let key = RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| AgentError::KeyStore {
                message: format!("keypair generation failed: {e}"),
            })?;

            // SecretDocument zeroizes its buffer on drop.
            let der = key.to_pkcs8_der().map_err(|e| AgentError::KeyStore {
                message: format!("private key export failed: {e}"),
            })?;
            let protected = protection.protect(der.as_bytes())?;

            std::fs::create_dir_all(data_dir)?;
            write_restricted(&key_path, &protected)?;
            tracing::info!(path = %key_path.display(), "persisted protected client key");
            key
        };

        Ok(Self { private_key })
    }

    /// Public half in SPKI PEM, as sent on every session create.
    pub fn public_key_pem(&self) -> Result<String> {
        self.private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AgentError::KeyStore {
                message: format!("public key export failed: {e}"),
            })
    }

    /// Unwrap a server-wrapped session key.
    pub fn unwrap_session_key(&self, wrapped: &[u8]) -> Result<SecretBytes> {
        wrap::unwrap_session_key(&self.private_key, wrapped).map_err(|_| AgentError::Wrap)
    }
}

/// Default key storage directory under the user's local application data.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("flashlock")
}

/// Write a file readable by the owning user only (where the OS supports it).
fn write_restricted(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write as _;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}
