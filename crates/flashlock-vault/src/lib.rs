//! # flashlock-vault
//!
//! Encrypted-at-rest firmware storage. Each artifact lives on disk as
//! `<logical-name>.enc` framed `nonce(12) || tag(16) || ciphertext`,
//! authenticated under the vault's 256-bit master key. Plaintext only ever
//! exists in transient memory: [`Vault::open_plaintext`] decrypts the whole
//! file into a zeroize-on-drop buffer and hands it to the caller by move.

pub mod catalog;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;

use flashlock_common::config::AppConfig;
use flashlock_common::sealed::{self, SealKey, SealedError};
use flashlock_common::secret::SecretBytes;

/// Errors from vault operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("production mode requires a configured master key")]
    MasterKeyRequired,

    #[error("master key is not valid base64 of exactly 32 bytes")]
    MasterKeyInvalid,

    #[error("unknown device type: {device_type}")]
    UnknownDeviceType { device_type: String },

    #[error("firmware artifact not found: {name}")]
    NotFound { name: String },

    #[error("firmware artifact failed authentication: {name}")]
    Integrity { name: String },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The firmware vault. Owns the master key; nothing else may hold it.
pub struct Vault {
    master: SealKey,
    firmware_dir: PathBuf,
}

impl Vault {
    pub fn new(firmware_dir: impl Into<PathBuf>, master: SealKey) -> Self {
        Self {
            master,
            firmware_dir: firmware_dir.into(),
        }
    }

    /// Build the vault from server configuration.
    ///
    /// A missing master key is fatal in production mode. Outside production a
    /// fresh key is generated so development servers can run against
    /// self-sealed fixtures, at the cost of artifacts not surviving restarts.
    pub fn from_config(cfg: &AppConfig) -> Result<Self, VaultError> {
        let master = match &cfg.security.master_key_base64 {
            Some(encoded) => {
                let bytes = B64.decode(encoded).map_err(|_| VaultError::MasterKeyInvalid)?;
                SealKey::from_slice(&bytes).map_err(|_| VaultError::MasterKeyInvalid)?
            }
            None if cfg.security.production => return Err(VaultError::MasterKeyRequired),
            None => {
                tracing::warn!(
                    "no master key configured — generated an ephemeral development key; \
                     at-rest artifacts will not decrypt across restarts"
                );
                SealKey::generate()
            }
        };

        Ok(Self::new(cfg.storage.firmware_dir.clone(), master))
    }

    /// Ordered artifact manifest for a device type.
    pub fn required_artifacts(&self, device_type: &str) -> Result<Vec<String>, VaultError> {
        let profile = catalog::profile(device_type).ok_or_else(|| VaultError::UnknownDeviceType {
            device_type: device_type.to_owned(),
        })?;
        Ok(profile.firmware_files.iter().map(|s| (*s).to_owned()).collect())
    }

    /// Credit cost of flashing a device type.
    pub fn credit_cost(&self, device_type: &str) -> Result<u32, VaultError> {
        let profile = catalog::profile(device_type).ok_or_else(|| VaultError::UnknownDeviceType {
            device_type: device_type.to_owned(),
        })?;
        Ok(profile.credit_cost)
    }

    /// Whether every ciphertext file in the device type's manifest exists.
    /// Presence only — integrity is checked lazily at decrypt time.
    pub fn all_present(&self, device_type: &str) -> Result<bool, VaultError> {
        let names = self.required_artifacts(device_type)?;
        Ok(names.iter().all(|name| self.artifact_path(name).is_file()))
    }

    /// Decrypt one artifact into memory. The returned buffer is the caller's
    /// to zeroize (it does so on drop); no partial plaintext is ever surfaced.
    pub fn open_plaintext(&self, name: &str) -> Result<SecretBytes, VaultError> {
        let path = self.checked_path(name)?;
        let blob = std::fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => VaultError::NotFound { name: name.to_owned() },
            _ => VaultError::Io(e),
        })?;

        sealed::open(&self.master, &blob).map_err(|e| match e {
            SealedError::Integrity | SealedError::Malformed { .. } => {
                tracing::error!(artifact = name, "at-rest artifact failed authentication");
                VaultError::Integrity { name: name.to_owned() }
            }
            _ => VaultError::Integrity { name: name.to_owned() },
        })
    }

    /// Seal a plaintext buffer to `<name>.enc`. Used by provisioning tooling
    /// and tests; the serving path never writes.
    pub fn seal_artifact(&self, name: &str, plaintext: &[u8]) -> Result<(), VaultError> {
        let path = self.checked_path(name)?;
        std::fs::create_dir_all(&self.firmware_dir)?;
        let blob = sealed::seal(&self.master, plaintext)
            .map_err(|_| VaultError::Integrity { name: name.to_owned() })?;
        std::fs::write(&path, blob)?;
        Ok(())
    }

    fn artifact_path(&self, name: &str) -> PathBuf {
        self.firmware_dir.join(format!("{name}.enc"))
    }

    /// Artifact names come off the wire; anything that is not a bare file
    /// name is treated as absent rather than resolved.
    fn checked_path(&self, name: &str) -> Result<PathBuf, VaultError> {
        let bare = !name.is_empty()
            && Path::new(name).components().count() == 1
            && !name.contains(['/', '\\'])
            && name != "."
            && name != "..";
        if !bare {
            return Err(VaultError::NotFound { name: name.to_owned() });
        }
        Ok(self.artifact_path(name))
    }
}
