//! # flashlock-sessions
//!
//! The session authority: owner of all one-time flash sessions and the only
//! code allowed to transition their state.
//!
//! A session is a single-use, time-bounded, hardware-bound authorization to
//! perform one flash. The table is shared mutable state across request
//! handlers; every operation takes the write lock and performs its
//! check-then-transition inside that critical section, so terminal statuses
//! are sticky and at most one transition out of `Active` ever succeeds.
//!
//! Expiry is enforced lazily on every access; the periodic
//! [`SessionAuthority::sweep`] bounds table growth by removing expired
//! entries and burned entries past their retention window, zeroizing key
//! material as it goes.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand_core::{OsRng, RngCore};
use tokio::sync::RwLock;
use zeroize::Zeroize;

use flashlock_common::protocol::SessionStatus;
use flashlock_common::sealed::SealKey;
use flashlock_common::wrap;
use flashlock_vault::{Vault, VaultError};

/// Bytes of entropy behind a session identifier (256 bits).
const SESSION_ID_BYTES: usize = 32;

/// Errors from session-authority operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{message}")]
    Validation { message: String },

    #[error("unknown device type: {device_type}")]
    UnknownDeviceType { device_type: String },

    #[error("firmware for device type {device_type} is not fully provisioned")]
    FirmwareMissing { device_type: String },

    #[error("client public key could not be used to wrap the session key")]
    InvalidClientKey,

    /// Unknown identifier or fingerprint mismatch — deliberately conflated so
    /// callers cannot probe which one failed.
    #[error("session not found")]
    NotFound,

    #[error("session is {status}")]
    Unusable { status: SessionStatus },

    #[error("storage error: {0}")]
    Storage(VaultError),
}

/// One minted session. Only the authority ever holds the raw key; everything
/// handed out is either the wrapped form or a deliberate per-request copy.
struct Session {
    id: String,
    hwid: String,
    device_type: String,
    key: SealKey,
    wrapped_key: Vec<u8>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    firmware_files: Vec<String>,
    credit_cost: u32,
    status: SessionStatus,
    failure_reason: Option<String>,
    status_changed_at: DateTime<Utc>,
}

/// Read-only view of a session, safe to hand to the endpoint layer.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub wrapped_key: Vec<u8>,
    pub expires_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub firmware_files: Vec<String>,
    pub credit_cost: u32,
}

/// What a handler needs to serve one artifact request from a usable session:
/// a copy of the session key (zeroized when the handler drops it) and the
/// manifest to authorize the artifact name against.
pub struct UsableSession {
    pub session_id: String,
    pub key: SealKey,
    pub firmware_files: Vec<String>,
}

/// Result of a completion call.
#[derive(Debug, Clone, Copy)]
pub struct CompleteOutcome {
    /// Whether the call transitioned the session (false on unknown id,
    /// fingerprint mismatch, or an already-terminal session).
    pub accepted: bool,
    pub credits_deducted: bool,
}

pub struct SessionAuthority {
    vault: Arc<Vault>,
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
    burned_retention: Duration,
}

impl SessionAuthority {
    pub fn new(vault: Arc<Vault>, ttl: Duration, burned_retention: Duration) -> Self {
        Self {
            vault,
            sessions: RwLock::new(HashMap::new()),
            ttl,
            burned_retention,
        }
    }

    /// Mint a new session bound to `hwid`.
    ///
    /// Validates inputs, confirms the device type is provisioned, generates
    /// and wraps a fresh session key, and inserts the session as `Active`.
    pub async fn create(
        &self,
        hwid: &str,
        device_type: &str,
        client_public_key_pem: &str,
    ) -> Result<SessionSnapshot, SessionError> {
        for (value, field) in [
            (hwid, "HWID"),
            (device_type, "DeviceType"),
            (client_public_key_pem, "ClientPublicKeyPem"),
        ] {
            if value.trim().is_empty() {
                return Err(SessionError::Validation {
                    message: format!("{field} must not be empty"),
                });
            }
        }

        let firmware_files = self.vault.required_artifacts(device_type).map_err(map_vault)?;
        if !self.vault.all_present(device_type).map_err(map_vault)? {
            return Err(SessionError::FirmwareMissing {
                device_type: device_type.to_owned(),
            });
        }
        let credit_cost = self.vault.credit_cost(device_type).map_err(map_vault)?;

        let key = SealKey::generate();
        let wrapped_key = wrap::wrap_session_key(client_public_key_pem, key.as_bytes())
            .map_err(|_| SessionError::InvalidClientKey)?;

        let now = Utc::now();
        let mut sessions = self.sessions.write().await;

        // Collisions are statistically impossible at 256 bits; the loop is
        // the cheap guarantee that they are also structurally impossible.
        let id = loop {
            let candidate = new_session_id();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let session = Session {
            id: id.clone(),
            hwid: hwid.to_owned(),
            device_type: device_type.to_owned(),
            key,
            wrapped_key: wrapped_key.clone(),
            created_at: now,
            expires_at: now + self.ttl,
            firmware_files: firmware_files.clone(),
            credit_cost,
            status: SessionStatus::Active,
            failure_reason: None,
            status_changed_at: now,
        };
        let snapshot = snapshot_of(&session);
        sessions.insert(id.clone(), session);

        tracing::info!(
            session = %id,
            device_type,
            hwid_prefix = hwid_prefix(hwid),
            "minted flash session"
        );
        Ok(snapshot)
    }

    /// Look up a session by identifier and bound fingerprint. Unknown id and
    /// fingerprint mismatch are both `None`. Applies the lazy expiry
    /// transition before answering.
    pub async fn lookup(&self, session_id: &str, hwid: &str) -> Option<SessionSnapshot> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(session_id)?;
        if session.hwid != hwid {
            tracing::warn!(
                session = %session_id,
                hwid_prefix = hwid_prefix(hwid),
                "fingerprint mismatch on lookup"
            );
            return None;
        }
        expire_if_due(session, Utc::now());
        Some(snapshot_of(session))
    }

    /// Like [`lookup`](Self::lookup), but fails unless the session is
    /// currently usable (Active and inside its TTL), and hands back the
    /// key copy an artifact request needs.
    pub async fn require_usable(
        &self,
        session_id: &str,
        hwid: &str,
    ) -> Result<UsableSession, SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(session_id).ok_or(SessionError::NotFound)?;
        if session.hwid != hwid {
            tracing::warn!(
                session = %session_id,
                hwid_prefix = hwid_prefix(hwid),
                "fingerprint mismatch on artifact request"
            );
            return Err(SessionError::NotFound);
        }
        expire_if_due(session, Utc::now());
        if session.status.is_terminal() {
            return Err(SessionError::Unusable { status: session.status });
        }
        Ok(UsableSession {
            session_id: session.id.clone(),
            key: session.key.clone(),
            firmware_files: session.firmware_files.clone(),
        })
    }

    /// Transition an Active session to Completed or Failed, then burn it and
    /// zeroize its key. Terminal sessions, unknown identifiers, and
    /// fingerprint mismatches are all reported as not accepted — never by
    /// mutating state.
    pub async fn complete(
        &self,
        session_id: &str,
        hwid: &str,
        success: bool,
        reason: Option<String>,
    ) -> CompleteOutcome {
        let rejected = CompleteOutcome {
            accepted: false,
            credits_deducted: false,
        };

        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(session_id) else {
            return rejected;
        };
        if session.hwid != hwid {
            tracing::warn!(
                session = %session_id,
                hwid_prefix = hwid_prefix(hwid),
                "fingerprint mismatch on completion"
            );
            return rejected;
        }

        let now = Utc::now();
        expire_if_due(session, now);
        if session.status.is_terminal() {
            return rejected;
        }

        session.status = if success {
            SessionStatus::Completed
        } else {
            SessionStatus::Failed
        };
        session.failure_reason = reason;
        tracing::info!(
            session = %session_id,
            device_type = %session.device_type,
            outcome = %session.status,
            reason = session.failure_reason.as_deref().unwrap_or(""),
            age_secs = (now - session.created_at).num_seconds(),
            "flash session completed; burning"
        );

        // Burn immediately: the key is dead from this point on.
        session.status = SessionStatus::Burned;
        session.status_changed_at = now;
        session.key.zeroize();

        CompleteOutcome {
            accepted: true,
            credits_deducted: success,
        }
    }

    /// Remove expired sessions and burned sessions past the retention
    /// window, zeroizing keys on the way out. Idempotent on a quiesced
    /// table. Driven by a periodic timer in the server binary.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| {
            expire_if_due(session, now);
            let remove = match session.status {
                SessionStatus::Expired => true,
                SessionStatus::Burned => now - session.status_changed_at >= self.burned_retention,
                _ => false,
            };
            if remove {
                session.key.zeroize();
            }
            !remove
        });
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = sessions.len(), "session sweep");
        }
        removed
    }

    /// Number of sessions currently held, any status.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Lazy Active → Expired transition. The key dies with usability.
fn expire_if_due(session: &mut Session, now: DateTime<Utc>) {
    if session.status == SessionStatus::Active && now > session.expires_at {
        session.status = SessionStatus::Expired;
        session.status_changed_at = now;
        session.key.zeroize();
        tracing::debug!(session = %session.id, "session expired");
    }
}

fn snapshot_of(session: &Session) -> SessionSnapshot {
    SessionSnapshot {
        session_id: session.id.clone(),
        wrapped_key: session.wrapped_key.clone(),
        expires_at: session.expires_at,
        status: session.status,
        firmware_files: session.firmware_files.clone(),
        credit_cost: session.credit_cost,
    }
}

fn new_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Fingerprints are identities; logs only ever see a short prefix.
fn hwid_prefix(hwid: &str) -> String {
    hwid.chars().take(8).collect()
}

fn map_vault(e: VaultError) -> SessionError {
    match e {
        VaultError::UnknownDeviceType { device_type } => {
            SessionError::UnknownDeviceType { device_type }
        }
        other => SessionError::Storage(other),
    }
}
