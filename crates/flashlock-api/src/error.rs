//! Endpoint error type and its HTTP mapping.
//!
//! The endpoint performs exactly one transformation on the failure taxonomy
//! bubbling up from the vault and the session authority: error → response
//! code. Unknown session and fingerprint mismatch share one 404 so the
//! response cannot be used as an enumeration oracle, and 5xx bodies never
//! carry internal detail — that goes to the log only.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use flashlock_common::protocol::SessionStatus;
use flashlock_sessions::SessionError;
use flashlock_vault::VaultError;

/// Errors surfaced by the `/api/flash` handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation { message: String },

    #[error("unknown device type: {device_type}")]
    UnknownDeviceType { device_type: String },

    #[error("firmware for device type {device_type} is not fully provisioned")]
    FirmwareMissing { device_type: String },

    #[error("artifact {name} is not part of this session's manifest")]
    ArtifactNotInManifest { name: String },

    #[error("session is {status}")]
    SessionUnusable { status: SessionStatus },

    #[error("session not found")]
    SessionNotFound,

    #[error("firmware artifact not found: {name}")]
    ArtifactNotFound { name: String },

    #[error("firmware artifact failed authentication")]
    Integrity,

    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body sent to clients.
#[derive(Serialize)]
struct ErrorResponse {
    code: u16,
    error: String,
    message: String,
}

impl ApiError {
    /// Map error to HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. }
            | Self::UnknownDeviceType { .. }
            | Self::FirmwareMissing { .. }
            | Self::ArtifactNotInManifest { .. }
            | Self::SessionUnusable { .. } => StatusCode::BAD_REQUEST,
            Self::SessionNotFound | Self::ArtifactNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Integrity | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error code string for programmatic handling by clients.
    pub fn error_code(&self) -> &str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::UnknownDeviceType { .. } => "UNKNOWN_DEVICE_TYPE",
            Self::FirmwareMissing { .. } => "FIRMWARE_MISSING",
            Self::ArtifactNotInManifest { .. } => "ARTIFACT_NOT_IN_MANIFEST",
            Self::SessionUnusable { .. } => "SESSION_UNUSABLE",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::ArtifactNotFound { .. } => "FIRMWARE_NOT_FOUND",
            Self::Integrity => "INTEGRITY_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't leak internal details to clients
        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!("internal error: {detail}");
                "An internal error occurred".to_string()
            }
            ApiError::Integrity => {
                // Already logged by the vault with the artifact name.
                "Firmware artifact failed authentication".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            code: status.as_u16(),
            error: self.error_code().to_string(),
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Validation { message } => Self::Validation { message },
            SessionError::UnknownDeviceType { device_type } => {
                Self::UnknownDeviceType { device_type }
            }
            SessionError::FirmwareMissing { device_type } => Self::FirmwareMissing { device_type },
            SessionError::InvalidClientKey => Self::Validation {
                message: "client public key could not be used to wrap the session key".into(),
            },
            SessionError::NotFound => Self::SessionNotFound,
            SessionError::Unusable { status } => Self::SessionUnusable { status },
            SessionError::Storage(vault) => vault.into(),
        }
    }
}

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::UnknownDeviceType { device_type } => {
                Self::UnknownDeviceType { device_type }
            }
            VaultError::NotFound { name } => Self::ArtifactNotFound { name },
            VaultError::Integrity { .. } => Self::Integrity,
            VaultError::MasterKeyRequired | VaultError::MasterKeyInvalid => {
                Self::Internal("vault master key misconfigured".into())
            }
            VaultError::Io(e) => Self::Internal(format!("storage I/O: {e}")),
        }
    }
}

/// Convenience type alias for handler results.
pub type ApiResult<T> = Result<T, ApiError>;
