//! Wire types for the `/api/flash` protocol.
//!
//! ```text
//! POST /api/flash/sessions                          — mint a one-time session
//! GET  /api/flash/sessions/{id}?hwid=…              — read it back
//! GET  /api/flash/sessions/{id}/firmware/{name}?hwid=…
//!                                                   — sealed artifact stream
//! POST /api/flash/sessions/{id}/complete            — report outcome, burn
//! ```
//!
//! Field casing on the wire is fixed (`HWID`, `SessionId`, …) and must not
//! change; both halves deserialize these exact names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Lifecycle of a one-time session. Terminal statuses are sticky: once a
/// session leaves `Active` it can never be used again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
    Expired,
    Burned,
}

impl SessionStatus {
    /// Whether any further artifact download may be honored.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Active => "Active",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Expired => "Expired",
            Self::Burned => "Burned",
        };
        f.write_str(label)
    }
}

// ============================================================
// Requests
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateSessionRequest {
    /// Hardware fingerprint the session will be bound to.
    #[serde(rename = "HWID")]
    #[validate(length(min = 1, message = "HWID must not be empty"))]
    pub hwid: String,

    #[serde(rename = "DeviceType")]
    #[validate(length(min = 1, message = "DeviceType must not be empty"))]
    pub device_type: String,

    /// Client public key (SPKI or PKCS#1 PEM) the session key is wrapped under.
    #[serde(rename = "ClientPublicKeyPem")]
    #[validate(length(min = 1, message = "ClientPublicKeyPem must not be empty"))]
    pub client_public_key_pem: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CompleteRequest {
    #[serde(rename = "HWID")]
    #[validate(length(min = 1, message = "HWID must not be empty"))]
    pub hwid: String,

    #[serde(rename = "Success")]
    pub success: bool,

    #[serde(rename = "ErrorMessage", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// `?hwid=…` query parameter carried by the GET resources.
#[derive(Debug, Clone, Deserialize)]
pub struct HwidQuery {
    pub hwid: String,
}

// ============================================================
// Responses
// ============================================================

/// The session object returned by create and read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEnvelope {
    #[serde(rename = "SessionId")]
    pub session_id: String,

    /// Session key wrapped under the client's public key, as issued at
    /// create. Reads return the same bytes; no re-wrap is ever performed.
    #[serde(rename = "WrappedSessionKeyBase64")]
    pub wrapped_session_key_base64: String,

    #[serde(rename = "ExpiresAt")]
    pub expires_at: DateTime<Utc>,

    #[serde(rename = "Status")]
    pub status: SessionStatus,

    /// Ordered artifact manifest for the bound device type.
    #[serde(rename = "FirmwareFiles")]
    pub firmware_files: Vec<String>,

    #[serde(rename = "CreditCost")]
    pub credit_cost: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteResponse {
    #[serde(rename = "Success")]
    pub success: bool,

    #[serde(rename = "Message")]
    pub message: String,

    #[serde(rename = "CreditsDeducted")]
    pub credits_deducted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_uses_wire_casing() {
        let req = CreateSessionRequest {
            hwid: "ABC".into(),
            device_type: "MTK6580".into(),
            client_public_key_pem: "-----BEGIN PUBLIC KEY-----".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("HWID").is_some());
        assert!(json.get("DeviceType").is_some());
        assert!(json.get("ClientPublicKeyPem").is_some());
    }

    #[test]
    fn empty_fields_fail_validation() {
        let req = CreateSessionRequest {
            hwid: String::new(),
            device_type: "MTK6580".into(),
            client_public_key_pem: "pem".into(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn status_round_trips_as_string() {
        let json = serde_json::to_string(&SessionStatus::Burned).unwrap();
        assert_eq!(json, "\"Burned\"");
        let back: SessionStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SessionStatus::Burned);
    }

    #[test]
    fn expires_at_serializes_as_iso8601_utc() {
        let envelope = SessionEnvelope {
            session_id: "s".into(),
            wrapped_session_key_base64: "k".into(),
            expires_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            status: SessionStatus::Active,
            firmware_files: vec!["system.bin".into()],
            credit_cost: 1,
        };
        let json = serde_json::to_value(&envelope).unwrap();
        let ts = json["ExpiresAt"].as_str().unwrap();
        assert!(ts.starts_with("2023-11-14T"));
    }
}
