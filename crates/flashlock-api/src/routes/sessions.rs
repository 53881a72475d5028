//! Session lifecycle routes.
//!
//! POST /sessions                 — mint a one-time session
//! GET  /sessions/{id}?hwid=…     — read a session back
//! POST /sessions/{id}/complete   — report outcome; the authority burns it

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use std::sync::Arc;
use validator::Validate;

use flashlock_common::protocol::{
    CompleteRequest, CompleteResponse, CreateSessionRequest, HwidQuery, SessionEnvelope,
};
use flashlock_sessions::SessionSnapshot;

use crate::AppState;
use crate::error::{ApiError, ApiResult};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{session_id}", get(read_session))
        .route("/sessions/{session_id}/complete", post(complete_session))
}

fn envelope_of(snapshot: SessionSnapshot) -> SessionEnvelope {
    SessionEnvelope {
        session_id: snapshot.session_id,
        wrapped_session_key_base64: B64.encode(&snapshot.wrapped_key),
        expires_at: snapshot.expires_at,
        status: snapshot.status,
        firmware_files: snapshot.firmware_files,
        credit_cost: snapshot.credit_cost,
    }
}

// ============================================================
// POST /sessions
// ============================================================

async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<SessionEnvelope>)> {
    body.validate().map_err(|e| ApiError::Validation {
        message: e.to_string(),
    })?;

    let snapshot = state
        .authority
        .create(&body.hwid, &body.device_type, &body.client_public_key_pem)
        .await?;

    Ok((StatusCode::CREATED, Json(envelope_of(snapshot))))
}

// ============================================================
// GET /sessions/{session_id}
// ============================================================

async fn read_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<HwidQuery>,
) -> ApiResult<Json<SessionEnvelope>> {
    // The wrapped key is returned exactly as issued; no re-wrap happens here.
    let snapshot = state
        .authority
        .lookup(&session_id, &query.hwid)
        .await
        .ok_or(ApiError::SessionNotFound)?;

    Ok(Json(envelope_of(snapshot)))
}

// ============================================================
// POST /sessions/{session_id}/complete
// ============================================================

async fn complete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(body): Json<CompleteRequest>,
) -> ApiResult<Json<CompleteResponse>> {
    body.validate().map_err(|e| ApiError::Validation {
        message: e.to_string(),
    })?;

    let outcome = state
        .authority
        .complete(&session_id, &body.hwid, body.success, body.error_message)
        .await;

    let message = if !outcome.accepted {
        "Session not found or already terminal".to_string()
    } else if body.success {
        "Flash completed; session burned".to_string()
    } else {
        "Flash failed; session burned, no credits charged".to_string()
    };

    Ok(Json(CompleteResponse {
        success: outcome.accepted,
        message,
        credits_deducted: outcome.credits_deducted,
    }))
}
