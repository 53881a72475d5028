//! Artifact transfer route.
//!
//! GET /sessions/{id}/firmware/{name}?hwid=…
//!
//! The response body reuses the at-rest framing `nonce(12) || tag(16) ||
//! ciphertext`, but under the *session* key with a nonce sampled fresh for
//! this request. Vault plaintext exists only inside this handler and is
//! zeroized before the response leaves it.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

use flashlock_common::protocol::HwidQuery;
use flashlock_common::sealed;

use crate::AppState;
use crate::error::{ApiError, ApiResult};

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route(
        "/sessions/{session_id}/firmware/{artifact}",
        get(fetch_artifact),
    )
}

async fn fetch_artifact(
    State(state): State<Arc<AppState>>,
    Path((session_id, artifact)): Path<(String, String)>,
    Query(query): Query<HwidQuery>,
) -> ApiResult<impl IntoResponse> {
    let usable = state.authority.require_usable(&session_id, &query.hwid).await?;

    if !usable.firmware_files.iter().any(|name| name == &artifact) {
        return Err(ApiError::ArtifactNotInManifest { name: artifact });
    }

    let plaintext = state.vault.open_plaintext(&artifact)?;
    let blob = sealed::seal(&usable.key, plaintext.expose())
        .map_err(|e| ApiError::Internal(format!("re-encryption failed: {e}")))?;
    drop(plaintext);

    tracing::debug!(
        session = %usable.session_id,
        artifact = %artifact,
        bytes = blob.len(),
        "artifact re-encrypted for transfer"
    );

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        blob,
    ))
}
