//! In-process protocol tests: the full router wired to a real vault and
//! session authority, driven request-by-request through `tower::oneshot`.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::Duration;
use rand_core::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use serde_json::{Value, json};
use tower::ServiceExt;

use flashlock_api::{AppState, build_router};
use flashlock_common::protocol::{SessionEnvelope, SessionStatus};
use flashlock_common::sealed::{self, SealKey};
use flashlock_common::wrap;
use flashlock_sessions::SessionAuthority;
use flashlock_vault::Vault;

const HWID: &str = "3A46FB12C0DE";
const SYSTEM_IMAGE: &[u8] = b"system partition image bytes";
const LOADER_IMAGE: &[u8] = b"usb loader image bytes";

struct Harness {
    _dir: tempfile::TempDir,
    app: Router,
    private_key: RsaPrivateKey,
    public_pem: String,
}

fn harness(ttl: Duration) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let vault = Vault::new(dir.path(), SealKey::generate());
    vault.seal_artifact("system.bin", SYSTEM_IMAGE).unwrap();
    vault.seal_artifact("usbloader-5577.bin", LOADER_IMAGE).unwrap();
    let vault = Arc::new(vault);

    let authority = Arc::new(SessionAuthority::new(
        vault.clone(),
        ttl,
        Duration::seconds(600),
    ));
    let app = build_router(AppState { authority, vault });

    let private_key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
    let public_pem = private_key
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .unwrap();

    Harness {
        _dir: dir,
        app,
        private_key,
        public_pem,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn create_session(h: &Harness) -> SessionEnvelope {
    let (status, body) = send(
        &h.app,
        post_json(
            "/api/flash/sessions",
            json!({
                "HWID": HWID,
                "DeviceType": "MTK6580",
                "ClientPublicKeyPem": h.public_pem,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    serde_json::from_slice(&body).unwrap()
}

fn session_key_of(h: &Harness, envelope: &SessionEnvelope) -> SealKey {
    use base64::Engine as _;
    let wrapped = base64::engine::general_purpose::STANDARD
        .decode(&envelope.wrapped_session_key_base64)
        .unwrap();
    let unwrapped = wrap::unwrap_session_key(&h.private_key, &wrapped).unwrap();
    SealKey::from_slice(unwrapped.expose()).unwrap()
}

#[tokio::test]
async fn happy_path_create_fetch_complete_burn() {
    let h = harness(Duration::minutes(15));

    let envelope = create_session(&h).await;
    assert_eq!(envelope.status, SessionStatus::Active);
    assert_eq!(envelope.credit_cost, 1);
    assert_eq!(envelope.firmware_files, ["system.bin", "usbloader-5577.bin"]);
    let ttl = envelope.expires_at - chrono::Utc::now();
    assert!(ttl > Duration::minutes(14) && ttl <= Duration::minutes(15));

    let key = session_key_of(&h, &envelope);

    // Both artifacts stream sealed under the session key and decrypt to the
    // exact vault plaintext.
    for (name, expected) in [("system.bin", SYSTEM_IMAGE), ("usbloader-5577.bin", LOADER_IMAGE)] {
        let uri = format!(
            "/api/flash/sessions/{}/firmware/{name}?hwid={HWID}",
            envelope.session_id
        );
        let (status, blob) = send(&h.app, get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        let plaintext = sealed::open(&key, &blob).unwrap();
        assert_eq!(plaintext.expose(), expected);
    }

    // Complete with success: credits are charged and the session burns.
    let complete_uri = format!("/api/flash/sessions/{}/complete", envelope.session_id);
    let (status, body) = send(
        &h.app,
        post_json(&complete_uri, json!({ "HWID": HWID, "Success": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let reply: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply["Success"], true);
    assert_eq!(reply["CreditsDeducted"], true);

    // Any further fetch is a 400 naming the burned status.
    let uri = format!(
        "/api/flash/sessions/{}/firmware/system.bin?hwid={HWID}",
        envelope.session_id
    );
    let (status, body) = send(&h.app, get(&uri)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["error"], "SESSION_UNUSABLE");
    assert!(error["message"].as_str().unwrap().contains("Burned"));

    // Completion is one-shot.
    let (status, body) = send(
        &h.app,
        post_json(&complete_uri, json!({ "HWID": HWID, "Success": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let reply: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply["Success"], false);
    assert_eq!(reply["CreditsDeducted"], false);
}

#[tokio::test]
async fn fingerprint_mismatch_is_a_plain_not_found() {
    let h = harness(Duration::minutes(15));
    let envelope = create_session(&h).await;

    let uri = format!(
        "/api/flash/sessions/{}/firmware/system.bin?hwid=DIFFERENT",
        envelope.session_id
    );
    let (status, _) = send(&h.app, get(&uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The mismatch did not consume or damage the session.
    let uri = format!(
        "/api/flash/sessions/{}/firmware/system.bin?hwid={HWID}",
        envelope.session_id
    );
    let (status, _) = send(&h.app, get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_session_matches_mismatch_shape() {
    let h = harness(Duration::minutes(15));
    let (status, body) = send(
        &h.app,
        get(&format!("/api/flash/sessions/nope?hwid={HWID}")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["error"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn artifact_outside_manifest_is_rejected() {
    let h = harness(Duration::minutes(15));
    let envelope = create_session(&h).await;

    let uri = format!(
        "/api/flash/sessions/{}/firmware/firehose.mbn?hwid={HWID}",
        envelope.session_id
    );
    let (status, body) = send(&h.app, get(&uri)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["error"], "ARTIFACT_NOT_IN_MANIFEST");
}

#[tokio::test]
async fn expired_session_rejects_fetch_and_completion() {
    let h = harness(Duration::zero());
    let envelope = create_session(&h).await;

    let uri = format!(
        "/api/flash/sessions/{}/firmware/system.bin?hwid={HWID}",
        envelope.session_id
    );
    let (status, body) = send(&h.app, get(&uri)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert!(error["message"].as_str().unwrap().contains("Expired"));

    let complete_uri = format!("/api/flash/sessions/{}/complete", envelope.session_id);
    let (status, body) = send(
        &h.app,
        post_json(&complete_uri, json!({ "HWID": HWID, "Success": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let reply: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply["Success"], false);
}

#[tokio::test]
async fn create_validates_inputs_and_device_type() {
    let h = harness(Duration::minutes(15));

    let (status, _) = send(
        &h.app,
        post_json(
            "/api/flash/sessions",
            json!({ "HWID": "", "DeviceType": "MTK6580", "ClientPublicKeyPem": h.public_pem }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &h.app,
        post_json(
            "/api/flash/sessions",
            json!({ "HWID": HWID, "DeviceType": "SPD7731", "ClientPublicKeyPem": h.public_pem }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["error"], "UNKNOWN_DEVICE_TYPE");
}

#[tokio::test]
async fn read_session_returns_the_original_wrap() {
    let h = harness(Duration::minutes(15));
    let envelope = create_session(&h).await;

    let uri = format!("/api/flash/sessions/{}?hwid={HWID}", envelope.session_id);
    let (status, body) = send(&h.app, get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    let read: SessionEnvelope = serde_json::from_slice(&body).unwrap();

    assert_eq!(read.session_id, envelope.session_id);
    assert_eq!(
        read.wrapped_session_key_base64,
        envelope.wrapped_session_key_base64
    );
    assert_eq!(read.expires_at, envelope.expires_at);
}

#[tokio::test]
async fn tampered_at_rest_artifact_surfaces_as_integrity_error() {
    let h = harness(Duration::minutes(15));
    // Session create is lazy about integrity — it only checks presence.
    let envelope = create_session(&h).await;

    let path = h._dir.path().join("system.bin.enc");
    let mut blob = std::fs::read(&path).unwrap();
    let last = blob.len() - 1;
    blob[last] ^= 0x01;
    std::fs::write(&path, blob).unwrap();

    let uri = format!(
        "/api/flash/sessions/{}/firmware/system.bin?hwid={HWID}",
        envelope.session_id
    );
    let (status, body) = send(&h.app, get(&uri)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["error"], "INTEGRITY_ERROR");
}
