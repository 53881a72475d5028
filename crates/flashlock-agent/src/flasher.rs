//! Flash orchestrator.
//!
//! Drives one flash as a sequential state machine: probe identity, mint a
//! session, unwrap the session key, pull and decrypt each artifact in
//! manifest order, hand the plaintext to the tool supervisor, report the
//! outcome, destroy the key. Every failure and every observed cancellation
//! funnels through the same teardown: a best-effort completion call with
//! `success = false` and a reason, then zeroization.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use tokio_util::sync::CancellationToken;

use flashlock_common::protocol::{CompleteRequest, CreateSessionRequest, SessionEnvelope};
use flashlock_common::sealed::{self, SealKey};
use flashlock_common::secret::SecretBytes;

use crate::client::FlashClient;
use crate::config::DeviceTool;
use crate::custodian::KeyCustodian;
use crate::error::{AgentError, Result};
use crate::hwid;
use crate::toolrunner::{ToolOutcome, ToolRunner};

/// Progress events, in the order a successful flash emits them.
#[derive(Debug, Clone)]
pub enum FlashPhase {
    SessionRequested,
    SessionEstablished { session_id: String, artifacts: usize },
    FetchingArtifact { index: usize, name: String },
    ArtifactReady { name: String },
    ToolRunning,
    ToolOutput(String),
    Reporting { success: bool },
    Done { success: bool },
    Aborted { reason: String },
}

/// Receiver for progress events. Producers never assume UI affinity; a sink
/// that feeds a UI is responsible for marshaling onto its own thread.
pub trait ProgressSink: Send + Sync {
    fn report(&self, phase: FlashPhase);
}

pub struct FlashAgent {
    client: FlashClient,
    custodian: KeyCustodian,
    runner: ToolRunner,
    devices: HashMap<String, DeviceTool>,
}

impl FlashAgent {
    pub fn new(
        client: FlashClient,
        custodian: KeyCustodian,
        runner: ToolRunner,
        devices: HashMap<String, DeviceTool>,
    ) -> Self {
        Self {
            client,
            custodian,
            runner,
            devices,
        }
    }

    /// Run one complete flash for `device_type`. Returns whether the tool
    /// reported success. Errors after session establishment still produce a
    /// best-effort failure completion before propagating.
    pub async fn run_flash(
        &self,
        device_type: &str,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let device_tool = self
            .devices
            .get(device_type)
            .cloned()
            .ok_or_else(|| AgentError::UnknownDeviceType {
                device_type: device_type.to_owned(),
            })?;

        let fingerprint = hwid::fingerprint();
        let public_key_pem = self.custodian.public_key_pem()?;

        sink.report(FlashPhase::SessionRequested);
        let session = self
            .client
            .create_session(
                &CreateSessionRequest {
                    hwid: fingerprint.to_owned(),
                    device_type: device_type.to_owned(),
                    client_public_key_pem: public_key_pem,
                },
                cancel,
            )
            .await?;
        sink.report(FlashPhase::SessionEstablished {
            session_id: session.session_id.clone(),
            artifacts: session.firmware_files.len(),
        });

        // From here a session exists server-side; whatever happens, it gets
        // a completion call and the key material gets destroyed.
        let outcome = self.drive(&session, fingerprint, &device_tool, sink, cancel).await;

        let (success, error_message) = match &outcome {
            Ok(tool) if tool.success => (true, None),
            Ok(tool) => (false, Some(tool_failure_reason(tool))),
            Err(e) => (false, Some(completion_reason(e))),
        };

        sink.report(FlashPhase::Reporting { success });
        // The flash's own token may already be cancelled; the completion
        // call must still go out.
        let report_cancel = CancellationToken::new();
        let completion = self
            .client
            .complete(
                &session.session_id,
                &CompleteRequest {
                    hwid: fingerprint.to_owned(),
                    success,
                    error_message,
                },
                &report_cancel,
            )
            .await;
        if let Err(e) = completion {
            tracing::warn!(error = %e, "completion report failed");
        }

        match outcome {
            Ok(tool) => {
                sink.report(FlashPhase::Done { success: tool.success });
                Ok(tool.success)
            }
            Err(e) => {
                sink.report(FlashPhase::Aborted {
                    reason: completion_reason(&e),
                });
                Err(e)
            }
        }
    }

    /// The cancellable middle of the flash: unwrap, fetch/decrypt each
    /// artifact, run the tool. The session key lives exactly as long as this
    /// call; all buffers zeroize on the way out, error or not.
    async fn drive(
        &self,
        session: &SessionEnvelope,
        fingerprint: &str,
        device_tool: &DeviceTool,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ToolOutcome> {
        let wrapped = B64
            .decode(&session.wrapped_session_key_base64)
            .map_err(|_| AgentError::Wrap)?;
        let unwrapped = self.custodian.unwrap_session_key(&wrapped)?;
        let session_key =
            SealKey::from_slice(unwrapped.expose()).map_err(|_| AgentError::Wrap)?;
        drop(unwrapped);

        let mut artifacts: Vec<(String, SecretBytes)> =
            Vec::with_capacity(session.firmware_files.len());
        for (index, name) in session.firmware_files.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            sink.report(FlashPhase::FetchingArtifact {
                index,
                name: name.clone(),
            });

            let blob = self
                .client
                .fetch_firmware(&session.session_id, name, fingerprint, cancel)
                .await?;
            let plaintext =
                sealed::open(&session_key, &blob).map_err(|_| AgentError::Integrity)?;
            sink.report(FlashPhase::ArtifactReady { name: name.clone() });
            artifacts.push((name.clone(), plaintext));
        }

        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        sink.report(FlashPhase::ToolRunning);
        self.runner
            .run(&device_tool.tool, &device_tool.args, artifacts, sink, cancel)
            .await
        // session_key drops (and zeroizes) here
    }
}

fn tool_failure_reason(outcome: &ToolOutcome) -> String {
    match outcome.exit_code {
        Some(code) => format!("Flash tool failed (exit {code})"),
        None => "Flash tool failed (terminated by signal)".to_owned(),
    }
}

/// The reason string reported to the server on failure.
fn completion_reason(error: &AgentError) -> String {
    match error {
        AgentError::Cancelled => "cancelled".to_owned(),
        AgentError::Integrity => "integrity".to_owned(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_reasons_match_the_protocol_vocabulary() {
        assert_eq!(completion_reason(&AgentError::Cancelled), "cancelled");
        assert_eq!(completion_reason(&AgentError::Integrity), "integrity");
        assert!(
            completion_reason(&AgentError::ToolMissing { tool: "qdl".into() }).contains("qdl")
        );
    }

    #[test]
    fn tool_failures_name_the_exit_code() {
        let reason = tool_failure_reason(&ToolOutcome {
            success: false,
            exit_code: Some(2),
        });
        assert_eq!(reason, "Flash tool failed (exit 2)");
    }
}
