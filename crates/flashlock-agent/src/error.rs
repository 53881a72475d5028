//! Error types for the flash agent.
//!
//! The agent recovers from nothing: every error funnels into a best-effort
//! session completion with `success = false` and a descriptive reason,
//! followed by zeroization of whatever transient material exists.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Device type has no entry in the client's tool table.
    #[error("unknown device type: {device_type}")]
    UnknownDeviceType { device_type: String },

    /// The wrapped session key could not be unwrapped with our private key.
    #[error("session key unwrap failed")]
    Wrap,

    /// Client keypair storage or protection failed.
    #[error("client key store: {message}")]
    KeyStore { message: String },

    /// A sealed firmware blob failed authentication client-side.
    #[error("firmware blob failed authentication")]
    Integrity,

    /// The server answered with a non-2xx status.
    #[error("API error {status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// An error from the underlying HTTP client (I/O, timeout, protocol).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The flashing tool is absent from the tools directory.
    #[error("flash tool not found: {tool}")]
    ToolMissing { tool: String },

    /// The flashing tool's hash is not on the integrity allowlist.
    #[error("flash tool failed integrity check: {tool}")]
    ToolUntrusted { tool: String },

    /// Cooperative cancellation was observed.
    #[error("cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
