//! # flashlock-agent
//!
//! The client half of the flash protocol: probes a stable hardware identity,
//! keeps the installation's keypair behind user-scoped protection, pulls
//! session-sealed firmware into memory only, supervises the native flashing
//! tool, and destroys every trace afterwards.
//!
//! Composition is plain constructors: build a [`FlashClient`], a
//! [`KeyCustodian`], and a [`ToolRunner`], hand them to [`FlashAgent`], and
//! call [`FlashAgent::run_flash`] with a progress sink and a cancellation
//! token. One flash runs per process at a time.

pub mod client;
pub mod config;
pub mod custodian;
pub mod error;
pub mod flasher;
pub mod hwid;
pub mod toolrunner;

pub use client::FlashClient;
pub use config::AgentConfig;
pub use custodian::{KeyCustodian, KeyProtection, UserScopedProtection};
pub use error::AgentError;
pub use flasher::{FlashAgent, FlashPhase, ProgressSink};
pub use toolrunner::ToolRunner;
