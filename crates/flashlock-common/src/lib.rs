//! # flashlock-common
//!
//! Shared primitives for both halves of the flash protocol: the sealed-blob
//! codec, session-key wrapping, zeroizing buffers, wire types, and server
//! configuration. This is the foundation layer — no session or vault logic,
//! just the contracts both sides must agree on byte-for-byte.

pub mod config;
pub mod protocol;
pub mod sealed;
pub mod secret;
pub mod wrap;
