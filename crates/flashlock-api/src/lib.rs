//! # flashlock-api
//!
//! HTTP layer for the one-time flash protocol. Four resources under
//! `/api/flash` plus a health probe; all state lives in the session
//! authority and the vault, composed once at startup and shared through
//! [`AppState`].

pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use flashlock_sessions::SessionAuthority;
use flashlock_vault::Vault;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub authority: Arc<SessionAuthority>,
    pub vault: Arc<Vault>,
}

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let flash_routes = Router::new()
        .merge(routes::sessions::router())
        .merge(routes::firmware::router());

    Router::new()
        .nest("/api/flash", flash_routes)
        .merge(routes::health::router())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}
