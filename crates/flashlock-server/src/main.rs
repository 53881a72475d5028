//! # Flashlock Server
//!
//! Main binary for the server half of the flash protocol. Wires the firmware
//! vault, the session authority, and the HTTP transfer endpoint together by
//! plain constructor composition, then serves until shut down. A background
//! task sweeps the session table on a fixed cadence.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use flashlock_api::{AppState, build_router};
use flashlock_sessions::SessionAuthority;
use flashlock_vault::Vault;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = flashlock_common::config::init()?;

    // Initialize tracing (structured logging)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flashlock=debug,tower_http=debug".into()),
        )
        .with_target(true)
        .init();

    tracing::info!("Starting flashlock-server v{}", env!("CARGO_PKG_VERSION"));

    // === Firmware vault ===
    // Refuses to start in production without a configured master key.
    let vault = Arc::new(Vault::from_config(config)?);
    tracing::info!(dir = %config.storage.firmware_dir, "firmware vault ready");

    // === Session authority ===
    let ttl = chrono::Duration::minutes(config.session.ttl_minutes as i64);
    let retention = chrono::Duration::seconds(config.session.burned_retention_secs as i64);
    let authority = Arc::new(SessionAuthority::new(vault.clone(), ttl, retention));

    // === Background sweep ===
    // Lazy expiry keeps the invariants; the sweep keeps the table bounded.
    let sweeper = authority.clone();
    let sweep_interval = Duration::from_secs(config.session.sweep_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.tick().await; // the first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            let removed = sweeper.sweep().await;
            if removed > 0 {
                tracing::info!(removed, "sweep removed terminal sessions");
            }
        }
    });

    // === HTTP endpoint ===
    let app = build_router(AppState { authority, vault });
    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!("transfer endpoint listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
