//! Server configuration loaded from environment variables and config files.
//!
//! Config precedence: env vars > .env file > config.toml > defaults.
//! Every key can be overridden through its `FLASHLOCK_`-prefixed
//! environment equivalent, e.g. `FLASHLOCK_SESSION__TTL_MINUTES=5` or
//! `FLASHLOCK_SECURITY__MASTER_KEY_BASE64=…`.

use serde::Deserialize;
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Get the global server configuration.
///
/// # Panics
/// Panics if config has not been initialized via [`init`].
pub fn get() -> &'static AppConfig {
    CONFIG
        .get()
        .expect("Config not initialized. Call flashlock_common::config::init() first.")
}

/// Initialize the global configuration from environment.
///
/// Should be called once at server startup, before anything reads config.
pub fn init() -> Result<&'static AppConfig, config::ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let cfg = config::Config::builder()
        // Defaults
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8470)?
        .set_default("storage.firmware_dir", "./data/firmware")?
        .set_default("session.ttl_minutes", 15)?
        .set_default("session.sweep_interval_secs", 180)?
        .set_default("session.burned_retention_secs", 600)?
        .set_default("security.production", false)?
        // Optional config file
        .add_source(config::File::with_name("config").required(false))
        // Environment variables (FLASHLOCK_SERVER__PORT, FLASHLOCK_SESSION__TTL_MINUTES, …)
        .add_source(
            config::Environment::with_prefix("FLASHLOCK")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = cfg.try_deserialize()?;
    Ok(CONFIG.get_or_init(|| app_config))
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding the `<name>.enc` at-rest firmware files.
    pub firmware_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Session lifetime from mint to expiry.
    pub ttl_minutes: u64,
    /// Cadence of the background sweep.
    pub sweep_interval_secs: u64,
    /// How long burned sessions linger before the sweep removes them.
    pub burned_retention_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    /// 32-byte master key, base64. Required when `production` is true;
    /// absent in development the vault generates an ephemeral key.
    #[serde(default)]
    pub master_key_base64: Option<String>,
    pub production: bool,
}
