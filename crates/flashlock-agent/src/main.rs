//! Command-line flash agent.
//!
//! Runs one flash for a device type against a flashlock server. Ctrl-C
//! triggers cooperative cancellation: buffers are scrubbed and the server is
//! told the flash failed.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use flashlock_agent::custodian::{self, KeyCustodian, UserScopedProtection};
use flashlock_agent::flasher::{FlashAgent, FlashPhase, ProgressSink};
use flashlock_agent::{AgentConfig, FlashClient, ToolRunner};

#[derive(Parser)]
#[command(name = "flashlock-agent", about = "One-time firmware flash agent")]
struct Args {
    /// Device type to flash (e.g. MTK6580)
    #[arg(long)]
    device_type: String,

    /// Explicit config file (defaults to agent.toml next to the binary)
    #[arg(long)]
    config: Option<String>,

    /// Override the server base URL
    #[arg(long)]
    server: Option<String>,
}

/// Prints progress to stdout; tool output is passed through verbatim.
struct ConsoleSink;

impl ProgressSink for ConsoleSink {
    fn report(&self, phase: FlashPhase) {
        match phase {
            FlashPhase::SessionRequested => println!("requesting session…"),
            FlashPhase::SessionEstablished { session_id, artifacts } => {
                println!("session {session_id} established ({artifacts} artifacts)")
            }
            FlashPhase::FetchingArtifact { index, name } => {
                println!("fetching [{index}] {name}…")
            }
            FlashPhase::ArtifactReady { name } => println!("decrypted {name}"),
            FlashPhase::ToolRunning => println!("running flash tool…"),
            FlashPhase::ToolOutput(line) => println!("  | {line}"),
            FlashPhase::Reporting { success } => println!("reporting success={success}…"),
            FlashPhase::Done { success } => println!("done (success={success})"),
            FlashPhase::Aborted { reason } => println!("aborted: {reason}"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flashlock=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = AgentConfig::load(args.config.as_deref())?;
    if let Some(server) = args.server {
        config.server.base_url = server;
    }

    let data_dir = config
        .keys
        .data_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(custodian::default_data_dir);

    // First use generates the keypair, which can take a moment.
    let bits = config.keys.bits;
    let custodian = {
        let dir = data_dir.clone();
        tokio::task::spawn_blocking(move || {
            let protection = UserScopedProtection::new(&dir);
            KeyCustodian::ensure(&dir, &protection, bits)
        })
        .await??
    };

    let client = FlashClient::new(
        &config.server.base_url,
        Duration::from_secs(config.server.timeout_secs),
    )?;
    let runner = ToolRunner::new(&config.tools);
    let agent = FlashAgent::new(client, custodian, runner, config.devices.clone());

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancellation requested");
            ctrl_c_cancel.cancel();
        }
    });

    let success = agent
        .run_flash(&args.device_type, &ConsoleSink, &cancel)
        .await?;

    std::process::exit(if success { 0 } else { 1 });
}
