//! rigupd - rigup installation daemon

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rigup_core::{init_tracing, level_for_verbosity, METRICS};
use rigup_install::{Collaborators, InstallationPipeline, InstallationService, RigupConfig};
use rigup_state::FileSessionRepository;
use rigupd::{build_router, DaemonState};
use tracing::info;

#[derive(Parser)]
#[command(name = "rigupd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Serve rigup installation sessions over HTTP", long_about = None)]
struct Args {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides `listen` in the configuration)
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    // Daemons log at info by default
    init_tracing(args.json, level_for_verbosity(args.verbose.saturating_add(1)));

    let mut config = RigupConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    let config = Arc::new(config);

    let pipeline = InstallationPipeline::new(Collaborators::host(&config), config.clone());
    let sessions = Arc::new(FileSessionRepository::new(config.sessions_dir()));
    let state = Arc::new(DaemonState::new(InstallationService::new(pipeline, sessions)));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!(listen = %config.listen, "rigupd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutting down");
        })
        .await?;

    METRICS.flush();
    Ok(())
}
