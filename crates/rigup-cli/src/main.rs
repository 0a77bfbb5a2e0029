//! rigup - provision a sway desktop on Debian
//!
//! ## Commands
//!
//! - `install`: preflight, resolve, install and configure components
//! - `preflight`: run the read-only host checks
//! - `doctor`: verify installed components and suggest fixes
//! - `setup`: deploy configuration and enable services only
//! - `rollback`: undo a stored session
//! - `history`: show past installation runs
//! - `backups`: list or clean configuration backups
//! - `components`: list installable components

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rigup_core::{
    apply_retention, init_tracing, level_for_verbosity, Component, GpuVendor,
    InstallationConfiguration, Orchestrator, ProgressSink, RetentionPolicy, Session,
    SessionSpan, SessionStatus, Status, METRICS,
};
use rigup_install::operations::{self, PreflightContext, SetupContext};
use rigup_install::{
    Collaborators, FileConfigDeployer, InstallRequest, InstallationPipeline, InstallationService,
    RigupConfig,
};
use rigup_state::{FileSessionRepository, SessionRepository};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "rigup")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Install and configure a sway desktop on Debian", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (default: $RIGUP_CONFIG, ~/.config/rigup/config.toml, /etc/rigup/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log package and service changes instead of making them
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install components (default: the standard desktop selection)
    Install {
        /// Component tags, e.g. core terminal launcher
        components: Vec<Component>,

        /// GPU vendor hint; skips detection
        #[arg(long)]
        gpu: Option<GpuVendor>,

        /// Merge with the last successful installation
        #[arg(long)]
        merge: bool,
    },

    /// Run preflight checks without changing anything
    Preflight,

    /// Check installed components and suggest fixes
    Doctor {
        /// Components to check (default: the last successful installation)
        components: Vec<Component>,
    },

    /// Deploy configuration files and enable services
    Setup {
        /// Components to set up (default: the standard desktop selection)
        components: Vec<Component>,
    },

    /// Undo the changes recorded in a session
    Rollback {
        /// Session ID printed by `install` or `setup`
        session_id: String,
    },

    /// Show installation history (newest first)
    History {
        /// Maximum number of records
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Configuration backups
    Backups {
        #[command(subcommand)]
        action: BackupsAction,
    },

    /// List installable components
    Components,
}

#[derive(Subcommand)]
enum BackupsAction {
    /// List backups, newest first
    List,

    /// Remove old backups, always keeping the newest few
    Clean {
        /// Remove backups older than this many days
        #[arg(long)]
        max_age_days: Option<i64>,

        /// Number of newest backups always kept
        #[arg(long)]
        keep_minimum: Option<i64>,
    },
}

/// Everything a command needs, built once in `main`.
struct App {
    config: Arc<RigupConfig>,
    collab: Collaborators,
    sessions: Arc<dyn SessionRepository>,
}

impl App {
    fn host(config: RigupConfig) -> Self {
        let collab = Collaborators::host(&config);
        let sessions = Arc::new(FileSessionRepository::new(config.sessions_dir()));
        Self {
            config: Arc::new(config),
            collab,
            sessions,
        }
    }

    fn service(&self) -> InstallationService {
        InstallationService::new(
            InstallationPipeline::new(self.collab.clone(), self.config.clone()),
            self.sessions.clone(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json, level_for_verbosity(cli.verbose));

    let mut config = RigupConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.dry_run {
        config.apt.dry_run = true;
    }
    let app = App::host(config);

    let result = match cli.command {
        Commands::Install {
            components,
            gpu,
            merge,
        } => cmd_install(&app, components, gpu, merge).await,
        Commands::Preflight => cmd_preflight(&app).await,
        Commands::Doctor { components } => cmd_doctor(&app, components).await,
        Commands::Setup { components } => cmd_setup(&app, components).await,
        Commands::Rollback { session_id } => cmd_rollback(&app, &session_id).await,
        Commands::History { limit } => cmd_history(&app, limit).await,
        Commands::Backups { action } => match action {
            BackupsAction::List => cmd_backups_list(&app).await,
            BackupsAction::Clean {
                max_age_days,
                keep_minimum,
            } => cmd_backups_clean(&app, max_age_days, keep_minimum).await,
        },
        Commands::Components => cmd_components(),
    };
    METRICS.flush();
    result
}

fn or_default(components: Vec<Component>) -> Vec<Component> {
    if components.is_empty() {
        Component::default_selection()
    } else {
        components
    }
}

/// Print every result with its icon, then the collected suggestions.
fn print_report(session: &Session) {
    let results = session.results();
    for r in &results {
        println!("  {} {:<32} {}", r.status.icon(), r.operation, r.message);
        for detail in &r.details {
            println!("      {}", detail);
        }
        if let Some(err) = &r.error {
            println!("      error: {}", err);
        }
    }

    let suggestions: Vec<&String> = results.iter().flat_map(|r| &r.suggestions).collect();
    if !suggestions.is_empty() {
        println!();
        println!("Recommendations:");
        for s in suggestions {
            println!("  - {}", s);
        }
    }

    println!();
    println!(
        "{}: {} operations in {}ms",
        session.overall_status(),
        results.len(),
        session.duration_ms()
    );
}

/// Install components through the session service
async fn cmd_install(
    app: &App,
    components: Vec<Component>,
    gpu: Option<GpuVendor>,
    merge: bool,
) -> Result<()> {
    let service = Arc::new(app.service());
    let mut request = InstallRequest::latest(&or_default(components));
    if let Some(vendor) = gpu {
        request = request.with_gpu(vendor);
    }
    if merge {
        request = request.with_merge_existing(true);
    }

    let started = service.start(request).await?;
    let session_id = started.session_id.clone();
    println!(
        "Session {} ({} components)",
        session_id, started.component_count
    );

    let (sink, mut rx) = ProgressSink::channel(app.config.progress_buffer);
    let printer = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            println!("[{:>3}%] {:<12} {}", update.percent, update.phase, update.message);
        }
    });
    let interrupt = {
        let service = service.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling after the current step");
                if let Err(e) = service.cancel(&session_id).await {
                    warn!(error = %e, "cancel failed");
                }
            }
        })
    };

    let outcome = service.run(&session_id, &sink).await;
    interrupt.abort();
    drop(sink);
    printer.await.ok();
    let outcome = outcome?;

    println!();
    print_report(&*service.session(&session_id).await?);
    println!("{}", outcome.message);

    if !outcome.succeeded() {
        anyhow::bail!(
            "installation {} (roll back with: rigup rollback {})",
            outcome.state,
            session_id
        );
    }
    Ok(())
}

/// Run the preflight validators
async fn cmd_preflight(app: &App) -> Result<()> {
    let ops = operations::validators(
        app.collab.probe.clone(),
        PreflightContext::from_config(&app.config),
    );
    let session = Orchestrator::continue_on_failure()
        .run("preflight", &ops, &CancellationToken::new())
        .await;
    print_report(&session);

    if session.overall_status() == SessionStatus::Failed {
        anyhow::bail!("preflight checks failed");
    }
    Ok(())
}

/// Components of the last successful installation, if history has one.
async fn installed_components(app: &App) -> Option<Vec<Component>> {
    let record = match app.collab.history.last_successful().await {
        Ok(r) => r?,
        Err(e) => {
            warn!(error = %e, "history unavailable");
            return None;
        }
    };
    let configuration: InstallationConfiguration =
        serde_json::from_value(record.configuration).ok()?;
    Some(
        configuration
            .components
            .iter()
            .map(|s| s.component)
            .collect(),
    )
}

/// Check installed components
async fn cmd_doctor(app: &App, components: Vec<Component>) -> Result<()> {
    let components = if components.is_empty() {
        installed_components(app)
            .await
            .unwrap_or_else(Component::default_selection)
    } else {
        components
    };
    info!(components = components.len(), "running diagnostics");

    let ops = operations::checkers(
        &components,
        app.collab.packages.clone(),
        app.collab.services.clone(),
        &app.config.home_dir,
    );
    let session = Orchestrator::continue_on_failure()
        .run("doctor", &ops, &CancellationToken::new())
        .await;
    print_report(&session);

    let problems = session
        .results()
        .iter()
        .filter(|r| r.status == Status::Fail)
        .count();
    if problems > 0 {
        anyhow::bail!("doctor found {} problem(s)", problems);
    }
    println!("All checks passed");
    Ok(())
}

/// Deploy configuration and enable services without installing packages
async fn cmd_setup(app: &App, components: Vec<Component>) -> Result<()> {
    let components = or_default(components);
    let ctx = SetupContext::from_config(
        &app.config,
        app.collab.deployer.clone(),
        app.collab.services.clone(),
    );
    let ops = operations::setup_operations(&components, &ctx);
    let session = Orchestrator::fail_fast()
        .run("setup", &ops, &CancellationToken::new())
        .await;
    print_report(&session);

    app.sessions
        .save(session.snapshot()?)
        .await
        .context("Failed to save setup session")?;
    println!("Session {}", session.id());

    if session.overall_status() == SessionStatus::Failed {
        anyhow::bail!("setup failed (roll back with: rigup rollback {})", session.id());
    }
    Ok(())
}

/// Undo a stored session
async fn cmd_rollback(app: &App, session_id: &str) -> Result<()> {
    let _span = SessionSpan::enter(session_id);
    let report = app.service().rollback(session_id).await?;

    if report.errors.is_empty() {
        println!("Rolled back session {}", report.session_id);
        return Ok(());
    }
    for err in &report.errors {
        println!("  ✗ {}", err);
    }
    anyhow::bail!(
        "rollback of {} finished with {} error(s)",
        report.session_id,
        report.errors.len()
    )
}

/// Show installation history
async fn cmd_history(app: &App, limit: usize) -> Result<()> {
    let records = app.collab.history.list(Some(limit)).await?;
    if records.is_empty() {
        println!("No installations recorded yet.");
        return Ok(());
    }

    for r in records {
        println!(
            "{}  {:<9} {:<11} {} {}  ({}ms, session {})",
            r.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            r.outcome,
            r.phase,
            r.package,
            r.target_version,
            r.duration_ms,
            r.session_id
        );
        if let Some(failure) = &r.failure {
            println!("      {}", failure);
        }
    }
    Ok(())
}

async fn cmd_backups_list(app: &App) -> Result<()> {
    let deployer = FileConfigDeployer::new(app.config.backups_dir());
    let backups = rigup_core::BackupStore::list(&deployer).await?;
    if backups.is_empty() {
        println!("No backups.");
    }
    for b in backups {
        println!(
            "{}  {}  {}",
            b.id,
            b.created_at.format("%Y-%m-%d %H:%M:%S"),
            b.original.display()
        );
    }
    Ok(())
}

/// Apply the retention policy to configuration backups
async fn cmd_backups_clean(
    app: &App,
    max_age_days: Option<i64>,
    keep_minimum: Option<i64>,
) -> Result<()> {
    let policy = RetentionPolicy::new(
        max_age_days.unwrap_or(app.config.retention.max_age_days),
        keep_minimum.unwrap_or(app.config.retention.keep_minimum),
    )?;
    let deployer = FileConfigDeployer::new(app.config.backups_dir());
    let report = apply_retention(&deployer, &policy, chrono::Utc::now()).await?;

    for id in &report.removed {
        println!("  removed {}", id);
    }
    for (id, reason) in &report.errors {
        println!("  ✗ {}: {}", id, reason);
    }
    println!(
        "{} removed, {} kept, {} error(s)",
        report.removed.len(),
        report.kept,
        report.errors.len()
    );
    if !report.is_clean() {
        anyhow::bail!("some backups could not be removed");
    }
    Ok(())
}

fn cmd_components() -> Result<()> {
    let defaults = Component::default_selection();
    for c in Component::ALL {
        let marker = if defaults.contains(&c) { "*" } else { " " };
        println!(
            "{} {:<16} {:<48} {}",
            marker,
            c.tag(),
            c.description(),
            c.packages().join(" ")
        );
    }
    println!();
    println!("* installed when no components are named");
    Ok(())
}
