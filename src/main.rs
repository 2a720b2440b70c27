//! # reportd: Scheduled Dashboard Reports
//!
//! Renders dashboards on a schedule and mails the result to each job's
//! recipients.
//!
//! Usage:
//!   reportd serve                      # Poll for due jobs until Ctrl+C
//!   reportd run-now 1 42               # Execute job 42 of tenant 1 once
//!   reportd next-run 1 42              # Print when job 42 fires next
//!   reportd history 1 42               # Print the job's runs as JSON

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reportd_core::{CredentialProvider, ReporterConfig};
use reportd_mail::SmtpMailer;
use reportd_scheduler::{Orchestrator, OrchestratorConfig, ReportStore, SqliteStore};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reportd", version, about = "📊 reportd: Scheduled Dashboard Reports")]
struct Cli {
    /// Config file (default: ~/.reportd/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Platform token handed to executions instead of the env fallback
    #[arg(long)]
    token: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until interrupted
    Serve,
    /// Execute one job immediately, ignoring its schedule
    RunNow { tenant: i64, job: i64 },
    /// Show when a job runs next
    NextRun { tenant: i64, job: i64 },
    /// List a job's runs, newest first
    History { tenant: i64, job: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "reportd=debug,reportd_scheduler=debug,reportd_render=debug,reportd_mail=debug"
    } else {
        "reportd=info,reportd_scheduler=info,reportd_render=info,reportd_mail=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => ReporterConfig::load_from(path)?,
        None => ReporterConfig::load()?,
    };
    config.platform_smtp = config.platform_smtp.with_env_overrides();

    let db_path = config.storage.db_path();
    let store = Arc::new(
        SqliteStore::open(&db_path)
            .with_context(|| format!("opening {}", db_path.display()))?,
    );

    match cli.command {
        Command::NextRun { tenant, job } => {
            let job = store.get_job(tenant, job).await?;
            let next = reportd_scheduler::compute_next_run(&job.interval, chrono::Utc::now());
            println!("{} ({}): next run at {}", job.name, job.interval.kind(), next.to_rfc3339());
            return Ok(());
        }
        Command::History { tenant, job } => {
            let runs = store.list_runs(tenant, job).await?;
            println!("{}", serde_json::to_string_pretty(&runs)?);
            return Ok(());
        }
        Command::Serve | Command::RunNow { .. } => {}
    }

    let credentials = CredentialProvider::from_env(
        &config.platform.token_env,
        Duration::from_secs(config.platform.token_ttl_secs),
    );
    if let Some(token) = cli.token {
        credentials.seed(token);
    } else if !credentials.has_fallback() {
        tracing::warn!(
            "⚠️ No platform token: set {} or pass --token",
            config.platform.token_env
        );
    }

    let orchestrator = Orchestrator::new(
        OrchestratorConfig::from_config(&config),
        store.clone(),
        Arc::new(SmtpMailer::new()),
        credentials,
    );

    match cli.command {
        Command::RunNow { tenant, job } => {
            let job = store.get_job(tenant, job).await?;
            let run = orchestrator
                .trigger_now(job)
                .await
                .context("execution task panicked")?;
            orchestrator.shutdown().await;
            match run {
                Some(run) => {
                    println!("{}", serde_json::to_string_pretty(&run)?);
                    if let Some(error) = run.error {
                        anyhow::bail!("run {} failed: {error}", run.id);
                    }
                }
                None => anyhow::bail!("run could not be recorded"),
            }
        }
        _ => {
            println!("📊 reportd v{}", env!("CARGO_PKG_VERSION"));
            println!("   🌐 Platform:   {}", config.platform.url);
            println!("   🗄️  Database:   {}", db_path.display());
            println!("   📂 Artifacts:  {}", config.storage.artifacts_dir().display());
            println!(
                "   📮 SMTP relay: {}",
                if config.platform_smtp.is_configured() {
                    config.platform_smtp.host.as_str()
                } else {
                    "(tenant settings only)"
                }
            );
            println!();

            orchestrator.start();
            tokio::signal::ctrl_c().await?;
            tracing::info!("Ctrl+C received, shutting down");
            orchestrator.shutdown().await;
        }
    }

    Ok(())
}
