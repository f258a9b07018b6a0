use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use orgbackup::config::LoggingConfig;
use orgbackup::health::CheckResult;
use orgbackup::scheduler::scheduler_from_config;
use orgbackup::{report, BackupOrchestrator, Config, HealthCheck};

#[derive(Parser)]
#[command(name = "orgbackup")]
#[command(about = "Back up every repository of a GitHub organization to multiple destinations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backup pass over all repositories and enabled targets
    Run {
        /// Enumerate the tasks without touching any destination
        #[arg(long)]
        dry_run: bool,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// List repositories that would be backed up
    List {
        /// Show repository details
        #[arg(long)]
        details: bool,
    },

    /// Run backups on the configured interval until interrupted
    Schedule,

    /// Check git, GitHub access and every backup target
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;

    init_logging(cli.verbose, &config.logging);
    info!("Starting orgbackup v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run { dry_run, json } => cmd_run(&config, dry_run, json).await,
        Commands::List { details } => cmd_list(&config, details).await,
        Commands::Schedule => cmd_schedule(&config).await,
        Commands::Doctor => cmd_doctor(&config).await,
    }
}

/// Initialize logging: RUST_LOG wins, then --verbose, then the configured level.
/// Logs go to stderr so JSON output on stdout stays clean.
fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new(&logging.level)
        }
    });

    let registry = tracing_subscriber::registry().with(filter);

    match logging.format.as_str() {
        "pretty" => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .init(),
        "full" => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        _ => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init(),
    }
}

/// Run a single backup pass
async fn cmd_run(config: &Config, dry_run: bool, json: bool) -> Result<()> {
    let orchestrator = BackupOrchestrator::from_config(config)?;

    if !json {
        println!(
            "\n🔄 Backing up organization {}{}",
            config.github.organization,
            if dry_run { " (dry run)" } else { "" }
        );
    }

    let outcome = match orchestrator.run(dry_run).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Backup failed: {:#}", e);
            if !dry_run {
                orchestrator
                    .reporter()
                    .send_error_notification(&format!("Backup failed: {:#}", e))
                    .await;
            }
            return Err(e);
        }
    };

    if json {
        report::print_json(&outcome)?;
    } else {
        report::print_summary(&outcome);
    }

    Ok(())
}

/// List the repositories a run would back up
async fn cmd_list(config: &Config, details: bool) -> Result<()> {
    let orchestrator = BackupOrchestrator::from_config(config)?;
    let repos = orchestrator.list_repositories().await?;

    print!("{}", report::render_repositories(&repos, details));
    Ok(())
}

/// Run the scheduler in the foreground
async fn cmd_schedule(config: &Config) -> Result<()> {
    let orchestrator = Arc::new(BackupOrchestrator::from_config(config)?);
    let scheduler = scheduler_from_config(orchestrator, config)?;

    println!(
        "🕒 Scheduler started, running every {} (Ctrl+C to stop)",
        config.schedule.interval
    );

    let stats = scheduler.run().await?;

    println!(
        "🛑 Scheduler stopped after {} runs ({} failed)",
        stats.total_runs, stats.failed_runs
    );
    Ok(())
}

async fn cmd_doctor(config: &Config) -> Result<()> {
    let targets = orgbackup::build_targets(config)?;
    let health = HealthCheck::run(config, &targets).await;
    print_health_report(&health);
    Ok(())
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning {
                "⚠️ "
            } else {
                "✅"
            }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 orgbackup System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(&name, result);
    }

    println!();
    let errors = health.errors();
    if errors.is_empty() {
        println!("✅ All checks passed");
    } else {
        println!("❌ {} check(s) failed", errors.len());
    }
}
