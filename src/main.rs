use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use orgmirror::config::LoggingConfig;
use orgmirror::sync::PlannedAction;
use orgmirror::{
    BackupCounter, Config, Credentials, HealthCheck, MemoryCounter, MirrorEngine, RepoType,
    StateDb, SyncOutcome,
};

#[derive(Parser)]
#[command(name = "orgmirror")]
#[command(about = "Back up every repository of a GitHub organization")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate with an access token and clone over SSH
    Ssh {
        #[command(flatten)]
        target: TargetArgs,

        /// Access token
        #[arg(short = 'a', long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Authenticate with username and password and clone over HTTPS
    Https {
        #[command(flatten)]
        target: TargetArgs,

        #[arg(short, long, env = "GITHUB_USERNAME")]
        username: Option<String>,

        #[arg(short, long, env = "GITHUB_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Write a default configuration file
    Init {
        /// Destination directory for backups
        #[arg(short, long)]
        destination: Option<String>,
    },

    /// System health check and diagnostics
    Doctor,

    /// Show how often each repository has been backed up
    Stats,
}

/// Options shared by both transports; each overrides the config file
#[derive(Args)]
struct TargetArgs {
    /// Organization to mirror
    #[arg(short, long)]
    org: Option<String>,

    /// Destination directory
    #[arg(short, long)]
    dir: Option<String>,

    /// Repository type to list
    #[arg(short = 't', long = "type", value_enum)]
    repo_type: Option<RepoType>,

    /// Include forks
    #[arg(short, long)]
    forks: bool,

    /// Comma-separated `org/repo` entries to skip
    #[arg(short, long)]
    ignore: Option<String>,

    /// List what would be cloned or updated without touching anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = match (&cli.command, &cli.config) {
        (Commands::Init { .. }, Some(path)) if !path.exists() => Config::default(),
        _ => load_config(cli.config.as_ref())?,
    };
    init_logging(cli.verbose, &config.logging);
    info!("Starting orgmirror v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Ssh { target, token } => {
            let credentials = Credentials::from_parts(token, None, None)?;
            cmd_mirror(target, credentials, config).await
        }
        Commands::Https {
            target,
            username,
            password,
        } => {
            let credentials = Credentials::from_parts(None, username, password)?;
            cmd_mirror(target, credentials, config).await
        }
        Commands::Init { destination } => cmd_init(destination, cli.config, config),
        Commands::Doctor => Ok(cmd_doctor(&config)),
        Commands::Stats => cmd_stats(&config),
    }
}

/// `RUST_LOG` wins, then `--verbose`, then the configured level
fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let default_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    match logging.format.as_str() {
        "json" => registry.with(fmt::layer().json()).init(),
        "full" => registry.with(fmt::layer().with_ansi(logging.color)).init(),
        _ => registry
            .with(fmt::layer().compact().with_ansi(logging.color))
            .init(),
    }
}

/// Load the given file, else the default file if one exists, else defaults
fn load_config(config_path: Option<&PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => {
            let path = Config::default_config_path()?;
            if path.exists() {
                Config::load(&path)
            } else {
                Ok(Config::default())
            }
        }
    }
}

fn apply_overrides(config: &mut Config, target: &TargetArgs) {
    if let Some(org) = &target.org {
        config.organization = Some(org.clone());
    }
    if let Some(dir) = &target.dir {
        config.destination = Some(dir.clone());
    }
    if let Some(repo_type) = target.repo_type {
        config.repo_type = repo_type;
    }
    if target.forks {
        config.include_forks = true;
    }
    if let Some(ignore) = &target.ignore {
        config.ignore_list.push(ignore.clone());
    }
}

fn open_counter(config: &Config) -> Arc<dyn BackupCounter> {
    if !config.state.enabled {
        return Arc::new(MemoryCounter::new());
    }

    match config.state_db_path().and_then(|path| StateDb::open_at(&path)) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            warn!("Backup counters will not be persisted: {:#}", e);
            Arc::new(MemoryCounter::new())
        }
    }
}

/// Mirror (or plan mirroring) an organization
async fn cmd_mirror(
    target: TargetArgs,
    credentials: Credentials,
    mut config: Config,
) -> Result<ExitCode> {
    apply_overrides(&mut config, &target);
    let settings = config.mirror_settings()?;
    info!(
        "Using {} authentication for {}",
        credentials.kind(),
        settings.organization
    );

    let engine = MirrorEngine::with_git(settings, credentials, open_counter(&config))?;

    if target.dry_run {
        println!("🔍 Dry run mode - listing {}", engine.settings().organization);
        let planned = engine.plan().await?;
        for entry in &planned {
            match &entry.action {
                PlannedAction::Clone => println!("   📥 Clone: {}", entry.repo.full_name),
                PlannedAction::Update => println!("   🔄 Update: {}", entry.repo.full_name),
                PlannedAction::Reject(reason) => {
                    println!("   ❌ Reject: {} ({})", entry.repo.full_name, reason)
                }
            }
        }
        println!("\n📈 {} repositories planned", planned.len());
        return Ok(ExitCode::SUCCESS);
    }

    let summary = engine.run().await?;

    println!("\n🎉 Mirroring Complete!");
    println!("   📊 Total repositories: {}", summary.total_repositories);
    println!("   🔄 Updated: {}", summary.updated);
    println!("   📥 Cloned: {}", summary.cloned);
    println!("   ❌ Failed: {}", summary.failed);
    println!("   ⏭️  Skipped: {}", summary.skipped);
    println!("   ⏱️  Duration: {:.2}s", summary.duration.as_secs_f64());

    if summary.has_failures() {
        println!("\n🔍 Failed Repositories:");
        for outcome in &summary.outcomes {
            if let SyncOutcome::Failed { repo, cause } = outcome {
                println!("   ❌ {}: {}", repo.full_name, cause);
            }
        }
        return Ok(ExitCode::FAILURE);
    }

    Ok(ExitCode::SUCCESS)
}

fn cmd_init(
    destination: Option<String>,
    config_path: Option<PathBuf>,
    mut config: Config,
) -> Result<ExitCode> {
    let config_path = match config_path {
        Some(path) => path,
        None => Config::default_config_path()?,
    };

    if let Some(destination) = destination {
        let expanded = shellexpand::full(&destination)
            .context("Failed to expand destination path")?
            .into_owned();
        std::fs::create_dir_all(&expanded)
            .with_context(|| format!("Failed to create {}", expanded))?;
        config.destination = Some(destination);
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }
    config.save(&config_path)?;
    info!("Configuration saved to: {:?}", config_path);

    println!("✅ orgmirror initialized successfully!");
    println!("   Config: {:?}", config_path);
    if let Some(destination) = &config.destination {
        println!("   Destination: {}", destination);
    }
    println!("   Next: run 'orgmirror ssh --org <ORG>' with GITHUB_TOKEN set");

    Ok(ExitCode::SUCCESS)
}

fn cmd_doctor(config: &Config) -> ExitCode {
    println!("🩺 orgmirror doctor\n");

    let health = HealthCheck::run(config);
    for (name, check) in health.all_checks() {
        let icon = if !check.passed {
            "❌"
        } else if check.is_warning {
            "⚠️ "
        } else {
            "✅"
        };
        println!("{} {}: {}", icon, name, check.message);
        if let Some(details) = &check.details {
            println!("   {}", details);
        }
    }

    if health.all_passed() {
        println!("\n✅ Ready to mirror");
        ExitCode::SUCCESS
    } else {
        println!("\n❌ {} check(s) failed", health.errors().len());
        ExitCode::FAILURE
    }
}

fn cmd_stats(config: &Config) -> Result<ExitCode> {
    let path = config.state_db_path()?;
    if !path.exists() {
        println!("No backups recorded yet ({})", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let counts = StateDb::open_at(&path)?.counts()?;
    println!("📊 Backup counters ({})", path.display());
    for count in &counts {
        println!(
            "   {}@{}: {} (last {})",
            count.repo,
            count.branch,
            count.count,
            count.last_backup_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(ExitCode::SUCCESS)
}
