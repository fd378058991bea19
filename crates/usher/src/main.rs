//! usher - meeting bot
//!
//! Subcommands:
//! - `usher run --script <file>` - Drive the engine from a replay script
//! - `usher config` - Show the effective configuration and its sources
//! - `usher check-allow-list <file> <name>...` - Look names up in an allow-list

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use usher::allow_list::{clean_name, AllowList};
use usher::clock::SystemClock;
use usher::events::LogSubscriber;
use usher::replay::ReplaySurface;
use usher::scheduler::{RunOutcome, Scheduler};
use usher::{telemetry, Session};
use usherconf::{ConfigWatch, UsherConfig};

#[derive(Parser)]
#[command(name = "usher")]
#[command(about = "Roster, admission and chat automation for video meetings")]
#[command(version)]
struct Cli {
    /// Config file (overrides ./usher.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot, one tick per replay step
    Run {
        /// JSON replay script
        #[arg(short, long)]
        script: PathBuf,

        /// Tick interval in milliseconds (defaults to the configured value)
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Print the effective configuration as TOML
    Config,

    /// Check names against an allow-list file
    CheckAllowList {
        /// Allow-list file
        file: PathBuf,

        /// Display names to look up
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { script, interval_ms } => run(cli.config, script, interval_ms).await,
        Commands::Config => show_config(cli.config),
        Commands::CheckAllowList { file, names } => check_allow_list(&file, &names),
    }
}

async fn run(
    config_path: Option<PathBuf>,
    script: PathBuf,
    interval_ms: Option<u64>,
) -> Result<()> {
    let (config, sources) = UsherConfig::load_with_sources_from(config_path.as_deref())
        .context("Failed to load configuration")?;
    telemetry::init(&config.telemetry.log_level).context("Failed to initialize logging")?;

    let interval = Duration::from_millis(interval_ms.unwrap_or(config.controller.tick_interval_ms));
    info!("Usher starting");
    info!("  script: {}", script.display());
    info!("  allow-list: {}", config.paths.allow_list.display());
    info!("  flags: {}", config.automation.flags);
    info!("  interval: {:?}", interval);
    for file in &sources.files {
        info!("  config: {}", file.display());
    }

    let replay = ReplaySurface::load(&script).context("Failed to load replay script")?;
    replay.advance();

    let watch = ConfigWatch::new(config_path.as_deref(), &sources);
    let mut session =
        Session::new(config, replay.surfaces(), Arc::new(SystemClock)).with_config_watch(watch);
    session.subscribe(Arc::new(LogSubscriber));
    let session = Arc::new(Mutex::new(session));

    let ready = session.clone();
    tokio::task::spawn_blocking(move || {
        let mut session = ready.lock().unwrap();
        session.wait_ready()
    })
    .await
    .context("Startup task failed")?
    .context("Meeting never became ready")?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal.cancel();
    });

    // The first step is already loaded for the readiness check
    let first = AtomicBool::new(true);
    let stepper = replay.clone();
    let outcome = Scheduler::new(session.clone(), interval)
        .with_hook(Arc::new(move || first.swap(false, Ordering::SeqCst) || stepper.advance()))
        .run(shutdown)
        .await;

    let session = session.lock().unwrap();
    info!(
        ticks = session.ticks(),
        steps = replay.steps_played(),
        participants = session.roster().len(),
        pending_chat = session.outbound().len(),
        "Usher stopped"
    );

    match outcome {
        RunOutcome::Fatal(e) => Err(e).context("Session stopped on a fatal error"),
        RunOutcome::Cancelled | RunOutcome::Finished => Ok(()),
    }
}

fn show_config(config_path: Option<PathBuf>) -> Result<()> {
    let (config, sources) = UsherConfig::load_with_sources_from(config_path.as_deref())
        .context("Failed to load configuration")?;

    if sources.files.is_empty() {
        println!("# No config files found; showing defaults");
    }
    for file in &sources.files {
        println!("# Loaded: {}", file.display());
    }
    for var in &sources.env_overrides {
        println!("# Env override: {}", var);
    }
    println!();
    print!("{}", config.to_toml());
    Ok(())
}

fn check_allow_list(file: &Path, names: &[String]) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read allow-list {}", file.display()))?;
    let list = AllowList::parse(&text);
    println!("{} entries in {}", list.len(), file.display());

    for name in names {
        let verdict = match list.lookup(name) {
            Some(true) => "admin",
            Some(false) => "known",
            None => "unknown",
        };
        println!("{:<30} {:<30} {}", name, clean_name(name), verdict);
    }
    Ok(())
}
