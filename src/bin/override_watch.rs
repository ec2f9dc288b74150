//! CLI binary for override-watch.

use anyhow::Context;
use clap::{Parser, Subcommand};
use override_watch::changes::{OverridePayload, diff, normalize, render};
use override_watch::notify::{DiscordNotifier, LogNotifier, Notifier};
use override_watch::transport::HttpTransport;
use override_watch::{
    CredentialProvider, FileStateStore, PollCycle, SharedCredentials, WatchConfig, WatchService,
    WatchState,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Watch Canvas quiz assignment overrides and announce changes.
#[derive(Parser)]
#[command(name = "override-watch", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log notices instead of posting them to Discord.
    #[arg(long, global = true)]
    dry_run: bool,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Poll on the configured interval until interrupted.
    Run,

    /// Run a single poll cycle and exit.
    Once,

    /// Show credential and persisted state status.
    Status {
        /// Output JSON only.
        #[arg(long)]
        json: bool,
    },

    /// Diff two saved override payloads and print the rendered notice.
    Diff {
        /// Earlier payload (JSON).
        old: PathBuf,
        /// Later payload (JSON).
        new: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("override_watch=info,reqwest=warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, cli.dry_run).await,
        Command::Once => once(config, cli.dry_run).await,
        Command::Status { json } => status(&config, json).await,
        Command::Diff { old, new } => diff_files(&config, &old, &new),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<WatchConfig> {
    let mut config = match path {
        Some(path) => WatchConfig::from_file(path)
            .with_context(|| format!("cannot load config from {}", path.display()))?,
        None => {
            let default_path = WatchConfig::default_config_path();
            if default_path.exists() {
                WatchConfig::from_file(&default_path)?
            } else {
                WatchConfig::default()
            }
        }
    };
    config.apply_env();
    Ok(config)
}

fn build_service(config: &WatchConfig, dry_run: bool) -> anyhow::Result<WatchService> {
    if dry_run {
        config.validate()?;
    } else {
        config.validate_for_discord()?;
    }

    let notifier: Arc<dyn Notifier> = if dry_run {
        Arc::new(LogNotifier)
    } else {
        Arc::new(DiscordNotifier::new(&config.discord))
    };
    let credentials = SharedCredentials::new(config.canvas.credentials());
    let cycle = PollCycle::from_config(
        config,
        Arc::new(HttpTransport::new(&config.canvas)?),
        notifier,
        Arc::new(FileStateStore::new(&config.state.dir)),
        Arc::new(credentials.clone()),
    )?;
    Ok(WatchService::new(cycle, credentials, config.poll.interval()))
}

async fn run(config: WatchConfig, dry_run: bool) -> anyhow::Result<()> {
    let service = build_service(&config, dry_run)?;
    if !service.status().credentials_present {
        tracing::warn!("set CANVAS_TOKEN or COOKIES_JSON; cycles are skipped until then");
    }
    if !dry_run {
        match discord_token_state(&config).await {
            Some(true) => info!("discord token accepted"),
            Some(false) => tracing::warn!("discord rejected the bot token; notices will fail"),
            None => tracing::warn!("discord token check failed; continuing"),
        }
    }
    service.start(None);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("interrupt received, finishing in-flight cycle");
    service.stop_and_wait().await;
    Ok(())
}

async fn once(config: WatchConfig, dry_run: bool) -> anyhow::Result<()> {
    let service = build_service(&config, dry_run)?;
    let outcome = service.run_once().await?;
    println!("{}", outcome.label());
    Ok(())
}

/// `Some(valid)` when Discord answered the token check, `None` when it could
/// not be reached.
async fn discord_token_state(config: &WatchConfig) -> Option<bool> {
    match DiscordNotifier::new(&config.discord).health_check().await {
        Ok(valid) => Some(valid),
        Err(e) => {
            tracing::debug!(error = %e, "discord health check failed");
            None
        }
    }
}

async fn status(config: &WatchConfig, json: bool) -> anyhow::Result<()> {
    let credentials = SharedCredentials::new(config.canvas.credentials());
    let store = FileStateStore::new(&config.state.dir);
    let state = WatchState::load(&store, config.canvas.course_id.trim())?;
    let discord_token_valid = if config.discord.is_configured() {
        discord_token_state(config).await
    } else {
        None
    };

    let report = serde_json::json!({
        "course_id": config.canvas.course_id,
        "credentials_present": credentials.is_present(),
        "credential_preview": credentials.preview(),
        "discord_configured": config.discord.is_configured(),
        "discord_token_valid": discord_token_valid,
        "interval_secs": config.poll.interval_secs,
        "state_dir": config.state.dir,
        "tracked_quizzes": state.snapshot.len(),
        "validator": state.validator,
        "last_notice_at": state.last_notice_at,
    });

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("override-watch v{}", env!("CARGO_PKG_VERSION"));
    println!("  course:        {}", config.canvas.course_id);
    println!(
        "  credentials:   {}",
        credentials
            .preview()
            .unwrap_or_else(|| "not configured".to_owned())
    );
    println!(
        "  discord:       {}",
        match (config.discord.is_configured(), discord_token_valid) {
            (false, _) => "not configured",
            (true, Some(true)) => "configured, token accepted",
            (true, Some(false)) => "configured, token rejected",
            (true, None) => "configured, unreachable",
        }
    );
    println!("  interval:      {}s", config.poll.interval_secs);
    println!("  state dir:     {}", config.state.dir.display());
    println!("  tracked:       {} quizzes", state.snapshot.len());
    println!(
        "  etag:          {}",
        state.validator.as_deref().unwrap_or("none")
    );
    println!(
        "  last notice:   {}",
        state
            .last_notice_at
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "never".to_owned())
    );
    Ok(())
}

fn diff_files(config: &WatchConfig, old: &Path, new: &Path) -> anyhow::Result<()> {
    let read = |path: &Path| -> anyhow::Result<OverridePayload> {
        let bytes =
            std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
        OverridePayload::from_slice(&bytes)
            .with_context(|| format!("cannot parse {}", path.display()))
    };
    let changes = diff(&normalize(&read(old)?), &normalize(&read(new)?));
    let text = render(&changes, &config.render_options());
    if text.is_empty() {
        println!("No tracked changes.");
    } else {
        println!("{text}");
    }
    Ok(())
}
