// SPDX-License-Identifier: MIT

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use revd::{
    ai::AiReviewer, analysis::AnalyzerRegistry, config::AppConfig, github::GitHubClient,
    retry::RetryConfig, review::orchestrator::Orchestrator, review::worker, server,
    storage::Storage, AppContext,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(
    name = "revd",
    about = "revd — AI code review daemon for GitHub pull requests",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// HTTP server port
    #[arg(long, env = "REVD_PORT")]
    port: Option<u16>,

    /// Data directory for config and the SQLite database
    #[arg(long, env = "REVD_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "REVD_LOG")]
    log: Option<String>,

    /// Bind address (default: 127.0.0.1; use 0.0.0.0 behind a reverse proxy)
    #[arg(long, env = "REVD_BIND")]
    bind_address: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "REVD_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon (default when no subcommand given).
    Serve,
    /// Verify credentials and upstream connectivity, then exit.
    Check,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::new(
        args.port,
        args.data_dir.clone(),
        args.log.clone(),
        args.bind_address.clone(),
    )?;
    let _guard = setup_logging(&config.log, args.log_file.as_deref(), &config.log_format);

    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => runtime.block_on(serve(config)),
        Command::Check => runtime.block_on(check(config)),
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "revd starting");

    let storage = Storage::new(&config.data_dir).await?;
    let github = Arc::new(GitHubClient::new(&config)?);
    let ai = Arc::new(AiReviewer::new(&config)?);
    let analyzers = Arc::new(AnalyzerRegistry::new());

    let orchestrator = Arc::new(Orchestrator::new(
        github.clone(),
        ai,
        analyzers,
        storage.clone(),
        config.review.max_comments,
    ));
    let (queue, _worker) = worker::spawn(
        orchestrator,
        storage.clone(),
        RetryConfig::review_attempts(config.review.max_retries),
    );

    spawn_maintenance(storage.clone(), &config);

    let ctx = Arc::new(AppContext {
        config: config.clone(),
        storage,
        github,
        queue,
    });

    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse().with_context(|| format!("bad bind address {bind}"))?;
    let router = server::build_router(ctx);

    info!("listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

async fn check(config: AppConfig) -> Result<()> {
    let github = GitHubClient::new(&config)?;
    let ai = AiReviewer::new(&config)?;

    match github.get_installation_id("octocat", "hello-world").await {
        // The repo need not be installed; reaching the API at all proves the
        // App credentials mint a valid JWT.
        Ok(_) => info!("GitHub App credentials OK"),
        Err(e) => {
            error!(err = %e, "GitHub App credential check failed");
            anyhow::bail!("GitHub check failed: {e}");
        }
    }
    if ai.test_connection().await {
        info!("Gemini API OK");
    } else {
        anyhow::bail!("Gemini connection test failed");
    }
    Ok(())
}

/// Hourly housekeeping: reap sessions stuck in progress, expire old rows.
fn spawn_maintenance(storage: Storage, config: &AppConfig) {
    let stale_after = chrono::Duration::minutes(i64::from(config.review.stale_after_minutes));
    let retention_days = config.review.retention_days;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(3600));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            match storage.fail_stale_sessions(stale_after).await {
                Ok(0) => {}
                Ok(n) => warn!(count = n, "reaped stale review sessions"),
                Err(e) => error!(err = %e, "stale session reaper failed"),
            }
            match storage.cleanup_old_sessions(retention_days).await {
                Ok(0) => {}
                Ok(n) => info!(count = n, "expired old review sessions"),
                Err(e) => error!(err = %e, "session retention cleanup failed"),
            }
        }
    });
}

/// Initialize tracing. Format is `"pretty"` (compact console) or `"json"`
/// (structured JSON for log aggregators).
///
/// If the log directory cannot be created, falls back to stdout-only logging
/// with a warning.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("revd.log"));

        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            if use_json {
                tracing_subscriber::fmt().json().with_env_filter(log_level).init();
            } else {
                tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            }
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else if use_json {
        tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        None
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}
