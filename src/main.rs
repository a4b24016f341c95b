#![forbid(unsafe_code)]

//! `session-warden`: session ownership coordinator for one worker process.
//!
//! Resolves the instance identity, takes the base directory's lock, prepares
//! the session directory, and prints a JSON session descriptor on stdout.
//! Then keeps the lock fresh and reads client events from stdin until the
//! client shuts down, stdin closes, or the process is signalled.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use session_warden::audit::build_logger;
use session_warden::config::GlobalConfig;
use session_warden::identity::env::Environment;
use session_warden::identity::ResolveOptions;
use session_warden::models::identity::IdentityStrategy;
use session_warden::orchestrator::coordinator::{EventDisposition, SessionCoordinator};
use session_warden::orchestrator::events::run_event_reader;
use session_warden::{AppError, Result};

/// Buffered client events between the stdin reader and the main loop.
const EVENT_CHANNEL_CAPACITY: usize = 32;

const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "session-warden", about = "Persisted session ownership coordinator", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured base directory.
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Force an identity strategy (shared, branch, pattern, team).
    #[arg(long)]
    strategy: Option<IdentityStrategy>,

    /// Use an explicit instance id.
    #[arg(long)]
    instance_id: Option<String>,

    /// Team name for the team strategy.
    #[arg(long)]
    team: Option<String>,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("session-warden: {err}");
        return ExitCode::from(exit_byte(&err));
    }
    info!("session-warden bootstrap");

    let outcome = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))
        .and_then(|runtime| {
            let outcome = runtime.block_on(run(args));
            // A blocking stdin read must not hold the process open.
            runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
            outcome
        });

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(code = err.code(), %err, "session-warden failed");
            ExitCode::from(exit_byte(&err))
        }
    }
}

fn exit_byte(err: &AppError) -> u8 {
    u8::try_from(err.exit_code()).unwrap_or(1)
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_or_default(args.config.as_deref())?;
    if let Some(base_dir) = args.base_dir {
        config.base_dir = base_dir;
    }
    let heartbeat_interval = config.lock.heartbeat_interval();
    let logger = build_logger(config.audit_log_dir.as_deref())?;
    info!(base_dir = %config.base_dir.display(), "configuration loaded");

    // ── Startup flow ────────────────────────────────────
    let coordinator = SessionCoordinator::new(config, Environment::from_process(), logger)?;
    let options = ResolveOptions {
        strategy: args.strategy,
        instance_id: args.instance_id,
        team: args.team,
    };
    let mut session = coordinator.start(&options).await?;

    let descriptor = serde_json::to_string(&session.outcome().descriptor())?;
    println!("{descriptor}");

    // ── Background tasks ────────────────────────────────
    let ct = CancellationToken::new();
    let lost = CancellationToken::new();
    let heartbeat_handle = session.spawn_heartbeat(heartbeat_interval, ct.clone(), lost.clone());

    let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let reader_handle = tokio::spawn(run_event_reader(tokio::io::stdin(), event_tx, ct.clone()));

    info!(session_path = %session.session_path().display(), "session handed to client");

    // ── Event loop ──────────────────────────────────────
    let signal = shutdown_signal();
    tokio::pin!(signal);
    loop {
        tokio::select! {
            () = &mut signal => {
                info!("shutdown signal received");
                break;
            }
            () = lost.cancelled() => {
                warn!("lock ownership lost, exiting without release");
                break;
            }
            event = event_rx.recv() => match event {
                None => {
                    info!("client event stream closed");
                    break;
                }
                Some(event) => match session.handle_client_event(&event).await {
                    Ok(EventDisposition::Continue) => {}
                    Ok(EventDisposition::Shutdown) => {
                        info!("client requested shutdown");
                        break;
                    }
                    Err(err) => error!(%err, event = event.name(), "client event handling failed"),
                },
            },
        }
    }

    ct.cancel();
    if !lost.is_cancelled() {
        match session.shutdown().await {
            Ok(true) => info!("lock released"),
            Ok(false) => warn!("lock was no longer held at shutdown"),
            Err(err) => error!(%err, "failed to release lock"),
        }
    }

    reader_handle.abort();
    let _ = heartbeat_handle.await;
    info!("session-warden shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
