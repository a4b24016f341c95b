#![forbid(unsafe_code)]

//! `session-warden-ctl`: operator companion for `session-warden`.
//!
//! Inspects and repairs a base directory from the command line. Read-only
//! commands never take the lock; `consolidate`, `migrate` and `recover`
//! acquire it first and fail with exit code 3 while a live warden holds it.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

use session_warden::audit::{build_logger, SharedLogger};
use session_warden::config::GlobalConfig;
use session_warden::diagnostics::DiagnosticsReporter;
use session_warden::fs_ops::remove_file_if_exists;
use session_warden::identity::env::Environment;
use session_warden::identity::{IdentityResolver, ResolveOptions};
use session_warden::lock::{AcquireOptions, LockFileManager};
use session_warden::models::identity::IdentityStrategy;
use session_warden::models::session::PolicyState;
use session_warden::session::migrator::MigrateOptions;
use session_warden::session::SessionStore;
use session_warden::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "session-warden-ctl",
    about = "Operator tooling for session-warden base directories",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured base directory.
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Print results as JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Full diagnostics report.
    Status,

    /// Show the lock file and its owner.
    LockInfo,

    /// Validate the session directory of the resolved identity.
    Validate {
        /// Only check that the directory and its first required paths exist.
        #[arg(long)]
        quick: bool,
    },

    /// Merge every session directory into the shared one.
    Consolidate,

    /// Populate the directory for another identity strategy.
    Migrate {
        /// Strategy to migrate to (shared, branch, pattern, team).
        #[arg(long)]
        strategy: IdentityStrategy,

        /// Team name for the team strategy.
        #[arg(long)]
        team: Option<String>,

        /// Skip the backup taken before copying.
        #[arg(long)]
        no_backup: bool,
    },

    /// Repair the session directory of the resolved identity.
    Recover {
        /// Skip the backup taken before destructive repairs.
        #[arg(long)]
        no_backup: bool,

        /// Time budget for the whole repair.
        #[arg(long)]
        max_seconds: Option<u64>,
    },

    /// Remove a lock left behind by a dead process.
    Release,

    /// List session backups.
    Backups {
        /// Delete backups beyond the configured retention first.
        #[arg(long)]
        prune: bool,
    },

    /// Print the identity this process would resolve.
    Resolve,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("session-warden-ctl: {err}");
        return ExitCode::from(exit_byte(&err));
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error [{}]: {err}", err.code());
            ExitCode::from(exit_byte(&err))
        }
    }
}

fn exit_byte(err: &AppError) -> u8 {
    u8::try_from(err.exit_code()).unwrap_or(1)
}

/// Components shared by every subcommand.
struct Context {
    config: GlobalConfig,
    logger: SharedLogger,
    resolver: IdentityResolver,
    store: SessionStore,
    json: bool,
}

impl Context {
    fn load(args: &Cli) -> Result<Self> {
        let mut config = GlobalConfig::load_or_default(args.config.as_deref())?;
        if let Some(base_dir) = &args.base_dir {
            config.base_dir.clone_from(base_dir);
        }
        config.validate()?;
        let logger = build_logger(config.audit_log_dir.as_deref())?;
        let store = SessionStore::from_config(&config, &logger)?;
        let resolver = IdentityResolver::new(
            config.identity.clone(),
            Environment::from_process(),
            logger.clone(),
        );
        Ok(Self {
            config,
            logger,
            resolver,
            store,
            json: args.json,
        })
    }

    fn locks(&self) -> LockFileManager {
        LockFileManager::new(self.logger.clone())
    }

    /// Print `value` as pretty JSON or through `text`.
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T) -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            print!("{}", text(value));
        }
        Ok(())
    }

    /// Run `op` while holding the base directory's lock.
    async fn with_lock<T, F>(&self, op: F) -> Result<T>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::fs::create_dir_all(&self.config.base_dir).await?;
        let locks = self.locks();
        let lock_path = self.config.lock_path();
        let options = AcquireOptions {
            retries: 0,
            ..AcquireOptions::from(&self.config.lock)
        };
        locks.acquire_lock(&lock_path, options).await?;
        let value = op.await;
        locks.release_lock(&lock_path).await?;
        Ok(value)
    }
}

async fn run(args: Cli) -> Result<()> {
    let ctx = Context::load(&args)?;
    let resolve = ResolveOptions::default();

    match args.command {
        Command::Status => {
            let locks = ctx.locks();
            let reporter = DiagnosticsReporter::new(
                &ctx.resolver,
                &locks,
                &ctx.store,
                ctx.config.lock_path(),
                ctx.config.lock.stale_after(),
            );
            let report = reporter.report(&resolve).await;
            ctx.emit(&report, session_warden::diagnostics::DiagnosticsReport::render_text)
        }

        Command::LockInfo => {
            let info = ctx
                .locks()
                .get_lock_info(&ctx.config.lock_path(), ctx.config.lock.stale_after())
                .await?;
            ctx.emit(&info, |info| match info {
                None => "no lock file\n".to_owned(),
                Some(info) => match &info.record {
                    None => format!("{}: unreadable, treated as stale\n", info.path.display()),
                    Some(record) => format!(
                        "{}: pid {} since {} (alive={}, stale={}, age={}ms)\n",
                        info.path.display(),
                        record.owner_pid(),
                        record.acquired_at().to_rfc3339(),
                        info.owner_alive,
                        info.is_stale,
                        info.age_ms
                    ),
                },
            })
        }

        Command::Validate { quick } => {
            let identity = ctx.resolver.resolve(&resolve).await;
            let path = ctx.store.session_path(&identity.id);
            if quick {
                let ok = ctx.store.validator().quick_validate(&path).await;
                ctx.emit(&serde_json::json!({ "path": path, "valid": ok }), |_| {
                    format!("{}: {}\n", path.display(), if ok { "ok" } else { "incomplete" })
                })?;
                if ok {
                    Ok(())
                } else {
                    Err(AppError::Corruption(format!("{} is incomplete", path.display())))
                }
            } else {
                let report = ctx.store.validator().validate(&path).await;
                ctx.emit(&report, |report| {
                    let mut out = format!(
                        "{}: {}\n",
                        report.path.display(),
                        if report.is_valid { "valid" } else { "invalid" }
                    );
                    for issue in &report.issues {
                        out.push_str(&format!("  issue: {issue:?}\n"));
                    }
                    for warning in &report.warnings {
                        out.push_str(&format!("  warning: {warning:?}\n"));
                    }
                    out
                })?;
                if report.is_valid {
                    Ok(())
                } else {
                    Err(AppError::Corruption(format!("{} failed validation", path.display())))
                }
            }
        }

        Command::Consolidate => {
            let identity = ctx
                .resolver
                .resolve(&ResolveOptions::with_strategy(IdentityStrategy::Shared))
                .await;
            let result = ctx
                .with_lock(
                    ctx.store
                        .consolidator()
                        .consolidate(ctx.store.base_dir(), &identity.id),
                )
                .await?;
            ctx.emit(&result, |result| {
                let mut out = format!("{:?}: {}\n", result.action, result.target_path.display());
                for removed in &result.removed_paths {
                    out.push_str(&format!("  removed {}\n", removed.display()));
                }
                for err in &result.errors {
                    out.push_str(&format!("  error: {err}\n"));
                }
                out
            })
        }

        Command::Migrate {
            strategy,
            team,
            no_backup,
        } => {
            let options = ResolveOptions {
                strategy: Some(strategy),
                team,
                ..ResolveOptions::default()
            };
            let identity = ctx.resolver.resolve(&options).await;
            let migrate = MigrateOptions { backup: !no_backup };
            let result = ctx
                .with_lock(async {
                    let result = ctx
                        .store
                        .migrator()
                        .migrate(ctx.store.base_dir(), &identity, migrate)
                        .await;
                    if result.success() {
                        let dir_name = ctx.store.naming().dir_name(&identity.id);
                        let state = PolicyState::new(&identity, dir_name);
                        if let Err(err) = ctx.store.policy().save(&state).await {
                            tracing::warn!(%err, "failed to record policy state");
                        }
                    }
                    result
                })
                .await?;
            ctx.emit(&result, |result| {
                let mut out = format!("{:?}: {}\n", result.action, result.target_path.display());
                if let Some(source) = &result.chosen_source {
                    out.push_str(&format!("  from {}\n", source.display()));
                }
                for err in &result.errors {
                    out.push_str(&format!("  error: {err}\n"));
                }
                out
            })?;
            if result.success() {
                Ok(())
            } else {
                Err(AppError::Migration(result.errors.join("; ")))
            }
        }

        Command::Recover {
            no_backup,
            max_seconds,
        } => {
            let identity = ctx.resolver.resolve(&resolve).await;
            let path = ctx.store.session_path(&identity.id);
            let mut options = ctx.config.recovery.options();
            if no_backup {
                options.auto_backup_before_recovery = false;
            }
            if let Some(seconds) = max_seconds {
                options.max_recovery_time_ms = seconds.saturating_mul(1000);
            }
            let outcome = ctx
                .with_lock(ctx.store.recovery().recover(&path, options))
                .await?;
            ctx.emit(&outcome, |outcome| {
                let mut out = format!(
                    "{}: severity {:?}, level {:?}, success={}\n",
                    path.display(),
                    outcome.severity,
                    outcome.level_applied,
                    outcome.success
                );
                if outcome.requires_reauth {
                    out.push_str("  the client must authenticate again\n");
                }
                for note in &outcome.notes {
                    out.push_str(&format!("  {note}\n"));
                }
                out
            })?;
            if outcome.success {
                Ok(())
            } else {
                Err(AppError::Recovery(format!("{} was not repaired", path.display())))
            }
        }

        Command::Release => {
            let lock_path = ctx.config.lock_path();
            let info = ctx
                .locks()
                .get_lock_info(&lock_path, ctx.config.lock.stale_after())
                .await?;
            let released = match info {
                None => false,
                Some(info) => match info.record {
                    None => {
                        remove_file_if_exists(&lock_path).await?;
                        true
                    }
                    Some(record) if info.owner_alive => {
                        return Err(AppError::Contention(format!(
                            "lock is held by live process {}",
                            record.owner_pid()
                        )));
                    }
                    Some(record) => {
                        LockFileManager::new(ctx.logger.clone())
                            .with_pid(record.owner_pid())
                            .release_lock(&lock_path)
                            .await?
                    }
                },
            };
            ctx.emit(&serde_json::json!({ "released": released }), |_| {
                if released {
                    "stale lock removed\n".to_owned()
                } else {
                    "no lock to release\n".to_owned()
                }
            })
        }

        Command::Backups { prune } => {
            let pruned = if prune {
                ctx.store.backups().prune().await?
            } else {
                Vec::new()
            };
            let backups = ctx.store.backups().list().await?;
            let body = serde_json::json!({ "backups": backups, "pruned": pruned });
            ctx.emit(&body, |_| {
                let mut out = String::new();
                for path in &pruned {
                    out.push_str(&format!("pruned  {}\n", path.display()));
                }
                for entry in &backups {
                    out.push_str(&format!(
                        "{}  {}  {}\n",
                        entry.created_at.to_rfc3339(),
                        entry.session_dir,
                        entry.path.display()
                    ));
                }
                if backups.is_empty() {
                    out.push_str("no backups\n");
                }
                out
            })
        }

        Command::Resolve => {
            let identity = ctx.resolver.resolve(&resolve).await;
            let path = ctx.store.session_path(&identity.id);
            let body = serde_json::json!({ "identity": identity, "session_path": path });
            ctx.emit(&body, |_| format!("{identity}\n{}\n", path.display()))
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
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
