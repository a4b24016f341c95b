//! Startup and lifecycle coordination for one worker process.
//!
//! Startup order:
//!
//! 1. Resolve the instance identity and derive the session path.
//! 2. Acquire the base directory's lock. Nothing below runs without it.
//! 3. Migrate when the identity differs from the recorded policy state.
//! 4. Consolidate duplicates when the identity is shared.
//! 5. Validate the session; repair it when it exists but is invalid.
//! 6. Record the policy state and hand the path and lock to the client.
//!
//! Only steps 1 and 2 can fail startup. Problems in later steps are logged
//! and reported in the [`StartupOutcome`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audit::{emit, AuditEntry, AuditLevel, SharedLogger};
use crate::config::GlobalConfig;
use crate::identity::env::Environment;
use crate::identity::{IdentityResolver, ResolveOptions};
use crate::lock::heartbeat::spawn_heartbeat;
use crate::lock::{AcquireOptions, LockFileManager};
use crate::models::identity::InstanceIdentity;
use crate::models::lock::LockHandle;
use crate::models::migration::{ConsolidationResult, MigrationResult};
use crate::models::recovery::RecoveryOutcome;
use crate::models::session::PolicyState;
use crate::models::validation::ValidationReport;
use crate::session::migrator::MigrateOptions;
use crate::session::naming::file_name_of;
use crate::session::SessionStore;
use crate::{AppError, Result};

use super::events::{ClientEvent, ClientEventListener};

/// What the startup flow did.
#[derive(Debug, Clone, Serialize)]
pub struct StartupOutcome {
    /// Resolved identity.
    pub identity: InstanceIdentity,
    /// Session directory handed to the client.
    pub session_path: PathBuf,
    /// Lock ownership proof.
    pub lock: LockHandle,
    /// Whether the identity differs from the recorded policy state.
    pub policy_changed: bool,
    /// Migration result, when one ran.
    pub migration: Option<MigrationResult>,
    /// Consolidation result, when one ran.
    pub consolidation: Option<ConsolidationResult>,
    /// Validation before any repair.
    pub validation: ValidationReport,
    /// Recovery result, when one ran.
    pub recovery: Option<RecoveryOutcome>,
}

/// Session descriptor printed for the automation client.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionDescriptor {
    /// Identity id.
    pub instance_id: String,
    /// Strategy name.
    pub strategy: String,
    /// Session directory.
    pub session_path: PathBuf,
    /// Lock file.
    pub lock_path: PathBuf,
    /// Lock owner.
    pub pid: u32,
    /// Whether the client has to authenticate from scratch.
    pub requires_auth: bool,
}

impl StartupOutcome {
    /// Descriptor for the automation client.
    #[must_use]
    pub fn descriptor(&self) -> SessionDescriptor {
        let reset = self
            .recovery
            .as_ref()
            .is_some_and(|outcome| outcome.requires_reauth);
        SessionDescriptor {
            instance_id: self.identity.id.clone(),
            strategy: self.identity.strategy.to_string(),
            session_path: self.session_path.clone(),
            lock_path: self.lock.path.clone(),
            pid: self.lock.record.owner_pid(),
            requires_auth: reset || !self.validation.exists,
        }
    }
}

/// What the caller should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// Keep running.
    Continue,
    /// Release the lock and exit.
    Shutdown,
}

/// Runs the startup flow.
pub struct SessionCoordinator {
    config: Arc<GlobalConfig>,
    resolver: IdentityResolver,
    store: Arc<SessionStore>,
    logger: SharedLogger,
    pid: u32,
}

impl SessionCoordinator {
    /// Build every component from `config`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `config` is inconsistent.
    pub fn new(config: GlobalConfig, env: Environment, logger: SharedLogger) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(SessionStore::from_config(&config, &logger)?);
        let resolver = IdentityResolver::new(config.identity.clone(), env, Arc::clone(&logger));
        Ok(Self {
            config: Arc::new(config),
            resolver,
            store,
            logger,
            pid: std::process::id(),
        })
    }

    /// Act as `pid` instead of the current process.
    #[must_use]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Identity resolver.
    #[must_use]
    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Session components.
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Run the startup flow and take ownership of the session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Contention` when another live process owns the
    /// lock, or `AppError::Io` when the base directory or lock file cannot
    /// be written.
    pub async fn start(&self, options: &ResolveOptions) -> Result<ActiveSession> {
        let identity = self.resolver.resolve(options).await;
        let session_path = self.store.session_path(&identity.id);
        let base_dir = self.config.base_dir.clone();

        tokio::fs::create_dir_all(&base_dir).await.map_err(|err| {
            AppError::Io(format!(
                "failed to create base directory {}: {err}",
                base_dir.display()
            ))
        })?;

        let locks = Arc::new(
            LockFileManager::new(Arc::clone(&self.logger))
                .with_pid(self.pid)
                .with_instance_id(identity.id.clone()),
        );
        let lock_path = self.config.lock_path();
        let handle = locks
            .acquire_lock(&lock_path, AcquireOptions::from(&self.config.lock))
            .await?;

        let outcome = self.prepare(identity, session_path, handle).await;

        self.log(
            AuditEntry::new(AuditLevel::Info, "coordinator", "session ready")
                .with_field("instance_id", outcome.identity.id.as_str())
                .with_field("session_path", outcome.session_path.display().to_string())
                .with_field("policy_changed", outcome.policy_changed)
                .with_field("migrated", outcome.migration.is_some())
                .with_field("recovered", outcome.recovery.is_some()),
        );

        Ok(ActiveSession {
            outcome,
            locks,
            store: Arc::clone(&self.store),
            logger: Arc::clone(&self.logger),
            listeners: Vec::new(),
            released: false,
        })
    }

    /// Steps 3 to 6. Every failure here is non-fatal and only logged.
    async fn prepare(
        &self,
        identity: InstanceIdentity,
        session_path: PathBuf,
        lock: LockHandle,
    ) -> StartupOutcome {
        let base_dir = self.store.base_dir();

        let previous = self.store.policy().load().await.unwrap_or_else(|err| {
            self.warn("policy state unreadable", &err);
            None
        });
        let policy_changed = previous
            .as_ref()
            .is_some_and(|state| state.differs_from(&identity));

        let migration = if policy_changed {
            let result = self
                .store
                .migrator()
                .migrate(
                    base_dir,
                    &identity,
                    MigrateOptions {
                        backup: self.config.recovery.auto_backup,
                    },
                )
                .await;
            Some(result)
        } else {
            None
        };

        let consolidation = if identity.is_shared() && self.config.consolidation.on_startup {
            Some(
                self.store
                    .consolidator()
                    .consolidate(base_dir, &identity.id)
                    .await,
            )
        } else {
            None
        };

        let validation = self.store.validator().validate(&session_path).await;
        let recovery = if validation.exists && !validation.is_valid {
            if self.config.recovery.enabled {
                Some(
                    self.store
                        .recovery()
                        .perform_automatic_recovery(
                            &session_path,
                            &validation,
                            self.config.recovery.options(),
                        )
                        .await,
                )
            } else {
                self.warn(
                    "session is invalid and recovery is disabled",
                    &AppError::Corruption(session_path.display().to_string()),
                );
                None
            }
        } else {
            None
        };

        let state = PolicyState::new(&identity, file_name_of(&session_path).to_owned());
        if let Err(err) = self.store.policy().save(&state).await {
            self.warn("failed to save policy state", &err);
        }

        StartupOutcome {
            identity,
            session_path,
            lock,
            policy_changed,
            migration,
            consolidation,
            validation,
            recovery,
        }
    }

    fn warn(&self, message: &str, err: &AppError) {
        self.log(
            AuditEntry::new(AuditLevel::Warn, "coordinator", message)
                .with_field("error", err.to_string()),
        );
    }

    fn log(&self, entry: AuditEntry) {
        emit(self.logger.as_ref(), entry);
    }
}

/// A started session owning its lock until [`ActiveSession::shutdown`].
pub struct ActiveSession {
    outcome: StartupOutcome,
    locks: Arc<LockFileManager>,
    store: Arc<SessionStore>,
    logger: SharedLogger,
    listeners: Vec<Arc<dyn ClientEventListener>>,
    released: bool,
}

impl ActiveSession {
    /// Startup result.
    #[must_use]
    pub fn outcome(&self) -> &StartupOutcome {
        &self.outcome
    }

    /// Session directory.
    #[must_use]
    pub fn session_path(&self) -> &Path {
        &self.outcome.session_path
    }

    /// Lock file.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.outcome.lock.path
    }

    /// Whether the lock has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Register an observer for client events.
    pub fn add_listener(&mut self, listener: Arc<dyn ClientEventListener>) {
        self.listeners.push(listener);
    }

    /// Keep the lock fresh every `interval` until `cancel` fires.
    ///
    /// `lost` is cancelled if another process takes the lock over.
    #[must_use]
    pub fn spawn_heartbeat(
        &self,
        interval: Duration,
        cancel: CancellationToken,
        lost: CancellationToken,
    ) -> JoinHandle<()> {
        spawn_heartbeat(
            Arc::clone(&self.locks),
            self.outcome.lock.path.clone(),
            interval,
            cancel,
            lost,
        )
    }

    /// React to a client lifecycle event.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if a logout reset or a policy write fails.
    pub async fn handle_client_event(&mut self, event: &ClientEvent) -> Result<EventDisposition> {
        for listener in &self.listeners {
            listener.on_event(event);
        }
        self.log(
            AuditEntry::new(AuditLevel::Debug, "coordinator", "client event")
                .with_field("event", event.name()),
        );

        match event {
            ClientEvent::AuthChallenge { .. } => {
                self.log(AuditEntry::new(
                    AuditLevel::Info,
                    "coordinator",
                    "client is waiting for authentication",
                ));
            }
            ClientEvent::Authenticated | ClientEvent::Ready => {
                if !self
                    .store
                    .validator()
                    .quick_validate(&self.outcome.session_path)
                    .await
                {
                    self.log(
                        AuditEntry::new(
                            AuditLevel::Warn,
                            "coordinator",
                            "session incomplete after connect",
                        )
                        .with_field("path", self.outcome.session_path.display().to_string()),
                    );
                }
                let state = PolicyState::new(
                    &self.outcome.identity,
                    file_name_of(&self.outcome.session_path).to_owned(),
                );
                self.store.policy().save(&state).await?;
            }
            ClientEvent::AuthFailure { reason } => {
                self.log(
                    AuditEntry::new(AuditLevel::Warn, "coordinator", "client authentication failed")
                        .with_field("reason", reason.clone().unwrap_or_default()),
                );
            }
            ClientEvent::Disconnected { reason } => {
                if event.is_logout() {
                    self.store
                        .recovery()
                        .full_reset(&self.outcome.session_path)
                        .await?;
                } else {
                    self.log(
                        AuditEntry::new(AuditLevel::Info, "coordinator", "client disconnected")
                            .with_field("reason", reason.clone().unwrap_or_default()),
                    );
                }
            }
            ClientEvent::Shutdown => return Ok(EventDisposition::Shutdown),
        }
        Ok(EventDisposition::Continue)
    }

    /// Release the lock. Calling it again is a no-op returning `false`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the lock file cannot be read or removed.
    pub async fn shutdown(&mut self) -> Result<bool> {
        if self.released {
            return Ok(false);
        }
        let released = self.locks.release_lock(&self.outcome.lock.path).await?;
        self.released = true;
        Ok(released)
    }

    fn log(&self, entry: AuditEntry) {
        emit(self.logger.as_ref(), entry);
    }
}
