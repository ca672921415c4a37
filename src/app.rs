//! Process context wiring every component once at startup.
//!
//! [`BackupService`] owns the loaded inventory, the orchestrator, the sweeper
//! and the notifier. The binary builds one from [`BackupConfig`] and calls
//! one entry point per CLI action.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::artifact::{ArtifactError, ArtifactWriter};
use crate::backup::BackupJob;
use crate::clock::Clock;
use crate::config::{BackupConfig, ConfigError, ScheduleSettings};
use crate::fleet::{FleetOrchestrator, FleetRunSummary};
use crate::inventory::{DeviceRecord, InventoryError, load_inventory};
use crate::notify::{Notifier, NotifyError, TelegramNotifier};
use crate::report;
use crate::retention::{RetentionError, RetentionSweeper, SweepSummary};
use crate::schedule::{Action, ActionHandler, HandlerFuture, ScheduleError, Scheduler};
use crate::session::{Connector, SshConnector, SshSettings};

/// Errors raised while assembling or running the service.
#[derive(Debug, Error)]
pub enum AppError {
    /// Raised when configuration values cannot be interpreted.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Raised when the inventory cannot be loaded.
    #[error(transparent)]
    Inventory(#[from] InventoryError),
    /// Raised when the backup root cannot be created.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    /// Raised when the notifier cannot be built.
    #[error(transparent)]
    Notify(#[from] NotifyError),
    /// Raised when the retention sweeper is misconfigured.
    #[error(transparent)]
    Retention(#[from] RetentionError),
    /// Raised when the scheduler cannot place a trigger.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// Service using OpenSSH sessions and Telegram notifications.
pub type LiveService = BackupService<SshConnector, TelegramNotifier>;

/// Explicit process context.
#[derive(Debug)]
pub struct BackupService<C, N> {
    devices: Vec<DeviceRecord>,
    clock: Clock,
    schedule: ScheduleSettings,
    orchestrator: FleetOrchestrator<C, N>,
    sweeper: RetentionSweeper,
    notifier: Arc<N>,
}

impl LiveService {
    /// Builds the production service: creates the backup root, loads the
    /// inventory and wires the SSH connector and Telegram notifier.
    ///
    /// # Errors
    ///
    /// Returns [`AppError`] when any startup step fails; an inventory error
    /// is fatal for the process.
    pub fn from_config(config: &BackupConfig) -> Result<Self, AppError> {
        let devices = load_inventory(&config.inventory_file())?;
        info!(devices = devices.len(), path = %config.inventory_file(), "loaded inventory");
        let connector = SshConnector::new(SshSettings::from_config(config));
        let notifier = Arc::new(TelegramNotifier::from_config(config)?);
        if !notifier.is_configured() {
            warn!("telegram credentials not set; notifications are disabled");
        }
        Self::assemble(config, devices, connector, notifier)
    }
}

impl<C, N> BackupService<C, N>
where
    C: Connector + 'static,
    N: Notifier,
{
    /// Builds a service from explicit parts.
    ///
    /// # Errors
    ///
    /// Returns [`AppError`] when the configuration is invalid or the backup
    /// root cannot be created.
    pub fn assemble(
        config: &BackupConfig,
        devices: Vec<DeviceRecord>,
        connector: C,
        notifier: Arc<N>,
    ) -> Result<Self, AppError> {
        let clock = config.clock()?;
        let schedule = config.schedule()?;
        let writer = ArtifactWriter::new(config.backup_root());
        writer.ensure_root()?;
        let sweeper = RetentionSweeper::new(config.backup_root(), config.retention_days)?;
        let job = BackupJob::new(connector, writer, clock).with_system_info(config.collect_system_info);
        let orchestrator = FleetOrchestrator::new(job, Arc::clone(&notifier), config.max_workers);
        Ok(Self {
            devices,
            clock,
            schedule,
            orchestrator,
            sweeper,
            notifier,
        })
    }

    /// Loaded inventory.
    #[must_use]
    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }

    /// Runs one backup of the whole fleet.
    pub async fn backup_fleet(&self) -> FleetRunSummary {
        self.orchestrator.run_all(&self.devices).await
    }

    /// Runs one retention sweep, notifying only when files were removed.
    ///
    /// # Errors
    ///
    /// Returns [`RetentionError`] when the backup root cannot be read or
    /// the sweep worker is lost.
    pub async fn cleanup(&self) -> Result<SweepSummary, RetentionError> {
        let sweeper = self.sweeper.clone();
        let summary = tokio::task::spawn_blocking(move || sweeper.sweep())
            .await
            .map_err(|err| RetentionError::Worker {
                message: err.to_string(),
            })??;
        if summary.removed > 0 {
            let message =
                report::cleanup_message(summary.removed, self.sweeper.max_age_days(), &self.clock.now());
            if !self.notifier.notify(&message).await {
                warn!("cleanup notification was not delivered");
            }
        }
        Ok(summary)
    }

    /// Sends the startup notification describing the active schedule.
    pub async fn announce_schedule(&self) -> bool {
        let message = report::startup_message(
            self.devices.len(),
            &self.schedule,
            self.sweeper.max_age_days(),
            &self.clock.now(),
        );
        self.notifier.notify(&message).await
    }

    /// Registers the three triggers, announces them and polls until
    /// `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Schedule`] when a trigger cannot be placed.
    pub async fn run_scheduler<S>(&self, shutdown: S) -> Result<(), AppError>
    where
        S: Future<Output = ()>,
    {
        let scheduler = Scheduler::from_settings(&self.schedule, &self.clock.now())?;
        for trigger in scheduler.triggers() {
            info!(trigger = %trigger.label, schedule = %trigger.cadence.describe(), "schedule active");
        }
        if !self.announce_schedule().await {
            warn!("startup notification was not delivered");
        }
        scheduler
            .run_until(self.clock, self.schedule.poll_interval, self, shutdown)
            .await;
        Ok(())
    }
}

impl<C, N> ActionHandler for BackupService<C, N>
where
    C: Connector + 'static,
    N: Notifier,
{
    fn handle(&self, action: Action) -> HandlerFuture<'_> {
        Box::pin(async move {
            match action {
                Action::Backup => {
                    self.backup_fleet().await;
                }
                Action::Cleanup => {
                    if let Err(err) = self.cleanup().await {
                        error!(error = %err, "retention sweep failed");
                    }
                }
            }
        })
    }
}
