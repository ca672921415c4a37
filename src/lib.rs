//! Core library for the `netbackup` fleet backup service.
//!
//! The crate captures the running configuration (and optional diagnostics)
//! of network devices over SSH, writes timestamped artifacts per device,
//! prunes artifacts past a retention window, and reports every run to a
//! Telegram chat. [`FleetOrchestrator`] is the centre: it fans
//! [`BackupJob`]s out over a bounded worker pool and aggregates the results.

pub mod app;
pub mod artifact;
pub mod backup;
pub mod clock;
pub mod config;
pub mod fleet;
pub mod inventory;
pub mod logging;
pub mod notify;
pub mod report;
pub mod retention;
pub mod schedule;
pub mod session;
pub mod test_support;

pub use app::{AppError, BackupService, LiveService};
pub use artifact::{ArtifactError, ArtifactKind, ArtifactWriter};
pub use backup::{BackupFailure, BackupJob, BackupResult};
pub use clock::{Clock, ClockError};
pub use config::{BackupConfig, ConfigError, ScheduleSettings};
pub use fleet::{FleetOrchestrator, FleetRunSummary, FleetStatus};
pub use inventory::{DeviceRecord, InventoryError, load_inventory, parse_inventory};
pub use notify::{Message, Notifier, NotifyError, ParseMode, TelegramNotifier};
pub use retention::{RetentionError, RetentionSweeper, SweepSummary};
pub use schedule::{Action, ActionHandler, Cadence, ScheduleError, Scheduler};
pub use session::{CommandOutput, Connector, DeviceSession, SessionError, SshConnector};
