//! Device backup job.
//!
//! One job captures one device: it prepares the device directory, opens a
//! session, exports the running configuration, optionally collects
//! diagnostics, writes the artifacts and always closes the session. Every
//! failure is returned as data inside [`BackupResult`]. A device whose
//! configuration is not captured leaves no artifacts behind, even when its
//! diagnostics were collected.

use chrono::{DateTime, FixedOffset};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::artifact::{ArtifactKind, ArtifactWriter};
use crate::clock::{Clock, artifact_stamp};
use crate::inventory::DeviceRecord;
use crate::session::{Connector, DeviceSession};

mod system_info;

pub use system_info::{
    DEFAULT_CONFIG_COMMAND, InfoSection, UNSUPPORTED_COMMAND, config_command,
    default_info_commands, info_commands, render_info,
};

/// Why a device backup did not succeed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BackupFailure {
    /// The session could not be opened.
    #[error("connection failed: {reason}")]
    ConnectionFailed {
        /// Transport diagnostic.
        reason: String,
    },
    /// The configuration command succeeded but printed nothing.
    #[error("configuration output was empty")]
    EmptyConfig,
    /// The configuration command failed to run or reported an error.
    #[error("configuration command failed: {message}")]
    CommandError {
        /// Error text reported by the device or the transport.
        message: String,
    },
    /// Any other failure, such as an artifact write error or a job panic.
    #[error("unexpected error: {message}")]
    Unexpected {
        /// Description of the failure.
        message: String,
    },
}

impl BackupFailure {
    /// Stable identifier used in logs.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::EmptyConfig => "EMPTY_CONFIG",
            Self::CommandError { .. } => "COMMAND_ERROR",
            Self::Unexpected { .. } => "UNEXPECTED",
        }
    }
}

/// Outcome of one device backup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackupResult {
    /// Device name.
    pub device: String,
    /// `true` when the configuration artifact was captured and written.
    pub success: bool,
    /// File names of the artifacts produced, in write order.
    pub artifacts: Vec<String>,
    /// Failure description when `success` is `false`.
    pub error: Option<BackupFailure>,
    /// When the job started.
    pub started_at: DateTime<FixedOffset>,
    /// When the job finished.
    pub finished_at: DateTime<FixedOffset>,
}

impl BackupResult {
    /// Builds a failed result with no artifacts.
    #[must_use]
    pub fn failed(
        device: impl Into<String>,
        failure: BackupFailure,
        started_at: DateTime<FixedOffset>,
        finished_at: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            device: device.into(),
            success: false,
            artifacts: Vec::new(),
            error: Some(failure),
            started_at,
            finished_at,
        }
    }
}

/// Runs backups for individual devices.
#[derive(Debug)]
pub struct BackupJob<C> {
    connector: C,
    writer: ArtifactWriter,
    clock: Clock,
    collect_system_info: bool,
}

impl<C: Connector> BackupJob<C> {
    /// Creates a job with diagnostic collection enabled.
    #[must_use]
    pub const fn new(connector: C, writer: ArtifactWriter, clock: Clock) -> Self {
        Self {
            connector,
            writer,
            clock,
            collect_system_info: true,
        }
    }

    /// Enables or disables diagnostic collection.
    #[must_use]
    pub const fn with_system_info(mut self, enabled: bool) -> Self {
        self.collect_system_info = enabled;
        self
    }

    /// Clock used for result timestamps and artifact names.
    #[must_use]
    pub const fn clock(&self) -> Clock {
        self.clock
    }

    /// Backs up `device`. Never fails; problems are reported in the result.
    pub async fn run(&self, device: &DeviceRecord) -> BackupResult {
        let started_at = self.clock.now();
        info!(device = %device.name, host = %device.host, "starting backup");

        if let Err(err) = self.writer.ensure_device_dir(&device.name) {
            warn!(device = %device.name, error = %err, "could not prepare device directory");
        }

        let mut session = match self.connector.open(device).await {
            Ok(session) => session,
            Err(err) => {
                let failure = BackupFailure::ConnectionFailed {
                    reason: err.to_string(),
                };
                error!(device = %device.name, error = %err, "connection failed");
                return BackupResult::failed(&device.name, failure, started_at, self.clock.now());
            }
        };

        let (artifacts, failure) = self.capture(&mut session, device, &started_at).await;
        session.close().await;

        let finished_at = self.clock.now();
        match &failure {
            None => info!(device = %device.name, artifacts = artifacts.len(), "backup completed"),
            Some(err) => warn!(device = %device.name, code = err.code(), error = %err, "backup failed"),
        }
        BackupResult {
            device: device.name.clone(),
            success: failure.is_none(),
            artifacts,
            error: failure,
            started_at,
            finished_at,
        }
    }

    async fn capture<S: DeviceSession>(
        &self,
        session: &mut S,
        device: &DeviceRecord,
        started_at: &DateTime<FixedOffset>,
    ) -> (Vec<String>, Option<BackupFailure>) {
        let stamp = artifact_stamp(started_at);
        let config = export_config(session, config_command(device)).await;
        let diagnostics = if self.collect_system_info {
            let sections = collect_diagnostics(session, device).await;
            Some(render_info(device, &self.clock.now(), &sections))
        } else {
            None
        };

        let text = match config {
            Ok(captured) => captured,
            Err(err) => {
                warn!(device = %device.name, error = %err, "configuration not captured");
                if diagnostics.is_some() {
                    debug!(device = %device.name, "discarding diagnostics for failed capture");
                }
                return (Vec::new(), Some(err));
            }
        };

        let mut artifacts = Vec::new();
        match self.writer.write(&device.name, ArtifactKind::Config, &stamp, &text) {
            Ok(name) => artifacts.push(name),
            Err(err) => {
                error!(device = %device.name, error = %err, "failed to write configuration");
                return (
                    artifacts,
                    Some(BackupFailure::Unexpected {
                        message: err.to_string(),
                    }),
                );
            }
        }

        if let Some(document) = diagnostics {
            match self
                .writer
                .write(&device.name, ArtifactKind::SystemInfo, &stamp, &document)
            {
                Ok(name) => artifacts.push(name),
                Err(err) => {
                    warn!(device = %device.name, error = %err, "failed to write diagnostics");
                }
            }
        }
        (artifacts, None)
    }
}

async fn export_config<S: DeviceSession>(
    session: &mut S,
    command: &str,
) -> Result<String, BackupFailure> {
    let output = session
        .exec(command)
        .await
        .map_err(|err| BackupFailure::CommandError {
            message: err.to_string(),
        })?;
    if let Some(message) = output.failure() {
        return Err(BackupFailure::CommandError { message });
    }
    if output.stdout.trim().is_empty() {
        return Err(BackupFailure::EmptyConfig);
    }
    Ok(output.stdout)
}

async fn collect_diagnostics<S: DeviceSession>(
    session: &mut S,
    device: &DeviceRecord,
) -> Vec<InfoSection> {
    let mut sections = Vec::new();
    for command in info_commands(device) {
        let section = match session.exec(&command.command).await {
            Err(err) => InfoSection::failed(&command.label, &err.to_string()),
            Ok(output) => match output.failure() {
                Some(reason) => InfoSection::failed(&command.label, &reason),
                None if output.stdout.trim().is_empty() => InfoSection::failed(&command.label, ""),
                None => InfoSection::captured(&command.label, &output.stdout),
            },
        };
        sections.push(section);
    }
    sections
}

#[cfg(test)]
mod tests;
