//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::{NaiveTime, Weekday};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::clock::{Clock, parse_offset};

/// Default number of days an artifact is kept before the sweeper removes it.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Default number of devices backed up in parallel.
pub const DEFAULT_MAX_WORKERS: usize = 5;

/// Process-wide settings merged from defaults, `netbackup.toml`, and
/// `NETBACKUP_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "NETBACKUP",
    discovery(
        app_name = "netbackup",
        env_var = "NETBACKUP_CONFIG_PATH",
        config_file_name = "netbackup.toml",
        dotfile_name = ".netbackup.toml",
        project_file_name = "netbackup.toml"
    )
)]
pub struct BackupConfig {
    /// Telegram bot token. Notifications are skipped when unset.
    pub telegram_bot_token: Option<String>,
    /// Telegram chat that receives notifications.
    pub telegram_chat_id: Option<String>,
    /// Base URL of the Telegram Bot API.
    #[ortho_config(default = "https://api.telegram.org".to_owned())]
    pub telegram_api_base: String,
    /// Age in days after which artifacts are deleted.
    #[ortho_config(default = 30)]
    pub retention_days: u32,
    /// Whether to capture the diagnostic command set alongside the config.
    #[ortho_config(default = true)]
    pub collect_system_info: bool,
    /// Seconds allowed for establishing an SSH session.
    #[ortho_config(default = 30)]
    pub ssh_timeout_secs: u64,
    /// Seconds allowed for a single command on an open session.
    #[ortho_config(default = 120)]
    pub command_timeout_secs: u64,
    /// Upper bound on concurrently running device backups.
    #[ortho_config(default = 5)]
    pub max_workers: usize,
    /// Path to the device inventory JSON file.
    #[ortho_config(default = "config/devices.json".to_owned())]
    pub inventory_path: String,
    /// Root directory for per-device artifact folders.
    #[ortho_config(default = "backups".to_owned())]
    pub backup_dir: String,
    /// Directory receiving the daily log file.
    #[ortho_config(default = "logs".to_owned())]
    pub log_dir: String,
    /// UTC offset applied to every timestamp, as `+HH:MM` or `-HH:MM`.
    #[ortho_config(default = "-03:00".to_owned())]
    pub utc_offset: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `sshpass` executable used for password authentication.
    #[ortho_config(default = "sshpass".to_owned())]
    pub sshpass_bin: String,
    /// Time of the daily full backup (`HH:MM`).
    #[ortho_config(default = "02:00".to_owned())]
    pub daily_backup_at: String,
    /// Weekday of the weekly full backup.
    #[ortho_config(default = "sunday".to_owned())]
    pub weekly_backup_day: String,
    /// Time of the weekly full backup (`HH:MM`).
    #[ortho_config(default = "01:00".to_owned())]
    pub weekly_backup_at: String,
    /// Weekday of the weekly retention sweep.
    #[ortho_config(default = "monday".to_owned())]
    pub cleanup_day: String,
    /// Time of the weekly retention sweep (`HH:MM`).
    #[ortho_config(default = "03:00".to_owned())]
    pub cleanup_at: String,
    /// Seconds between scheduler polls.
    #[ortho_config(default = 60)]
    pub poll_interval_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            toml_key,
        }
    }

    fn message(&self, problem: &str) -> String {
        format!(
            "{problem} {}: set NETBACKUP_{} or add {} to netbackup.toml",
            self.description,
            self.toml_key.to_uppercase(),
            self.toml_key
        )
    }
}

impl BackupConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("netbackup")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply the offending value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for blank values and
    /// [`ConfigError::InvalidValue`] for zero or unparsable ones.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_text(
            &self.inventory_path,
            &FieldMetadata::new("inventory file", "inventory_path"),
        )?;
        require_text(
            &self.backup_dir,
            &FieldMetadata::new("backup directory", "backup_dir"),
        )?;
        require_text(&self.log_dir, &FieldMetadata::new("log directory", "log_dir"))?;
        require_text(&self.ssh_bin, &FieldMetadata::new("ssh binary", "ssh_bin"))?;
        require_text(
            &self.sshpass_bin,
            &FieldMetadata::new("sshpass binary", "sshpass_bin"),
        )?;
        require_text(
            &self.telegram_api_base,
            &FieldMetadata::new("Telegram API base URL", "telegram_api_base"),
        )?;
        require_positive(
            u64::from(self.retention_days),
            &FieldMetadata::new("retention window", "retention_days"),
        )?;
        require_positive(
            self.ssh_timeout_secs,
            &FieldMetadata::new("SSH timeout", "ssh_timeout_secs"),
        )?;
        require_positive(
            self.command_timeout_secs,
            &FieldMetadata::new("command timeout", "command_timeout_secs"),
        )?;
        require_positive(
            u64::try_from(self.max_workers).unwrap_or(u64::MAX),
            &FieldMetadata::new("worker limit", "max_workers"),
        )?;
        require_positive(
            self.poll_interval_secs,
            &FieldMetadata::new("poll interval", "poll_interval_secs"),
        )?;
        self.clock()?;
        self.schedule()?;
        Ok(())
    }

    /// Clock pinned to the configured UTC offset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when `utc_offset` is malformed.
    pub fn clock(&self) -> Result<Clock, ConfigError> {
        parse_offset(&self.utc_offset)
            .map(Clock::new)
            .map_err(|err| {
                ConfigError::InvalidValue(
                    FieldMetadata::new("UTC offset", "utc_offset").message(&err.to_string()),
                )
            })
    }

    /// Parsed schedule times and weekdays.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a time or weekday is
    /// malformed.
    pub fn schedule(&self) -> Result<ScheduleSettings, ConfigError> {
        Ok(ScheduleSettings {
            daily_backup_at: parse_time(
                &self.daily_backup_at,
                &FieldMetadata::new("daily backup time", "daily_backup_at"),
            )?,
            weekly_backup_day: parse_weekday(
                &self.weekly_backup_day,
                &FieldMetadata::new("weekly backup day", "weekly_backup_day"),
            )?,
            weekly_backup_at: parse_time(
                &self.weekly_backup_at,
                &FieldMetadata::new("weekly backup time", "weekly_backup_at"),
            )?,
            cleanup_day: parse_weekday(
                &self.cleanup_day,
                &FieldMetadata::new("cleanup day", "cleanup_day"),
            )?,
            cleanup_at: parse_time(
                &self.cleanup_at,
                &FieldMetadata::new("cleanup time", "cleanup_at"),
            )?,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
        })
    }

    /// Returns the Telegram credentials when both token and chat are set.
    #[must_use]
    pub fn telegram_credentials(&self) -> Option<(&str, &str)> {
        let token = self.telegram_bot_token.as_deref().map(str::trim)?;
        let chat = self.telegram_chat_id.as_deref().map(str::trim)?;
        if token.is_empty() || chat.is_empty() {
            return None;
        }
        Some((token, chat))
    }

    /// Backup root as a UTF-8 path.
    #[must_use]
    pub fn backup_root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.backup_dir)
    }

    /// Log directory as a UTF-8 path.
    #[must_use]
    pub fn log_root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.log_dir)
    }

    /// Inventory file as a UTF-8 path.
    #[must_use]
    pub fn inventory_file(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.inventory_path)
    }

    /// Session establishment timeout.
    #[must_use]
    pub const fn ssh_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_timeout_secs)
    }

    /// Per-command timeout.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Parsed schedule settings used by the scheduler driver.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScheduleSettings {
    /// Time of the daily backup.
    pub daily_backup_at: NaiveTime,
    /// Weekday of the weekly backup.
    pub weekly_backup_day: Weekday,
    /// Time of the weekly backup.
    pub weekly_backup_at: NaiveTime,
    /// Weekday of the retention sweep.
    pub cleanup_day: Weekday,
    /// Time of the retention sweep.
    pub cleanup_at: NaiveTime,
    /// Interval between scheduler polls.
    pub poll_interval: Duration,
}

fn require_text(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(metadata.message("missing")));
    }
    Ok(())
}

fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue(metadata.message("zero")));
    }
    Ok(())
}

fn parse_time(value: &str, metadata: &FieldMetadata) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| ConfigError::InvalidValue(metadata.message("expected HH:MM for")))
}

fn parse_weekday(value: &str, metadata: &FieldMetadata) -> Result<Weekday, ConfigError> {
    value
        .trim()
        .parse::<Weekday>()
        .map_err(|_| ConfigError::InvalidValue(metadata.message("expected a weekday name for")))
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds a value outside its accepted range or format.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}
