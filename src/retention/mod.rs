//! Retention sweeper for the backup tree.
//!
//! The sweeper walks `<root>/<device>/` one level deep and deletes regular
//! files whose modification time is strictly older than the retention
//! window. Directories, symlinks, and files directly under the root are left
//! alone. A failed deletion is logged and counted; the sweep carries on.

use std::io;
use std::time::{Duration, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tracing::{debug, info, warn};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Outcome of a sweep.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SweepSummary {
    /// Number of artifacts deleted.
    pub removed: usize,
    /// Number of expired artifacts that could not be deleted.
    pub failed: usize,
}

/// Errors returned by the sweeper.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RetentionError {
    /// Raised when the retention window is zero days.
    #[error("retention window must be at least one day")]
    InvalidWindow,
    /// Raised when the backup root cannot be read.
    #[error("failed to read backup root {path}: {message}")]
    Root {
        /// Backup root.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the blocking sweep task panics or is cancelled.
    #[error("retention sweep worker failed: {message}")]
    Worker {
        /// Join error description.
        message: String,
    },
}

/// Deletes artifacts older than the retention window.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetentionSweeper {
    root: Utf8PathBuf,
    max_age_days: u32,
}

impl RetentionSweeper {
    /// Creates a sweeper for `root`.
    ///
    /// # Errors
    ///
    /// Returns [`RetentionError::InvalidWindow`] when `max_age_days` is zero.
    pub fn new(root: impl Into<Utf8PathBuf>, max_age_days: u32) -> Result<Self, RetentionError> {
        if max_age_days == 0 {
            return Err(RetentionError::InvalidWindow);
        }
        Ok(Self {
            root: root.into(),
            max_age_days,
        })
    }

    /// Retention window in days.
    #[must_use]
    pub const fn max_age_days(&self) -> u32 {
        self.max_age_days
    }

    /// Oldest modification time that survives a sweep run at `now`.
    #[must_use]
    pub fn cutoff(&self, now: SystemTime) -> SystemTime {
        let window = Duration::from_secs(u64::from(self.max_age_days) * SECONDS_PER_DAY);
        now.checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH)
    }

    /// Sweeps using the current time.
    ///
    /// # Errors
    ///
    /// See [`RetentionSweeper::sweep_at`].
    pub fn sweep(&self) -> Result<SweepSummary, RetentionError> {
        self.sweep_at(SystemTime::now())
    }

    /// Sweeps as if the current time were `now`. A missing root counts as
    /// an empty tree.
    ///
    /// # Errors
    ///
    /// Returns [`RetentionError::Root`] when the backup root exists but
    /// cannot be listed.
    pub fn sweep_at(&self, now: SystemTime) -> Result<SweepSummary, RetentionError> {
        self.sweep_with(now, |dir, name| dir.remove_file(name))
    }

    fn sweep_with<F>(&self, now: SystemTime, mut remove: F) -> Result<SweepSummary, RetentionError>
    where
        F: FnMut(&Dir, &str) -> io::Result<()>,
    {
        let cutoff = self.cutoff(now);
        info!(root = %self.root, days = self.max_age_days, "starting retention sweep");

        let root = match Dir::open_ambient_dir(&self.root, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(root = %self.root, "backup root missing; nothing to sweep");
                return Ok(SweepSummary::default());
            }
            Err(err) => return Err(self.root_error(&err)),
        };
        let entries = root.entries().map_err(|err| self.root_error(&err))?;

        let mut summary = SweepSummary::default();
        for entry in entries {
            let item = match entry {
                Ok(item) => item,
                Err(err) => {
                    warn!(root = %self.root, error = %err, "cannot read backup root entry");
                    continue;
                }
            };
            if !item.file_type().is_ok_and(|kind| kind.is_dir()) {
                continue;
            }
            let Ok(name) = item.file_name() else {
                continue;
            };
            let path = self.root.join(name);
            match item.open_dir() {
                Ok(dir) => sweep_device_dir(&path, &dir, cutoff, &mut summary, &mut remove),
                Err(err) => warn!(path = %path, error = %err, "cannot open device directory"),
            }
        }

        info!(
            removed = summary.removed,
            failed = summary.failed,
            "retention sweep finished"
        );
        Ok(summary)
    }

    fn root_error(&self, err: &io::Error) -> RetentionError {
        RetentionError::Root {
            path: self.root.clone(),
            message: err.to_string(),
        }
    }
}

fn sweep_device_dir<F>(
    path: &Utf8Path,
    dir: &Dir,
    cutoff: SystemTime,
    summary: &mut SweepSummary,
    remove: &mut F,
) where
    F: FnMut(&Dir, &str) -> io::Result<()>,
{
    let entries = match dir.entries() {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path = %path, error = %err, "cannot list device directory");
            return;
        }
    };
    for entry in entries {
        let expired = entry.and_then(|item| {
            let name = item.file_name()?;
            let metadata = item.metadata()?;
            if !item.file_type()?.is_file() {
                return Ok(None);
            }
            let modified = metadata.modified()?.into_std();
            Ok((modified < cutoff).then_some(name))
        });
        match expired {
            Ok(Some(name)) => match remove(dir, &name) {
                Ok(()) => {
                    summary.removed += 1;
                    info!(path = %path.join(&name), "removed expired backup");
                }
                Err(err) => {
                    summary.failed += 1;
                    warn!(path = %path.join(&name), error = %err, "failed to remove expired backup");
                }
            },
            Ok(None) => {}
            Err(err) => warn!(path = %path, error = %err, "cannot inspect backup file"),
        }
    }
}
