//! Tracing subscriber installation.
//!
//! Events go to stdout and, when the log directory is usable, to
//! `<log_dir>/netbackup_<YYYYMMDD>.log` through a non-blocking writer. The
//! file follows the date in the configured zone, so a long-running scheduler
//! starts a new file each day. A log directory that cannot be prepared
//! downgrades to console-only output with a warning instead of failing
//! startup.

use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs::OpenOptions;
use cap_std::{ambient_authority, fs_utf8::Dir};
use chrono::NaiveDate;
use thiserror::Error;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::artifact::{DIRECTORY_MODE, FILE_MODE, set_mode};
use crate::clock::{Clock, LOG_DATE_FORMAT};

/// Component name used as the log file prefix.
pub const LOG_COMPONENT: &str = "netbackup";

/// Errors raised while preparing the log file.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Raised when the log directory or file cannot be opened.
    #[error("cannot open log file {path}: {source}")]
    Open {
        /// Path being opened.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Keeps the background log writer alive. Dropping it flushes the file.
#[derive(Debug)]
pub struct LoggingGuard {
    log_file: Option<Utf8PathBuf>,
    _worker: Option<WorkerGuard>,
}

impl LoggingGuard {
    /// Log file opened at startup, or `None` for console-only logging.
    #[must_use]
    pub fn log_file(&self) -> Option<&Utf8Path> {
        self.log_file.as_deref()
    }
}

/// File name of the log for `date`.
#[must_use]
pub fn log_file_name(date: NaiveDate) -> String {
    format!("{LOG_COMPONENT}_{}.log", date.format(LOG_DATE_FORMAT))
}

/// Opens (creating if needed) the log file for `date` in append mode.
///
/// # Errors
///
/// Returns [`LoggingError::Open`] when the directory or file cannot be
/// created or opened.
pub fn open_log_file(
    log_dir: &Utf8Path,
    date: NaiveDate,
) -> Result<(Utf8PathBuf, std::fs::File), LoggingError> {
    let name = log_file_name(date);
    let path = log_dir.join(&name);
    let open_error = |source: io::Error| LoggingError::Open {
        path: path.clone(),
        source,
    };

    Dir::create_ambient_dir_all(log_dir, ambient_authority()).map_err(open_error)?;
    let dir = Dir::open_ambient_dir(log_dir, ambient_authority()).map_err(open_error)?;
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    let mut file = dir.open_with(&name, &options).map_err(open_error)?;
    file.flush().map_err(open_error)?;

    if let Err(err) = set_mode(&dir, &name, FILE_MODE) {
        report_permission_warning(&path, &err);
    }
    let parent = log_dir
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let result = Dir::open_ambient_dir(parent, ambient_authority()).and_then(|parent_dir| {
        set_mode(&parent_dir, log_dir.file_name().unwrap_or("."), DIRECTORY_MODE)
    });
    if let Err(err) = result {
        report_permission_warning(log_dir, &err);
    }
    Ok((path.clone(), file.into_std()))
}

fn report_permission_warning(path: &Utf8Path, err: &io::Error) {
    let mut stderr = io::stderr();
    writeln!(stderr, "warning: could not set permissions on {path}: {err}").ok();
}

/// Append-only log file that moves to a new `netbackup_<YYYYMMDD>.log`
/// whenever the date changes in the configured zone.
#[derive(Debug)]
pub struct DailyLogFile {
    log_dir: Utf8PathBuf,
    clock: Clock,
    date: NaiveDate,
    path: Utf8PathBuf,
    file: std::fs::File,
}

impl DailyLogFile {
    /// Opens today's log file.
    ///
    /// # Errors
    ///
    /// Returns [`LoggingError::Open`] when the file cannot be opened.
    pub fn open(log_dir: &Utf8Path, clock: Clock) -> Result<Self, LoggingError> {
        Self::open_for(log_dir, clock, clock.now().date_naive())
    }

    fn open_for(log_dir: &Utf8Path, clock: Clock, date: NaiveDate) -> Result<Self, LoggingError> {
        let (path, file) = open_log_file(log_dir, date)?;
        Ok(Self {
            log_dir: log_dir.to_owned(),
            clock,
            date,
            path,
            file,
        })
    }

    /// File currently receiving output.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn roll_over(&mut self) {
        let today = self.clock.now().date_naive();
        if today == self.date {
            return;
        }
        // A failed switch keeps the previous file until the next day.
        self.date = today;
        match open_log_file(&self.log_dir, today) {
            Ok((path, file)) => {
                self.path = path;
                self.file = file;
            }
            Err(err) => {
                let mut stderr = io::stderr();
                writeln!(stderr, "warning: staying on {}: {err}", self.path).ok();
            }
        }
    }
}

impl Write for DailyLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.roll_over();
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Installs the global subscriber. `RUST_LOG` overrides the default `info`
/// filter.
#[must_use]
pub fn init(log_dir: &Utf8Path, clock: &Clock) -> LoggingGuard {
    let (file_layer, guard, log_file, degraded) = match DailyLogFile::open(log_dir, *clock) {
        Ok(daily) => {
            let path = daily.path().to_owned();
            let (writer, worker) = tracing_appender::non_blocking(daily);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(worker), Some(path), None)
        }
        Err(err) => (None, None, None, Some(err)),
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_writer(io::stdout);

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        if let Some(err) = degraded {
            warn!(error = %err, "file logging disabled; continuing with console output only");
        }
    }
    LoggingGuard {
        log_file,
        _worker: guard,
    }
}
