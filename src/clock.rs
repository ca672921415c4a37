//! Wall-clock access pinned to a single configured UTC offset.
//!
//! Every timestamp the crate produces (artifact names, log file names,
//! notification text, backup results) goes through [`Clock`] so the whole
//! process agrees on one zone.

use chrono::{DateTime, FixedOffset, Utc};
use thiserror::Error;

/// Format used in artifact file names (`YYYYMMDD_HHMMSS`).
pub const ARTIFACT_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Format used in human-readable messages (`DD/MM/YYYY HH:MM:SS`).
pub const DISPLAY_STAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Format used in daily log file names (`YYYYMMDD`).
pub const LOG_DATE_FORMAT: &str = "%Y%m%d";

/// Errors raised when parsing a UTC offset.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ClockError {
    /// Raised when the offset is not of the form `+HH:MM` or `-HH:MM`.
    #[error("invalid UTC offset {value:?}: expected +HH:MM or -HH:MM")]
    InvalidOffset {
        /// Offending input.
        value: String,
    },
}

/// Source of "now" in the configured zone.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Clock {
    offset: FixedOffset,
}

impl Clock {
    /// Builds a clock for the given offset.
    #[must_use]
    pub const fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Builds a clock from a `+HH:MM` / `-HH:MM` string.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidOffset`] when the string cannot be parsed.
    pub fn from_offset_str(value: &str) -> Result<Self, ClockError> {
        parse_offset(value).map(Self::new)
    }

    /// Returns the configured offset.
    #[must_use]
    pub const fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Current time in the configured zone.
    #[must_use]
    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }
}

/// Renders a timestamp for use inside artifact file names.
#[must_use]
pub fn artifact_stamp(at: &DateTime<FixedOffset>) -> String {
    at.format(ARTIFACT_STAMP_FORMAT).to_string()
}

/// Renders a timestamp for notification and diagnostic text.
#[must_use]
pub fn display_stamp(at: &DateTime<FixedOffset>) -> String {
    at.format(DISPLAY_STAMP_FORMAT).to_string()
}

/// Parses `+HH:MM`, `-HH:MM` or `Z` into a fixed offset.
///
/// # Errors
///
/// Returns [`ClockError::InvalidOffset`] for anything else, including
/// offsets beyond ±23:59.
pub fn parse_offset(value: &str) -> Result<FixedOffset, ClockError> {
    let trimmed = value.trim();
    let parsed = if trimmed.eq_ignore_ascii_case("z") {
        FixedOffset::east_opt(0)
    } else {
        trimmed.parse::<FixedOffset>().ok()
    };
    parsed.ok_or_else(|| ClockError::InvalidOffset {
        value: value.to_owned(),
    })
}
