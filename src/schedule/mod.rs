//! Scheduler driver.
//!
//! Triggers are daily or weekly wall-clock times in the configured zone.
//! Each trigger remembers its next due instant. A tick at or after that
//! instant fires the trigger once and moves it to the first occurrence
//! strictly after the tick, so overdue occurrences collapse into a single
//! run. Nothing is persisted across restarts.

use std::future::Future;
use std::pin::{Pin, pin};
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, FixedOffset, NaiveTime, TimeZone, Weekday};
use thiserror::Error;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::ScheduleSettings;
use crate::report::weekday_name;

/// Future returned by [`ActionHandler::handle`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Work a trigger performs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    /// Full fleet backup.
    Backup,
    /// Retention sweep.
    Cleanup,
}

/// Runs the work behind an [`Action`].
pub trait ActionHandler: Send + Sync {
    /// Performs `action` to completion.
    fn handle(&self, action: Action) -> HandlerFuture<'_>;
}

/// When a trigger recurs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Cadence {
    /// Every day at the given time.
    Daily(NaiveTime),
    /// Every week on the given day and time.
    Weekly(Weekday, NaiveTime),
}

impl Cadence {
    /// First occurrence strictly after `after`, in `after`'s offset.
    /// Returns `None` when that instant cannot be represented.
    #[must_use]
    pub fn next_after(&self, after: &DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        let offset = *after.offset();
        let today = after.date_naive();
        let (time, days_ahead, step) = match *self {
            Self::Daily(time) => (time, 0, 1),
            Self::Weekly(day, time) => {
                let target = i64::from(day.num_days_from_monday());
                let current = i64::from(today.weekday().num_days_from_monday());
                let ahead = (target - current).rem_euclid(7);
                (time, u64::try_from(ahead).ok()?, 7)
            }
        };
        let date = today.checked_add_days(Days::new(days_ahead))?;
        let candidate = offset.from_local_datetime(&date.and_time(time)).single()?;
        if candidate > *after {
            return Some(candidate);
        }
        let later = date.checked_add_days(Days::new(step))?;
        offset.from_local_datetime(&later.and_time(time)).single()
    }

    /// Human-readable description, e.g. `daily at 02:00`.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Daily(time) => format!("daily at {}", time.format("%H:%M")),
            Self::Weekly(day, time) => {
                format!("{} at {}", weekday_name(*day), time.format("%H:%M"))
            }
        }
    }
}

/// Errors raised while registering triggers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScheduleError {
    /// Raised when a trigger has no representable next occurrence.
    #[error("trigger {label} has no next occurrence after {after}")]
    OutOfRange {
        /// Trigger label.
        label: String,
        /// Reference time.
        after: DateTime<FixedOffset>,
    },
}

/// A registered recurring trigger.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Trigger {
    /// Label used in logs.
    pub label: String,
    /// Recurrence rule.
    pub cadence: Cadence,
    /// Work performed when due.
    pub action: Action,
    next_due: DateTime<FixedOffset>,
}

impl Trigger {
    /// Next instant at which this trigger fires.
    #[must_use]
    pub const fn next_due(&self) -> DateTime<FixedOffset> {
        self.next_due
    }
}

/// Ordered set of triggers.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Scheduler {
    triggers: Vec<Trigger>,
}

impl Scheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the daily backup, weekly backup and weekly cleanup
    /// triggers, in that order.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::OutOfRange`] if a trigger cannot be placed.
    pub fn from_settings(
        settings: &ScheduleSettings,
        now: &DateTime<FixedOffset>,
    ) -> Result<Self, ScheduleError> {
        let mut scheduler = Self::new();
        scheduler.register(
            "daily backup",
            Cadence::Daily(settings.daily_backup_at),
            Action::Backup,
            now,
        )?;
        scheduler.register(
            "weekly backup",
            Cadence::Weekly(settings.weekly_backup_day, settings.weekly_backup_at),
            Action::Backup,
            now,
        )?;
        scheduler.register(
            "cleanup",
            Cadence::Weekly(settings.cleanup_day, settings.cleanup_at),
            Action::Cleanup,
            now,
        )?;
        Ok(scheduler)
    }

    /// Adds a trigger whose first occurrence is strictly after `now`.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::OutOfRange`] if no occurrence exists.
    pub fn register(
        &mut self,
        label: impl Into<String>,
        cadence: Cadence,
        action: Action,
        now: &DateTime<FixedOffset>,
    ) -> Result<(), ScheduleError> {
        let name = label.into();
        let next_due = cadence
            .next_after(now)
            .ok_or_else(|| ScheduleError::OutOfRange {
                label: name.clone(),
                after: *now,
            })?;
        info!(trigger = %name, schedule = %cadence.describe(), next = %next_due, "registered trigger");
        self.triggers.push(Trigger {
            label: name,
            cadence,
            action,
            next_due,
        });
        Ok(())
    }

    /// Registered triggers in registration order.
    #[must_use]
    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    /// Returns the actions due at `now`, in registration order, and advances
    /// each fired trigger past `now`. A trigger whose next occurrence cannot
    /// be represented is dropped.
    pub fn due(&mut self, now: &DateTime<FixedOffset>) -> Vec<Action> {
        let mut actions = Vec::new();
        self.triggers.retain_mut(|trigger| {
            if *now < trigger.next_due {
                return true;
            }
            actions.push(trigger.action);
            match trigger.cadence.next_after(now) {
                Some(next) => {
                    debug!(trigger = %trigger.label, next = %next, "trigger fired");
                    trigger.next_due = next;
                    true
                }
                None => false,
            }
        });
        actions
    }

    /// Runs every action due at `now` sequentially and returns how many ran.
    pub async fn tick<H: ActionHandler + ?Sized>(
        &mut self,
        now: &DateTime<FixedOffset>,
        handler: &H,
    ) -> usize {
        let actions = self.due(now);
        for action in &actions {
            info!(action = ?action, "running scheduled action");
            handler.handle(*action).await;
        }
        actions.len()
    }

    /// Polls every `poll_interval` until `shutdown` resolves. Actions run to
    /// completion before the next poll; a long action delays later polls.
    pub async fn run_until<H, S>(
        mut self,
        clock: Clock,
        poll_interval: Duration,
        handler: &H,
        shutdown: S,
    ) where
        H: ActionHandler + ?Sized,
        S: Future<Output = ()>,
    {
        let mut stop = pin!(shutdown);
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = &mut stop => {
                    info!("scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick(&clock.now(), handler).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
