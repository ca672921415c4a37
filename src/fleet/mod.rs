//! Fleet orchestrator.
//!
//! Runs one [`BackupJob`] per device on a bounded worker pool, gathers the
//! results in completion order, and sends exactly one summary notification.
//! A job that panics is contained at its task boundary and reported as an
//! [`BackupFailure::Unexpected`] result.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::backup::{BackupFailure, BackupJob, BackupResult};
use crate::inventory::DeviceRecord;
use crate::notify::Notifier;
use crate::report;
use crate::session::Connector;

/// Overall outcome of a fleet run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FleetStatus {
    /// No device failed. An empty fleet also lands here.
    AllSuccess,
    /// No device succeeded and at least one failed.
    AllFailed,
    /// Some devices succeeded and some failed.
    Partial,
}

impl FleetStatus {
    /// Derives the status from success and failure counts.
    #[must_use]
    pub const fn from_counts(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (_, 0) => Self::AllSuccess,
            (0, _) => Self::AllFailed,
            _ => Self::Partial,
        }
    }
}

/// Results of one orchestrator run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FleetRunSummary {
    /// One result per device, in completion order.
    pub results: Vec<BackupResult>,
    /// When the run started.
    pub started_at: DateTime<FixedOffset>,
    /// When the last job finished.
    pub finished_at: DateTime<FixedOffset>,
    /// Wall-clock duration of the whole batch.
    pub duration: Duration,
}

impl FleetRunSummary {
    /// Number of successful devices.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|result| result.success).count()
    }

    /// Number of failed devices.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// Aggregate status.
    #[must_use]
    pub fn status(&self) -> FleetStatus {
        FleetStatus::from_counts(self.succeeded(), self.failed())
    }

    /// Successful results.
    pub fn successes(&self) -> impl Iterator<Item = &BackupResult> {
        self.results.iter().filter(|result| result.success)
    }

    /// Failed results.
    pub fn failures(&self) -> impl Iterator<Item = &BackupResult> {
        self.results.iter().filter(|result| !result.success)
    }

    /// Result for the device called `name`.
    #[must_use]
    pub fn result_for(&self, name: &str) -> Option<&BackupResult> {
        self.results.iter().find(|result| result.device == name)
    }
}

/// Runs backup jobs for the whole fleet.
#[derive(Debug)]
pub struct FleetOrchestrator<C, N> {
    job: Arc<BackupJob<C>>,
    notifier: Arc<N>,
    max_workers: usize,
}

impl<C, N> FleetOrchestrator<C, N>
where
    C: Connector + 'static,
    N: Notifier,
{
    /// Creates an orchestrator running at most `max_workers` jobs at once.
    /// A limit of zero is raised to one.
    #[must_use]
    pub fn new(job: BackupJob<C>, notifier: Arc<N>, max_workers: usize) -> Self {
        Self {
            job: Arc::new(job),
            notifier,
            max_workers: max_workers.max(1),
        }
    }

    /// Worker limit in effect.
    #[must_use]
    pub const fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Backs up every device and notifies once with the summary.
    pub async fn run_all(&self, devices: &[DeviceRecord]) -> FleetRunSummary {
        let clock = self.job.clock();
        let started_at = clock.now();
        let timer = Instant::now();
        info!(
            devices = devices.len(),
            workers = self.max_workers,
            "starting fleet backup"
        );

        let limit = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();
        for device in devices {
            let job = Arc::clone(&self.job);
            let permits = Arc::clone(&limit);
            let record = device.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let name = record.name.clone();
                let job_started = job.clock().now();
                let outcome = tokio::spawn(async move { job.run(&record).await }).await;
                (name, job_started, outcome)
            });
        }

        let mut results = Vec::with_capacity(devices.len());
        while let Some(joined) = tasks.join_next().await {
            let result = match joined {
                Ok((_, _, Ok(result))) => result,
                Ok((name, job_started, Err(err))) => {
                    let message = if err.is_panic() {
                        panic_message(err.into_panic())
                    } else {
                        err.to_string()
                    };
                    error!(device = %name, error = %message, "backup job aborted");
                    BackupResult::failed(
                        name,
                        BackupFailure::Unexpected { message },
                        job_started,
                        clock.now(),
                    )
                }
                Err(err) => {
                    error!(error = %err, "fleet worker aborted");
                    continue;
                }
            };
            results.push(result);
        }

        let summary = FleetRunSummary {
            results,
            started_at,
            finished_at: clock.now(),
            duration: timer.elapsed(),
        };
        info!(
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            duration = %report::format_duration(summary.duration),
            "fleet backup finished"
        );

        let message = report::fleet_summary(&summary, &clock.now());
        if !self.notifier.notify(&message).await {
            warn!("fleet summary notification was not delivered");
        }
        summary
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|text| (*text).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .map_or_else(
            || String::from("backup task panicked"),
            |text| format!("backup task panicked: {text}"),
        )
}
