//! Simulated progress.
//!
//! The generation service reports no progress, so the percentage shown while
//! work is in flight is a wall-clock estimate. It climbs towards 99% over the
//! estimated duration and only reaches 100% when the caller finishes it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Highest percentage the estimator reports on its own
pub const MAX_ESTIMATED_PERCENT: u8 = 99;

/// Timing knobs for the estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSettings {
    pub tick: Duration,
    /// Expected duration of one remote call
    pub job_estimate: Duration,
    /// Added for every job after the first in a batch
    pub extra_job: Duration,
}

impl ProgressSettings {
    pub fn batch_estimate(&self, jobs: usize) -> Duration {
        let extra = u32::try_from(jobs.saturating_sub(1)).unwrap_or(u32::MAX);
        self.job_estimate
            .saturating_add(self.extra_job.saturating_mul(extra))
    }
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            job_estimate: Duration::from_secs(15),
            extra_job: Duration::from_secs(5),
        }
    }
}

/// Progress readout published to the UI
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    /// Bumped for every new unit of work; stale writers are ignored
    pub epoch: u64,
    pub percent: u8,
    pub message: String,
    pub estimate: Duration,
    pub active: bool,
    /// Units of work sharing this readout that have not settled yet
    pub units: usize,
}

impl Progress {
    /// Estimated seconds left, zero once finished
    pub fn remaining_secs(&self) -> u64 {
        if self.percent >= 100 {
            return 0;
        }
        let left = self.estimate.as_secs_f64() * (1.0 - f64::from(self.percent) / 100.0);
        left.round() as u64
    }
}

/// Pure step counter behind the simulated percentage
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    interval: Duration,
    total_steps: u64,
    steps: u64,
}

impl ProgressEstimator {
    pub fn new(estimated_total: Duration, interval: Duration) -> Self {
        let interval_ms = interval.as_millis().max(1);
        let total_steps = (estimated_total.as_millis() / interval_ms).max(1);

        Self {
            interval: Duration::from_millis(u64::try_from(interval_ms).unwrap_or(u64::MAX)),
            total_steps: u64::try_from(total_steps).unwrap_or(u64::MAX),
            steps: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Advance one step and return the new percentage
    pub fn tick(&mut self) -> u8 {
        self.steps = self.steps.saturating_add(1);
        self.percent()
    }

    pub fn percent(&self) -> u8 {
        let raw = (self.steps as f64 / self.total_steps as f64 * 100.0).round();
        raw.min(f64::from(MAX_ESTIMATED_PERCENT)) as u8
    }
}

/// Owner of the progress channel
#[derive(Debug, Clone)]
pub struct ProgressBoard {
    tx: Arc<watch::Sender<Progress>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Progress::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Progress {
        self.tx.borrow().clone()
    }

    /// Start reporting for a new unit of work. Earlier reporters go stale.
    pub fn begin(&self, message: impl Into<String>, estimate: Duration) -> ProgressReporter {
        let message = message.into();
        let mut epoch = 0;
        self.tx.send_modify(|p| {
            p.epoch += 1;
            p.percent = 0;
            p.message = message;
            p.estimate = estimate;
            p.active = true;
            p.units = 1;
            epoch = p.epoch;
        });

        self.reporter(epoch)
    }

    /// Share the active readout with another unit of work, or begin a new
    /// one when nothing is running. The readout completes only once every
    /// unit sharing it has settled.
    pub fn join(&self, message: impl Into<String>, estimate: Duration) -> ProgressReporter {
        let message = message.into();
        let mut epoch = 0;
        self.tx.send_modify(|p| {
            if p.active && p.units > 0 {
                p.units += 1;
                p.estimate = p.estimate.max(estimate);
            } else {
                p.epoch += 1;
                p.percent = 0;
                p.estimate = estimate;
                p.active = true;
                p.units = 1;
            }
            p.message = message;
            epoch = p.epoch;
        });

        self.reporter(epoch)
    }

    fn reporter(&self, epoch: u64) -> ProgressReporter {
        ProgressReporter {
            tx: Arc::clone(&self.tx),
            epoch,
            settled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Back to idle, invalidating every reporter
    pub fn clear(&self) {
        self.tx.send_modify(|p| {
            *p = Progress {
                epoch: p.epoch + 1,
                ..Progress::default()
            };
        });
    }
}

impl Default for ProgressBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// Write access to the readout for one unit of work
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<Progress>>,
    epoch: u64,
    settled: Arc<AtomicBool>,
}

impl ProgressReporter {
    fn update(&self, f: impl FnOnce(&mut Progress) -> bool) -> bool {
        self.tx
            .send_if_modified(|p| p.epoch == self.epoch && p.active && f(p))
    }

    /// Raise the estimated percentage. Never lowers it and never reaches 100.
    pub fn set_percent(&self, percent: u8) {
        let percent = percent.min(MAX_ESTIMATED_PERCENT);
        self.update(|p| {
            if percent > p.percent {
                p.percent = percent;
                true
            } else {
                false
            }
        });
    }

    pub fn set_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|p| {
            p.message = message;
            true
        });
    }

    /// Work has settled successfully. With other units still sharing the
    /// readout only this unit is released.
    pub fn finish(&self, message: impl Into<String>) {
        self.settle(message.into(), 100);
    }

    /// Work has settled with an error; the percentage stays where it was
    pub fn abandon(&self, message: impl Into<String>) {
        self.settle(message.into(), 0);
    }

    fn settle(&self, message: String, percent: u8) {
        if self.settled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.update(|p| {
            p.units = p.units.saturating_sub(1);
            if p.units == 0 {
                p.percent = p.percent.max(percent);
                p.message = message;
                p.active = false;
            }
            true
        });
    }
}

/// Spawn the periodic task feeding `estimator` into `reporter`.
///
/// The task lives exactly as long as the returned guard.
pub fn start_ticker(mut estimator: ProgressEstimator, reporter: ProgressReporter) -> TickerGuard {
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(estimator.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            reporter.set_percent(estimator.tick());
        }
    });

    TickerGuard {
        handle: Some(handle),
    }
}

/// Cancels the ticker on `stop` or drop, whichever comes first
#[derive(Debug)]
pub struct TickerGuard {
    handle: Option<JoinHandle<()>>,
}

impl TickerGuard {
    pub fn stop(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TickerGuard {
    fn drop(&mut self) {
        self.cancel();
    }
}
