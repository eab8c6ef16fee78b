//! Poll scheduler
//!
//! Owns the single recurring timer of the driver. `start` and `stop` are the
//! only mutators; `start` on a running scheduler replaces the timer, so there
//! is never more than one.

use crate::logging::{StructuredLogger, get_logger};
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

/// Running or stopped interval timer
pub struct PollScheduler {
    timer: Option<Interval>,
    logger: StructuredLogger,
}

impl std::fmt::Debug for PollScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler")
            .field("period", &self.period())
            .finish()
    }
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PollScheduler {
    pub fn new() -> Self {
        Self {
            timer: None,
            logger: get_logger("scheduler"),
        }
    }

    /// Start ticking every `period`, replacing any running timer.
    /// The first tick fires one full period from now. A zero period is
    /// refused and leaves the scheduler as it was.
    pub fn start(&mut self, period: Duration) {
        if period.is_zero() {
            self.logger.error("Refusing to poll with a zero interval");
            return;
        }
        if self.timer.is_some() {
            self.stop();
        }
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.timer = Some(timer);
        self.logger
            .info(&format!("Polling started every {} ms", period.as_millis()));
    }

    /// Stop ticking. No-op when already stopped.
    pub fn stop(&mut self) {
        if self.timer.take().is_some() {
            self.logger.info("Polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    /// Period of the running timer
    pub fn period(&self) -> Option<Duration> {
        self.timer.as_ref().map(Interval::period)
    }

    /// Wait for the next tick; pends forever while stopped
    pub async fn tick(&mut self) -> Instant {
        match self.timer.as_mut() {
            Some(timer) => timer.tick().await,
            None => std::future::pending().await,
        }
    }
}
