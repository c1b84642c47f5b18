//! Classification of lease renewal failures.
//!
//! [`GracePeriodDetector`] treats a failure as fatal when the controller
//! rejected the lease outright, or when renewals have kept failing for at
//! least the grace period since the first failure after the last success.
//! Timeouts and server errors inside the window are transient.

use std::time::{Duration, Instant};

use tracing::debug;

use super::ControllerError;

/// Decides whether a renewal failure is terminal.
pub trait FatalErrorDetector: Send {
    /// Classify the latest failure. May update accumulated failure state.
    fn is_fatal(&mut self, err: &ControllerError) -> bool;

    /// A renewal succeeded: forget accumulated failures.
    fn got_success(&mut self);
}

/// Source of monotonic time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Rejection-or-expiry policy.
pub struct GracePeriodDetector {
    grace_period: Duration,
    clock: Box<dyn Clock>,
    first_failure: Option<Instant>,
    consecutive_failures: u32,
}

impl GracePeriodDetector {
    pub fn new(grace_period: Duration) -> Self {
        Self::with_clock(grace_period, Box::new(SystemClock))
    }

    pub fn with_clock(grace_period: Duration, clock: Box<dyn Clock>) -> Self {
        Self {
            grace_period,
            clock,
            first_failure: None,
            consecutive_failures: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

impl FatalErrorDetector for GracePeriodDetector {
    fn is_fatal(&mut self, err: &ControllerError) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if err.is_non_retriable() {
            return true;
        }

        let now = self.clock.now();
        let first = *self.first_failure.get_or_insert(now);
        let failing_for = now.saturating_duration_since(first);
        debug!(
            consecutive_failures = self.consecutive_failures,
            failing_for_ms = failing_for.as_millis() as u64,
            "renewal failure"
        );
        failing_for >= self.grace_period
    }

    fn got_success(&mut self) {
        self.first_failure = None;
        self.consecutive_failures = 0;
    }
}
