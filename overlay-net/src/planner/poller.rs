//! Periodic driver for the planner.

use std::future::Future;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

use super::{CycleError, Planner};

/// Runs [`Planner::do_cycle`] on a fixed interval until a fatal error or
/// shutdown.
pub struct Poller {
    planner: Planner,
    interval: Duration,
}

impl Poller {
    pub fn new(planner: Planner, interval: Duration) -> Self {
        Self { planner, interval }
    }

    /// Cycles never overlap: a slow cycle delays the next tick instead of
    /// queueing a burst.
    ///
    /// Returns `Ok(())` when `shutdown` resolves and the fatal error when a
    /// cycle reports one. Transient errors are logged and the loop continues.
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), CycleError>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_ms = self.interval.as_millis() as u64, "Planner loop started");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Planner loop stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            match self.planner.do_cycle().await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Fatal planner error");
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, action = e.action(), "Planner cycle failed");
                }
            }
        }
    }
}
