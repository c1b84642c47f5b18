//! Convergence planner: one lease renewal / reconciliation pass per cycle.
//!
//! The planner is the only consumer of the lease controller client and the
//! fatal error detector. The detector's state is the only memory carried
//! from one cycle to the next.

pub mod detector;
pub mod poller;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::lease::Lease;

pub use detector::{Clock, FatalErrorDetector, GracePeriodDetector, SystemClock};
pub use poller::Poller;

/// Errors reported by the lease controller client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControllerError {
    /// The controller refused the request outright (unknown, expired or
    /// conflicting lease). Retrying the same request cannot succeed.
    #[error("{0}")]
    NonRetriable(String),

    /// Anything else: transport failures, timeouts, server errors.
    #[error("{0}")]
    Transient(String),
}

impl ControllerError {
    pub fn is_non_retriable(&self) -> bool {
        matches!(self, ControllerError::NonRetriable(_))
    }
}

/// Client for the central lease controller.
#[async_trait]
pub trait ControllerClient: Send + Sync {
    /// Renew the given lease.
    async fn renew_subnet_lease(&self, lease: &Lease) -> Result<(), ControllerError>;

    /// Fetch every lease currently routable in the overlay.
    async fn get_routable_leases(&self) -> Result<Vec<Lease>, ControllerError>;
}

/// Applies a lease set to local tunnel forwarding state.
#[async_trait]
pub trait Converger: Send + Sync {
    async fn converge(&self, leases: &[Lease]) -> anyhow::Result<()>;
}

/// Outcome of a failed cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    /// Renewal failed and the local lease can no longer be trusted. The
    /// reconciliation loop must stop.
    #[error("renew lease: {0}")]
    FatalRenew(#[source] ControllerError),

    #[error("renew lease: {0}")]
    Renew(#[source] ControllerError),

    #[error("get routable leases: {0}")]
    GetRoutableLeases(#[source] ControllerError),

    #[error("converge leases: {0}")]
    Converge(#[source] anyhow::Error),
}

impl CycleError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CycleError::FatalRenew(_))
    }

    /// The step that failed, as used in the error text.
    pub fn action(&self) -> &'static str {
        match self {
            CycleError::FatalRenew(_) | CycleError::Renew(_) => "renew lease",
            CycleError::GetRoutableLeases(_) => "get routable leases",
            CycleError::Converge(_) => "converge leases",
        }
    }
}

/// Reconciles local tunnel state against the controller's lease set.
pub struct Planner {
    controller: Arc<dyn ControllerClient>,
    converger: Arc<dyn Converger>,
    lease: Lease,
    detector: Box<dyn FatalErrorDetector>,
}

impl Planner {
    pub fn new(
        controller: Arc<dyn ControllerClient>,
        converger: Arc<dyn Converger>,
        lease: Lease,
        detector: Box<dyn FatalErrorDetector>,
    ) -> Self {
        Self {
            controller,
            converger,
            lease,
            detector,
        }
    }

    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    /// Run one reconciliation pass. Steps are strictly sequential and stop at
    /// the first failure; nothing is retried here.
    pub async fn do_cycle(&mut self) -> Result<(), CycleError> {
        if let Err(e) = self.controller.renew_subnet_lease(&self.lease).await {
            if self.detector.is_fatal(&e) {
                return Err(CycleError::FatalRenew(e));
            }
            return Err(CycleError::Renew(e));
        }
        self.detector.got_success();
        debug!(lease = %self.lease, "renew-lease");

        let leases = self
            .controller
            .get_routable_leases()
            .await
            .map_err(CycleError::GetRoutableLeases)?;

        self.converger
            .converge(&leases)
            .await
            .map_err(CycleError::Converge)?;

        debug!(leases = ?leases, "get-routable-leases");
        Ok(())
    }
}
