//! Scripted collaborators for the convergence planner.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::lease::Lease;
use crate::planner::{ControllerClient, ControllerError, Converger, FatalErrorDetector};

/// Controller whose answers are queued by the test. With an empty queue,
/// renewals succeed and the routable set is empty.
#[derive(Default)]
pub struct FakeController {
    renew_results: Mutex<VecDeque<Result<(), ControllerError>>>,
    routable_results: Mutex<VecDeque<Result<Vec<Lease>, ControllerError>>>,
    renewed: Mutex<Vec<Lease>>,
    fetches: Mutex<usize>,
}

impl FakeController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_renew(&self, result: Result<(), ControllerError>) {
        self.renew_results.lock().unwrap().push_back(result);
    }

    pub fn push_routable(&self, result: Result<Vec<Lease>, ControllerError>) {
        self.routable_results.lock().unwrap().push_back(result);
    }

    /// Leases passed to renewal, in call order.
    pub fn renewed(&self) -> Vec<Lease> {
        self.renewed.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        *self.fetches.lock().unwrap()
    }
}

#[async_trait]
impl ControllerClient for FakeController {
    async fn renew_subnet_lease(&self, lease: &Lease) -> Result<(), ControllerError> {
        self.renewed.lock().unwrap().push(lease.clone());
        self.renew_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn get_routable_leases(&self) -> Result<Vec<Lease>, ControllerError> {
        *self.fetches.lock().unwrap() += 1;
        self.routable_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Records every lease set it is asked to converge on.
#[derive(Default)]
pub struct FakeConverger {
    calls: Mutex<Vec<Vec<Lease>>>,
    failure: Mutex<Option<String>>,
}

impl FakeConverger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every following call with `message`.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<Vec<Lease>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Converger for FakeConverger {
    async fn converge(&self, leases: &[Lease]) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(leases.to_vec());
        match self.failure.lock().unwrap().as_ref() {
            Some(message) => Err(anyhow::anyhow!("{message}")),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
struct DetectorState {
    fatal: bool,
    classified: Vec<ControllerError>,
    successes: usize,
}

/// Detector with a fixed verdict. Clones share state, so a test can keep
/// one handle and give the planner another.
#[derive(Debug, Clone, Default)]
pub struct FakeDetector {
    state: Arc<Mutex<DetectorState>>,
}

impl FakeDetector {
    pub fn new(fatal: bool) -> Self {
        let detector = Self::default();
        detector.set_fatal(fatal);
        detector
    }

    pub fn set_fatal(&self, fatal: bool) {
        self.state.lock().unwrap().fatal = fatal;
    }

    /// Errors passed to `is_fatal`, in call order.
    pub fn classified(&self) -> Vec<ControllerError> {
        self.state.lock().unwrap().classified.clone()
    }

    pub fn successes(&self) -> usize {
        self.state.lock().unwrap().successes
    }
}

impl FatalErrorDetector for FakeDetector {
    fn is_fatal(&mut self, err: &ControllerError) -> bool {
        let mut state = self.state.lock().unwrap();
        state.classified.push(err.clone());
        state.fatal
    }

    fn got_success(&mut self) {
        self.state.lock().unwrap().successes += 1;
    }
}
