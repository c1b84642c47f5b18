//! Convergence planner tests.
//!
//! One reconciliation cycle against scripted controller, converger and
//! detector doubles, plus the periodic driver under paused tokio time.

use std::sync::Arc;
use std::time::Duration;

use overlay_net::planner::{GracePeriodDetector, Poller};
use overlay_net::test_util::{FakeController, FakeConverger, FakeDetector, test_lease};
use overlay_net::{ControllerError, CycleError, Planner};

fn planner_with(
    controller: &Arc<FakeController>,
    converger: &Arc<FakeConverger>,
    detector: &FakeDetector,
) -> Planner {
    Planner::new(
        controller.clone(),
        converger.clone(),
        test_lease(1),
        Box::new(detector.clone()),
    )
}

fn transient(msg: &str) -> ControllerError {
    ControllerError::Transient(msg.to_string())
}

// ============================================================================
// Single cycle
// ============================================================================

#[tokio::test]
async fn test_cycle_converges_routable_leases() {
    let controller = Arc::new(FakeController::new());
    let converger = Arc::new(FakeConverger::new());
    let detector = FakeDetector::new(false);
    controller.push_routable(Ok(vec![test_lease(1), test_lease(2)]));

    let mut planner = planner_with(&controller, &converger, &detector);
    planner.do_cycle().await.unwrap();

    assert_eq!(controller.renewed(), vec![test_lease(1)]);
    assert_eq!(converger.calls(), vec![vec![test_lease(1), test_lease(2)]]);
    assert_eq!(detector.successes(), 1);
    assert!(detector.classified().is_empty());
}

#[tokio::test]
async fn test_cycle_fatal_renewal_stops_before_fetch() {
    let controller = Arc::new(FakeController::new());
    let converger = Arc::new(FakeConverger::new());
    let detector = FakeDetector::new(true);
    controller.push_renew(Err(ControllerError::NonRetriable(
        "lease held by another host".to_string(),
    )));

    let mut planner = planner_with(&controller, &converger, &detector);
    let err = planner.do_cycle().await.unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(err, CycleError::FatalRenew(_)));
    assert_eq!(err.to_string(), "renew lease: lease held by another host");
    assert_eq!(controller.fetch_count(), 0);
    assert!(converger.calls().is_empty());
    assert_eq!(detector.successes(), 0);
    assert_eq!(detector.classified().len(), 1);
}

#[tokio::test]
async fn test_cycle_transient_renewal_failure() {
    let controller = Arc::new(FakeController::new());
    let converger = Arc::new(FakeConverger::new());
    let detector = FakeDetector::new(false);
    controller.push_renew(Err(transient("connection refused")));

    let mut planner = planner_with(&controller, &converger, &detector);
    let err = planner.do_cycle().await.unwrap_err();

    assert!(!err.is_fatal());
    assert!(matches!(err, CycleError::Renew(_)));
    assert_eq!(err.to_string(), "renew lease: connection refused");
    assert_eq!(err.action(), "renew lease");
    assert_eq!(controller.fetch_count(), 0);
    assert!(converger.calls().is_empty());
    assert_eq!(detector.successes(), 0);
}

#[tokio::test]
async fn test_cycle_fetch_failure_keeps_renewal() {
    let controller = Arc::new(FakeController::new());
    let converger = Arc::new(FakeConverger::new());
    let detector = FakeDetector::new(true);
    controller.push_routable(Err(transient("deadline exceeded")));

    let mut planner = planner_with(&controller, &converger, &detector);
    let err = planner.do_cycle().await.unwrap_err();

    // Fetch failures are never classified, even with a detector that
    // would call everything fatal.
    assert!(!err.is_fatal());
    assert_eq!(err.to_string(), "get routable leases: deadline exceeded");
    assert_eq!(detector.successes(), 1);
    assert!(detector.classified().is_empty());
    assert!(converger.calls().is_empty());
}

#[tokio::test]
async fn test_cycle_converge_failure() {
    let controller = Arc::new(FakeController::new());
    let converger = Arc::new(FakeConverger::new());
    let detector = FakeDetector::new(false);
    controller.push_routable(Ok(vec![test_lease(3)]));
    converger.fail_with("neighbor table full");

    let mut planner = planner_with(&controller, &converger, &detector);
    let err = planner.do_cycle().await.unwrap_err();

    assert!(!err.is_fatal());
    assert_eq!(err.action(), "converge leases");
    assert_eq!(err.to_string(), "converge leases: neighbor table full");
    assert_eq!(converger.calls(), vec![vec![test_lease(3)]]);
}

#[tokio::test]
async fn test_cycle_empty_lease_set() {
    let controller = Arc::new(FakeController::new());
    let converger = Arc::new(FakeConverger::new());
    let detector = FakeDetector::new(false);

    let mut planner = planner_with(&controller, &converger, &detector);
    planner.do_cycle().await.unwrap();

    assert_eq!(converger.calls(), vec![Vec::new()]);
}

#[tokio::test]
async fn test_cycle_renews_same_lease_every_time() {
    let controller = Arc::new(FakeController::new());
    let converger = Arc::new(FakeConverger::new());
    let detector = FakeDetector::new(false);
    controller.push_renew(Err(transient("timeout")));

    let mut planner = planner_with(&controller, &converger, &detector);
    assert!(planner.do_cycle().await.is_err());
    planner.do_cycle().await.unwrap();

    assert_eq!(controller.renewed(), vec![test_lease(1), test_lease(1)]);
    assert_eq!(planner.lease(), &test_lease(1));
    assert_eq!(detector.successes(), 1);
}

// ============================================================================
// Poller
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_poller_stops_on_fatal_error() {
    let controller = Arc::new(FakeController::new());
    let converger = Arc::new(FakeConverger::new());
    controller.push_renew(Err(transient("timeout")));
    controller.push_renew(Err(transient("timeout")));
    controller.push_renew(Err(ControllerError::NonRetriable(
        "lease expired".to_string(),
    )));

    let planner = Planner::new(
        controller.clone(),
        converger.clone(),
        test_lease(1),
        Box::new(GracePeriodDetector::new(Duration::from_secs(3600))),
    );
    let err = Poller::new(planner, Duration::from_secs(10))
        .run(std::future::pending())
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(err.to_string(), "renew lease: lease expired");
    assert_eq!(controller.renewed().len(), 3);
    assert_eq!(controller.fetch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_poller_fatal_after_grace_period() {
    let controller = Arc::new(FakeController::new());
    let converger = Arc::new(FakeConverger::new());
    for _ in 0..10 {
        controller.push_renew(Err(transient("unreachable")));
    }

    // Grace of 25s at a 10s interval: failures at 0s, 10s and 20s are
    // tolerated, the one at 30s is not.
    let planner = Planner::new(
        controller.clone(),
        converger.clone(),
        test_lease(1),
        Box::new(GracePeriodDetector::with_clock(
            Duration::from_secs(25),
            Box::new(TokioClock),
        )),
    );
    let err = Poller::new(planner, Duration::from_secs(10))
        .run(std::future::pending())
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(controller.renewed().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_poller_keeps_going_until_shutdown() {
    let controller = Arc::new(FakeController::new());
    let converger = Arc::new(FakeConverger::new());
    controller.push_renew(Err(transient("timeout")));
    controller.push_routable(Ok(vec![test_lease(2)]));

    let planner = Planner::new(
        controller.clone(),
        converger.clone(),
        test_lease(1),
        Box::new(FakeDetector::new(false)),
    );
    Poller::new(planner, Duration::from_secs(10))
        .run(tokio::time::sleep(Duration::from_secs(35)))
        .await
        .unwrap();

    // Ticks at 0s, 10s, 20s and 30s; the first renewal fails.
    assert_eq!(controller.renewed().len(), 4);
    assert_eq!(converger.calls().len(), 3);
    assert_eq!(converger.calls()[0], vec![test_lease(2)]);
}

/// Clock driven by tokio's (pausable) time source.
struct TokioClock;

impl overlay_net::planner::Clock for TokioClock {
    fn now(&self) -> std::time::Instant {
        tokio::time::Instant::now().into_std()
    }
}
