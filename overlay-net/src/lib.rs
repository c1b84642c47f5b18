//! overlay-net: network data plane of the per-host overlay daemon.
//!
//! Three mechanisms live here:
//!
//! - [`planner`]: the lease renewal / convergence cycle run on a timer.
//! - [`netout`]: the per-container firewall chain topology (default-deny
//!   ingress and egress with allow-lists and rate-limited audit logging).
//! - [`veth`]: the virtual link pair that gives a container its own
//!   namespace-isolated interface, addressed point-to-point off the host.
//!
//! ```text
//! timer --> Planner --> ControllerClient (renew, routable leases)
//!                   \-> Converger (tunnel forwarding state)
//!
//! orchestrator --> NetOut --> IptablesAdapter
//!              \-> veth::Manager --> NamespaceAdapter / NetlinkAdapter / SysctlAdapter
//! ```

pub mod config;
pub mod host_lock;
pub mod hwaddr;
pub mod lease;
pub mod netout;
pub mod planner;
pub mod veth;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

// Re-export commonly used types
pub use config::NetOutConfig;
pub use host_lock::HostLock;
pub use hwaddr::HardwareAddr;
pub use lease::Lease;
pub use netout::{NetOut, NetOutError};
pub use planner::{ControllerClient, ControllerError, Converger, CycleError, Planner};
pub use veth::{Manager as VethManager, Pair as VethPair, VethError};
