//! Overlay subnet leases.

use crate::hwaddr::HardwareAddr;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// A host's claim on an overlay subnet, issued by the lease controller.
///
/// The planner keeps an immutable copy for renewal requests; it is never
/// mutated locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lease {
    /// Underlay (physical) address of the host holding the lease.
    pub underlay_ip: Ipv4Addr,
    /// Overlay subnet handed out to the host.
    pub overlay_subnet: Ipv4Net,
    /// Hardware address of the host's overlay tunnel endpoint.
    pub overlay_hardware_addr: HardwareAddr,
}

impl fmt::Display for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} via {} ({})",
            self.overlay_subnet, self.underlay_ip, self.overlay_hardware_addr
        )
    }
}
