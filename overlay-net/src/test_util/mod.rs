//! Test doubles for every adapter and collaborator.
//!
//! Compiled for unit tests and, with the `test-util` feature, for the
//! integration tests under `tests/`. The fakes keep real state (chains,
//! links, addresses) so tests assert on outcomes rather than call lists.

pub mod iptables;
pub mod planner;
pub mod veth;

pub use iptables::FakeIptables;
pub use planner::{FakeController, FakeConverger, FakeDetector};
pub use veth::{FakeNamespaceAdapter, FakeNetlink, FakeSysctl};

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::hwaddr::HardwareAddr;
use crate::lease::Lease;

/// Lease for subnet `10.255.<n>.0/24` held by underlay host `172.16.0.<n>`.
pub fn test_lease(n: u8) -> Lease {
    Lease {
        underlay_ip: Ipv4Addr::new(172, 16, 0, n),
        overlay_subnet: Ipv4Net::new(Ipv4Addr::new(10, 255, n, 0), 24).unwrap(),
        overlay_hardware_addr: HardwareAddr([0xee, 0xee, 0x0a, 0xff, n, 0x00]),
    }
}
