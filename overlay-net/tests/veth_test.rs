//! Virtual link manager tests against in-memory namespaces and links.
//!
//! Covers the init / create / address / disable-IPv6 / destroy lifecycle
//! and every wrapped error text. No CAP_NET_ADMIN needed; see
//! `veth_netns_test.rs` for the kernel-backed variant.

use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;

use overlay_net::test_util::{FakeNamespaceAdapter, FakeNetlink, FakeSysctl};
use overlay_net::veth::{
    HOST_LINK_LOCAL, LinkAddress, NetlinkAdapter, NetlinkError, Scope, ipv6_disable_key,
};
use overlay_net::{HostLock, VethError, VethManager, VethPair};

const HOST_NS: &str = "/proc/1/ns/net";
const CONTAINER_NS: &str = "/var/run/netns/c0ffee";
const CONTAINER_IP: Ipv4Addr = Ipv4Addr::new(10, 255, 7, 4);

struct Fixture {
    namespaces: Arc<FakeNamespaceAdapter>,
    netlink: Arc<FakeNetlink>,
    sysctl: Arc<FakeSysctl>,
    manager: VethManager,
}

impl Fixture {
    fn new() -> Self {
        let namespaces = Arc::new(FakeNamespaceAdapter::new());
        let netlink = Arc::new(FakeNetlink::new());
        let sysctl = Arc::new(FakeSysctl::new());
        let manager = VethManager::new(
            HOST_NS,
            CONTAINER_NS,
            namespaces.clone(),
            netlink.clone(),
            sysctl.clone(),
        )
        .with_lock(HostLock::new());
        Self {
            namespaces,
            netlink,
            sysctl,
            manager,
        }
    }

    fn initialized() -> Self {
        let mut fixture = Self::new();
        fixture.manager.init().unwrap();
        fixture
    }

    fn paired() -> (Self, VethPair) {
        let fixture = Self::initialized();
        let pair = fixture.manager.create_pair("eth0", 1450).unwrap();
        (fixture, pair)
    }
}

fn p2p(local: &str, peer: &str) -> LinkAddress {
    LinkAddress {
        local: local.parse().unwrap(),
        peer: Some(peer.parse().unwrap()),
        scope: Scope::Link,
    }
}

// ============================================================================
// Init
// ============================================================================

#[test]
fn test_init_resolves_both_namespaces() {
    let fixture = Fixture::initialized();

    assert_eq!(
        fixture.namespaces.opened(),
        vec![Path::new(HOST_NS).to_path_buf(), Path::new(CONTAINER_NS).to_path_buf()]
    );
    assert_eq!(fixture.manager.host_ns().unwrap().path(), Path::new(HOST_NS));
    assert_eq!(
        fixture.manager.container_ns().unwrap().path(),
        Path::new(CONTAINER_NS)
    );
}

#[test]
fn test_init_host_namespace_failure() {
    let mut fixture = Fixture::new();
    fixture.namespaces.fail(HOST_NS, "no such file or directory");

    let err = fixture.manager.init().unwrap_err();
    assert!(matches!(err, VethError::HostNamespace(_)));
    assert_eq!(
        err.to_string(),
        "Getting host namespace: no such file or directory"
    );
    // Container resolution is never attempted.
    assert_eq!(fixture.namespaces.opened().len(), 1);
}

#[test]
fn test_init_container_namespace_failure() {
    let mut fixture = Fixture::new();
    fixture.namespaces.fail(CONTAINER_NS, "permission denied");

    let err = fixture.manager.init().unwrap_err();
    assert!(matches!(err, VethError::ContainerNamespace(_)));
    assert_eq!(
        err.to_string(),
        "Getting container namespace: permission denied"
    );
    assert!(fixture.manager.host_ns().is_none());
}

#[test]
fn test_operations_before_init() {
    let fixture = Fixture::new();
    assert!(matches!(
        fixture.manager.create_pair("eth0", 1500),
        Err(VethError::NotInitialized)
    ));
    assert!(matches!(
        fixture.manager.destroy("eth0"),
        Err(VethError::NotInitialized)
    ));
}

// ============================================================================
// Pair lifecycle
// ============================================================================

#[test]
fn test_create_pair() {
    let (fixture, pair) = Fixture::paired();

    assert_eq!(pair.container.link.name, "eth0");
    assert_eq!(pair.container.namespace.path(), Path::new(CONTAINER_NS));
    assert_eq!(pair.host.namespace.path(), Path::new(HOST_NS));
    assert!(pair.host.link.name.starts_with("veth"));
    assert_eq!(pair.host.link.mtu, 1450);
    assert_eq!(pair.container.link.mtu, 1450);

    let host_mac = pair.host.link.hardware_addr.unwrap();
    assert_eq!(host_mac.octets()[0] & 0x03, 0x02, "locally administered unicast");

    assert_eq!(
        fixture.netlink.link_names(Path::new(CONTAINER_NS)),
        vec!["eth0".to_string()]
    );
    assert_eq!(
        fixture.netlink.link_names(Path::new(HOST_NS)),
        vec![pair.host.link.name.clone()]
    );
}

#[test]
fn test_create_pair_failure() {
    let fixture = Fixture::initialized();
    fixture.netlink.fail("setup_veth", "operation not permitted");

    let err = fixture.manager.create_pair("eth0", 1500).unwrap_err();
    assert!(matches!(err, VethError::SetupVeth(_)));
    assert_eq!(err.to_string(), "Setting up veth: operation not permitted");
    assert!(fixture.netlink.link_names(Path::new(CONTAINER_NS)).is_empty());
}

#[test]
fn test_create_pair_name_taken() {
    let (fixture, _pair) = Fixture::paired();

    let err = fixture.manager.create_pair("eth0", 1500).unwrap_err();
    assert_eq!(err.to_string(), "Setting up veth: eth0: file exists");
}

#[test]
fn test_destroy_removes_both_ends() {
    let (fixture, pair) = Fixture::paired();

    fixture.manager.destroy("eth0").unwrap();

    let container_ns = fixture.manager.container_ns().unwrap();
    let err = fixture
        .netlink
        .link_by_name(container_ns, "eth0")
        .unwrap_err();
    assert!(matches!(err, NetlinkError::LinkNotFound(_)));
    assert!(
        fixture
            .netlink
            .addresses(Path::new(HOST_NS), &pair.host.link.name)
            .is_none()
    );
}

#[test]
fn test_destroy_missing_link() {
    let fixture = Fixture::initialized();

    let err = fixture.manager.destroy("eth9").unwrap_err();
    assert!(matches!(err, VethError::DeleteLink(_)));
    assert_eq!(err.to_string(), "Deleting link: Link not found: eth9");
}

// ============================================================================
// Addressing
// ============================================================================

#[test]
fn test_assign_ip_point_to_point() {
    let (fixture, pair) = Fixture::paired();

    fixture.manager.assign_ip(&pair, CONTAINER_IP).unwrap();

    assert_eq!(HOST_LINK_LOCAL, Ipv4Addr::new(169, 254, 0, 1));
    assert_eq!(
        fixture
            .netlink
            .addresses(Path::new(HOST_NS), &pair.host.link.name)
            .unwrap(),
        vec![p2p("169.254.0.1/32", "10.255.7.4/32")]
    );
    assert_eq!(
        fixture
            .netlink
            .addresses(Path::new(CONTAINER_NS), "eth0")
            .unwrap(),
        vec![p2p("10.255.7.4/32", "169.254.0.1/32")]
    );
}

#[test]
fn test_assign_ip_parse_failure() {
    let (fixture, pair) = Fixture::paired();
    fixture
        .netlink
        .fail_for("parse_addr", "169.254.0.1/32", "bad literal");

    let err = fixture.manager.assign_ip(&pair, CONTAINER_IP).unwrap_err();
    assert!(matches!(err, VethError::ParseAddress { .. }));
    assert_eq!(
        err.to_string(),
        "parsing address 169.254.0.1/32: bad literal"
    );
    assert_eq!(
        fixture
            .netlink
            .addresses(Path::new(HOST_NS), &pair.host.link.name)
            .unwrap(),
        Vec::new()
    );
}

#[test]
fn test_assign_ip_find_link_failure_after_host_side() {
    let (fixture, pair) = Fixture::paired();
    fixture
        .netlink
        .fail_for("link_by_name", "eth0", "Link not found");

    let err = fixture.manager.assign_ip(&pair, CONTAINER_IP).unwrap_err();
    assert!(matches!(err, VethError::FindLink { .. }));
    assert_eq!(err.to_string(), "find link by name eth0: Link not found");

    // Host side stays configured.
    assert_eq!(
        fixture
            .netlink
            .addresses(Path::new(HOST_NS), &pair.host.link.name)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn test_assign_ip_add_failure_on_container() {
    let (fixture, pair) = Fixture::paired();
    fixture
        .netlink
        .fail_for("addr_add", "10.255.7.4/32", "file exists");

    let err = fixture.manager.assign_ip(&pair, CONTAINER_IP).unwrap_err();
    assert!(matches!(err, VethError::AddAddress { .. }));
    assert_eq!(err.to_string(), "adding address 10.255.7.4/32: file exists");
    assert!(
        fixture
            .netlink
            .addresses(Path::new(CONTAINER_NS), "eth0")
            .unwrap()
            .is_empty()
    );
}

// ============================================================================
// IPv6
// ============================================================================

#[test]
fn test_disable_ipv6_host_then_container() {
    let (fixture, pair) = Fixture::paired();

    fixture.manager.disable_ipv6(&pair).unwrap();

    let host_key = ipv6_disable_key(&pair.host.link.name);
    assert_eq!(
        fixture.sysctl.writes(),
        vec![
            (Path::new(HOST_NS).to_path_buf(), host_key, "1".to_string()),
            (
                Path::new(CONTAINER_NS).to_path_buf(),
                "net/ipv6/conf/eth0/disable_ipv6".to_string(),
                "1".to_string()
            ),
        ]
    );
}

#[test]
fn test_disable_ipv6_host_failure() {
    let (fixture, pair) = Fixture::paired();
    fixture
        .sysctl
        .fail_matching(&pair.host.link.name, "read-only file system");

    let err = fixture.manager.disable_ipv6(&pair).unwrap_err();
    assert!(matches!(err, VethError::DisableIpv6Host(_)));
    assert_eq!(
        err.to_string(),
        "Disabling IPv6 on host: read-only file system"
    );
    assert!(fixture.sysctl.writes().is_empty());
}

#[test]
fn test_disable_ipv6_container_failure() {
    let (fixture, pair) = Fixture::paired();
    fixture
        .sysctl
        .fail_matching("/eth0/", "no such file or directory");

    let err = fixture.manager.disable_ipv6(&pair).unwrap_err();
    assert!(matches!(err, VethError::DisableIpv6Container(_)));
    assert_eq!(
        err.to_string(),
        "Disabling IPv6 in container: no such file or directory"
    );
    assert_eq!(
        fixture
            .sysctl
            .value(Path::new(HOST_NS), &ipv6_disable_key(&pair.host.link.name)),
        Some("1".to_string())
    );
}
