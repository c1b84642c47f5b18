//! Virtual link pair between the host and a container namespace.
//!
//! Lifecycle: [`Manager::init`] resolves both namespaces,
//! [`Manager::create_pair`] wires the link, then [`Manager::assign_ip`] and
//! [`Manager::disable_ipv6`] configure both ends. Each end is addressed
//! point-to-point: the host end is `169.254.0.1/32` peered with the
//! container's `/32`, and the container end the reverse, so there is no
//! shared subnet to broadcast or ARP across.

pub mod netlink;
pub mod netns;
pub mod sysctl;

use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::host_lock::HostLock;

pub use netlink::{Link, LinkAddress, NetlinkAdapter, NetlinkError, RtNetlink, Scope};
pub use netns::{FsNamespaceAdapter, NamespaceAdapter, NetNs};
pub use sysctl::{ProcSysctl, SysctlAdapter, SysctlError, ipv6_disable_key};

/// Host end's address in every pair.
pub const HOST_LINK_LOCAL: Ipv4Addr = Ipv4Addr::new(169, 254, 0, 1);

#[derive(Debug, Error)]
pub enum VethError {
    #[error("Getting host namespace: {0}")]
    HostNamespace(#[source] io::Error),

    #[error("Getting container namespace: {0}")]
    ContainerNamespace(#[source] io::Error),

    #[error("Setting up veth: {0}")]
    SetupVeth(#[source] NetlinkError),

    #[error("Deleting link: {0}")]
    DeleteLink(#[source] NetlinkError),

    #[error("parsing address {literal}: {source}")]
    ParseAddress {
        literal: String,
        #[source]
        source: NetlinkError,
    },

    #[error("find link by name {name}: {source}")]
    FindLink {
        name: String,
        #[source]
        source: NetlinkError,
    },

    #[error("adding address {literal}: {source}")]
    AddAddress {
        literal: String,
        #[source]
        source: NetlinkError,
    },

    #[error("Disabling IPv6 on host: {0}")]
    DisableIpv6Host(#[source] SysctlError),

    #[error("Disabling IPv6 in container: {0}")]
    DisableIpv6Container(#[source] SysctlError),

    #[error("namespaces not resolved, call init first")]
    NotInitialized,
}

/// One end of a pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub link: Link,
    pub namespace: NetNs,
}

/// Both ends of a created link; one end lives in each namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    pub host: Endpoint,
    pub container: Endpoint,
}

pub struct Manager {
    pub host_ns_path: PathBuf,
    pub container_ns_path: PathBuf,
    pub namespaces: Arc<dyn NamespaceAdapter>,
    pub netlink: Arc<dyn NetlinkAdapter>,
    pub sysctl: Arc<dyn SysctlAdapter>,
    pub lock: HostLock,
    host_ns: Option<NetNs>,
    container_ns: Option<NetNs>,
}

impl Manager {
    pub fn new(
        host_ns_path: impl Into<PathBuf>,
        container_ns_path: impl Into<PathBuf>,
        namespaces: Arc<dyn NamespaceAdapter>,
        netlink: Arc<dyn NetlinkAdapter>,
        sysctl: Arc<dyn SysctlAdapter>,
    ) -> Self {
        Self {
            host_ns_path: host_ns_path.into(),
            container_ns_path: container_ns_path.into(),
            namespaces,
            netlink,
            sysctl,
            lock: HostLock::global(),
            host_ns: None,
            container_ns: None,
        }
    }

    /// Manager wired to the kernel.
    pub fn system(host_ns_path: impl Into<PathBuf>, container_ns_path: impl Into<PathBuf>) -> Self {
        Self::new(
            host_ns_path,
            container_ns_path,
            Arc::new(FsNamespaceAdapter),
            Arc::new(RtNetlink),
            Arc::new(ProcSysctl),
        )
    }

    pub fn with_lock(mut self, lock: HostLock) -> Self {
        self.lock = lock;
        self
    }

    /// Resolve the host namespace, then the container namespace.
    pub fn init(&mut self) -> Result<(), VethError> {
        let host = self
            .namespaces
            .get_ns(&self.host_ns_path)
            .map_err(VethError::HostNamespace)?;
        let container = self
            .namespaces
            .get_ns(&self.container_ns_path)
            .map_err(VethError::ContainerNamespace)?;
        self.host_ns = Some(host);
        self.container_ns = Some(container);
        Ok(())
    }

    pub fn host_ns(&self) -> Option<&NetNs> {
        self.host_ns.as_ref()
    }

    pub fn container_ns(&self) -> Option<&NetNs> {
        self.container_ns.as_ref()
    }

    fn resolved(&self) -> Result<(&NetNs, &NetNs), VethError> {
        match (&self.host_ns, &self.container_ns) {
            (Some(host), Some(container)) => Ok((host, container)),
            _ => Err(VethError::NotInitialized),
        }
    }

    /// Create the pair: `if_name` inside the container namespace, a
    /// generated name and hardware address on the host side, `mtu` on both.
    pub fn create_pair(&self, if_name: &str, mtu: u32) -> Result<Pair, VethError> {
        let (host_ns, container_ns) = self.resolved()?;

        let _guard = self.lock.acquire();
        let (host_link, container_link) = self
            .netlink
            .setup_veth(container_ns, if_name, mtu, host_ns)
            .map_err(VethError::SetupVeth)?;

        info!(
            host = %host_link.name,
            container = %container_link.name,
            mtu,
            "Veth pair created"
        );
        Ok(Pair {
            host: Endpoint {
                link: host_link,
                namespace: host_ns.clone(),
            },
            container: Endpoint {
                link: container_link,
                namespace: container_ns.clone(),
            },
        })
    }

    /// Delete the named link in the container namespace; the host end goes
    /// with it.
    pub fn destroy(&self, if_name: &str) -> Result<(), VethError> {
        let (_, container_ns) = self.resolved()?;

        let _guard = self.lock.acquire();
        self.netlink
            .del_link_by_name(container_ns, if_name)
            .map_err(VethError::DeleteLink)?;

        info!(name = if_name, ns = %container_ns.path().display(), "Veth pair deleted");
        Ok(())
    }

    /// Point-to-point addressing, host side first. A failure part way
    /// leaves whatever was already applied.
    pub fn assign_ip(&self, pair: &Pair, container_ip: Ipv4Addr) -> Result<(), VethError> {
        let host_cidr = format!("{HOST_LINK_LOCAL}/32");
        let container_cidr = format!("{container_ip}/32");

        let _guard = self.lock.acquire();
        self.assign_peer_address(&pair.host, &host_cidr, &container_cidr)?;
        self.assign_peer_address(&pair.container, &container_cidr, &host_cidr)?;

        info!(
            host = %pair.host.link.name,
            container = %pair.container.link.name,
            ip = %container_ip,
            "Point-to-point addresses assigned"
        );
        Ok(())
    }

    fn assign_peer_address(
        &self,
        endpoint: &Endpoint,
        local: &str,
        peer: &str,
    ) -> Result<(), VethError> {
        let parse = |literal: &str| {
            self.netlink
                .parse_addr(literal)
                .map_err(|source| VethError::ParseAddress {
                    literal: literal.to_string(),
                    source,
                })
        };
        let local_net = parse(local)?;
        let peer_net = parse(peer)?;

        let link = self
            .netlink
            .link_by_name(&endpoint.namespace, &endpoint.link.name)
            .map_err(|source| VethError::FindLink {
                name: endpoint.link.name.clone(),
                source,
            })?;

        let address = LinkAddress {
            local: local_net,
            peer: Some(peer_net),
            scope: Scope::Link,
        };
        self.netlink
            .addr_add(&endpoint.namespace, &link, &address)
            .map_err(|source| VethError::AddAddress {
                literal: local.to_string(),
                source,
            })?;

        debug!(link = %link.name, local, peer, "Address added");
        Ok(())
    }

    /// Turn IPv6 off on the host end, then the container end.
    pub fn disable_ipv6(&self, pair: &Pair) -> Result<(), VethError> {
        let _guard = self.lock.acquire();
        self.sysctl
            .set(
                &pair.host.namespace,
                &ipv6_disable_key(&pair.host.link.name),
                "1",
            )
            .map_err(VethError::DisableIpv6Host)?;
        self.sysctl
            .set(
                &pair.container.namespace,
                &ipv6_disable_key(&pair.container.link.name),
                "1",
            )
            .map_err(VethError::DisableIpv6Container)?;

        debug!(
            host = %pair.host.link.name,
            container = %pair.container.link.name,
            "IPv6 disabled"
        );
        Ok(())
    }
}

/// Path helper for `/var/run/netns/<name>` style namespaces.
pub fn named_netns_path(name: &str) -> PathBuf {
    Path::new("/var/run/netns").join(name)
}
