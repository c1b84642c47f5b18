//! Link and address operations.
//!
//! [`RtNetlink`] runs every request on a thread inside the target namespace
//! with its own netlink socket and a current-thread tokio runtime.

use std::future::Future;
use std::io;
use std::net::IpAddr;

use futures::TryStreamExt;
use ipnet::IpNet;
use netlink_packet_route::address::{AddressAttribute, AddressMessage, AddressScope};
use netlink_packet_route::link::{LinkAttribute, LinkMessage};
use rtnetlink::Handle;
use thiserror::Error;

use super::netns::NetNs;
use crate::hwaddr::HardwareAddr;

#[derive(Debug, Error)]
pub enum NetlinkError {
    #[error("Link not found: {0}")]
    LinkNotFound(String),

    #[error("invalid address {0}")]
    InvalidAddress(String),

    #[error("netlink: {0}")]
    Netlink(#[from] rtnetlink::Error),

    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

/// A network interface as seen from its namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub index: u32,
    pub name: String,
    pub hardware_addr: Option<HardwareAddr>,
    pub mtu: u32,
}

impl Link {
    fn from_message(msg: &LinkMessage) -> Self {
        let mut link = Link {
            index: msg.header.index,
            name: String::new(),
            hardware_addr: None,
            mtu: 0,
        };
        for attr in &msg.attributes {
            match attr {
                LinkAttribute::IfName(name) => link.name = name.clone(),
                LinkAttribute::Address(bytes) => {
                    link.hardware_addr = HardwareAddr::try_from(bytes.as_slice()).ok()
                }
                LinkAttribute::Mtu(mtu) => link.mtu = *mtu,
                _ => {}
            }
        }
        link
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Universe,
    Link,
    Host,
    Other,
}

/// An interface address with its optional point-to-point peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkAddress {
    pub local: IpNet,
    pub peer: Option<IpNet>,
    pub scope: Scope,
}

impl LinkAddress {
    fn from_message(msg: &AddressMessage) -> Option<Self> {
        let prefix_len = msg.header.prefix_len;
        let mut local = None;
        let mut address = None;
        for attr in &msg.attributes {
            match attr {
                AddressAttribute::Local(ip) => local = Some(*ip),
                AddressAttribute::Address(ip) => address = Some(*ip),
                _ => {}
            }
        }
        // IFA_LOCAL is the interface's own address when present; IFA_ADDRESS
        // is then the peer.
        let (own, peer) = match (local, address) {
            (Some(l), Some(a)) if l != a => (l, Some(a)),
            (Some(l), _) => (l, None),
            (None, Some(a)) => (a, None),
            (None, None) => return None,
        };
        Some(Self {
            local: IpNet::new(own, prefix_len).ok()?,
            peer: peer.and_then(|p| IpNet::new(p, max_prefix(p)).ok()),
            scope: match msg.header.scope {
                AddressScope::Universe => Scope::Universe,
                AddressScope::Link => Scope::Link,
                AddressScope::Host => Scope::Host,
                _ => Scope::Other,
            },
        })
    }
}

fn max_prefix(ip: IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Link and address table operations inside a namespace.
pub trait NetlinkAdapter: Send + Sync {
    /// Create a veth pair inside `container_ns` named `if_name`, and move the
    /// other end, under a generated name and hardware address, into
    /// `host_ns`. Both ends get `mtu` and are brought up. Returns
    /// `(host, container)`.
    fn setup_veth(
        &self,
        container_ns: &NetNs,
        if_name: &str,
        mtu: u32,
        host_ns: &NetNs,
    ) -> Result<(Link, Link), NetlinkError>;

    fn link_by_name(&self, ns: &NetNs, name: &str) -> Result<Link, NetlinkError>;

    fn list_links(&self, ns: &NetNs) -> Result<Vec<Link>, NetlinkError>;

    fn del_link_by_name(&self, ns: &NetNs, name: &str) -> Result<(), NetlinkError>;

    fn addr_add(&self, ns: &NetNs, link: &Link, addr: &LinkAddress) -> Result<(), NetlinkError>;

    fn addr_list(&self, ns: &NetNs, link: &Link) -> Result<Vec<LinkAddress>, NetlinkError>;

    /// Parse a `a.b.c.d/len` literal.
    fn parse_addr(&self, literal: &str) -> Result<IpNet, NetlinkError> {
        literal
            .parse()
            .map_err(|_| NetlinkError::InvalidAddress(literal.to_string()))
    }
}

/// Generated host-side interface name.
pub fn random_veth_name() -> String {
    format!("veth{:08x}", rand::random::<u32>())
}

/// rtnetlink-backed adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct RtNetlink;

impl RtNetlink {
    fn in_namespace<T, F, Fut>(ns: &NetNs, op: F) -> Result<T, NetlinkError>
    where
        F: FnOnce(Handle) -> Fut + Send,
        Fut: Future<Output = Result<T, NetlinkError>>,
        T: Send,
    {
        ns.run(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_io()
                .build()?;
            runtime.block_on(async move {
                let (connection, handle, _) = rtnetlink::new_connection()?;
                tokio::spawn(connection);
                op(handle).await
            })
        })?
    }
}

async fn find_link(handle: &Handle, name: &str) -> Result<Link, NetlinkError> {
    let mut links = handle.link().get().match_name(name.to_string()).execute();
    match links.try_next().await {
        Ok(Some(msg)) => Ok(Link::from_message(&msg)),
        Ok(None) => Err(NetlinkError::LinkNotFound(name.to_string())),
        Err(rtnetlink::Error::NetlinkError(msg))
            if msg.code.map(|c| c.get()) == Some(-libc::ENODEV) =>
        {
            Err(NetlinkError::LinkNotFound(name.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

impl NetlinkAdapter for RtNetlink {
    fn setup_veth(
        &self,
        container_ns: &NetNs,
        if_name: &str,
        mtu: u32,
        host_ns: &NetNs,
    ) -> Result<(Link, Link), NetlinkError> {
        let host_name = random_veth_name();
        let host_mac = HardwareAddr::random_local();
        let host_fd = host_ns.raw_fd();

        let container = Self::in_namespace(container_ns, |handle| {
            let if_name = if_name.to_string();
            let host_name = host_name.clone();
            async move {
                handle
                    .link()
                    .add()
                    .veth(if_name.clone(), host_name.clone())
                    .execute()
                    .await?;

                let peer = find_link(&handle, &host_name).await?;
                handle
                    .link()
                    .set(peer.index)
                    .mtu(mtu)
                    .address(host_mac.octets().to_vec())
                    .setns_by_fd(host_fd)
                    .execute()
                    .await?;

                let container = find_link(&handle, &if_name).await?;
                handle
                    .link()
                    .set(container.index)
                    .mtu(mtu)
                    .up()
                    .execute()
                    .await?;
                find_link(&handle, &if_name).await
            }
        })?;

        let host = Self::in_namespace(host_ns, |handle| async move {
            let host = find_link(&handle, &host_name).await?;
            handle.link().set(host.index).up().execute().await?;
            find_link(&handle, &host_name).await
        })?;

        Ok((host, container))
    }

    fn link_by_name(&self, ns: &NetNs, name: &str) -> Result<Link, NetlinkError> {
        Self::in_namespace(ns, |handle| async move { find_link(&handle, name).await })
    }

    fn list_links(&self, ns: &NetNs) -> Result<Vec<Link>, NetlinkError> {
        Self::in_namespace(ns, |handle| async move {
            let mut links = handle.link().get().execute();
            let mut out = Vec::new();
            while let Some(msg) = links.try_next().await? {
                out.push(Link::from_message(&msg));
            }
            Ok(out)
        })
    }

    fn del_link_by_name(&self, ns: &NetNs, name: &str) -> Result<(), NetlinkError> {
        Self::in_namespace(ns, |handle| async move {
            let link = find_link(&handle, name).await?;
            handle.link().del(link.index).execute().await?;
            Ok(())
        })
    }

    fn addr_add(&self, ns: &NetNs, link: &Link, addr: &LinkAddress) -> Result<(), NetlinkError> {
        let index = link.index;
        let addr = *addr;
        Self::in_namespace(ns, move |handle| async move {
            let mut request = handle
                .address()
                .add(index, addr.local.addr(), addr.local.prefix_len());
            let message = request.message_mut();
            message.header.scope = match addr.scope {
                Scope::Universe => AddressScope::Universe,
                Scope::Link => AddressScope::Link,
                Scope::Host => AddressScope::Host,
                Scope::Other => AddressScope::Nowhere,
            };
            if let Some(peer) = addr.peer {
                for attr in message.attributes.iter_mut() {
                    if let AddressAttribute::Address(ip) = attr {
                        *ip = peer.addr();
                    }
                }
            }
            request.execute().await?;
            Ok(())
        })
    }

    fn addr_list(&self, ns: &NetNs, link: &Link) -> Result<Vec<LinkAddress>, NetlinkError> {
        let index = link.index;
        Self::in_namespace(ns, move |handle| async move {
            let mut addrs = handle
                .address()
                .get()
                .set_link_index_filter(index)
                .execute();
            let mut out = Vec::new();
            while let Some(msg) = addrs.try_next().await? {
                out.extend(LinkAddress::from_message(&msg));
            }
            Ok(out)
        })
    }
}
