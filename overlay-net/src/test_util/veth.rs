//! In-memory namespaces, links and system control values.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ipnet::IpNet;

use crate::hwaddr::HardwareAddr;
use crate::veth::netlink::random_veth_name;
use crate::veth::{
    Link, LinkAddress, NamespaceAdapter, NetNs, NetlinkAdapter, NetlinkError, SysctlAdapter,
    SysctlError,
};

/// Hands out namespace handles for any path. Every handle is backed by the
/// test process's own namespace but carries the requested path, so handles
/// compare and display like the real thing.
#[derive(Default)]
pub struct FakeNamespaceAdapter {
    failures: Mutex<HashMap<PathBuf, String>>,
    opened: Mutex<Vec<PathBuf>>,
}

impl FakeNamespaceAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, path: impl Into<PathBuf>, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(path.into(), message.to_string());
    }

    /// Paths resolved so far, failed ones included.
    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.lock().unwrap().clone()
    }
}

impl NamespaceAdapter for FakeNamespaceAdapter {
    fn get_ns(&self, path: &Path) -> io::Result<NetNs> {
        self.opened.lock().unwrap().push(path.to_path_buf());
        if let Some(message) = self.failures.lock().unwrap().get(path) {
            return Err(io::Error::other(message.clone()));
        }
        let file = File::open("/proc/self/ns/net")?;
        Ok(NetNs::from_file(path, file))
    }
}

#[derive(Debug, Clone)]
struct FakeLink {
    link: Link,
    addresses: Vec<LinkAddress>,
    /// Namespace and name of the other end.
    peer: Option<(PathBuf, String)>,
}

struct NetlinkFailure {
    op: &'static str,
    /// Link name or address literal the failure is limited to.
    subject: Option<String>,
    message: String,
}

#[derive(Default)]
struct NetlinkState {
    namespaces: BTreeMap<PathBuf, Vec<FakeLink>>,
    failures: Vec<NetlinkFailure>,
    next_index: u32,
}

impl NetlinkState {
    fn check(&self, op: &'static str, subject: &str) -> Result<(), NetlinkError> {
        match self
            .failures
            .iter()
            .find(|f| f.op == op && f.subject.as_deref().is_none_or(|s| s == subject))
        {
            Some(f) => Err(NetlinkError::Other(f.message.clone())),
            None => Ok(()),
        }
    }

    fn links_mut(&mut self, ns: &Path) -> &mut Vec<FakeLink> {
        self.namespaces.entry(ns.to_path_buf()).or_default()
    }

    fn find(&self, ns: &Path, name: &str) -> Option<&FakeLink> {
        self.namespaces
            .get(ns)
            .and_then(|links| links.iter().find(|l| l.link.name == name))
    }

    fn remove(&mut self, ns: &Path, name: &str) -> Option<FakeLink> {
        let links = self.links_mut(ns);
        let index = links.iter().position(|l| l.link.name == name)?;
        Some(links.remove(index))
    }
}

/// Link and address tables keyed by namespace path. Deleting either end of
/// a pair removes both, as the kernel does.
///
/// Failures are injected per operation name (`setup_veth`, `link_by_name`,
/// `del_link_by_name`, `addr_add`, `parse_addr`), optionally limited to one
/// link name or address literal.
#[derive(Default)]
pub struct FakeNetlink {
    state: Mutex<NetlinkState>,
}

impl FakeNetlink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, op: &'static str, message: &str) {
        self.state.lock().unwrap().failures.push(NetlinkFailure {
            op,
            subject: None,
            message: message.to_string(),
        });
    }

    pub fn fail_for(&self, op: &'static str, subject: &str, message: &str) {
        self.state.lock().unwrap().failures.push(NetlinkFailure {
            op,
            subject: Some(subject.to_string()),
            message: message.to_string(),
        });
    }

    /// Addresses on the named link, or `None` if the link does not exist.
    pub fn addresses(&self, ns: &Path, name: &str) -> Option<Vec<LinkAddress>> {
        self.state
            .lock()
            .unwrap()
            .find(ns, name)
            .map(|l| l.addresses.clone())
    }

    pub fn link_names(&self, ns: &Path) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .namespaces
            .get(ns)
            .map(|links| links.iter().map(|l| l.link.name.clone()).collect())
            .unwrap_or_default()
    }
}

impl NetlinkAdapter for FakeNetlink {
    fn setup_veth(
        &self,
        container_ns: &NetNs,
        if_name: &str,
        mtu: u32,
        host_ns: &NetNs,
    ) -> Result<(Link, Link), NetlinkError> {
        let mut state = self.state.lock().unwrap();
        state.check("setup_veth", if_name)?;
        if state.find(container_ns.path(), if_name).is_some() {
            return Err(NetlinkError::Other(format!("{if_name}: file exists")));
        }

        let host_name = random_veth_name();
        state.next_index += 2;
        let container = Link {
            index: state.next_index,
            name: if_name.to_string(),
            hardware_addr: Some(HardwareAddr::random_local()),
            mtu,
        };
        let host = Link {
            index: state.next_index + 1,
            name: host_name.clone(),
            hardware_addr: Some(HardwareAddr::random_local()),
            mtu,
        };

        state.links_mut(container_ns.path()).push(FakeLink {
            link: container.clone(),
            addresses: Vec::new(),
            peer: Some((host_ns.path().to_path_buf(), host_name)),
        });
        state.links_mut(host_ns.path()).push(FakeLink {
            link: host.clone(),
            addresses: Vec::new(),
            peer: Some((container_ns.path().to_path_buf(), if_name.to_string())),
        });
        Ok((host, container))
    }

    fn link_by_name(&self, ns: &NetNs, name: &str) -> Result<Link, NetlinkError> {
        let state = self.state.lock().unwrap();
        state.check("link_by_name", name)?;
        state
            .find(ns.path(), name)
            .map(|l| l.link.clone())
            .ok_or_else(|| NetlinkError::LinkNotFound(name.to_string()))
    }

    fn list_links(&self, ns: &NetNs) -> Result<Vec<Link>, NetlinkError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .namespaces
            .get(ns.path())
            .map(|links| links.iter().map(|l| l.link.clone()).collect())
            .unwrap_or_default())
    }

    fn del_link_by_name(&self, ns: &NetNs, name: &str) -> Result<(), NetlinkError> {
        let mut state = self.state.lock().unwrap();
        state.check("del_link_by_name", name)?;
        let removed = state
            .remove(ns.path(), name)
            .ok_or_else(|| NetlinkError::LinkNotFound(name.to_string()))?;
        if let Some((peer_ns, peer_name)) = removed.peer {
            state.remove(&peer_ns, &peer_name);
        }
        Ok(())
    }

    fn addr_add(&self, ns: &NetNs, link: &Link, addr: &LinkAddress) -> Result<(), NetlinkError> {
        let mut state = self.state.lock().unwrap();
        state.check("addr_add", &addr.local.to_string())?;
        let target = state
            .links_mut(ns.path())
            .iter_mut()
            .find(|l| l.link.index == link.index)
            .ok_or_else(|| NetlinkError::LinkNotFound(link.name.clone()))?;
        if target.addresses.iter().any(|a| a.local == addr.local) {
            return Err(NetlinkError::Other("file exists".to_string()));
        }
        target.addresses.push(*addr);
        Ok(())
    }

    fn addr_list(&self, ns: &NetNs, link: &Link) -> Result<Vec<LinkAddress>, NetlinkError> {
        let state = self.state.lock().unwrap();
        state
            .namespaces
            .get(ns.path())
            .and_then(|links| links.iter().find(|l| l.link.index == link.index))
            .map(|l| l.addresses.clone())
            .ok_or_else(|| NetlinkError::LinkNotFound(link.name.clone()))
    }

    fn parse_addr(&self, literal: &str) -> Result<IpNet, NetlinkError> {
        self.state.lock().unwrap().check("parse_addr", literal)?;
        literal
            .parse()
            .map_err(|_| NetlinkError::InvalidAddress(literal.to_string()))
    }
}

/// System control values keyed by namespace path and key.
#[derive(Default)]
pub struct FakeSysctl {
    values: Mutex<BTreeMap<(PathBuf, String), String>>,
    failures: Mutex<Vec<(String, String)>>,
    writes: Mutex<Vec<(PathBuf, String, String)>>,
}

impl FakeSysctl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any access to a key containing `fragment`.
    pub fn fail_matching(&self, fragment: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((fragment.to_string(), message.to_string()));
    }

    pub fn value(&self, ns: &Path, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap()
            .get(&(ns.to_path_buf(), key.to_string()))
            .cloned()
    }

    /// Successful writes in order, as `(namespace, key, value)`.
    pub fn writes(&self) -> Vec<(PathBuf, String, String)> {
        self.writes.lock().unwrap().clone()
    }

    fn check(&self, key: &str) -> Result<(), SysctlError> {
        match self
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|(fragment, _)| key.contains(fragment.as_str()))
        {
            Some((_, message)) => Err(SysctlError::Other(message.clone())),
            None => Ok(()),
        }
    }
}

impl SysctlAdapter for FakeSysctl {
    fn get(&self, ns: &NetNs, key: &str) -> Result<String, SysctlError> {
        self.check(key)?;
        self.value(ns.path(), key).ok_or_else(|| SysctlError::Io {
            key: key.to_string(),
            source: io::Error::from(io::ErrorKind::NotFound),
        })
    }

    fn set(&self, ns: &NetNs, key: &str, value: &str) -> Result<(), SysctlError> {
        self.check(key)?;
        self.values.lock().unwrap().insert(
            (ns.path().to_path_buf(), key.to_string()),
            value.to_string(),
        );
        self.writes.lock().unwrap().push((
            ns.path().to_path_buf(),
            key.to_string(),
            value.to_string(),
        ));
        Ok(())
    }
}
