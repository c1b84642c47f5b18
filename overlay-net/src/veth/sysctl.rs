//! System control values, read and written inside a namespace.

use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::netns::NetNs;

#[derive(Debug, Error)]
pub enum SysctlError {
    #[error("sysctl {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Other(String),
}

/// `/proc/sys` access. Keys use `/` separators
/// (`net/ipv6/conf/eth0/disable_ipv6`) so interface names may contain dots.
pub trait SysctlAdapter: Send + Sync {
    fn get(&self, ns: &NetNs, key: &str) -> Result<String, SysctlError>;
    fn set(&self, ns: &NetNs, key: &str, value: &str) -> Result<(), SysctlError>;
}

/// Key that turns IPv6 off for one interface.
pub fn ipv6_disable_key(interface: &str) -> String {
    format!("net/ipv6/conf/{interface}/disable_ipv6")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcSysctl;

impl ProcSysctl {
    fn path(key: &str) -> PathBuf {
        PathBuf::from("/proc/sys").join(key)
    }
}

impl SysctlAdapter for ProcSysctl {
    fn get(&self, ns: &NetNs, key: &str) -> Result<String, SysctlError> {
        let path = Self::path(key);
        ns.run(|| fs::read_to_string(&path))
            .and_then(|r| r)
            .map(|v| v.trim().to_string())
            .map_err(|source| SysctlError::Io {
                key: key.to_string(),
                source,
            })
    }

    fn set(&self, ns: &NetNs, key: &str, value: &str) -> Result<(), SysctlError> {
        let path = Self::path(key);
        ns.run(|| fs::write(&path, value))
            .and_then(|r| r)
            .map_err(|source| SysctlError::Io {
                key: key.to_string(),
                source,
            })
    }
}
