//! JSON configuration for one container's firewall chains.

use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::host_lock::HostLock;
use crate::netout::{ChainNamer, EgressRule, IptablesAdapter, NetOut, RuleConverter};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

fn default_denied_logs_per_sec() -> u32 {
    1
}

fn default_accepted_udp_logs_per_sec() -> u32 {
    100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetOutConfig {
    pub container_handle: String,
    pub container_ip: Ipv4Addr,
    pub vtep_name: String,
    #[serde(default)]
    pub host_interface_names: Vec<String>,
    #[serde(default)]
    pub ingress_tag: String,
    #[serde(default)]
    pub dns_servers: Vec<IpAddr>,
    /// `host:port` entries the container may reach on the host.
    #[serde(default)]
    pub host_tcp_services: Vec<String>,
    #[serde(default)]
    pub asg_logging: bool,
    #[serde(default)]
    pub c2c_logging: bool,
    #[serde(default = "default_denied_logs_per_sec")]
    pub denied_logs_per_sec: u32,
    #[serde(default = "default_accepted_udp_logs_per_sec")]
    pub accepted_udp_logs_per_sec: u32,
    /// Applied with [`NetOut::bulk_insert_rules`] after initialization.
    #[serde(default)]
    pub egress_rules: Vec<EgressRule>,
}

impl NetOutConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Build the chain builder for this container.
    pub fn net_out(
        &self,
        iptables: Arc<dyn IptablesAdapter>,
        converter: Arc<dyn RuleConverter>,
        lock: HostLock,
    ) -> NetOut {
        NetOut {
            chain_namer: ChainNamer::default(),
            iptables,
            converter,
            asg_logging: self.asg_logging,
            c2c_logging: self.c2c_logging,
            ingress_tag: self.ingress_tag.clone(),
            vtep_name: self.vtep_name.clone(),
            host_interface_names: self.host_interface_names.clone(),
            denied_logs_per_sec: self.denied_logs_per_sec,
            accepted_udp_logs_per_sec: self.accepted_udp_logs_per_sec,
            container_handle: self.container_handle.clone(),
            container_ip: self.container_ip,
            host_tcp_services: self.host_tcp_services.clone(),
            dns_servers: self.dns_servers.clone(),
            lock,
        }
    }
}
