//! Per-container firewall chain builder.
//!
//! Every container gets the same four chains, built in this order:
//!
//! ```text
//! INPUT   -> input--<handle>    related/established, DNS, host services, reject
//! FORWARD -> netout--<handle>   invalid, related/established, [deny log], reject
//! FORWARD -> overlay--<handle>  tunnel egress, related/established, tag, [deny log], reject
//!            netout--<handle>-log  (goto target) non-UDP log, UDP log, accept
//! ```

pub mod chain;
pub mod converter;
pub mod iptables;
pub mod namer;
pub mod rules;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::host_lock::HostLock;

pub use chain::{ChainSpec, RuleBody};
pub use converter::{EgressRule, EgressRuleConverter, RuleConverter};
pub use iptables::{IptablesAdapter, IptablesError, SystemIptables};
pub use namer::{ChainNameError, ChainNamer};
pub use rules::IptablesRule;

const FILTER: &str = "filter";
const PREFIX_INPUT: &str = "input";
const PREFIX_NETOUT: &str = "netout";
const PREFIX_OVERLAY: &str = "overlay";
const SUFFIX_NETOUT_LOG: &str = "log";
const DNS_PORT: u16 = 53;

/// Malformed `host:port` entry in the host TCP services list.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostServiceError {
    #[error("address {0}: missing port in address")]
    MissingPort(String),

    #[error("address {0}: missing host in address")]
    MissingHost(String),

    #[error("address {0}: invalid port {1:?}")]
    InvalidPort(String, String),
}

/// Chain builder errors. The text names the failing stage.
#[derive(Debug, Error)]
pub enum NetOutError {
    #[error("getting chain name: {0}")]
    ChainName(#[from] ChainNameError),

    #[error("input rules: host tcp services: {0}")]
    HostTcpService(#[from] HostServiceError),

    #[error("creating chain: {0}")]
    CreateChain(#[source] IptablesError),

    #[error("inserting jump rule: {0}")]
    InsertJump(#[source] IptablesError),

    #[error("appending rule: {0}")]
    AppendRule(#[source] IptablesError),

    #[error("cleaning up chain {chain}: {source}")]
    Cleanup {
        chain: String,
        #[source]
        source: IptablesError,
    },

    #[error("bulk inserting net-out rules: {0}")]
    BulkInsert(#[source] IptablesError),
}

/// Split `host:port` (`[v6]:port` for IPv6 literals).
pub fn parse_host_service(entry: &str) -> Result<(String, u16), HostServiceError> {
    let (host, port) = entry
        .rsplit_once(':')
        .ok_or_else(|| HostServiceError::MissingPort(entry.to_string()))?;
    let host = match host.strip_prefix('[') {
        Some(inner) => inner
            .strip_suffix(']')
            .ok_or_else(|| HostServiceError::MissingPort(entry.to_string()))?,
        None if host.contains(':') => {
            return Err(HostServiceError::MissingPort(entry.to_string()));
        }
        None => host,
    };
    if host.is_empty() {
        return Err(HostServiceError::MissingHost(entry.to_string()));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| HostServiceError::InvalidPort(entry.to_string(), port.to_string()))?;
    Ok((host.to_string(), port))
}

/// Firewall topology for one container.
pub struct NetOut {
    pub chain_namer: ChainNamer,
    pub iptables: Arc<dyn IptablesAdapter>,
    pub converter: Arc<dyn RuleConverter>,
    /// Log denied and accepted egress (application security group logging).
    pub asg_logging: bool,
    /// Log denied container-to-container traffic on the overlay.
    pub c2c_logging: bool,
    pub ingress_tag: String,
    pub vtep_name: String,
    pub host_interface_names: Vec<String>,
    pub denied_logs_per_sec: u32,
    pub accepted_udp_logs_per_sec: u32,
    pub container_handle: String,
    pub container_ip: Ipv4Addr,
    pub host_tcp_services: Vec<String>,
    pub dns_servers: Vec<IpAddr>,
    pub lock: HostLock,
}

impl NetOut {
    /// Create and populate all four chains.
    ///
    /// Host services are validated before anything is touched. Later
    /// failures leave already-created chains in place.
    ///
    /// Chains that already exist are flushed and refilled with their default
    /// body, so egress rules added with [`NetOut::bulk_insert_rules`] are
    /// dropped and must be inserted again.
    pub fn initialize(&self) -> Result<(), NetOutError> {
        let mut chains = self.default_chains()?;
        chains[0].body = self.input_body()?;

        let _guard = self.lock.acquire();
        let existing = chain::init_chains(self.iptables.as_ref(), &chains)?;
        chain::apply_rules(self.iptables.as_ref(), &chains, &existing)?;

        info!(
            handle = %self.container_handle,
            ip = %self.container_ip,
            "Net-out chains initialized"
        );
        Ok(())
    }

    /// Remove the jump rules and chains. Missing pieces are skipped, so
    /// this is safe to call for a container that was never initialized.
    pub fn cleanup(&self) -> Result<(), NetOutError> {
        let chains = self.default_chains()?;

        let _guard = self.lock.acquire();
        chain::cleanup_chains(self.iptables.as_ref(), &chains)?;

        info!(handle = %self.container_handle, "Net-out chains removed");
        Ok(())
    }

    /// Insert converted egress rules at the head of the installed net-out
    /// chain, ahead of the default rules.
    pub fn bulk_insert_rules(&self, egress: &[EgressRule]) -> Result<(), NetOutError> {
        let chain = self.chain_namer.prefix(PREFIX_NETOUT, &self.container_handle);
        let log_chain = self.chain_namer.postfix(&chain, SUFFIX_NETOUT_LOG)?;

        let converted = self
            .converter
            .bulk_convert(egress, &log_chain, self.asg_logging);

        let _guard = self.lock.acquire();
        self.iptables
            .bulk_insert(FILTER, &chain, 1, &converted)
            .map_err(NetOutError::BulkInsert)?;

        debug!(
            handle = %self.container_handle,
            chain = %chain,
            rules = converted.len(),
            "Net-out rules inserted"
        );
        Ok(())
    }

    /// The four chain specifications, input chain without its DNS and host
    /// service allowances.
    pub fn default_chains(&self) -> Result<Vec<ChainSpec>, NetOutError> {
        let handle = &self.container_handle;
        let ip = self.container_ip;

        let input_chain = self.chain_namer.prefix(PREFIX_INPUT, handle);
        let forward_chain = self.chain_namer.prefix(PREFIX_NETOUT, handle);
        let overlay_chain = self.chain_namer.prefix(PREFIX_OVERLAY, handle);
        let log_chain = self.chain_namer.postfix(&forward_chain, SUFFIX_NETOUT_LOG)?;

        Ok(vec![
            ChainSpec {
                table: FILTER.to_string(),
                parent: Some("INPUT".to_string()),
                jump_conditions: vec![rules::input_jump(ip, &input_chain)],
                name: input_chain,
                body: RuleBody::new(rules::input_default_reject())
                    .with(rules::input_related_established()),
            },
            self.with_asg_logging(ChainSpec {
                table: FILTER.to_string(),
                parent: Some("FORWARD".to_string()),
                jump_conditions: rules::netout_jump_conditions(
                    &self.host_interface_names,
                    ip,
                    &forward_chain,
                ),
                name: forward_chain,
                body: RuleBody::new(rules::netout_default_reject())
                    .with(rules::netout_invalid())
                    .with(rules::netout_related_established()),
            }),
            self.with_c2c_logging(ChainSpec {
                table: FILTER.to_string(),
                parent: Some("FORWARD".to_string()),
                jump_conditions: vec![rules::overlay_jump(&overlay_chain)],
                name: overlay_chain,
                body: RuleBody::new(rules::overlay_default_reject(ip))
                    .with(rules::overlay_allow_egress(&self.vtep_name, ip))
                    .with(rules::overlay_related_established(ip))
                    .with(rules::overlay_tag_accept(ip, &self.ingress_tag)),
            }),
            ChainSpec {
                table: FILTER.to_string(),
                parent: None,
                jump_conditions: Vec::new(),
                name: log_chain,
                body: RuleBody::new(rules::accept())
                    .with(rules::netout_non_udp_log(handle))
                    .with(rules::netout_udp_log(handle, self.accepted_udp_logs_per_sec)),
            },
        ])
    }

    /// Input chain body: related/established, DNS on TCP and UDP per server,
    /// each host TCP service, then reject.
    fn input_body(&self) -> Result<RuleBody, NetOutError> {
        let mut body =
            RuleBody::new(rules::input_default_reject()).with(rules::input_related_established());

        for server in &self.dns_servers {
            let server = server.to_string();
            body.insert_before_terminal(rules::input_allow("tcp", &server, DNS_PORT));
            body.insert_before_terminal(rules::input_allow("udp", &server, DNS_PORT));
        }

        for service in &self.host_tcp_services {
            let (host, port) = parse_host_service(service)?;
            body.insert_before_terminal(rules::input_allow("tcp", &host, port));
        }

        Ok(body)
    }

    fn with_asg_logging(&self, mut chain: ChainSpec) -> ChainSpec {
        if self.asg_logging {
            chain.body.insert_before_terminal(rules::netout_default_reject_log(
                &self.container_handle,
                self.denied_logs_per_sec,
            ));
        }
        chain
    }

    fn with_c2c_logging(&self, mut chain: ChainSpec) -> ChainSpec {
        if self.c2c_logging {
            chain
                .body
                .insert_before_terminal(rules::overlay_default_reject_log(
                    &self.container_handle,
                    self.container_ip,
                    self.denied_logs_per_sec,
                ));
        }
        chain
    }
}
