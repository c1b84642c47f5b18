//! Egress policy rules and their conversion into firewall rules.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::rules::{self, IptablesRule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    All,
    Tcp,
    Udp,
    Icmp,
}

/// Inclusive destination address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRange {
    pub start: IpAddr,
    pub end: IpAddr,
}

impl IpRange {
    pub fn single(ip: IpAddr) -> Self {
        Self { start: ip, end: ip }
    }
}

/// Inclusive destination port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcmpControl {
    #[serde(rename = "type")]
    pub icmp_type: u8,
    #[serde(default)]
    pub code: Option<u8>,
}

/// An "allow this egress" policy entry for one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressRule {
    pub protocol: Protocol,
    #[serde(default)]
    pub networks: Vec<IpRange>,
    #[serde(default)]
    pub ports: Vec<PortRange>,
    #[serde(default)]
    pub icmps: Option<IcmpControl>,
    /// Log accepted traffic even when chain-wide logging is off.
    #[serde(default)]
    pub log: bool,
}

/// Turns egress policy rules into firewall rules.
pub trait RuleConverter: Send + Sync {
    fn convert(&self, rule: &EgressRule, log_chain: &str, logging: bool) -> Vec<IptablesRule>;

    fn bulk_convert(
        &self,
        rules: &[EgressRule],
        log_chain: &str,
        logging: bool,
    ) -> Vec<IptablesRule> {
        rules
            .iter()
            .flat_map(|rule| self.convert(rule, log_chain, logging))
            .collect()
    }
}

/// Accepts matching traffic, or hands it to the log chain (which logs and
/// then accepts) when logging applies.
#[derive(Debug, Clone, Copy, Default)]
pub struct EgressRuleConverter;

impl EgressRuleConverter {
    fn verdict(log_chain: &str, logged: bool) -> [String; 2] {
        if logged {
            ["--goto".into(), log_chain.to_string()]
        } else {
            ["--jump".into(), "ACCEPT".into()]
        }
    }
}

impl RuleConverter for EgressRuleConverter {
    fn convert(&self, rule: &EgressRule, log_chain: &str, logging: bool) -> Vec<IptablesRule> {
        let verdict = Self::verdict(log_chain, rule.log || logging);
        let mut out = Vec::new();

        for network in &rule.networks {
            let range = rules::iprange_args(network.start, network.end);
            match rule.protocol {
                Protocol::All => {
                    out.push(IptablesRule::new(range.iter().chain(&verdict).cloned()));
                }
                Protocol::Tcp | Protocol::Udp => {
                    let proto = if rule.protocol == Protocol::Tcp {
                        "tcp"
                    } else {
                        "udp"
                    };
                    if rule.ports.is_empty() {
                        let mut args = vec!["-p".to_string(), proto.to_string()];
                        args.extend(range.iter().cloned());
                        args.extend(verdict.iter().cloned());
                        out.push(IptablesRule::new(args));
                    }
                    for ports in &rule.ports {
                        let mut args = vec!["-p".to_string(), proto.to_string()];
                        args.extend(range.iter().cloned());
                        args.extend([
                            "-m".to_string(),
                            proto.to_string(),
                            "--destination-port".to_string(),
                            format!("{}:{}", ports.start, ports.end),
                        ]);
                        args.extend(verdict.iter().cloned());
                        out.push(IptablesRule::new(args));
                    }
                }
                Protocol::Icmp => {
                    let mut args = vec!["-p".to_string(), "icmp".to_string()];
                    args.extend(range.iter().cloned());
                    if let Some(icmp) = rule.icmps {
                        let icmp_type = match icmp.code {
                            Some(code) => format!("{}/{}", icmp.icmp_type, code),
                            None => icmp.icmp_type.to_string(),
                        };
                        args.extend([
                            "-m".to_string(),
                            "icmp".to_string(),
                            "--icmp-type".to_string(),
                            icmp_type,
                        ]);
                    }
                    args.extend(verdict.iter().cloned());
                    out.push(IptablesRule::new(args));
                }
            }
        }

        out
    }
}
