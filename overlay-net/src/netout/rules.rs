//! Low-level firewall rules.
//!
//! A rule is the argument list that follows `-A <chain>` on an iptables
//! command line.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// Longest log prefix the kernel accepts.
const MAX_LOG_PREFIX: usize = 29;

/// One firewall rule, as its ordered argument list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IptablesRule(Vec<String>);

impl IptablesRule {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(args.into_iter().map(Into::into).collect())
    }

    pub fn args(&self) -> &[String] {
        &self.0
    }

    /// Rule as one string, quoting arguments that contain whitespace.
    pub fn to_rule_string(&self) -> String {
        self.0
            .iter()
            .map(|arg| {
                if arg.is_empty() || arg.contains(char::is_whitespace) {
                    format!("\"{arg}\"")
                } else {
                    arg.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The `--jump`/`-j` or `--goto`/`-g` target, if any.
    pub fn target(&self) -> Option<&str> {
        self.0
            .windows(2)
            .find(|w| matches!(w[0].as_str(), "--jump" | "-j" | "--goto" | "-g"))
            .map(|w| w[1].as_str())
    }
}

impl fmt::Display for IptablesRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rule_string())
    }
}

/// Log label padded with the separating space the kernel log expects,
/// truncated so label plus space fit the kernel limit.
pub fn log_prefix(label: &str) -> String {
    let truncated: String = label.chars().take(MAX_LOG_PREFIX - 1).collect();
    format!("{truncated} ")
}

fn rate_limit(per_sec: u32) -> [String; 6] {
    [
        "-m".into(),
        "limit".into(),
        "--limit".into(),
        format!("{per_sec}/s"),
        "--limit-burst".into(),
        per_sec.to_string(),
    ]
}

// === Input chain ===

pub fn input_related_established() -> IptablesRule {
    IptablesRule::new(["-m", "state", "--state", "RELATED,ESTABLISHED", "--jump", "ACCEPT"])
}

pub fn input_allow(protocol: &str, destination: &str, port: u16) -> IptablesRule {
    IptablesRule::new([
        "-p",
        protocol,
        "-d",
        destination,
        "--destination-port",
        &port.to_string(),
        "--jump",
        "ACCEPT",
    ])
}

pub fn input_default_reject() -> IptablesRule {
    IptablesRule::new(["--jump", "REJECT", "--reject-with", "icmp-port-unreachable"])
}

pub fn input_jump(container_ip: Ipv4Addr, chain: &str) -> IptablesRule {
    IptablesRule::new(["-s", &container_ip.to_string(), "--jump", chain])
}

// === Net-out forward chain ===

pub fn netout_jump_conditions(
    host_interfaces: &[String],
    container_ip: Ipv4Addr,
    chain: &str,
) -> Vec<IptablesRule> {
    host_interfaces
        .iter()
        .map(|iface| {
            IptablesRule::new([
                "-s",
                &container_ip.to_string(),
                "-o",
                iface.as_str(),
                "--jump",
                chain,
            ])
        })
        .collect()
}

pub fn netout_invalid() -> IptablesRule {
    IptablesRule::new(["-m", "state", "--state", "INVALID", "--jump", "DROP"])
}

pub fn netout_related_established() -> IptablesRule {
    IptablesRule::new(["-m", "state", "--state", "RELATED,ESTABLISHED", "--jump", "ACCEPT"])
}

pub fn netout_default_reject() -> IptablesRule {
    IptablesRule::new(["--jump", "REJECT", "--reject-with", "icmp-port-unreachable"])
}

pub fn netout_default_reject_log(handle: &str, denied_per_sec: u32) -> IptablesRule {
    let mut args: Vec<String> = rate_limit(denied_per_sec).into();
    args.extend([
        "--jump".into(),
        "LOG".into(),
        "--log-prefix".into(),
        log_prefix(&format!("DENY_{handle}")),
    ]);
    IptablesRule(args)
}

// === Log chain ===

pub fn netout_non_udp_log(handle: &str) -> IptablesRule {
    IptablesRule::new([
        "!",
        "-p",
        "udp",
        "-m",
        "conntrack",
        "--ctstate",
        "INVALID,NEW,UNTRACKED",
        "--jump",
        "LOG",
        "--log-prefix",
        &log_prefix(&format!("OK_{handle}")),
    ])
}

pub fn netout_udp_log(handle: &str, accepted_per_sec: u32) -> IptablesRule {
    let mut args = vec!["-p".to_string(), "udp".to_string()];
    args.extend(rate_limit(accepted_per_sec));
    args.extend([
        "--jump".into(),
        "LOG".into(),
        "--log-prefix".into(),
        log_prefix(&format!("OK_{handle}")),
    ]);
    IptablesRule(args)
}

pub fn accept() -> IptablesRule {
    IptablesRule::new(["--jump", "ACCEPT"])
}

// === Overlay chain ===

pub fn overlay_jump(chain: &str) -> IptablesRule {
    IptablesRule::new(["--jump", chain])
}

pub fn overlay_allow_egress(vtep_name: &str, container_ip: Ipv4Addr) -> IptablesRule {
    IptablesRule::new([
        "-s",
        &container_ip.to_string(),
        "-o",
        vtep_name,
        "-m",
        "mark",
        "!",
        "--mark",
        "0x0",
        "--jump",
        "ACCEPT",
    ])
}

pub fn overlay_related_established(container_ip: Ipv4Addr) -> IptablesRule {
    IptablesRule::new([
        "-d",
        &container_ip.to_string(),
        "-m",
        "state",
        "--state",
        "RELATED,ESTABLISHED",
        "--jump",
        "ACCEPT",
    ])
}

pub fn overlay_tag_accept(container_ip: Ipv4Addr, ingress_tag: &str) -> IptablesRule {
    IptablesRule::new([
        "-d",
        &container_ip.to_string(),
        "-m",
        "mark",
        "--mark",
        &format!("0x{ingress_tag}"),
        "--jump",
        "ACCEPT",
    ])
}

pub fn overlay_default_reject(container_ip: Ipv4Addr) -> IptablesRule {
    IptablesRule::new([
        "-d",
        &container_ip.to_string(),
        "--jump",
        "REJECT",
        "--reject-with",
        "icmp-port-unreachable",
    ])
}

pub fn overlay_default_reject_log(
    handle: &str,
    container_ip: Ipv4Addr,
    denied_per_sec: u32,
) -> IptablesRule {
    let mut args = vec!["-d".to_string(), container_ip.to_string()];
    args.extend(rate_limit(denied_per_sec));
    args.extend([
        "--jump".into(),
        "LOG".into(),
        "--log-prefix".into(),
        log_prefix(&format!("DENY_C2C_{handle}")),
    ]);
    IptablesRule(args)
}

// === Egress policy ===

/// Destination match for an inclusive address range.
pub fn iprange_args(start: IpAddr, end: IpAddr) -> [String; 4] {
    let range = if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    };
    ["-m".into(), "iprange".into(), "--dst-range".into(), range]
}
