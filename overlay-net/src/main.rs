//! overlay-net: per-container network plumbing for overlay hosts.
//!
//! Thin CLI over the library, driven by the container orchestrator:
//! - `netout` builds and removes a container's firewall chains
//! - `veth` creates and deletes the container's link pair

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use overlay_net::netout::{EgressRuleConverter, SystemIptables};
use overlay_net::{HostLock, NetOutConfig, VethManager};

#[derive(Parser, Debug)]
#[command(name = "overlay-net", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Container firewall chains
    Netout {
        #[command(subcommand)]
        action: NetoutAction,
    },
    /// Container link pair
    Veth {
        #[command(subcommand)]
        action: VethAction,
    },
}

#[derive(Subcommand, Debug)]
enum NetoutAction {
    /// Create the chains, then apply the configured egress rules
    Init {
        /// JSON config file
        #[arg(long)]
        config: PathBuf,
    },
    /// Remove the chains
    Cleanup {
        #[arg(long)]
        config: PathBuf,
    },
    /// Insert the configured egress rules into existing chains
    InsertRules {
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct NamespaceArgs {
    /// Host network namespace
    #[arg(long, default_value = "/proc/1/ns/net")]
    host_ns: PathBuf,

    /// Container network namespace (e.g. /var/run/netns/<handle>)
    #[arg(long)]
    container_ns: PathBuf,
}

#[derive(Subcommand, Debug)]
enum VethAction {
    /// Create the pair, disable IPv6 and assign point-to-point addresses
    Create {
        #[command(flatten)]
        ns: NamespaceArgs,

        /// Interface name inside the container
        #[arg(long, default_value = "eth0")]
        ifname: String,

        #[arg(long, default_value = "1500")]
        mtu: u32,

        /// Container address
        #[arg(long)]
        ip: Ipv4Addr,
    },
    /// Delete the pair
    Destroy {
        #[command(flatten)]
        ns: NamespaceArgs,

        #[arg(long, default_value = "eth0")]
        ifname: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "overlay_net=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Netout { action } => run_netout(action),
        Commands::Veth { action } => run_veth(action),
    }
}

fn load_net_out(config: &Path) -> Result<(NetOutConfig, overlay_net::NetOut)> {
    let config = NetOutConfig::load(config)?;
    let iptables = SystemIptables::new().context("Failed to open iptables")?;
    let net_out = config.net_out(
        Arc::new(iptables),
        Arc::new(EgressRuleConverter),
        HostLock::global(),
    );
    Ok((config, net_out))
}

fn run_netout(action: NetoutAction) -> Result<()> {
    match action {
        NetoutAction::Init { config } => {
            let (config, net_out) = load_net_out(&config)?;
            net_out.initialize()?;
            if !config.egress_rules.is_empty() {
                net_out.bulk_insert_rules(&config.egress_rules)?;
            }
            info!(handle = %config.container_handle, "Firewall ready");
        }
        NetoutAction::Cleanup { config } => {
            let (_, net_out) = load_net_out(&config)?;
            net_out.cleanup()?;
        }
        NetoutAction::InsertRules { config } => {
            let (config, net_out) = load_net_out(&config)?;
            net_out.bulk_insert_rules(&config.egress_rules)?;
        }
    }
    Ok(())
}

fn run_veth(action: VethAction) -> Result<()> {
    match action {
        VethAction::Create {
            ns,
            ifname,
            mtu,
            ip,
        } => {
            let mut manager = VethManager::system(ns.host_ns, ns.container_ns);
            manager.init()?;
            let pair = manager.create_pair(&ifname, mtu)?;
            manager.disable_ipv6(&pair)?;
            manager.assign_ip(&pair, ip)?;

            let summary = serde_json::json!({
                "host": {
                    "name": pair.host.link.name,
                    "mac": pair.host.link.hardware_addr.map(|m| m.to_string()),
                    "address": format!("{}/32", overlay_net::veth::HOST_LINK_LOCAL),
                },
                "container": {
                    "name": pair.container.link.name,
                    "mac": pair.container.link.hardware_addr.map(|m| m.to_string()),
                    "address": format!("{ip}/32"),
                },
                "mtu": mtu,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        VethAction::Destroy { ns, ifname } => {
            let mut manager = VethManager::system(ns.host_ns, ns.container_ns);
            manager.init()?;
            manager
                .destroy(&ifname)
                .with_context(|| format!("Failed to destroy {ifname}"))?;
        }
    }
    Ok(())
}
