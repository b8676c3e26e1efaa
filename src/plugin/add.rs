//! ADD: attach a container.
//!
//! ```text
//! ResolvingIdentity ─▶ CheckingEndpoint ─┬─▶ Reusing ──────┬─▶ PersistingEndpoint ─▶ EnsuringProfile ─▶ Done
//!                                        └─▶ Provisioning ─┘
//! ```
//!
//! Any failure aborts the remaining stages.

use super::Plugin;
use crate::config::{CmdArgs, NetConf};
use crate::constants::ENV_NETNS;
use crate::error::{Error, Result};
use crate::identity::{self, ResolvedWorkload};
use crate::store::{Endpoint, EndpointState, Profile};
use crate::types::{CniResult, IpConfig};
use crate::wiring::{WireRequest, WiredVeth};
use ipnet::IpNet;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::{debug, info};

/// Stages of an ADD, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddStage {
    ResolvingIdentity,
    CheckingEndpoint,
    /// An endpoint already exists; its address is reused.
    Reusing,
    /// First ADD; an address is allocated and the namespace wired.
    Provisioning,
    PersistingEndpoint,
    EnsuringProfile,
    Done,
}

impl std::fmt::Display for AddStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ResolvingIdentity => "resolving-identity",
            Self::CheckingEndpoint => "checking-endpoint",
            Self::Reusing => "reusing",
            Self::Provisioning => "provisioning",
            Self::PersistingEndpoint => "persisting-endpoint",
            Self::EnsuringProfile => "ensuring-profile",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

fn enter(stage: AddStage, container_id: &str) {
    debug!(%stage, %container_id, "ADD");
}

pub(super) async fn run(plugin: &Plugin, args: &CmdArgs, conf: &NetConf) -> Result<CniResult> {
    let container_id = args.container_id.as_str();

    enter(AddStage::ResolvingIdentity, container_id);
    let workload = identity::resolve(
        plugin.hostname_for(conf),
        container_id,
        &conf.name,
        &args.args,
    )?;

    enter(AddStage::CheckingEndpoint, container_id);
    let (endpoint, mut result) = match plugin.store.get_endpoint(&workload.identity).await? {
        Some(existing) => {
            enter(AddStage::Reusing, container_id);
            reuse(plugin, args, conf, &workload, existing)?
        }
        None => {
            enter(AddStage::Provisioning, container_id);
            provision(plugin, args, conf, &workload).await?
        }
    };

    enter(AddStage::PersistingEndpoint, container_id);
    plugin
        .store
        .write_endpoint(&workload.identity, &endpoint)
        .await?;

    enter(AddStage::EnsuringProfile, container_id);
    ensure_profile(plugin, conf, &workload).await?;

    result.cni_version = conf.cni_version.clone();
    enter(AddStage::Done, container_id);
    info!(
        workload = %workload.identity,
        profile = %workload.profile_id,
        address = %endpoint.primary_ipv4().map(|ip| ip.to_string()).unwrap_or_default(),
        "Attached workload"
    );

    Ok(result)
}

/// Updates an existing endpoint and derives the result from its stored
/// addresses.
fn reuse(
    plugin: &Plugin,
    args: &CmdArgs,
    conf: &NetConf,
    workload: &ResolvedWorkload,
    mut endpoint: Endpoint,
) -> Result<(Endpoint, CniResult)> {
    if endpoint.add_profile(&workload.profile_id) {
        debug!(profile = %workload.profile_id, "Added profile to endpoint");
    }

    let ip4 = endpoint.primary_ipv4().ok_or(Error::MissingIpv4)?;
    let result = CniResult {
        ip4: Some(IpConfig::new(ip4)),
        ip6: endpoint.primary_ipv6().map(IpConfig::new),
        ..Default::default()
    };

    // Pods always get a fresh namespace, even when the record survives.
    if workload.is_k8s() {
        let wired = wire(plugin, args, conf, ipv4_addr(&ip4)?)?;
        endpoint.name = wired.host_name;
        endpoint.mac = wired.container_mac;
    }

    Ok((endpoint, result))
}

/// Allocates an address, wires the namespace and builds a new endpoint.
async fn provision(
    plugin: &Plugin,
    args: &CmdArgs,
    conf: &NetConf,
    workload: &ResolvedWorkload,
) -> Result<(Endpoint, CniResult)> {
    let labels = match &workload.pod {
        Some(pod) => plugin.pod_labels(pod).await?,
        None => BTreeMap::new(),
    };

    let result = plugin.ipam.assign(args, &conf.ipam).await?;
    let ip4 = result.ip4.as_ref().ok_or(Error::MissingIpv4)?.ip;
    let wired = wire(plugin, args, conf, ipv4_addr(&ip4)?)?;

    let endpoint = Endpoint {
        state: EndpointState::Active,
        name: wired.host_name,
        mac: wired.container_mac,
        ipv4_nets: vec![ip4],
        ipv6_nets: result.ip6.iter().map(|c| c.ip).collect(),
        profile_ids: vec![workload.profile_id.clone()],
        labels,
    };

    Ok((endpoint, result))
}

fn wire(plugin: &Plugin, args: &CmdArgs, conf: &NetConf, address: Ipv4Addr) -> Result<WiredVeth> {
    let netns = args.netns_path().ok_or(Error::MissingEnv(ENV_NETNS))?;
    plugin.wiring.wire(&WireRequest {
        netns,
        if_name: &args.if_name,
        mtu: conf.mtu,
        container_id: &args.container_id,
        address,
    })
}

fn ipv4_addr(net: &IpNet) -> Result<Ipv4Addr> {
    match net {
        IpNet::V4(v4) => Ok(v4.addr()),
        IpNet::V6(_) => Err(Error::MissingIpv4),
    }
}

/// Creates the profile on first use.
///
/// Pods governed by an external policy controller leave profiles alone.
async fn ensure_profile(
    plugin: &Plugin,
    conf: &NetConf,
    workload: &ResolvedWorkload,
) -> Result<()> {
    if workload.is_k8s() && conf.has_policy() {
        debug!(profile = %workload.profile_id, "Profile owned by policy controller");
        return Ok(());
    }

    if plugin.store.profile_exists(&workload.profile_id).await? {
        debug!(profile = %workload.profile_id, "Profile exists");
        return Ok(());
    }

    let profile = Profile::for_network(&workload.profile_id, &conf.name, workload.is_k8s());
    plugin.store.write_profile(&profile).await?;
    info!(profile = %profile.id, "Created profile");
    Ok(())
}
