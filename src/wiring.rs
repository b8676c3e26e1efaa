//! # Network Wiring Engine
//!
//! Connects a container namespace to the host with a veth pair and gives the
//! container a /32 address behind a link-local gateway.
//!
//! ```text
//!  container netns                              host netns
//! ┌──────────────────────────────┐            ┌───────────────────────┐
//! │ eth0  10.0.0.5/32            │   veth     │ cali<container-id:11> │
//! │ 169.254.1.1/32 dev eth0 link │◀══════════▶│ (up, no address)      │
//! │ default via 169.254.1.1      │            │                       │
//! └──────────────────────────────┘            └───────────────────────┘
//! ```
//!
//! The gateway is never resolved by ARP inside the container; the explicit
//! link-scope route makes it reachable and the host end of the cable
//! terminates every packet directly.
//!
//! Device, address and route changes are made with iproute2 from the thread
//! that entered the namespace (see [`crate::netns`]). All of it is
//! synchronous.

use crate::constants::{
    GATEWAY_IPV4, HOST_VETH_ID_CHARS, HOST_VETH_PREFIX, IP_BINARY, TEMP_VETH_PREFIX,
};
use crate::error::{Error, Result};
use crate::netns::with_netns_path;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

// =============================================================================
// Wiring Interface
// =============================================================================

/// Parameters of a [`NetworkWiring::wire`] call.
#[derive(Debug, Clone)]
pub struct WireRequest<'a> {
    /// Container network namespace.
    pub netns: &'a Path,
    /// Container-side interface name.
    pub if_name: &'a str,
    pub mtu: u32,
    /// Determines the host-side interface name.
    pub container_id: &'a str,
    /// Address given to the container interface as a /32.
    pub address: Ipv4Addr,
}

/// Outcome of a successful [`NetworkWiring::wire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WiredVeth {
    /// Final host-side interface name.
    pub host_name: String,
    /// Hardware address of the container-side interface.
    pub container_mac: String,
}

/// Creates and removes the container's network plumbing.
///
/// Implementations run on the calling thread; they must not be invoked
/// from a thread that is itself inside another namespace.
pub trait NetworkWiring: Send + Sync {
    /// Creates the veth pair, addresses and routes for one container.
    fn wire(&self, request: &WireRequest<'_>) -> Result<WiredVeth>;

    /// Removes the container-side interface. A missing namespace or device
    /// is not an error.
    fn unwire(&self, netns: &Path, if_name: &str) -> Result<()>;
}

/// Host-side interface name for a container.
///
/// `cali` followed by the first 11 bytes of the container ID (or all of it,
/// if shorter), cut back to a character boundary so the name never exceeds
/// `IFNAMSIZ - 1` bytes.
pub fn host_veth_name(container_id: &str) -> String {
    let mut end = container_id.len().min(HOST_VETH_ID_CHARS);
    while !container_id.is_char_boundary(end) {
        end -= 1;
    }
    format!("{HOST_VETH_PREFIX}{}", &container_id[..end])
}

/// Random name the host end carries until it is renamed.
fn temp_veth_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{TEMP_VETH_PREFIX}{}", &id[..8])
}

// =============================================================================
// iproute2
// =============================================================================

#[derive(Debug, Deserialize)]
struct LinkInfo {
    #[serde(default)]
    address: Option<String>,
}

/// Thin synchronous wrapper around the `ip` binary.
#[derive(Debug, Clone)]
pub struct IpRoute2 {
    binary: PathBuf,
}

impl Default for IpRoute2 {
    fn default() -> Self {
        Self::new(IP_BINARY)
    }
}

impl IpRoute2 {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Runs `ip <args>` and returns stdout.
    ///
    /// `device` names the interface the command operates on; a "no such
    /// device" failure is reported as [`Error::DeviceNotFound`] for it.
    pub fn run(&self, device: &str, args: &[String]) -> Result<String> {
        let command = args.join(" ");
        debug!(command = %command, "ip");

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| Error::LinkCommand {
                command: command.clone(),
                reason: format!("spawn {}: {e}", self.binary.display()),
            })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_missing_device(&stderr) {
            return Err(Error::DeviceNotFound(device.to_string()));
        }
        Err(Error::LinkCommand {
            command,
            reason: if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr
            },
        })
    }

    /// Returns true if the interface exists in the current namespace.
    pub fn link_exists(&self, device: &str) -> Result<bool> {
        match self.run(device, &args(&["link", "show", "dev", device])) {
            Ok(_) => Ok(true),
            Err(e) if e.is_device_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Reads an interface's hardware address.
    pub fn link_mac(&self, device: &str) -> Result<String> {
        let stdout = self.run(device, &args(&["-j", "link", "show", "dev", device]))?;
        parse_link_mac(&stdout).ok_or_else(|| Error::LinkCommand {
            command: format!("-j link show dev {device}"),
            reason: "no hardware address in output".to_string(),
        })
    }
}

fn is_missing_device(stderr: &str) -> bool {
    stderr.contains("Cannot find device") || stderr.contains("does not exist")
}

fn parse_link_mac(json: &str) -> Option<String> {
    let links: Vec<LinkInfo> = serde_json::from_str(json).ok()?;
    links.into_iter().next()?.address
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// `ip link add <if> ... type veth peer name <tmp> ... netns <host>`.
///
/// The peer is created directly in the host namespace.
fn veth_add_args(if_name: &str, peer: &str, mtu: u32, host_ns: &Path) -> Vec<String> {
    let mtu = mtu.to_string();
    let host_ns = host_ns.display().to_string();
    args(&[
        "link", "add", if_name, "mtu", &mtu, "type", "veth", "peer", "name", peer, "mtu", &mtu,
        "netns", &host_ns,
    ])
}

fn gateway_route_args(if_name: &str) -> Vec<String> {
    let gateway = format!("{GATEWAY_IPV4}/32");
    args(&["route", "add", &gateway, "dev", if_name, "scope", "link"])
}

fn default_route_args(if_name: &str) -> Vec<String> {
    let gateway = GATEWAY_IPV4.to_string();
    args(&["route", "add", "default", "via", &gateway, "dev", if_name])
}

fn address_args(address: Ipv4Addr, if_name: &str) -> Vec<String> {
    let cidr = format!("{address}/32");
    args(&["addr", "add", &cidr, "dev", if_name])
}

// =============================================================================
// Veth Wiring
// =============================================================================

/// [`NetworkWiring`] backed by iproute2.
#[derive(Debug, Clone, Default)]
pub struct VethWiring {
    ip: IpRoute2,
}

impl VethWiring {
    pub fn new(ip: IpRoute2) -> Self {
        Self { ip }
    }

    /// Steps run inside the container namespace. Returns the container MAC.
    fn setup_container_side(
        &self,
        request: &WireRequest<'_>,
        temp_name: &str,
        host_ns: &Path,
    ) -> Result<String> {
        let if_name = request.if_name;

        self.ip.run(
            if_name,
            &veth_add_args(if_name, temp_name, request.mtu, host_ns),
        )?;
        self.ip
            .run(if_name, &args(&["link", "set", "dev", if_name, "up"]))?;
        self.ip.run(if_name, &gateway_route_args(if_name))?;
        self.ip.run(if_name, &default_route_args(if_name))?;
        self.ip
            .run(if_name, &address_args(request.address, if_name))?;

        self.ip.link_mac(if_name)
    }

    /// Renames the host end to its final name and brings it up.
    fn setup_host_side(&self, temp_name: &str, host_name: &str) -> Result<()> {
        // A veth left over from a previous incarnation of this container
        // would block the rename.
        if self.ip.link_exists(host_name)? {
            warn!(device = %host_name, "Removing stale host veth");
            self.ip
                .run(host_name, &args(&["link", "del", "dev", host_name]))?;
        }

        self.ip
            .run(temp_name, &args(&["link", "set", "dev", temp_name, "down"]))?;
        self.ip.run(
            temp_name,
            &args(&["link", "set", "dev", temp_name, "name", host_name]),
        )?;
        self.ip
            .run(host_name, &args(&["link", "set", "dev", host_name, "up"]))?;
        Ok(())
    }
}

impl NetworkWiring for VethWiring {
    fn wire(&self, request: &WireRequest<'_>) -> Result<WiredVeth> {
        let temp_name = temp_veth_name();
        let host_name = host_veth_name(request.container_id);

        let container_mac = with_netns_path(request.netns, |host_ns| {
            self.setup_container_side(request, &temp_name, &host_ns.fd_path())
        })?;

        self.setup_host_side(&temp_name, &host_name)?;

        info!(
            netns = %request.netns.display(),
            if_name = %request.if_name,
            host_veth = %host_name,
            address = %request.address,
            mac = %container_mac,
            "Wired container"
        );

        Ok(WiredVeth {
            host_name,
            container_mac,
        })
    }

    fn unwire(&self, netns: &Path, if_name: &str) -> Result<()> {
        if !netns.exists() {
            debug!(netns = %netns.display(), "Namespace already gone");
            return Ok(());
        }

        let result = with_netns_path(netns, |_| {
            if !self.ip.link_exists(if_name)? {
                return Ok(());
            }
            self.ip.run(if_name, &args(&["-4", "addr", "flush", "dev", if_name]))?;
            self.ip
                .run(if_name, &args(&["link", "del", "dev", if_name]))?;
            info!(netns = %netns.display(), %if_name, "Removed container interface");
            Ok(())
        });

        match result {
            Err(e) if e.is_device_not_found() => {
                debug!(%if_name, "Interface already gone");
                Ok(())
            }
            other => other,
        }
    }
}
