//! Network configuration and invocation context.
//!
//! The runtime hands the plugin two things: a JSON network configuration on
//! stdin ([`NetConf`]) and a handful of `CNI_*` environment variables
//! ([`CmdArgs`]). Both are decoded once at the process boundary and then
//! passed by reference through every operation; nothing below the binary
//! reads or writes the process environment.

use crate::constants::{
    DEFAULT_ETCD_SCHEME, DEFAULT_K8S_API_ROOT, DEFAULT_MTU, ENV_ARGS, ENV_COMMAND,
    ENV_CONTAINER_ID, ENV_IFNAME, ENV_NETNS, ENV_PATH,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// =============================================================================
// Network Configuration
// =============================================================================

/// Network configuration passed on stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConf {
    /// CNI spec version the runtime speaks.
    #[serde(rename = "cniVersion", default, skip_serializing_if = "Option::is_none")]
    pub cni_version: Option<String>,
    /// Network name. Doubles as the profile ID for plain CNI workloads.
    pub name: String,
    /// Plugin type (the name of this binary).
    #[serde(rename = "type")]
    pub plugin_type: String,
    /// MTU for both ends of the veth.
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    /// Overrides the OS hostname in workload identities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Log level for the plugin's stderr output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Single etcd `host:port`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd_authority: Option<String>,
    /// Comma separated etcd endpoint URLs. Wins over `etcd_authority`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd_endpoints: Option<String>,
    /// Scheme applied to `etcd_authority`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd_scheme: Option<String>,
    /// IPAM delegate configuration.
    pub ipam: IpamConf,
    /// Present when an external policy controller owns profiles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,
}

fn default_mtu() -> u32 {
    DEFAULT_MTU
}

/// IPAM section of the network configuration.
///
/// Only the keys this plugin interprets are typed; everything else belongs to
/// the delegate and is kept in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpamConf {
    /// Name of the IPAM plugin binary.
    #[serde(rename = "type")]
    pub plugin_type: String,
    /// Whether an IPv4 address is requested (default true).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign_ipv4: Option<bool>,
    /// Whether an IPv6 address is requested (default false).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign_ipv6: Option<bool>,
    /// Delegate-specific keys.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl IpamConf {
    /// Returns true unless IPv4 assignment was explicitly disabled.
    pub fn wants_ipv4(&self) -> bool {
        self.assign_ipv4.unwrap_or(true)
    }

    /// Returns true only if IPv6 assignment was explicitly enabled.
    pub fn wants_ipv6(&self) -> bool {
        self.assign_ipv6.unwrap_or(false)
    }
}

/// Policy section. Its presence hands profile ownership to a policy
/// controller for Kubernetes workloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    /// Policy controller type.
    #[serde(rename = "type", default)]
    pub policy_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s_api_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s_auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s_client_certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s_client_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s_certificate_authority: Option<String>,
}

impl Policy {
    /// Returns the Kubernetes API root, falling back to the in-cluster default.
    pub fn api_root(&self) -> &str {
        self.k8s_api_root
            .as_deref()
            .filter(|root| !root.is_empty())
            .unwrap_or(DEFAULT_K8S_API_ROOT)
    }
}

impl NetConf {
    /// Decodes the configuration blob.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the blob is not a valid configuration.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Returns the etcd endpoint URLs to try, in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoEtcdEndpoints`] if neither `etcd_endpoints` nor
    /// `etcd_authority` yields an endpoint.
    pub fn etcd_endpoints(&self) -> Result<Vec<String>> {
        if let Some(list) = self.etcd_endpoints.as_deref() {
            let endpoints: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(|e| e.trim_end_matches('/').to_string())
                .collect();
            if !endpoints.is_empty() {
                return Ok(endpoints);
            }
        }

        match self.etcd_authority.as_deref().map(str::trim) {
            Some(authority) if !authority.is_empty() => {
                let scheme = self.etcd_scheme.as_deref().unwrap_or(DEFAULT_ETCD_SCHEME);
                Ok(vec![format!("{scheme}://{authority}")])
            }
            _ => Err(Error::NoEtcdEndpoints),
        }
    }

    /// Returns true if a policy controller is configured.
    pub fn has_policy(&self) -> bool {
        self.policy.is_some()
    }
}

// =============================================================================
// Invocation Context
// =============================================================================

/// CNI command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Add,
    Del,
    Version,
}

impl std::str::FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ADD" => Ok(Self::Add),
            "DEL" => Ok(Self::Del),
            "VERSION" => Ok(Self::Version),
            other => Err(Error::UnknownCommand(other.to_string())),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add => write!(f, "ADD"),
            Self::Del => write!(f, "DEL"),
            Self::Version => write!(f, "VERSION"),
        }
    }
}

/// Everything the runtime passed to this invocation.
#[derive(Debug, Clone)]
pub struct CmdArgs {
    pub command: Command,
    pub container_id: String,
    /// Namespace path. Empty is valid for DEL.
    pub netns: PathBuf,
    pub if_name: String,
    /// Colon separated delegate search path.
    pub cni_path: String,
    /// Raw `key=value;...` argument string.
    pub args: String,
    /// Raw configuration blob, forwarded verbatim to the IPAM delegate.
    pub stdin_data: Vec<u8>,
}

impl CmdArgs {
    /// Reads the invocation context from the process environment.
    ///
    /// This is the only place the plugin reads `CNI_*` variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingEnv`] when a variable required by the command is
    /// unset, or [`Error::UnknownCommand`].
    pub fn from_env(stdin_data: Vec<u8>) -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), stdin_data)
    }

    /// Builds the context from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F, stdin_data: Vec<u8>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let command: Command = lookup(ENV_COMMAND)
            .ok_or(Error::MissingEnv(ENV_COMMAND))?
            .parse()?;

        let required = |key: &'static str| -> Result<String> {
            match lookup(key) {
                Some(v) if !v.is_empty() => Ok(v),
                _ => Err(Error::MissingEnv(key)),
            }
        };

        let (container_id, netns, if_name) = match command {
            Command::Add => (
                required(ENV_CONTAINER_ID)?,
                required(ENV_NETNS)?,
                required(ENV_IFNAME)?,
            ),
            Command::Del => (
                required(ENV_CONTAINER_ID)?,
                lookup(ENV_NETNS).unwrap_or_default(),
                lookup(ENV_IFNAME).unwrap_or_default(),
            ),
            Command::Version => Default::default(),
        };

        Ok(Self {
            command,
            container_id,
            netns: PathBuf::from(netns),
            if_name,
            cni_path: lookup(ENV_PATH).unwrap_or_default(),
            args: lookup(ENV_ARGS).unwrap_or_default(),
            stdin_data,
        })
    }

    /// Returns the namespace path, or `None` if the runtime passed none.
    pub fn netns_path(&self) -> Option<&Path> {
        if self.netns.as_os_str().is_empty() {
            None
        } else {
            Some(&self.netns)
        }
    }
}
