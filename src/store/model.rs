//! Endpoint and profile records as stored in the datastore.

use crate::constants::ENDPOINT_STATE_ACTIVE;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Endpoint
// =============================================================================

/// Endpoint lifecycle state. Only `active` is ever written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointState {
    #[default]
    Active,
}

impl std::fmt::Display for EndpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => f.write_str(ENDPOINT_STATE_ACTIVE),
        }
    }
}

/// Network attachment of one workload.
///
/// The address and profile sequences are always present (possibly empty)
/// in the serialized form; consumers index them without checking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(default)]
    pub state: EndpointState,
    /// Host-side interface name.
    #[serde(default)]
    pub name: String,
    /// Container-side hardware address.
    #[serde(default)]
    pub mac: String,
    /// IPv4 addresses; the first is authoritative.
    #[serde(default)]
    pub ipv4_nets: Vec<IpNet>,
    #[serde(default)]
    pub ipv6_nets: Vec<IpNet>,
    /// Profiles in insertion order.
    #[serde(default)]
    pub profile_ids: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Endpoint {
    /// Appends a profile unless it is already listed.
    ///
    /// Returns true if the list changed.
    pub fn add_profile(&mut self, profile_id: &str) -> bool {
        if self.profile_ids.iter().any(|p| p == profile_id) {
            false
        } else {
            self.profile_ids.push(profile_id.to_string());
            true
        }
    }

    /// Returns the authoritative IPv4 address.
    pub fn primary_ipv4(&self) -> Option<IpNet> {
        self.ipv4_nets.first().copied()
    }

    /// Returns the authoritative IPv6 address.
    pub fn primary_ipv6(&self) -> Option<IpNet> {
        self.ipv6_nets.first().copied()
    }
}

// =============================================================================
// Profile
// =============================================================================

/// Rule verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Deny,
}

/// One policy rule. A rule without `src_tag` matches every source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_tag: Option<String>,
}

impl Rule {
    pub fn allow() -> Self {
        Self {
            action: Action::Allow,
            src_tag: None,
        }
    }

    pub fn allow_from_tag(tag: impl Into<String>) -> Self {
        Self {
            action: Action::Allow,
            src_tag: Some(tag.into()),
        }
    }
}

/// Inbound and outbound rule lists of a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rules {
    #[serde(rename = "inbound_rules", default)]
    pub inbound: Vec<Rule>,
    #[serde(rename = "outbound_rules", default)]
    pub outbound: Vec<Rule>,
}

/// Named policy object shared by the endpoints that list it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: String,
    pub rules: Rules,
    /// Membership tags matched by `src_tag`.
    pub tags: Vec<String>,
}

impl Profile {
    /// Default profile for a network.
    ///
    /// Outbound is always allowed. Inbound admits every source for
    /// Kubernetes namespaces and only sources tagged with the network name
    /// otherwise. Every writer derives the content from the same inputs, so
    /// racing first-creations write identical records.
    pub fn for_network(id: impl Into<String>, network_name: &str, k8s: bool) -> Self {
        let inbound = if k8s {
            Rule::allow()
        } else {
            Rule::allow_from_tag(network_name)
        };

        Self {
            id: id.into(),
            rules: Rules {
                inbound: vec![inbound],
                outbound: vec![Rule::allow()],
            },
            tags: vec![network_name.to_string()],
        }
    }
}
