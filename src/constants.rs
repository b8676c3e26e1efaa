//! # Plugin Constants
//!
//! Protocol names, datastore key roots, and wiring parameters shared by the
//! plugin modules. Values that appear on the wire or in the datastore are
//! defined here once so the key layout and the CNI protocol stay in sync
//! across the store client, the IPAM delegate and the wiring engine.

// =============================================================================
// CNI Protocol
// =============================================================================

/// Environment variable carrying the command (`ADD`, `DEL`, `VERSION`).
pub const ENV_COMMAND: &str = "CNI_COMMAND";

/// Environment variable carrying the container identifier.
pub const ENV_CONTAINER_ID: &str = "CNI_CONTAINERID";

/// Environment variable carrying the network namespace path.
pub const ENV_NETNS: &str = "CNI_NETNS";

/// Environment variable carrying the container-side interface name.
pub const ENV_IFNAME: &str = "CNI_IFNAME";

/// Environment variable carrying the delegate plugin search path.
pub const ENV_PATH: &str = "CNI_PATH";

/// Environment variable carrying `key=value;...` extra arguments.
pub const ENV_ARGS: &str = "CNI_ARGS";

/// Marker telling delegates to ignore argument keys they do not understand.
pub const IGNORE_UNKNOWN_ARG: &str = "IgnoreUnknown=1";

/// CNI spec version reported in results and by `VERSION`.
pub const CNI_VERSION: &str = "0.2.0";

/// CNI spec versions this plugin understands.
pub const SUPPORTED_VERSIONS: &[&str] = &["0.1.0", "0.2.0"];

// =============================================================================
// Orchestrator Arguments
// =============================================================================

/// CNI_ARGS key carrying the pod namespace.
pub const K8S_POD_NAMESPACE: &str = "K8S_POD_NAMESPACE";

/// CNI_ARGS key carrying the pod name.
pub const K8S_POD_NAME: &str = "K8S_POD_NAME";

/// CNI_ARGS key carrying the pod infra container ID.
pub const K8S_POD_INFRA_CONTAINER_ID: &str = "K8S_POD_INFRA_CONTAINER_ID";

/// Orchestrator tag for plain CNI workloads.
pub const ORCHESTRATOR_CNI: &str = "cni";

/// Orchestrator tag for Kubernetes pods.
pub const ORCHESTRATOR_K8S: &str = "k8s";

/// Prefix for per-namespace profile IDs of Kubernetes pods.
pub const K8S_PROFILE_PREFIX: &str = "k8s_ns.";

/// Label key recording the pod namespace on every Kubernetes endpoint.
pub const K8S_NAMESPACE_LABEL: &str = "calico/k8s_ns";

/// API root used when the policy block does not name one.
pub const DEFAULT_K8S_API_ROOT: &str = "https://10.100.0.1:443/api/v1";

// =============================================================================
// Datastore Layout
// =============================================================================

/// Root of every key written by the plugin.
pub const KEY_ROOT: &str = "/calico/v1";

/// State of every endpoint this plugin writes.
pub const ENDPOINT_STATE_ACTIVE: &str = "active";

/// Scheme applied to a bare `etcd_authority`.
pub const DEFAULT_ETCD_SCHEME: &str = "http";

// =============================================================================
// Wiring
// =============================================================================

/// Prefix of the host-side veth name.
pub const HOST_VETH_PREFIX: &str = "cali";

/// Number of container ID characters appended to [`HOST_VETH_PREFIX`].
///
/// `cali` + 11 characters stays within the kernel's 15-byte interface name
/// limit (`IFNAMSIZ` - 1).
pub const HOST_VETH_ID_CHARS: usize = 11;

/// Prefix of the temporary name the host end carries until it is renamed.
pub const TEMP_VETH_PREFIX: &str = "tmp";

/// Link-local gateway every container routes through.
///
/// Never answered by ARP; it is reachable only via the link-scope host route
/// installed on the container interface.
pub const GATEWAY_IPV4: std::net::Ipv4Addr = std::net::Ipv4Addr::new(169, 254, 1, 1);

/// MTU used when the network configuration does not set one.
pub const DEFAULT_MTU: u32 = 1500;

/// iproute2 binary used for device, address and route operations.
pub const IP_BINARY: &str = "ip";
