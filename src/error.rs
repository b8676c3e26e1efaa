//! Error types for the CNI plugin.
//!
//! Every failure the plugin can surface belongs to one category
//! (see [`ErrorKind`]). "Key not found" in the datastore is deliberately not
//! an error: reads return `Option` and deletes of absent keys succeed.

use std::path::PathBuf;

/// Result type alias for plugin operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad failure category, used to decide how ADD and DEL react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed configuration or invocation context. No side effects yet.
    Config,
    /// The IPAM delegate failed or returned no usable address.
    Delegate,
    /// The datastore or the cluster API could not be reached or returned garbage.
    Store,
    /// Namespace, device, address or route manipulation failed.
    Networking,
    /// Anything else (I/O plumbing, serialization of our own output).
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config => write!(f, "config"),
            Self::Delegate => write!(f, "delegate"),
            Self::Store => write!(f, "store"),
            Self::Networking => write!(f, "networking"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Errors that can occur while handling a CNI command.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Network configuration could not be decoded.
    #[error("failed to load netconf: {0}")]
    InvalidConfig(String),

    /// Network name contains characters that are not allowed in profile IDs.
    #[error(
        "invalid network name '{0}': only letters a-z, numbers 0-9, and symbols _.- are supported"
    )]
    InvalidNetworkName(String),

    /// A `key=value` pair in CNI_ARGS was malformed.
    #[error("ARGS: invalid pair '{0}'")]
    MalformedArguments(String),

    /// A required CNI environment variable was not set.
    #[error("required environment variable {0} is not set")]
    MissingEnv(&'static str),

    /// Unknown CNI_COMMAND value.
    #[error("unknown CNI command '{0}'")]
    UnknownCommand(String),

    /// Neither `etcd_authority` nor `etcd_endpoints` was configured.
    #[error("no etcd endpoints configured: set etcd_authority or etcd_endpoints")]
    NoEtcdEndpoints,

    // =========================================================================
    // IPAM Delegate Errors
    // =========================================================================
    /// IPAM plugin binary not found in CNI_PATH.
    #[error("could not find IPAM plugin '{plugin}' in CNI_PATH '{path}'")]
    DelegateNotFound { plugin: String, path: String },

    /// IPAM plugin exited non-zero or produced unparseable output.
    #[error("IPAM plugin '{plugin}' failed: {reason}")]
    DelegateFailed { plugin: String, reason: String },

    /// IPAM plugin succeeded but did not return the requested IPv4 address.
    #[error("IPAM plugin '{0}' returned no IPv4 address")]
    NoAddressAssigned(String),

    /// No IPv4 address is available to wire the container with.
    #[error("IPAM plugin returned missing IPv4 config")]
    MissingIpv4,

    // =========================================================================
    // Datastore Errors
    // =========================================================================
    /// Datastore request failed or returned an unexpected response.
    #[error("datastore error on '{key}': {reason}")]
    Store { key: String, reason: String },

    /// No datastore endpoint could be reached.
    #[error("datastore unavailable: {0}")]
    StoreUnavailable(String),

    // =========================================================================
    // Networking Errors
    // =========================================================================
    /// Entering or leaving a network namespace failed.
    #[error("network namespace {path}: {reason}")]
    Namespace { path: PathBuf, reason: String },

    /// An iproute2 command failed.
    #[error("'ip {command}' failed: {reason}")]
    LinkCommand { command: String, reason: String },

    /// A network device does not exist.
    #[error("device '{0}' not found")]
    DeviceNotFound(String),

    // =========================================================================
    // Label Lookup Errors
    // =========================================================================
    /// Fetching workload labels from the cluster API failed.
    #[error("failed to fetch labels for pod {namespace}/{name}: {reason}")]
    LabelLookup {
        namespace: String,
        name: String,
        reason: String,
    },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns the failure category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_)
            | Self::InvalidNetworkName(_)
            | Self::MalformedArguments(_)
            | Self::MissingEnv(_)
            | Self::UnknownCommand(_)
            | Self::NoEtcdEndpoints => ErrorKind::Config,
            Self::DelegateNotFound { .. }
            | Self::DelegateFailed { .. }
            | Self::NoAddressAssigned(_)
            | Self::MissingIpv4 => ErrorKind::Delegate,
            Self::Store { .. } | Self::StoreUnavailable(_) | Self::LabelLookup { .. } => {
                ErrorKind::Store
            }
            Self::Namespace { .. } | Self::LinkCommand { .. } | Self::DeviceNotFound(_) => {
                ErrorKind::Networking
            }
            Self::Io(_) | Self::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Returns true for a missing network device.
    pub fn is_device_not_found(&self) -> bool {
        matches!(self, Self::DeviceNotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
