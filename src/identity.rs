//! Workload identity resolution.
//!
//! Maps an invocation (container ID, CNI_ARGS, network name) onto the
//! `(hostname, orchestrator, workload)` tuple that keys the endpoint record,
//! plus the profile the endpoint belongs to. Resolution is a pure function of
//! its inputs so that ADD and DEL for the same container always land on the
//! same datastore key without any local state.

use crate::constants::{
    K8S_POD_INFRA_CONTAINER_ID, K8S_POD_NAME, K8S_POD_NAMESPACE, K8S_PROFILE_PREFIX,
    ORCHESTRATOR_CNI, ORCHESTRATOR_K8S,
};
use crate::error::{Error, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Orchestrator that owns a workload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Orchestrator {
    /// Plain CNI runtime; the workload is the container.
    Cni,
    /// Kubernetes; the workload is the pod.
    K8s,
}

impl Orchestrator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cni => ORCHESTRATOR_CNI,
            Self::K8s => ORCHESTRATOR_K8S,
        }
    }
}

impl std::fmt::Display for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary key of an endpoint record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkloadIdentity {
    pub hostname: String,
    pub orchestrator: Orchestrator,
    pub workload_id: String,
}

impl std::fmt::Display for WorkloadIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.hostname, self.orchestrator, self.workload_id
        )
    }
}

/// Pod coordinates taken from CNI_ARGS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
    pub infra_container_id: Option<String>,
}

/// Output of [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedWorkload {
    pub identity: WorkloadIdentity,
    pub profile_id: String,
    /// Set when the Kubernetes branch was selected.
    pub pod: Option<PodRef>,
}

impl ResolvedWorkload {
    /// Returns true for Kubernetes pods.
    pub fn is_k8s(&self) -> bool {
        self.pod.is_some()
    }
}

/// Parses a `key=value;key=value` argument string.
///
/// An empty string yields an empty map. Every pair must contain exactly one
/// `=`; anything else is rejected.
///
/// # Errors
///
/// Returns [`Error::MalformedArguments`] naming the first bad pair.
pub fn parse_cni_args(args: &str) -> Result<HashMap<String, String>> {
    let mut parsed = HashMap::new();
    if args.is_empty() {
        return Ok(parsed);
    }

    for pair in args.split(';') {
        let mut parts = pair.split('=');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(key), Some(value), None) => {
                parsed.insert(key.to_string(), value.to_string());
            }
            _ => return Err(Error::MalformedArguments(pair.to_string())),
        }
    }

    Ok(parsed)
}

fn network_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("static pattern is valid"))
}

/// Checks that a network name is usable as a profile ID.
///
/// # Errors
///
/// Returns [`Error::InvalidNetworkName`] on any character outside `[A-Za-z0-9_.-]`.
pub fn validate_network_name(name: &str) -> Result<()> {
    if network_name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidNetworkName(name.to_string()))
    }
}

fn pod_ref(args: &HashMap<String, String>) -> Option<PodRef> {
    let namespace = args.get(K8S_POD_NAMESPACE).filter(|v| !v.is_empty())?;
    let name = args.get(K8S_POD_NAME).filter(|v| !v.is_empty())?;
    Some(PodRef {
        namespace: namespace.clone(),
        name: name.clone(),
        infra_container_id: args
            .get(K8S_POD_INFRA_CONTAINER_ID)
            .filter(|v| !v.is_empty())
            .cloned(),
    })
}

fn build(
    hostname: &str,
    container_id: &str,
    network_name: &str,
    args: &HashMap<String, String>,
) -> ResolvedWorkload {
    match pod_ref(args) {
        Some(pod) => ResolvedWorkload {
            identity: WorkloadIdentity {
                hostname: hostname.to_string(),
                orchestrator: Orchestrator::K8s,
                workload_id: format!("{}.{}", pod.namespace, pod.name),
            },
            profile_id: format!("{K8S_PROFILE_PREFIX}{}", pod.namespace),
            pod: Some(pod),
        },
        None => ResolvedWorkload {
            identity: WorkloadIdentity {
                hostname: hostname.to_string(),
                orchestrator: Orchestrator::Cni,
                workload_id: container_id.to_string(),
            },
            profile_id: network_name.to_string(),
            pod: None,
        },
    }
}

/// Resolves the workload identity and profile for an ADD.
///
/// The network name is validated first, so an invalid name fails before
/// anything else is looked at.
///
/// # Errors
///
/// [`Error::InvalidNetworkName`] or [`Error::MalformedArguments`].
pub fn resolve(
    hostname: &str,
    container_id: &str,
    network_name: &str,
    cni_args: &str,
) -> Result<ResolvedWorkload> {
    validate_network_name(network_name)?;
    let args = parse_cni_args(cni_args)?;
    Ok(build(hostname, container_id, network_name, &args))
}

/// Resolves only what DEL needs: no network name validation.
///
/// # Errors
///
/// [`Error::MalformedArguments`].
pub fn resolve_for_teardown(
    hostname: &str,
    container_id: &str,
    network_name: &str,
    cni_args: &str,
) -> Result<ResolvedWorkload> {
    let args = parse_cni_args(cni_args)?;
    Ok(build(hostname, container_id, network_name, &args))
}
