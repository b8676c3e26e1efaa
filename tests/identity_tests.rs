//! Tests for workload identity resolution.
//!
//! Validates the plain CNI and Kubernetes branches, argument parsing and
//! network name validation.

use calico_cni::error::{Error, ErrorKind};
use calico_cni::identity::{
    parse_cni_args, resolve, resolve_for_teardown, validate_network_name, Orchestrator, PodRef,
};

const POD_ARGS: &str =
    "IgnoreUnknown=1;K8S_POD_NAMESPACE=kube-system;K8S_POD_NAME=dns-7f9c;K8S_POD_INFRA_CONTAINER_ID=deadbeef";

// =============================================================================
// Branch Selection Tests
// =============================================================================

#[test]
fn test_plain_cni_identity() {
    let resolved = resolve("node-1", "0123456789abcdef", "net1", "").unwrap();

    assert_eq!(resolved.identity.hostname, "node-1");
    assert_eq!(resolved.identity.orchestrator, Orchestrator::Cni);
    assert_eq!(resolved.identity.workload_id, "0123456789abcdef");
    assert_eq!(resolved.profile_id, "net1");
    assert!(resolved.pod.is_none());
    assert!(!resolved.is_k8s());
}

#[test]
fn test_pod_identity() {
    let resolved = resolve("node-1", "0123456789abcdef", "net1", POD_ARGS).unwrap();

    assert_eq!(resolved.identity.orchestrator, Orchestrator::K8s);
    assert_eq!(resolved.identity.workload_id, "kube-system.dns-7f9c");
    assert_eq!(resolved.profile_id, "k8s_ns.kube-system");
    assert_eq!(
        resolved.pod,
        Some(PodRef {
            namespace: "kube-system".to_string(),
            name: "dns-7f9c".to_string(),
            infra_container_id: Some("deadbeef".to_string()),
        })
    );
}

#[test]
fn test_unrelated_args_keep_plain_branch() {
    let resolved = resolve("node-1", "c1", "net1", "IgnoreUnknown=1;FOO=bar").unwrap();
    assert_eq!(resolved.identity.orchestrator, Orchestrator::Cni);
}

#[test]
fn test_resolution_is_deterministic() {
    let first = resolve("node-1", "c1", "net1", POD_ARGS).unwrap();
    for _ in 0..3 {
        assert_eq!(resolve("node-1", "c1", "net1", POD_ARGS).unwrap(), first);
    }
}

#[test]
fn test_teardown_matches_add_identity() {
    let add = resolve("node-1", "c1", "net1", POD_ARGS).unwrap();
    let del = resolve_for_teardown("node-1", "c1", "net1", POD_ARGS).unwrap();
    assert_eq!(add.identity, del.identity);
}

#[test]
fn test_identity_display() {
    let resolved = resolve("node-1", "c1", "net1", "").unwrap();
    assert_eq!(resolved.identity.to_string(), "node-1/cni/c1");
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_invalid_network_name_is_config_error() {
    let err = resolve("node-1", "c1", "bad name!", "").unwrap_err();
    assert!(matches!(err, Error::InvalidNetworkName(ref n) if n == "bad name!"));
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn test_name_checked_before_arguments() {
    let err = resolve("node-1", "c1", "bad name!", "garbage").unwrap_err();
    assert!(matches!(err, Error::InvalidNetworkName(_)));
}

#[test]
fn test_valid_names() {
    for name in ["net1", "calico-net", "a.b.c", "under_score", "X-1.2_y"] {
        assert!(validate_network_name(name).is_ok(), "{name} should be valid");
    }
}

#[test]
fn test_malformed_args() {
    for args in ["K8S_POD_NAME", "A=1;;B=2", "A=1=2", ";"] {
        let err = parse_cni_args(args).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config, "{args}");
    }
}

#[test]
fn test_args_allow_empty_values() {
    let parsed = parse_cni_args("A=;B=2").unwrap();
    assert_eq!(parsed.get("A").map(String::as_str), Some(""));
    assert_eq!(parsed.get("B").map(String::as_str), Some("2"));
}
