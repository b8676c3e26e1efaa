//! Tests for error types.
//!
//! Validates display formatting and the category every variant maps to.

use calico_cni::error::{Error, ErrorKind};
use std::path::PathBuf;

// =============================================================================
// Display Tests
// =============================================================================

#[test]
fn test_invalid_network_name_display() {
    let msg = Error::InvalidNetworkName("bad name!".to_string()).to_string();
    assert!(msg.contains("bad name!"), "should include the name");
    assert!(msg.contains("_.-"), "should list the allowed symbols");
}

#[test]
fn test_delegate_failed_display() {
    let err = Error::DelegateFailed {
        plugin: "host-local".to_string(),
        reason: "no addresses available".to_string(),
    };
    let msg = err.to_string();
    assert!(msg.contains("host-local"), "should include plugin");
    assert!(msg.contains("no addresses available"), "should include reason");
}

#[test]
fn test_missing_env_display() {
    let msg = Error::MissingEnv("CNI_NETNS").to_string();
    assert!(msg.contains("CNI_NETNS"));
}

#[test]
fn test_namespace_display() {
    let err = Error::Namespace {
        path: PathBuf::from("/proc/42/ns/net"),
        reason: "setns: Operation not permitted".to_string(),
    };
    let msg = err.to_string();
    assert!(msg.contains("/proc/42/ns/net"));
    assert!(msg.contains("Operation not permitted"));
}

#[test]
fn test_label_lookup_display() {
    let err = Error::LabelLookup {
        namespace: "default".to_string(),
        name: "web".to_string(),
        reason: "HTTP 404".to_string(),
    };
    assert!(err.to_string().contains("default/web"));
}

// =============================================================================
// Category Tests
// =============================================================================

#[test]
fn test_config_errors() {
    for err in [
        Error::InvalidConfig("x".into()),
        Error::InvalidNetworkName("x".into()),
        Error::MalformedArguments("x".into()),
        Error::MissingEnv("CNI_COMMAND"),
        Error::UnknownCommand("CHECK".into()),
        Error::NoEtcdEndpoints,
    ] {
        assert_eq!(err.kind(), ErrorKind::Config, "{err}");
    }
}

#[test]
fn test_delegate_errors() {
    for err in [
        Error::DelegateNotFound {
            plugin: "x".into(),
            path: "/opt/cni/bin".into(),
        },
        Error::DelegateFailed {
            plugin: "x".into(),
            reason: "y".into(),
        },
        Error::NoAddressAssigned("x".into()),
        Error::MissingIpv4,
    ] {
        assert_eq!(err.kind(), ErrorKind::Delegate, "{err}");
    }
}

#[test]
fn test_store_errors() {
    for err in [
        Error::Store {
            key: "/calico/v1".into(),
            reason: "y".into(),
        },
        Error::StoreUnavailable("connection refused".into()),
        Error::LabelLookup {
            namespace: "a".into(),
            name: "b".into(),
            reason: "c".into(),
        },
    ] {
        assert_eq!(err.kind(), ErrorKind::Store, "{err}");
    }
}

#[test]
fn test_networking_errors() {
    let missing = Error::DeviceNotFound("eth0".into());
    assert!(missing.is_device_not_found());
    assert_eq!(missing.kind(), ErrorKind::Networking);

    let link = Error::LinkCommand {
        command: "link add eth0".into(),
        reason: "File exists".into(),
    };
    assert!(!link.is_device_not_found());
    assert_eq!(link.kind(), ErrorKind::Networking);
}

#[test]
fn test_io_conversion() {
    let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(matches!(err, Error::Io(_)));
    assert_eq!(err.kind(), ErrorKind::Internal);
}

#[test]
fn test_kind_display() {
    assert_eq!(ErrorKind::Config.to_string(), "config");
    assert_eq!(ErrorKind::Networking.to_string(), "networking");
}
