//! Tests for network configuration and invocation context.

use calico_cni::config::{CmdArgs, Command, NetConf};
use calico_cni::error::{Error, ErrorKind};
use std::collections::HashMap;

const FULL: &str = r#"{
    "cniVersion": "0.2.0",
    "name": "net1",
    "type": "calico",
    "mtu": 1450,
    "hostname": "node-7",
    "log_level": "debug",
    "etcd_endpoints": "https://10.0.0.1:2379/, https://10.0.0.2:2379",
    "ipam": {
        "type": "calico-ipam",
        "assign_ipv6": true,
        "ipv4_pools": ["10.0.0.0/16"]
    },
    "policy": {
        "type": "k8s",
        "k8s_auth_token": "secret",
        "k8s_certificate_authority": "/etc/kubernetes/ca.pem"
    }
}"#;

// =============================================================================
// NetConf Tests
// =============================================================================

#[test]
fn test_full_config() {
    let conf = NetConf::from_bytes(FULL.as_bytes()).unwrap();

    assert_eq!(conf.cni_version.as_deref(), Some("0.2.0"));
    assert_eq!(conf.name, "net1");
    assert_eq!(conf.plugin_type, "calico");
    assert_eq!(conf.mtu, 1450);
    assert_eq!(conf.hostname.as_deref(), Some("node-7"));
    assert_eq!(conf.log_level.as_deref(), Some("debug"));
    assert!(conf.has_policy());

    assert_eq!(conf.ipam.plugin_type, "calico-ipam");
    assert!(conf.ipam.wants_ipv4());
    assert!(conf.ipam.wants_ipv6());
    assert_eq!(
        conf.ipam.extra.get("ipv4_pools"),
        Some(&serde_json::json!(["10.0.0.0/16"]))
    );

    let policy = conf.policy.unwrap();
    assert_eq!(policy.policy_type, "k8s");
    assert_eq!(policy.api_root(), "https://10.100.0.1:443/api/v1");
    assert_eq!(policy.k8s_auth_token.as_deref(), Some("secret"));
}

#[test]
fn test_endpoint_list_is_split_and_trimmed() {
    let conf = NetConf::from_bytes(FULL.as_bytes()).unwrap();
    assert_eq!(
        conf.etcd_endpoints().unwrap(),
        vec![
            "https://10.0.0.1:2379".to_string(),
            "https://10.0.0.2:2379".to_string()
        ]
    );
}

#[test]
fn test_authority_uses_scheme() {
    let conf = NetConf::from_bytes(
        br#"{"name":"n","type":"calico","etcd_authority":"etcd:4001","etcd_scheme":"https","ipam":{"type":"host-local"}}"#,
    )
    .unwrap();
    assert_eq!(conf.etcd_endpoints().unwrap(), vec!["https://etcd:4001".to_string()]);
}

#[test]
fn test_missing_etcd_is_config_error() {
    let conf =
        NetConf::from_bytes(br#"{"name":"n","type":"calico","ipam":{"type":"host-local"}}"#)
            .unwrap();
    let err = conf.etcd_endpoints().unwrap_err();
    assert!(matches!(err, Error::NoEtcdEndpoints));
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn test_malformed_json_is_config_error() {
    let err = NetConf::from_bytes(b"{\"name\": ").unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn test_ipam_section_is_required() {
    assert!(NetConf::from_bytes(br#"{"name":"n","type":"calico"}"#).is_err());
}

// =============================================================================
// CmdArgs Tests
// =============================================================================

fn lookup(vars: &[(&'static str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<&'static str, String> =
        vars.iter().map(|(k, v)| (*k, v.to_string())).collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_add_context() {
    let args = CmdArgs::from_lookup(
        lookup(&[
            ("CNI_COMMAND", "ADD"),
            ("CNI_CONTAINERID", "c1"),
            ("CNI_NETNS", "/proc/42/ns/net"),
            ("CNI_IFNAME", "eth0"),
            ("CNI_PATH", "/opt/cni/bin"),
            ("CNI_ARGS", "K8S_POD_NAME=web"),
        ]),
        b"{}".to_vec(),
    )
    .unwrap();

    assert_eq!(args.command, Command::Add);
    assert_eq!(args.container_id, "c1");
    assert_eq!(args.netns_path().unwrap().to_str(), Some("/proc/42/ns/net"));
    assert_eq!(args.if_name, "eth0");
    assert_eq!(args.cni_path, "/opt/cni/bin");
    assert_eq!(args.args, "K8S_POD_NAME=web");
    assert_eq!(args.stdin_data, b"{}");
}

#[test]
fn test_add_requires_ifname() {
    let err = CmdArgs::from_lookup(
        lookup(&[
            ("CNI_COMMAND", "ADD"),
            ("CNI_CONTAINERID", "c1"),
            ("CNI_NETNS", "/proc/42/ns/net"),
        ]),
        Vec::new(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::MissingEnv("CNI_IFNAME")));
}

#[test]
fn test_del_requires_container_id() {
    let err = CmdArgs::from_lookup(lookup(&[("CNI_COMMAND", "DEL")]), Vec::new()).unwrap_err();
    assert!(matches!(err, Error::MissingEnv("CNI_CONTAINERID")));
}

#[test]
fn test_version_needs_nothing_else() {
    let args = CmdArgs::from_lookup(lookup(&[("CNI_COMMAND", "VERSION")]), Vec::new()).unwrap();
    assert_eq!(args.command, Command::Version);
    assert!(args.netns_path().is_none());
}

#[test]
fn test_command_display_round_trips() {
    for command in [Command::Add, Command::Del, Command::Version] {
        assert_eq!(command.to_string().parse::<Command>().unwrap(), command);
    }
}
