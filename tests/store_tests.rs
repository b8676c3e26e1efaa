//! Tests for the endpoint store client.
//!
//! The datastore layer runs over [`MemoryBackend`]. The etcd backend is
//! exercised against a canned HTTP responder on a loopback socket.

use calico_cni::error::{Error, ErrorKind};
use calico_cni::identity::{Orchestrator, WorkloadIdentity};
use calico_cni::store::{
    keys, Datastore, Endpoint, EndpointState, EtcdBackend, KvBackend, MemoryBackend, Profile,
};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};

fn identity() -> WorkloadIdentity {
    WorkloadIdentity {
        hostname: "node-1".to_string(),
        orchestrator: Orchestrator::Cni,
        workload_id: "c1".to_string(),
    }
}

fn endpoint() -> Endpoint {
    Endpoint {
        state: EndpointState::Active,
        name: "calic1".to_string(),
        mac: "ee:ee:ee:ee:ee:01".to_string(),
        ipv4_nets: vec!["10.0.0.5/32".parse().unwrap()],
        ipv6_nets: Vec::new(),
        profile_ids: vec!["net1".to_string()],
        labels: BTreeMap::new(),
    }
}

fn memory_store() -> (Arc<MemoryBackend>, Datastore) {
    let backend = Arc::new(MemoryBackend::new());
    (backend.clone(), Datastore::new(backend))
}

// =============================================================================
// Key Layout Tests
// =============================================================================

#[test]
fn test_endpoint_key_layout() {
    assert_eq!(
        keys::endpoint_key(&identity()),
        "/calico/v1/host/node-1/workload/cni/c1/endpoint"
    );

    let pod = WorkloadIdentity {
        orchestrator: Orchestrator::K8s,
        workload_id: "default.web".to_string(),
        ..identity()
    };
    assert_eq!(
        keys::workload_dir(&pod),
        "/calico/v1/host/node-1/workload/k8s/default.web"
    );
}

#[test]
fn test_profile_key_layout() {
    assert_eq!(
        keys::profile_rules_key("k8s_ns.default"),
        "/calico/v1/policy/profile/k8s_ns.default/rules"
    );
    assert_eq!(
        keys::profile_tags_key("net1"),
        "/calico/v1/policy/profile/net1/tags"
    );
}

// =============================================================================
// Datastore Tests
// =============================================================================

#[tokio::test]
async fn test_endpoint_round_trip() {
    let (_, store) = memory_store();

    assert!(store.get_endpoint(&identity()).await.unwrap().is_none());
    store.write_endpoint(&identity(), &endpoint()).await.unwrap();
    assert_eq!(
        store.get_endpoint(&identity()).await.unwrap(),
        Some(endpoint())
    );
}

#[tokio::test]
async fn test_endpoint_json_shape() {
    let (backend, store) = memory_store();
    store.write_endpoint(&identity(), &endpoint()).await.unwrap();

    let raw = backend.value(&keys::endpoint_key(&identity())).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["state"], "active");
    assert_eq!(json["name"], "calic1");
    assert_eq!(json["mac"], "ee:ee:ee:ee:ee:01");
    assert_eq!(json["ipv4_nets"][0], "10.0.0.5/32");
    assert_eq!(json["ipv6_nets"], serde_json::json!([]));
    assert_eq!(json["profile_ids"], serde_json::json!(["net1"]));
    assert_eq!(json["labels"], serde_json::json!({}));
}

#[tokio::test]
async fn test_sparse_endpoint_record_decodes() {
    let (backend, store) = memory_store();
    backend
        .put(
            &keys::endpoint_key(&identity()),
            r#"{"state":"active","name":"calic1","ipv4_nets":["10.0.0.5/32"]}"#,
        )
        .await
        .unwrap();

    let endpoint = store.get_endpoint(&identity()).await.unwrap().unwrap();
    assert!(endpoint.profile_ids.is_empty());
    assert!(endpoint.ipv6_nets.is_empty());
    assert!(endpoint.labels.is_empty());
}

#[tokio::test]
async fn test_corrupt_endpoint_is_store_error() {
    let (backend, store) = memory_store();
    backend
        .put(&keys::endpoint_key(&identity()), "{not json")
        .await
        .unwrap();

    let err = store.get_endpoint(&identity()).await.unwrap_err();
    assert!(matches!(err, Error::Store { .. }));
    assert_eq!(err.kind(), ErrorKind::Store);
}

#[tokio::test]
async fn test_delete_endpoint_is_idempotent() {
    let (backend, store) = memory_store();
    store.write_endpoint(&identity(), &endpoint()).await.unwrap();

    assert!(store.delete_endpoint(&identity()).await.unwrap());
    assert!(!store.delete_endpoint(&identity()).await.unwrap());
    assert!(backend.is_empty());
}

#[tokio::test]
async fn test_delete_endpoint_leaves_siblings() {
    let (backend, store) = memory_store();
    let other = WorkloadIdentity {
        workload_id: "c10".to_string(),
        ..identity()
    };
    store.write_endpoint(&identity(), &endpoint()).await.unwrap();
    store.write_endpoint(&other, &endpoint()).await.unwrap();

    store.delete_endpoint(&identity()).await.unwrap();
    assert_eq!(backend.keys(), vec![keys::endpoint_key(&other)]);
}

#[tokio::test]
async fn test_profile_exists_and_round_trip() {
    let (_, store) = memory_store();
    assert!(!store.profile_exists("net1").await.unwrap());

    let profile = Profile::for_network("net1", "net1", false);
    store.write_profile(&profile).await.unwrap();

    assert!(store.profile_exists("net1").await.unwrap());
    assert!(!store.profile_exists("net").await.unwrap());
    assert_eq!(store.get_profile("net1").await.unwrap(), Some(profile));
}

// =============================================================================
// etcd Backend Tests
// =============================================================================

/// A request as seen by the canned responder.
#[derive(Debug, Clone)]
struct Seen {
    request_line: String,
    body: String,
}

/// Serves `responses` in order, one per connection, then stops.
fn canned_etcd(responses: Vec<(u16, &'static str)>) -> (String, Arc<Mutex<Vec<Seen>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    std::thread::spawn(move || {
        for (status, body) in responses {
            let Ok((stream, _)) = listener.accept() else {
                return;
            };
            let mut reader = BufReader::new(stream);

            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            let mut content_length = 0usize;
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).unwrap();
                if header == "\r\n" || header.is_empty() {
                    break;
                }
                if let Some((name, value)) = header.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).unwrap();

            log.lock().unwrap().push(Seen {
                request_line: request_line.trim_end().to_string(),
                body: String::from_utf8_lossy(&request_body).into_owned(),
            });

            let response = format!(
                "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let mut stream = reader.into_inner();
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
        }
    });

    (url, seen)
}

const NOT_FOUND: &str = r#"{"errorCode":100,"message":"Key not found","cause":"/calico","index":7}"#;

#[tokio::test]
async fn test_etcd_get_value() {
    let (url, seen) = canned_etcd(vec![(
        200,
        r#"{"action":"get","node":{"key":"/calico/v1/x","value":"hello","modifiedIndex":5}}"#,
    )]);
    let backend = EtcdBackend::new(vec![url]).unwrap();

    assert_eq!(
        backend.get("/calico/v1/x").await.unwrap().as_deref(),
        Some("hello")
    );
    assert_eq!(
        seen.lock().unwrap()[0].request_line,
        "GET /v2/keys/calico/v1/x HTTP/1.1"
    );
}

#[tokio::test]
async fn test_etcd_missing_key_is_absent() {
    let (url, _) = canned_etcd(vec![(404, NOT_FOUND), (404, NOT_FOUND), (404, NOT_FOUND)]);
    let backend = EtcdBackend::new(vec![url]).unwrap();

    assert_eq!(backend.get("/calico/v1/x").await.unwrap(), None);
    assert!(!backend.exists("/calico/v1/x").await.unwrap());
    assert!(!backend.delete("/calico/v1/x").await.unwrap());
}

#[tokio::test]
async fn test_etcd_put_sends_form_value() {
    let (url, seen) = canned_etcd(vec![(
        201,
        r#"{"action":"set","node":{"key":"/calico/v1/x","value":"[\"net1\"]"}}"#,
    )]);
    let backend = EtcdBackend::new(vec![url]).unwrap();

    backend.put("/calico/v1/x", r#"["net1"]"#).await.unwrap();

    let seen = seen.lock().unwrap();
    assert!(seen[0].request_line.starts_with("PUT /v2/keys/calico/v1/x "));
    assert_eq!(seen[0].body, "value=%5B%22net1%22%5D");
}

#[tokio::test]
async fn test_etcd_delete_is_recursive() {
    let (url, seen) = canned_etcd(vec![(
        200,
        r#"{"action":"delete","node":{"key":"/a","dir":true}}"#,
    )]);
    let backend = EtcdBackend::new(vec![url]).unwrap();

    assert!(backend.delete("/calico/v1/host/node-1/workload/cni/c1").await.unwrap());
    assert_eq!(
        seen.lock().unwrap()[0].request_line,
        "DELETE /v2/keys/calico/v1/host/node-1/workload/cni/c1?recursive=true HTTP/1.1"
    );
}

#[tokio::test]
async fn test_etcd_directory_is_not_a_value() {
    let (url, _) = canned_etcd(vec![(
        200,
        r#"{"action":"get","node":{"key":"/calico/v1","dir":true,"nodes":[]}}"#,
    )]);
    let backend = EtcdBackend::new(vec![url]).unwrap();

    assert!(matches!(
        backend.get("/calico/v1").await,
        Err(Error::Store { .. })
    ));
}

#[tokio::test]
async fn test_etcd_other_errors_are_surfaced() {
    let (url, _) = canned_etcd(vec![(
        401,
        r#"{"errorCode":110,"message":"The request requires user authentication","cause":"Insufficient credentials"}"#,
    )]);
    let backend = EtcdBackend::new(vec![url]).unwrap();

    let err = backend.put("/calico/v1/x", "1").await.unwrap_err();
    assert!(err.to_string().contains("requires user authentication"));
    assert_eq!(err.kind(), ErrorKind::Store);
}

#[tokio::test]
async fn test_etcd_fails_over_to_next_endpoint() {
    let (url, seen) = canned_etcd(vec![(
        200,
        r#"{"action":"get","node":{"key":"/calico/v1/x","value":"ok"}}"#,
    )]);
    // Port 1 on loopback refuses connections.
    let backend = EtcdBackend::new(vec!["http://127.0.0.1:1".to_string(), url]).unwrap();

    assert_eq!(backend.get("/calico/v1/x").await.unwrap().as_deref(), Some("ok"));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_datastore_over_etcd() {
    let (url, _) = canned_etcd(vec![(404, NOT_FOUND)]);
    let store = Datastore::new(Arc::new(EtcdBackend::new(vec![url]).unwrap()));

    assert!(store.get_endpoint(&identity()).await.unwrap().is_none());
}
