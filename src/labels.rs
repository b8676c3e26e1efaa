//! Workload label lookup.
//!
//! Kubernetes endpoints carry the pod's labels plus a `calico/k8s_ns` entry
//! naming the pod namespace. The labels come from the cluster API through
//! [`LabelSource`]; [`KubeLabelSource`] is the HTTP implementation.

use crate::config::Policy;
use crate::constants::K8S_NAMESPACE_LABEL;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

/// Source of pod labels.
#[async_trait]
pub trait LabelSource: Send + Sync {
    /// Returns the labels of pod `namespace/name` as stored by the cluster.
    async fn get_labels(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>>;
}

/// Adds the namespace entry every Kubernetes endpoint carries.
pub fn with_namespace_label(
    mut labels: BTreeMap<String, String>,
    namespace: &str,
) -> BTreeMap<String, String> {
    labels.insert(K8S_NAMESPACE_LABEL.to_string(), namespace.to_string());
    labels
}

// =============================================================================
// Pod document
// =============================================================================

/// The slice of a Pod object this plugin reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pod {
    #[serde(default)]
    pub metadata: PodMetadata,
}

/// Pod metadata. `labels` is `None` when the API omits the field and
/// `Some` (possibly empty) when it is present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodMetadata {
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
}

impl Pod {
    /// Decodes a pod document.
    pub fn from_json(body: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Consumes the pod, returning its labels (empty when absent).
    pub fn into_labels(self) -> BTreeMap<String, String> {
        self.metadata.labels.unwrap_or_default()
    }
}

// =============================================================================
// Kubernetes API client
// =============================================================================

/// [`LabelSource`] reading pods from the Kubernetes API.
///
/// The HTTP client is built on the first lookup, so plain CNI invocations
/// never touch the certificate files.
#[derive(Debug)]
pub struct KubeLabelSource {
    policy: Policy,
    api_root: String,
    client: OnceLock<reqwest::Client>,
}

impl KubeLabelSource {
    pub fn from_policy(policy: &Policy) -> Self {
        Self {
            policy: policy.clone(),
            api_root: policy.api_root().trim_end_matches('/').to_string(),
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> Result<&reqwest::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = build_client(&self.policy)?;
        Ok(self.client.get_or_init(|| client))
    }

    fn token(&self) -> Option<&str> {
        self.policy
            .k8s_auth_token
            .as_deref()
            .filter(|t| !t.is_empty())
    }

    fn pod_url(&self, namespace: &str, name: &str) -> String {
        format!("{}/namespaces/{namespace}/pods/{name}", self.api_root)
    }
}

/// Builds a client from the policy block.
///
/// A client certificate is used when both certificate and key are set;
/// a CA bundle replaces the system roots when set.
///
/// # Errors
///
/// Fails if a certificate file cannot be read or parsed.
fn build_client(policy: &Policy) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();

    if let (Some(cert), Some(key)) = (
        policy.k8s_client_certificate.as_deref().filter(|s| !s.is_empty()),
        policy.k8s_client_key.as_deref().filter(|s| !s.is_empty()),
    ) {
        let mut pem = std::fs::read(cert)?;
        pem.push(b'\n');
        pem.extend(std::fs::read(key)?);
        let identity = reqwest::Identity::from_pem(&pem)
            .map_err(|e| Error::InvalidConfig(format!("client certificate {cert}: {e}")))?;
        builder = builder.identity(identity);
    }

    if let Some(ca) = policy
        .k8s_certificate_authority
        .as_deref()
        .filter(|s| !s.is_empty())
    {
        let pem = std::fs::read(ca)?;
        let cert = reqwest::Certificate::from_pem(&pem)
            .map_err(|e| Error::InvalidConfig(format!("certificate authority {ca}: {e}")))?;
        builder = builder.tls_built_in_root_certs(false).add_root_certificate(cert);
    }

    builder
        .build()
        .map_err(|e| Error::InvalidConfig(format!("kubernetes client: {e}")))
}

#[async_trait]
impl LabelSource for KubeLabelSource {
    async fn get_labels(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>> {
        let lookup_err = |reason: String| Error::LabelLookup {
            namespace: namespace.to_string(),
            name: name.to_string(),
            reason,
        };

        let url = self.pod_url(namespace, name);
        debug!(%url, "Fetching pod labels");

        let mut request = self.client()?.get(&url);
        if let Some(token) = self.token() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| lookup_err(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| lookup_err(e.to_string()))?;

        if !status.is_success() {
            return Err(lookup_err(format!(
                "HTTP {status}: {}",
                String::from_utf8_lossy(&body).trim()
            )));
        }

        let pod = Pod::from_json(&body).map_err(|e| lookup_err(format!("invalid pod: {e}")))?;
        Ok(pod.into_labels())
    }
}
