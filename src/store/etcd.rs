//! etcd v2 keys API backend.
//!
//! | Operation | Request                                  | Absent        |
//! |-----------|------------------------------------------|---------------|
//! | get       | `GET /v2/keys/<key>`                     | 404 / code 100|
//! | put       | `PUT /v2/keys/<key>` form `value=...`    | n/a           |
//! | delete    | `DELETE /v2/keys/<key>?recursive=true`   | 404 / code 100|
//! | exists    | `GET /v2/keys/<key>`                     | 404 / code 100|
//!
//! Endpoints are tried in order; the first one that answers at the HTTP
//! level decides the outcome. Only transport failures move on to the next
//! endpoint.

use super::KvBackend;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

/// etcd error code for "key not found".
const ETCD_KEY_NOT_FOUND: u32 = 100;

#[derive(Debug, Deserialize)]
struct EtcdResponse {
    #[serde(default)]
    node: Option<EtcdNode>,
}

#[derive(Debug, Deserialize)]
struct EtcdNode {
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    dir: bool,
}

#[derive(Debug, Deserialize)]
struct EtcdErrorBody {
    #[serde(rename = "errorCode")]
    error_code: u32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    cause: String,
}

/// Outcome of a request that may legitimately hit a missing key.
enum Reply {
    Found(Response),
    NotFound,
}

/// [`KvBackend`] speaking the etcd v2 HTTP API.
#[derive(Debug, Clone)]
pub struct EtcdBackend {
    client: Client,
    endpoints: Vec<String>,
}

impl EtcdBackend {
    /// Creates a backend for the given endpoint URLs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoEtcdEndpoints`] for an empty list, or
    /// [`Error::StoreUnavailable`] if the HTTP client cannot be built.
    pub fn new(endpoints: Vec<String>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::NoEtcdEndpoints);
        }
        let client = Client::builder()
            .build()
            .map_err(|e| Error::StoreUnavailable(format!("HTTP client: {e}")))?;
        Ok(Self::with_client(client, endpoints))
    }

    /// Creates a backend reusing an existing HTTP client.
    pub fn with_client(client: Client, endpoints: Vec<String>) -> Self {
        Self { client, endpoints }
    }

    fn url(endpoint: &str, key: &str) -> String {
        format!("{endpoint}/v2/keys{key}")
    }

    /// Sends a request to the first endpoint that answers.
    async fn send<F>(&self, key: &str, build: F) -> Result<Reply>
    where
        F: Fn(&Client, String) -> RequestBuilder,
    {
        let mut last_error = String::new();

        for endpoint in &self.endpoints {
            let response = match build(&self.client, Self::url(endpoint, key)).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(%endpoint, error = %e, "etcd endpoint unreachable");
                    last_error = format!("{endpoint}: {e}");
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok(Reply::Found(response));
            }

            let body = response.text().await.unwrap_or_default();
            return match serde_json::from_str::<EtcdErrorBody>(&body) {
                Ok(err) if err.error_code == ETCD_KEY_NOT_FOUND => Ok(Reply::NotFound),
                _ if status == StatusCode::NOT_FOUND => Ok(Reply::NotFound),
                Ok(err) => Err(Error::Store {
                    key: key.to_string(),
                    reason: format!("{} ({}) {}", err.message, err.error_code, err.cause)
                        .trim_end()
                        .to_string(),
                }),
                Err(_) => Err(Error::Store {
                    key: key.to_string(),
                    reason: format!("HTTP {status}: {}", body.trim()),
                }),
            };
        }

        Err(Error::StoreUnavailable(last_error))
    }
}

#[async_trait]
impl KvBackend for EtcdBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let response = match self.send(key, |c, url| c.get(url)).await? {
            Reply::Found(response) => response,
            Reply::NotFound => return Ok(None),
        };

        let body: EtcdResponse = response.json().await.map_err(|e| Error::Store {
            key: key.to_string(),
            reason: format!("invalid response: {e}"),
        })?;

        match body.node {
            Some(node) if node.dir => Err(Error::Store {
                key: key.to_string(),
                reason: "expected a value, found a directory".to_string(),
            }),
            Some(node) => Ok(node.value),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        match self
            .send(key, |c, url| c.put(url).form(&[("value", value)]))
            .await?
        {
            Reply::Found(_) => {
                debug!(%key, "etcd put");
                Ok(())
            }
            Reply::NotFound => Err(Error::Store {
                key: key.to_string(),
                reason: "parent path rejected the write".to_string(),
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match self
            .send(key, |c, url| c.delete(url).query(&[("recursive", "true")]))
            .await?
        {
            Reply::Found(_) => Ok(true),
            Reply::NotFound => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.send(key, |c, url| c.get(url)).await? {
            Reply::Found(_) => Ok(true),
            Reply::NotFound => Ok(false),
        }
    }
}
