//! # Endpoint Store Client
//!
//! Typed access to endpoint and profile records in a distributed key-value
//! store. Records are addressed deterministically from the workload identity
//! (see [`keys`]), so a DEL can find what an earlier ADD wrote without any
//! local state.
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Datastore                                    │
//! │  get/write/delete endpoint, profile exists   │
//! │  JSON encoding, key construction             │
//! └──────────────────────┬───────────────────────┘
//!                        │ KvBackend
//!          ┌─────────────┴─────────────┐
//!  ┌───────▼──────┐            ┌───────▼──────┐
//!  │ EtcdBackend  │            │ MemoryBackend│
//!  │ etcd v2 HTTP │            │ in-process   │
//!  └──────────────┘            └──────────────┘
//! ```
//!
//! ## Consistency
//!
//! Writes are unconditional overwrites; there is no compare-and-swap. Two
//! first-ADDs racing on the same new profile both see it absent and both
//! write it, the later write winning. Both writes carry identical content
//! for a given network name (see [`Profile::for_network`]).

pub mod etcd;
pub mod keys;
pub mod memory;
pub mod model;

pub use etcd::EtcdBackend;
pub use memory::MemoryBackend;
pub use model::{Action, Endpoint, EndpointState, Profile, Rule, Rules};

use crate::error::{Error, Result};
use crate::identity::WorkloadIdentity;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Raw key-value operations the datastore needs.
///
/// Keys are `/`-separated paths. A key may also name a directory, in which
/// case `exists` and `delete` act on everything beneath it.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Reads a value. `None` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a value, replacing any previous one.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Deletes a key or directory recursively.
    ///
    /// Returns `Ok(false)` if nothing existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Returns true if a key or directory exists.
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Typed endpoint and profile access on top of a [`KvBackend`].
#[derive(Clone)]
pub struct Datastore {
    backend: Arc<dyn KvBackend>,
}

impl Datastore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    /// Reads the endpoint of a workload. `None` means first ADD.
    pub async fn get_endpoint(&self, identity: &WorkloadIdentity) -> Result<Option<Endpoint>> {
        let key = keys::endpoint_key(identity);
        let Some(raw) = self.backend.get(&key).await? else {
            debug!(%key, "No endpoint stored");
            return Ok(None);
        };

        let endpoint = serde_json::from_str(&raw).map_err(|e| Error::Store {
            key: key.clone(),
            reason: format!("invalid endpoint record: {e}"),
        })?;
        Ok(Some(endpoint))
    }

    /// Writes the endpoint of a workload. Last writer wins.
    pub async fn write_endpoint(
        &self,
        identity: &WorkloadIdentity,
        endpoint: &Endpoint,
    ) -> Result<()> {
        let key = keys::endpoint_key(identity);
        let value = serde_json::to_string(endpoint)?;
        self.backend.put(&key, &value).await?;
        debug!(%key, "Wrote endpoint");
        Ok(())
    }

    /// Deletes everything stored for a workload.
    ///
    /// Deleting an absent workload succeeds. Returns whether anything was
    /// removed.
    pub async fn delete_endpoint(&self, identity: &WorkloadIdentity) -> Result<bool> {
        let dir = keys::workload_dir(identity);
        let removed = self.backend.delete(&dir).await?;
        debug!(key = %dir, removed, "Deleted workload");
        Ok(removed)
    }

    /// Returns true if the profile exists.
    pub async fn profile_exists(&self, profile_id: &str) -> Result<bool> {
        self.backend.exists(&keys::profile_dir(profile_id)).await
    }

    /// Writes a profile's rules and tags. Last writer wins.
    pub async fn write_profile(&self, profile: &Profile) -> Result<()> {
        let rules = serde_json::to_string(&profile.rules)?;
        let tags = serde_json::to_string(&profile.tags)?;
        self.backend
            .put(&keys::profile_rules_key(&profile.id), &rules)
            .await?;
        self.backend
            .put(&keys::profile_tags_key(&profile.id), &tags)
            .await?;
        debug!(profile = %profile.id, "Wrote profile");
        Ok(())
    }

    /// Reads a profile back. `None` if either half is missing.
    pub async fn get_profile(&self, profile_id: &str) -> Result<Option<Profile>> {
        let rules_key = keys::profile_rules_key(profile_id);
        let tags_key = keys::profile_tags_key(profile_id);

        let (Some(rules), Some(tags)) = (
            self.backend.get(&rules_key).await?,
            self.backend.get(&tags_key).await?,
        ) else {
            return Ok(None);
        };

        let decode_err = |key: &str, e: serde_json::Error| Error::Store {
            key: key.to_string(),
            reason: e.to_string(),
        };

        Ok(Some(Profile {
            id: profile_id.to_string(),
            rules: serde_json::from_str(&rules).map_err(|e| decode_err(&rules_key, e))?,
            tags: serde_json::from_str(&tags).map_err(|e| decode_err(&tags_key, e))?,
        }))
    }
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore").finish_non_exhaustive()
    }
}
