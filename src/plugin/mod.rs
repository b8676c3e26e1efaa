//! # ADD and DEL Orchestrators
//!
//! [`Plugin`] ties the collaborators together:
//!
//! | Collaborator    | Trait / type                         | Used by   |
//! |-----------------|--------------------------------------|-----------|
//! | Address manager | [`IpamDelegate`]                     | ADD, DEL  |
//! | Datastore       | [`Datastore`]                        | ADD, DEL  |
//! | Wiring          | [`NetworkWiring`]                    | ADD, DEL  |
//! | Pod labels      | [`LabelSource`] (optional)           | ADD (k8s) |
//!
//! There is no transaction across them. ADD fails fast and leaves whatever
//! it already did in place; DEL attempts every cleanup step and reports the
//! first failure.

mod add;
mod del;

pub use add::AddStage;
pub use del::{CleanupStep, Teardown};

use crate::config::{CmdArgs, NetConf};
use crate::error::Result;
use crate::identity::PodRef;
use crate::ipam::IpamDelegate;
use crate::labels::{with_namespace_label, LabelSource};
use crate::store::Datastore;
use crate::types::CniResult;
use crate::wiring::NetworkWiring;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The CNI plugin with its collaborators.
pub struct Plugin {
    hostname: String,
    store: Datastore,
    ipam: Arc<dyn IpamDelegate>,
    wiring: Arc<dyn NetworkWiring>,
    labels: Option<Arc<dyn LabelSource>>,
}

impl Plugin {
    /// Creates a plugin for the given host.
    ///
    /// `hostname` is used unless the network configuration overrides it.
    pub fn new(
        hostname: impl Into<String>,
        store: Datastore,
        ipam: Arc<dyn IpamDelegate>,
        wiring: Arc<dyn NetworkWiring>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            store,
            ipam,
            wiring,
            labels: None,
        }
    }

    /// Sets the source of pod labels for Kubernetes workloads.
    #[must_use]
    pub fn with_label_source(mut self, labels: Arc<dyn LabelSource>) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn store(&self) -> &Datastore {
        &self.store
    }

    /// Attaches a container to the network.
    ///
    /// # Errors
    ///
    /// The first failure of any step; nothing already done is rolled back.
    pub async fn cmd_add(&self, args: &CmdArgs, conf: &NetConf) -> Result<CniResult> {
        add::run(self, args, conf).await
    }

    /// Detaches a container from the network.
    ///
    /// # Errors
    ///
    /// The first failure among the cleanup steps, all of which are attempted.
    pub async fn cmd_del(&self, args: &CmdArgs, conf: &NetConf) -> Result<()> {
        del::run(self, args, conf).await
    }

    fn hostname_for<'a>(&'a self, conf: &'a NetConf) -> &'a str {
        conf.hostname
            .as_deref()
            .filter(|h| !h.is_empty())
            .unwrap_or(&self.hostname)
    }

    /// Labels for a pod endpoint, including the namespace entry.
    async fn pod_labels(&self, pod: &PodRef) -> Result<BTreeMap<String, String>> {
        let labels = match &self.labels {
            Some(source) => source.get_labels(&pod.namespace, &pod.name).await?,
            None => BTreeMap::new(),
        };
        Ok(with_namespace_label(labels, &pod.namespace))
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("hostname", &self.hostname)
            .field("labels", &self.labels.is_some())
            .finish_non_exhaustive()
    }
}
