//! # calico-cni
//!
//! **CNI network plugin attaching containers to a Calico network**
//!
//! A container runtime execs the plugin once per container with `ADD` or
//! `DEL`. The plugin allocates an address through a delegated IPAM plugin,
//! connects the container namespace to the host with a veth pair, and records
//! the result as an endpoint in a distributed key-value store where the policy
//! agent picks it up.
//!
//! # Architecture Overview
//!
//! ```text
//!            env + stdin                              stdout / exit code
//!                 │                                          ▲
//! ┌───────────────▼──────────────────────────────────────────┴──────────┐
//! │ bin/calico.rs   CmdArgs::from_env, NetConf::from_bytes, tracing     │
//! └───────────────┬─────────────────────────────────────────────────────┘
//!                 │
//! ┌───────────────▼─────────────────────────────────────────────────────┐
//! │ Plugin   cmd_add (fail fast)          cmd_del (all steps attempted) │
//! │            │                             │                          │
//! │   identity::resolve              identity::resolve_for_teardown     │
//! └──┬──────────────┬───────────────────┬────────────────┬──────────────┘
//!    │              │                   │                │
//! ┌──▼─────────┐ ┌──▼──────────────┐ ┌──▼────────────┐ ┌─▼────────────────┐
//! │IpamDelegate│ │ Datastore       │ │ NetworkWiring │ │ LabelSource      │
//! │ ExecIpam   │ │  KvBackend      │ │  VethWiring   │ │  KubeLabelSource │
//! │ (CNI exec) │ │  EtcdBackend    │ │  netns + ip   │ │  (cluster API)   │
//! └────────────┘ └─────────────────┘ └───────────────┘ └──────────────────┘
//! ```
//!
//! # Threading
//!
//! Namespace entry affects only the calling thread. The binary runs on a
//! current-thread tokio runtime, and all namespace work happens inside
//! synchronous closures passed to [`netns::with_netns_path`], so no await
//! point is ever reached while the thread is inside a container namespace.
//!
//! # Example
//!
//! ```rust,ignore
//! use calico_cni::{CmdArgs, Datastore, EtcdBackend, ExecIpam, NetConf, Plugin, VethWiring};
//! use std::sync::Arc;
//!
//! let conf = NetConf::from_bytes(&stdin)?;
//! let args = CmdArgs::from_env(stdin)?;
//! let store = Datastore::new(Arc::new(EtcdBackend::new(conf.etcd_endpoints()?)?));
//! let plugin = Plugin::new("node-1", store, Arc::new(ExecIpam::new()), Arc::new(VethWiring::default()));
//! let result = plugin.cmd_add(&args, &conf).await?;
//! println!("{}", result.to_json()?);
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod identity;
pub mod ipam;
pub mod labels;
pub mod netns;
pub mod plugin;
pub mod store;
pub mod types;
pub mod wiring;

// Re-exports
pub use config::{CmdArgs, Command, IpamConf, NetConf, Policy};
pub use error::{Error, ErrorKind, Result};
pub use identity::{Orchestrator, ResolvedWorkload, WorkloadIdentity};
pub use ipam::{ExecIpam, IpamDelegate};
pub use labels::{KubeLabelSource, LabelSource};
pub use plugin::{CleanupStep, Plugin};
pub use store::{Datastore, EtcdBackend, KvBackend, MemoryBackend};
pub use types::{CniResult, IpConfig, VersionInfo};
pub use wiring::{NetworkWiring, VethWiring};
