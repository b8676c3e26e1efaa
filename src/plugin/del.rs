//! DEL: detach a container.
//!
//! Cleanup steps run in a fixed order, each independent of the others:
//!
//! ```text
//!   ReleaseAddress ─▶ DeleteEndpoint ─▶ RemoveDevice
//! ```
//!
//! A failure is recorded and the next step still runs. The first recorded
//! failure is what DEL returns.

use super::Plugin;
use crate::config::{CmdArgs, NetConf};
use crate::constants::ENV_IFNAME;
use crate::error::{Error, Result};
use crate::identity;
use tracing::{debug, info, warn};

/// One DEL cleanup step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStep {
    ReleaseAddress,
    DeleteEndpoint,
    RemoveDevice,
}

impl std::fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ReleaseAddress => "release-address",
            Self::DeleteEndpoint => "delete-endpoint",
            Self::RemoveDevice => "remove-device",
        };
        f.write_str(name)
    }
}

/// Outcomes of the cleanup steps of one DEL.
#[derive(Debug, Default)]
pub struct Teardown {
    attempted: Vec<CleanupStep>,
    skipped: Vec<CleanupStep>,
    first_error: Option<(CleanupStep, Error)>,
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of a step that ran.
    pub fn record(&mut self, step: CleanupStep, result: Result<()>) {
        self.attempted.push(step);
        match result {
            Ok(()) => debug!(%step, "Cleanup step succeeded"),
            Err(e) => {
                warn!(%step, error = %e, "Cleanup step failed");
                if self.first_error.is_none() {
                    self.first_error = Some((step, e));
                }
            }
        }
    }

    /// Records a step that did not apply to this invocation.
    pub fn skip(&mut self, step: CleanupStep) {
        debug!(%step, "Cleanup step skipped");
        self.skipped.push(step);
    }

    pub fn attempted(&self) -> &[CleanupStep] {
        &self.attempted
    }

    pub fn skipped(&self) -> &[CleanupStep] {
        &self.skipped
    }

    /// Step whose failure will be reported, if any.
    pub fn failed_step(&self) -> Option<CleanupStep> {
        self.first_error.as_ref().map(|(step, _)| *step)
    }

    /// Returns the first failure, or `Ok` if every step succeeded.
    pub fn finish(self) -> Result<()> {
        match self.first_error {
            Some((_, e)) => Err(e),
            None => Ok(()),
        }
    }
}

pub(super) async fn run(plugin: &Plugin, args: &CmdArgs, conf: &NetConf) -> Result<()> {
    let mut teardown = Teardown::new();

    teardown.record(
        CleanupStep::ReleaseAddress,
        plugin.ipam.release(args, &conf.ipam).await,
    );

    let deleted = match identity::resolve_for_teardown(
        plugin.hostname_for(conf),
        &args.container_id,
        &conf.name,
        &args.args,
    ) {
        Ok(workload) => plugin
            .store
            .delete_endpoint(&workload.identity)
            .await
            .map(|removed| {
                if !removed {
                    debug!(workload = %workload.identity, "No endpoint to delete");
                }
            }),
        Err(e) => Err(e),
    };
    teardown.record(CleanupStep::DeleteEndpoint, deleted);

    match args.netns_path() {
        Some(netns) if args.if_name.is_empty() => {
            warn!(netns = %netns.display(), "No interface name for device cleanup");
            teardown.record(CleanupStep::RemoveDevice, Err(Error::MissingEnv(ENV_IFNAME)));
        }
        Some(netns) => {
            teardown.record(
                CleanupStep::RemoveDevice,
                plugin.wiring.unwire(netns, &args.if_name),
            );
        }
        None => teardown.skip(CleanupStep::RemoveDevice),
    }

    if teardown.failed_step().is_none() {
        info!(container_id = %args.container_id, "Detached workload");
    }
    teardown.finish()
}
