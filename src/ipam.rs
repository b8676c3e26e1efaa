//! IPAM delegation.
//!
//! Address management is owned by a separate CNI plugin named by
//! `ipam.type`. The plugin is exec'd with the same protocol this binary is
//! exec'd with: `CNI_*` environment, configuration blob on stdin, a JSON
//! result (or error) on stdout.
//!
//! [`IpamDelegate`] is the seam the orchestrators use; [`ExecIpam`] is the
//! subprocess-backed implementation.

use crate::config::{CmdArgs, Command, IpamConf};
use crate::constants::{
    ENV_ARGS, ENV_COMMAND, ENV_CONTAINER_ID, ENV_IFNAME, ENV_NETNS, ENV_PATH, IGNORE_UNKNOWN_ARG,
};
use crate::error::{Error, Result};
use crate::types::{CniErrorReport, CniResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Allocates and releases workload addresses.
#[async_trait]
pub trait IpamDelegate: Send + Sync {
    /// Allocates addresses for the container in `args`.
    ///
    /// # Errors
    ///
    /// Fails if the delegate fails, or returns no IPv4 address while
    /// `conf` requests one ([`Error::NoAddressAssigned`]).
    async fn assign(&self, args: &CmdArgs, conf: &IpamConf) -> Result<CniResult>;

    /// Releases every address held by the container in `args`.
    async fn release(&self, args: &CmdArgs, conf: &IpamConf) -> Result<()>;
}

/// Builds the `CNI_ARGS` value handed to the delegate.
///
/// `IgnoreUnknown=1` is prepended so the delegate accepts orchestrator keys
/// it does not know. Applying it twice is a no-op.
pub fn delegate_args(args: &str) -> String {
    if args.is_empty() {
        IGNORE_UNKNOWN_ARG.to_string()
    } else if args.split(';').any(|pair| pair == IGNORE_UNKNOWN_ARG) {
        args.to_string()
    } else {
        format!("{IGNORE_UNKNOWN_ARG};{args}")
    }
}

/// Locates an executable named `plugin` in a colon separated search path.
///
/// # Errors
///
/// Returns [`Error::DelegateNotFound`] if no directory holds the plugin, or
/// the name contains a path separator.
pub fn find_plugin(plugin: &str, cni_path: &str) -> Result<PathBuf> {
    let not_found = || Error::DelegateNotFound {
        plugin: plugin.to_string(),
        path: cni_path.to_string(),
    };

    if plugin.is_empty() || plugin.contains('/') {
        return Err(not_found());
    }

    cni_path
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| Path::new(dir).join(plugin))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(not_found)
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// IPAM delegate that execs the configured plugin binary.
#[derive(Debug, Clone, Default)]
pub struct ExecIpam;

impl ExecIpam {
    pub fn new() -> Self {
        Self
    }

    /// Runs the delegate and returns its stdout.
    async fn exec(&self, command: Command, args: &CmdArgs, conf: &IpamConf) -> Result<Vec<u8>> {
        let plugin = conf.plugin_type.as_str();
        let binary = find_plugin(plugin, &args.cni_path)?;
        let failed = |reason: String| Error::DelegateFailed {
            plugin: plugin.to_string(),
            reason,
        };

        debug!(
            plugin = %binary.display(),
            command = %command,
            container_id = %args.container_id,
            "Invoking IPAM plugin"
        );

        let mut child = tokio::process::Command::new(&binary)
            .env(ENV_COMMAND, command.to_string())
            .env(ENV_CONTAINER_ID, &args.container_id)
            .env(ENV_NETNS, &args.netns)
            .env(ENV_IFNAME, &args.if_name)
            .env(ENV_PATH, &args.cni_path)
            .env(ENV_ARGS, delegate_args(&args.args))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| failed(format!("spawn {}: {e}", binary.display())))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&args.stdin_data).await {
                Ok(()) => {}
                // The delegate may exit without reading its config; its exit
                // status decides.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!(plugin = %binary.display(), "IPAM plugin closed stdin early");
                }
                Err(e) => return Err(failed(format!("write stdin: {e}"))),
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| failed(format!("wait: {e}")))?;

        if output.status.success() {
            return Ok(output.stdout);
        }

        let reason = match serde_json::from_slice::<CniErrorReport>(&output.stdout) {
            Ok(report) if !report.msg.is_empty() => report.to_string(),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                if stderr.is_empty() {
                    format!("exited with {}", output.status)
                } else {
                    stderr
                }
            }
        };
        Err(failed(reason))
    }
}

#[async_trait]
impl IpamDelegate for ExecIpam {
    async fn assign(&self, args: &CmdArgs, conf: &IpamConf) -> Result<CniResult> {
        let stdout = self.exec(Command::Add, args, conf).await?;
        let result: CniResult =
            serde_json::from_slice(&stdout).map_err(|e| Error::DelegateFailed {
                plugin: conf.plugin_type.clone(),
                reason: format!("invalid result: {e}"),
            })?;

        if conf.wants_ipv4() && result.ip4.is_none() {
            return Err(Error::NoAddressAssigned(conf.plugin_type.clone()));
        }

        info!(
            container_id = %args.container_id,
            ipv4 = ?result.ip4.as_ref().map(|c| c.ip),
            ipv6 = ?result.ip6.as_ref().map(|c| c.ip),
            "IPAM assigned addresses"
        );
        Ok(result)
    }

    async fn release(&self, args: &CmdArgs, conf: &IpamConf) -> Result<()> {
        self.exec(Command::Del, args, conf).await?;
        info!(container_id = %args.container_id, "IPAM released addresses");
        Ok(())
    }
}
