//! calico - CNI plugin executable
//!
//! Invoked by the container runtime, never by hand:
//!
//! ```sh
//! CNI_COMMAND=ADD CNI_CONTAINERID=<id> CNI_NETNS=/proc/<pid>/ns/net \
//!   CNI_IFNAME=eth0 CNI_PATH=/opt/cni/bin calico < netconf.json
//! ```
//!
//! On success the result JSON goes to stdout. On failure a single line goes
//! to stderr and the exit code is non-zero. Logs always go to stderr.

use calico_cni::config::{CmdArgs, Command, NetConf};
use calico_cni::error::{Error, Result};
use calico_cni::{
    Datastore, EtcdBackend, ExecIpam, KubeLabelSource, Plugin, VersionInfo, VethWiring,
};
use std::io::Read;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Level used when neither `RUST_LOG` nor `log_level` is set.
const DEFAULT_LOG_LEVEL: &str = "warn";

// =============================================================================
// Setup
// =============================================================================

fn init_logging(conf: &NetConf) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match conf.log_level.as_deref().map(str::to_ascii_lowercase) {
            Some(level) if level == "none" => "off".to_string(),
            Some(level) if !level.is_empty() => level,
            _ => DEFAULT_LOG_LEVEL.to_string(),
        };
        EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .compact()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Failed to set tracing subscriber");
    }
}

fn os_hostname() -> Result<String> {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for `buf.len()` bytes; gethostname writes at
    // most that many.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
}

fn build_plugin(conf: &NetConf) -> Result<Plugin> {
    // Checked before any client exists.
    let endpoints = conf.etcd_endpoints()?;
    let store = Datastore::new(Arc::new(EtcdBackend::new(endpoints)?));

    let hostname = match conf.hostname.as_deref() {
        Some(h) if !h.is_empty() => h.to_string(),
        _ => os_hostname()?,
    };

    let labels = KubeLabelSource::from_policy(&conf.policy.clone().unwrap_or_default());

    Ok(Plugin::new(
        hostname,
        store,
        Arc::new(ExecIpam::new()),
        Arc::new(VethWiring::default()),
    )
    .with_label_source(Arc::new(labels)))
}

// =============================================================================
// Commands
// =============================================================================

fn cmd_version() -> Result<()> {
    println!("{}", serde_json::to_string(&VersionInfo::default())?);
    Ok(())
}

fn run(args: CmdArgs) -> Result<()> {
    let conf = NetConf::from_bytes(&args.stdin_data)?;
    init_logging(&conf);
    debug!(
        command = %args.command,
        container_id = %args.container_id,
        netns = %args.netns.display(),
        network = %conf.name,
        "Invoked"
    );

    // A configuration error fails the whole command, DEL included: no
    // cleanup step runs against a datastore or host identity that could not
    // be established.
    let plugin = build_plugin(&conf)?;

    // Namespace entry is per thread: everything runs on this one.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match args.command {
        Command::Add => {
            let result = runtime.block_on(plugin.cmd_add(&args, &conf))?;
            println!("{}", result.to_json()?);
            Ok(())
        }
        Command::Del => runtime.block_on(plugin.cmd_del(&args, &conf)),
        Command::Version => cmd_version(),
    }
}

// =============================================================================
// Main
// =============================================================================

fn main() -> ExitCode {
    let mut stdin = Vec::new();
    let result = std::io::stdin()
        .read_to_end(&mut stdin)
        .map_err(Error::from)
        .and_then(|_| CmdArgs::from_env(stdin))
        .and_then(|args| match args.command {
            Command::Version => cmd_version(),
            _ => run(args),
        });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
