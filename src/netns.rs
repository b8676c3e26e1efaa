//! Scoped network namespace entry.
//!
//! `setns(2)` with `CLONE_NEWNET` switches the namespace of the **calling
//! thread** only. Everything that must observe the container namespace
//! (device, address and route changes, and child processes spawned to make
//! them) has to run on that thread before it switches back. [`with_netns_path`]
//! packages that as a synchronous closure call:
//!
//! ```text
//!   host ns ──enter──▶ container ns ──(closure)──▶ restore ──▶ host ns
//!                                   └──early return / panic──▶ restore (Drop)
//! ```
//!
//! The closure must not hand work to other threads or await; the binary runs
//! on a current-thread runtime so the namespace never leaks into unrelated
//! work.

use crate::error::{Error, Result};
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Path of the calling thread's own network namespace.
const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// An open handle on a network namespace.
#[derive(Debug)]
pub struct NetNs {
    file: File,
    path: PathBuf,
}

impl NetNs {
    /// Opens the namespace at `path` (e.g. `/var/run/netns/<name>` or
    /// `/proc/<pid>/ns/net`).
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::Namespace {
            path: path.to_path_buf(),
            reason: format!("open: {e}"),
        })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Opens the calling thread's current namespace.
    pub fn current() -> Result<Self> {
        Self::open(Path::new(THREAD_NETNS))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path through which a child process can reach this namespace.
    ///
    /// Refers to this process's open descriptor, so it stays valid while
    /// `self` is alive regardless of which namespace the child starts in.
    pub fn fd_path(&self) -> PathBuf {
        PathBuf::from(format!(
            "/proc/{}/fd/{}",
            std::process::id(),
            self.file.as_raw_fd()
        ))
    }

    /// Moves the calling thread into this namespace.
    fn set(&self) -> Result<()> {
        // SAFETY: the descriptor is owned by `self.file` and open for the
        // duration of the call; setns does not retain it.
        let rc = unsafe { libc::setns(self.file.as_raw_fd(), libc::CLONE_NEWNET) };
        if rc == 0 {
            Ok(())
        } else {
            Err(Error::Namespace {
                path: self.path.clone(),
                reason: format!("setns: {}", std::io::Error::last_os_error()),
            })
        }
    }
}

/// Returns the calling thread to its original namespace when dropped.
struct NsGuard<'a> {
    original: &'a NetNs,
    restored: bool,
}

impl<'a> NsGuard<'a> {
    fn enter(target: &NetNs, original: &'a NetNs) -> Result<Self> {
        target.set()?;
        debug!(netns = %target.path().display(), "Entered network namespace");
        Ok(Self {
            original,
            restored: false,
        })
    }

    fn restore(mut self) -> Result<()> {
        self.restored = true;
        self.original.set()
    }
}

impl Drop for NsGuard<'_> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(e) = self.original.set() {
            // The thread is stuck in the container namespace; anything else it
            // does would touch the wrong network stack.
            error!(error = %e, "Failed to restore network namespace");
            std::process::abort();
        }
    }
}

/// Runs `f` with the calling thread inside the namespace at `path`.
///
/// `f` receives the original (host) namespace so it can place devices there.
/// The original namespace is restored on every exit path.
///
/// # Errors
///
/// [`Error::Namespace`] if either namespace cannot be opened or entered,
/// otherwise whatever `f` returns.
pub fn with_netns_path<T, F>(path: &Path, f: F) -> Result<T>
where
    F: FnOnce(&NetNs) -> Result<T>,
{
    let host = NetNs::current()?;
    let target = NetNs::open(path)?;

    let guard = NsGuard::enter(&target, &host)?;
    let result = f(&host);
    guard.restore()?;
    debug!(netns = %path.display(), "Left network namespace");

    result
}
