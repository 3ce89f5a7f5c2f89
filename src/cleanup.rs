//! Post-exit reclamation of files that were locked during an install.
//!
//! When the installer had to rename a table instead of deleting it, the host
//! spawns a detached copy of itself with `--cleanup <pid>`. That copy waits
//! for the host to leave the process table, then deletes every path listed in
//! the deferred-deletion manifest and finally the manifest. If the host is
//! still alive at the ceiling the agent gives up and leaves everything for the
//! next run.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{InstallError, Result};
use crate::fs::FileSystem;
use crate::log::LogContext;

pub const CLEANUP_DIRECTIVE: &str = "--cleanup";

pub trait ProcessLiveness {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Asks the operating system whether `pid` is still running.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLiveness;

impl ProcessLiveness for SystemLiveness {
    fn is_alive(&self, pid: u32) -> bool {
        // an unanswerable query counts as alive, which only delays the cleanup
        process_alive(pid).unwrap_or(true)
    }
}

pub fn process_alive(pid: u32) -> io::Result<bool> {
    #[cfg(unix)]
    {
        let status = Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        Ok(status.success())
    }

    #[cfg(windows)]
    {
        let output = Command::new("tasklist")
            .args(["/FI", &format!("PID eq {pid}"), "/FO", "CSV", "/NH"])
            .output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "tasklist failed for pid={pid}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        Ok(stdout.contains(&format!(",\"{pid}\""))
            && !stdout.to_ascii_lowercase().contains("no tasks are running"))
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        Ok(true)
    }
}

/// Re-invokes `exe` as a cleanup agent for `pid`, without waiting for it.
pub fn spawn_detached(exe: &Path, pid: u32, extra_args: &[String]) -> Result<()> {
    let mut command = Command::new(exe);
    command
        .args(extra_args)
        .arg(CLEANUP_DIRECTIVE)
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    // out of the host's group, so a terminal signal to the host misses it
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }
    let child = command.spawn().map_err(InstallError::io(exe))?;
    info!(agent = child.id(), watching = pid, "cleanup agent started");
    Ok(())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub failed: usize,
    /// The watched process outlived the ceiling and nothing was touched.
    pub gave_up: bool,
}

pub struct CleanupAgent<'a, F: FileSystem, P: ProcessLiveness> {
    fs: &'a F,
    liveness: &'a P,
    log: &'a LogContext,
    manifest: PathBuf,
    poll_interval: Duration,
    ceiling: Duration,
}

impl<'a, F: FileSystem, P: ProcessLiveness> CleanupAgent<'a, F, P> {
    pub fn new(fs: &'a F, liveness: &'a P, log: &'a LogContext, manifest: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            liveness,
            log,
            manifest: manifest.into(),
            poll_interval: Duration::from_secs(1),
            ceiling: Duration::from_secs(300),
        }
    }
    pub fn with_timing(mut self, poll_interval: Duration, ceiling: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.ceiling = ceiling;
        self
    }

    /// Polls until `pid` is gone or the ceiling passes. True when it is gone.
    pub fn wait_for_exit(&self, pid: u32) -> bool {
        let started = Instant::now();
        loop {
            if !self.liveness.is_alive(pid) {
                return true;
            }
            if started.elapsed() >= self.ceiling {
                return false;
            }
            thread::sleep(self.poll_interval);
        }
    }

    pub fn run(&self, pid: u32) -> CleanupReport {
        if !self.wait_for_exit(pid) {
            self.log.info(format!("Process {pid} is still running; leaving deferred deletions in place"));
            return CleanupReport { gave_up: true, ..CleanupReport::default() };
        }
        self.purge_manifest()
    }

    /// Deletes every listed path, ignoring individual failures, then the manifest.
    pub fn purge_manifest(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        let listing = match self.fs.read(&self.manifest) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return report,
            Err(e) => {
                self.log.error(format!("Could not read {}: {e}", self.manifest.display()));
                return report;
            }
        };
        for entry in listing.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let path = Path::new(entry);
            match self.fs.remove(path) {
                Ok(()) => {
                    debug!(path = entry, "deleted");
                    report.deleted += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => (),
                Err(e) => {
                    self.log.info(format!("Could not delete {entry}: {e}"));
                    report.failed += 1;
                }
            }
        }
        if let Err(e) = self.fs.remove(&self.manifest) {
            self.log.error(format!("Could not delete {}: {e}", self.manifest.display()));
        }
        self.log.info(format!("Deferred cleanup deleted {} file(s)", report.deleted));
        report
    }
}
