//! Forcing a stale process off the camera device.
//!
//! A previous run that died mid-capture can leave a helper process holding
//! the device open, and the next open then fails with "device busy". Holders
//! are found by scanning `/proc/<pid>/fd` for links to the device node and are
//! killed outright.

use std::{
    fs, io,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use tracing::{debug, warn};

const DEFAULT_PROC_ROOT: &str = "/proc";
const DEFAULT_SETTLE: Duration = Duration::from_millis(200);

/// Pids (other than `skip_pid`) with an open descriptor on `device`.
pub fn find_device_holders(proc_root: &Path, device: &Path, skip_pid: u32) -> io::Result<Vec<u32>> {
    let mut holders = Vec::new();
    for entry in fs::read_dir(proc_root)? {
        let Ok(entry) = entry else { continue };
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };
        if pid == skip_pid {
            continue;
        }

        // Processes exit and deny access while we scan; skip them.
        let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        let holds_device = fds
            .filter_map(Result::ok)
            .filter_map(|fd| fs::read_link(fd.path()).ok())
            .any(|target| target == device);
        if holds_device {
            holders.push(pid);
        }
    }
    holders.sort_unstable();
    Ok(holders)
}

/// Best-effort reclaim of a device node from other processes.
#[derive(Clone, Debug)]
pub struct DeviceReclaimer {
    proc_root: PathBuf,
    settle: Duration,
}

impl Default for DeviceReclaimer {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
            settle: DEFAULT_SETTLE,
        }
    }
}

impl DeviceReclaimer {
    pub fn with_proc_root(mut self, proc_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self
    }

    /// Kill every other holder of `device`. Returns how many were signalled.
    /// Scan and kill failures are logged, never returned.
    pub fn reclaim(&self, device: &Path) -> usize {
        let holders = match find_device_holders(&self.proc_root, device, std::process::id()) {
            Ok(holders) => holders,
            Err(err) => {
                warn!("could not scan {} for holders of {}: {err}", self.proc_root.display(), device.display());
                return 0;
            }
        };
        if holders.is_empty() {
            debug!(device = %device.display(), "camera device is free");
            return 0;
        }

        let mut killed = 0;
        for pid in holders {
            let Ok(raw) = i32::try_from(pid) else { continue };
            match kill(Pid::from_raw(raw), Signal::SIGKILL) {
                Ok(()) => {
                    warn!(pid, device = %device.display(), "killed stale camera holder");
                    killed += 1;
                }
                Err(err) => warn!(pid, "failed to kill camera holder: {err}"),
            }
        }
        if killed > 0 {
            thread::sleep(self.settle);
        }
        killed
    }
}
