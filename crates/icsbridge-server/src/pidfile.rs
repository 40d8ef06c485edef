//! PID file guarding the data directory.
//!
//! Two daemons sharing one `state.json` would each believe they own every
//! mirrored event. The PID file makes the second one refuse to start.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

/// File name used inside the data directory.
pub const PID_FILE: &str = "icsbridge.pid";

/// A held PID file, removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Claims `path` for this process.
    ///
    /// A file left by a dead process, or one that does not hold a PID, is
    /// replaced. A file naming a live process is an error.
    pub fn create(path: impl Into<PathBuf>) -> SyncResult<Self> {
        let path = path.into();

        match fs::read_to_string(&path) {
            Ok(contents) => match contents.trim().parse::<u32>() {
                Ok(pid) if is_process_running(pid) => {
                    return Err(SyncError::already_running(path.display().to_string()));
                }
                Ok(pid) => {
                    warn!(path = %path.display(), pid, "removing stale PID file");
                    fs::remove_file(&path)?;
                }
                Err(_) => {
                    warn!(path = %path.display(), "removing invalid PID file");
                    fs::remove_file(&path)?;
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let pid = process::id();
        let mut file = File::create(&path)?;
        writeln!(file, "{}", pid)?;
        file.sync_all()?;

        info!(path = %path.display(), pid, "created PID file");
        Ok(Self { path })
    }

    /// Path of the PID file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed PID file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove PID file"),
        }
    }
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    if pid == process::id() {
        return true;
    }
    // Signal 0 checks for existence without delivering anything.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}

/// The PID file path for a data directory.
pub fn default_pid_path(data_dir: &Path) -> PathBuf {
    data_dir.join(PID_FILE)
}
