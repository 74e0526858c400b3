//! The PID file guarding a data directory.
//!
//! Two keepers mutating one data directory would corrupt it; the PID
//! file makes ownership explicit. Plain text, one value per line:
//!
//! ```text
//! <pid>
//! <data directory>
//! <keeper version>
//! <reload flag: 0 or 1>
//! ```

use std::fs;
use std::path::Path;

use tracing::warn;

use crate::error::{KeeperError, KeeperResult};

/// The parsed contents of a PID file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFile {
    pub pid: u32,
    pub data_dir: String,
    pub version: String,
    pub reload_requested: bool,
}

impl PidFile {
    /// Claims the data directory for this process.
    ///
    /// Fails with [`KeeperError::AlreadyRunning`] when a live process
    /// already holds the file; a stale file (dead owner) is replaced.
    pub fn create(path: &Path, pid: u32, data_dir: &str) -> KeeperResult<()> {
        if let Some(existing) = Self::read(path)? {
            if process_is_alive(existing.pid) {
                return Err(KeeperError::AlreadyRunning { pid: existing.pid });
            }
            warn!(
                pid = existing.pid,
                "replacing stale pid file of a dead keeper"
            );
        }

        let contents = format!(
            "{pid}\n{data_dir}\n{}\n0\n",
            env!("CARGO_PKG_VERSION")
        );
        fs::write(path, contents).map_err(|e| KeeperError::PidFile {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Reads the PID file, or `Ok(None)` when absent.
    pub fn read(path: &Path) -> KeeperResult<Option<Self>> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(KeeperError::PidFile {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };

        let mut lines = text.lines();
        let pid = lines
            .next()
            .and_then(|l| l.trim().parse().ok())
            .unwrap_or(0);
        let data_dir = lines.next().unwrap_or("").to_string();
        let version = lines.next().unwrap_or("").to_string();
        let reload_requested = lines.next().map(|l| l.trim() == "1").unwrap_or(false);

        Ok(Some(Self {
            pid,
            data_dir,
            version,
            reload_requested,
        }))
    }

    /// Releases the data directory.
    pub fn remove(path: &Path) -> KeeperResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KeeperError::PidFile {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }
}

/// Returns true if a process with this pid exists.
#[cfg(unix)]
fn process_is_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    // signal 0 probes for existence without sending anything
    unsafe { libc_kill(pid as i32, 0) == 0 }
}

#[cfg(unix)]
extern "C" {
    #[link_name = "kill"]
    fn libc_kill(pid: i32, sig: i32) -> i32;
}

#[cfg(not(unix))]
fn process_is_alive(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_read_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steward.pid");

        PidFile::create(&path, std::process::id(), "/data/pgdata").unwrap();
        let read = PidFile::read(&path).unwrap().unwrap();
        assert_eq!(read.pid, std::process::id());
        assert_eq!(read.data_dir, "/data/pgdata");
        assert!(!read.reload_requested);

        PidFile::remove(&path).unwrap();
        assert_eq!(PidFile::read(&path).unwrap(), None);
    }

    #[test]
    fn a_live_owner_blocks_a_second_keeper() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steward.pid");

        PidFile::create(&path, std::process::id(), "/data/pgdata").unwrap();
        let err = PidFile::create(&path, std::process::id(), "/data/pgdata").unwrap_err();
        assert!(matches!(err, KeeperError::AlreadyRunning { .. }));
    }

    #[test]
    fn a_stale_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steward.pid");

        // pid 0 never names a live process
        std::fs::write(&path, "0\n/old\n0.0.0\n0\n").unwrap();
        PidFile::create(&path, std::process::id(), "/data/pgdata").unwrap();
        assert_eq!(
            PidFile::read(&path).unwrap().unwrap().pid,
            std::process::id()
        );
    }
}
