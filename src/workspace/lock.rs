//! Workspace lock
//!
//! Pipeline runs, uploads and downloads take an advisory `flock` on
//! `<root>/.zipcheck.lock` so one never observes another's partial state.
//! Acquisition polls until a timeout and logs once on contention.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

/// Lock file name at the workspace root
pub const LOCK_FILENAME: &str = ".zipcheck.lock";

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const CONTENTION_WARN_AFTER: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("workspace lock timeout after {0:?}")]
    Timeout(Duration),

    #[error("I/O error on workspace lock: {0}")]
    Io(#[from] io::Error),
}

/// Exclusive workspace lock, released on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    lock_path: PathBuf,
    lock_file: File,
}

impl WorkspaceLock {
    /// Acquire the lock for `root`, creating the directory and lock file as
    /// needed. Waits up to `timeout`.
    pub fn acquire(root: &Path, timeout: Duration) -> Result<Self, LockError> {
        fs::create_dir_all(root)?;

        let lock_path = root.join(LOCK_FILENAME);
        let start = Instant::now();
        let mut warned = false;

        loop {
            match try_acquire_exclusive(&lock_path) {
                Ok(lock_file) => {
                    if warned {
                        info!(
                            path = %lock_path.display(),
                            waited_ms = start.elapsed().as_millis() as u64,
                            "workspace lock acquired after contention"
                        );
                    }
                    return Ok(Self {
                        lock_path,
                        lock_file,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !warned && start.elapsed() > CONTENTION_WARN_AFTER {
                        warn!(path = %lock_path.display(), "workspace lock contended, waiting");
                        warned = true;
                    }
                }
                Err(e) => return Err(LockError::Io(e)),
            }

            if start.elapsed() >= timeout {
                return Err(LockError::Timeout(timeout));
            }

            std::thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

#[cfg(unix)]
fn try_acquire_exclusive(lock_path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o644)
        .open(lock_path)?;

    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };

    if result == 0 {
        Ok(file)
    } else {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
        } else {
            Err(err)
        }
    }
}

#[cfg(not(unix))]
fn try_acquire_exclusive(lock_path: &Path) -> io::Result<File> {
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
    {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
        }
        Err(e) => Err(e),
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.lock_file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}
