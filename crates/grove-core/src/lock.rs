//! Per-project write lock.
//!
//! Uses advisory file locks (`flock(2)` on Unix) via the `fs2` crate. The
//! OS releases the lock if the process dies, so there is no stale-lock
//! cleanup. Every mutation of a project's documents runs under this lock,
//! which serializes writers to the same branch and path as well as
//! sequence allocation and stats refresh.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{GroveError, GroveResult};

const LOCK_FILE: &str = "project.lock";

/// Held for the lifetime of the value; dropping it releases the lock.
pub struct ProjectLock {
    _file: File,
}

impl ProjectLock {
    /// Poll until the lock is ours or `timeout` elapses.
    ///
    /// A timeout is reported as `StoreUnavailable`, the only retryable kind.
    pub fn acquire(project_dir: &Path, timeout: Duration) -> GroveResult<Self> {
        let path = project_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        let start = Instant::now();
        let poll_interval = Duration::from_millis(5);

        loop {
            match file.try_lock_exclusive() {
                // The project may have been deleted while we waited, leaving us
                // holding a lock on an unlinked file.
                Ok(()) if !still_linked(&file, &path) => {
                    return Err(GroveError::not_found(
                        "project",
                        project_dir.display().to_string(),
                    ));
                }
                Ok(()) => return Ok(ProjectLock { _file: file }),
                Err(_) if start.elapsed() >= timeout => {
                    tracing::warn!(dir = %project_dir.display(), ?timeout, "project lock timed out");
                    return Err(GroveError::StoreUnavailable(format!(
                        "could not lock project within {}ms",
                        timeout.as_millis()
                    )));
                }
                Err(_) => std::thread::sleep(poll_interval),
            }
        }
    }
}

/// Whether `path` still names the open `file`.
#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> bool {
    path.exists()
}
