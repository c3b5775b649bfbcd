//! Process supervision: one instance per device process.
//!
//! Each process takes an exclusive `flock` on `<lock_dir>/<name>.pid`. The
//! file also records how many times the process has started, which survives
//! restarts:
//!
//! ```text
//! Restart Count:3
//! PID:1234
//! ```

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::{info, warn};

const RESTART_COUNT_PREFIX: &str = "Restart Count:";

/// Errors from process supervision.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("{name}: already running")]
    AlreadyRunning { name: String },

    #[error("Lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to acquire lock on {path}: {errno}")]
    Lock { path: PathBuf, errno: Errno },
}

/// Exclusive per-process lock, released on drop.
pub struct SingletonLock {
    file: Flock<File>,
    path: PathBuf,
    name: String,
    restart_count: u32,
}

impl SingletonLock {
    /// Lock `<dir>/<basename of name>.pid` without blocking and bump its
    /// restart counter.
    ///
    /// `name` may be a full program path (`argv[0]`); only the last path
    /// component is used.
    pub fn acquire(dir: &Path, name: &str) -> Result<Self, SupervisorError> {
        let name = basename(name).to_string();
        let path = dir.join(format!("{name}.pid"));
        let io_err = |source: io::Error| SupervisorError::Io {
            path: path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err)?;

        let mut file = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(locked) => locked,
            Err((_, Errno::EWOULDBLOCK)) => {
                warn!(name = %name, path = %path.display(), "Already running");
                return Err(SupervisorError::AlreadyRunning { name });
            }
            Err((_, errno)) => {
                return Err(SupervisorError::Lock {
                    path: path.clone(),
                    errno,
                })
            }
        };

        let mut previous = String::new();
        file.read_to_string(&mut previous).map_err(io_err)?;
        let restart_count = next_restart_count(&previous);

        let record = format!(
            "{RESTART_COUNT_PREFIX}{restart_count}\nPID:{}\n",
            std::process::id()
        );
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        file.set_len(0).map_err(io_err)?;
        file.write_all(record.as_bytes()).map_err(io_err)?;
        file.flush().map_err(io_err)?;

        info!(name = %name, restart_count, "Process lock acquired");
        Ok(Self {
            file,
            path,
            name,
            restart_count,
        })
    }

    /// Starts recorded for this process, including this one.
    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The locked file.
    pub fn file(&self) -> &File {
        &self.file
    }
}

impl fmt::Debug for SingletonLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingletonLock")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("restart_count", &self.restart_count)
            .finish()
    }
}

fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Parse the first line's counter and add one; anything unreadable starts
/// over at 1.
fn next_restart_count(contents: &str) -> u32 {
    contents
        .lines()
        .next()
        .and_then(|line| line.strip_prefix(RESTART_COUNT_PREFIX))
        .and_then(|count| count.trim().parse::<u32>().ok())
        .map(|count| count.saturating_add(1))
        .unwrap_or(1)
}
