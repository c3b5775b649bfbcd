//! Size-bounded storage directory for recordings.
//!
//! Files are accounted recursively (regular files only, symlinks are not
//! followed). When a directory would exceed its limit, the oldest files by
//! modification time are deleted first.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result type for retention operations.
pub type Result<T> = std::result::Result<T, RetentionError>;

/// Errors from retention operations.
#[derive(Debug, thiserror::Error)]
pub enum RetentionError {
    #[error("Cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Source {0} is not a regular file")]
    NotAFile(PathBuf),

    #[error("Source is {size} bytes, larger than the {limit} byte limit")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Could not free enough space: {remaining} bytes left, target {target}")]
    NoSpace { remaining: u64, target: u64 },

    #[error("Background save did not complete: {0}")]
    Join(String),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> RetentionError + '_ {
    move |source| RetentionError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug)]
struct FileInfo {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

#[derive(Debug, Default)]
struct FileList {
    files: Vec<FileInfo>,
    total_size: u64,
}

impl FileList {
    fn collect(root: &Path) -> Result<Self> {
        let mut list = Self::default();
        list.visit(root)?;
        Ok(list)
    }

    fn visit(&mut self, path: &Path) -> Result<()> {
        let meta = fs::symlink_metadata(path).map_err(io_error(path))?;
        if meta.is_file() {
            self.total_size += meta.len();
            self.files.push(FileInfo {
                path: path.to_path_buf(),
                size: meta.len(),
                modified: meta.modified().map_err(io_error(path))?,
            });
        } else if meta.is_dir() {
            for entry in fs::read_dir(path).map_err(io_error(path))? {
                let entry = entry.map_err(io_error(path))?;
                self.visit(&entry.path())?;
            }
        }
        Ok(())
    }

    /// Delete oldest files until the total is at most `target` bytes.
    fn free_down_to(&mut self, target: u64) -> Result<()> {
        self.files.sort_by_key(|file| file.modified);

        let mut deleted = 0;
        for file in &self.files {
            if self.total_size <= target {
                break;
            }
            fs::remove_file(&file.path).map_err(io_error(&file.path))?;
            self.total_size -= file.size;
            deleted += 1;
            info!(path = %file.path.display(), size = file.size, "Deleted oldest file");
        }
        self.files.drain(..deleted);

        if self.total_size > target {
            return Err(RetentionError::NoSpace {
                remaining: self.total_size,
                target,
            });
        }
        Ok(())
    }
}

/// Total size of regular files under `dir`, in KiB (rounded down).
pub fn dir_size_kb(dir: &Path) -> Result<u64> {
    Ok(FileList::collect(dir)?.total_size / 1024)
}

/// Delete oldest files under `dir` until it holds at most `max_size_kb`.
pub fn trim_dir_to_size(dir: &Path, max_size_kb: u64) -> Result<()> {
    let mut list = FileList::collect(dir)?;
    let target = max_size_kb * 1024;
    if list.total_size > target {
        debug!(dir = %dir.display(), size = list.total_size, target, "Trimming directory");
        list.free_down_to(target)?;
    }
    Ok(())
}

/// Copy `src` into `dir`, first deleting oldest files so the directory stays
/// within `max_size_kb`.
///
/// Space is freed before copying starts. A partially written copy is
/// removed on failure.
pub fn save_file_bounded(dir: &Path, src: &Path, max_size_kb: u64) -> Result<PathBuf> {
    let meta = fs::metadata(src).map_err(io_error(src))?;
    if !meta.is_file() {
        return Err(RetentionError::NotAFile(src.to_path_buf()));
    }

    let size = meta.len();
    let limit = max_size_kb * 1024;
    if size > limit {
        return Err(RetentionError::FileTooLarge { size, limit });
    }

    let mut list = FileList::collect(dir)?;
    if list.total_size + size > limit {
        debug!(
            dir = %dir.display(),
            need = list.total_size + size - limit,
            "Freeing space before save"
        );
        list.free_down_to(limit - size)?;
    }

    let file_name = src
        .file_name()
        .ok_or_else(|| RetentionError::NotAFile(src.to_path_buf()))?;
    let dst = dir.join(file_name);
    if let Err(source) = fs::copy(src, &dst) {
        if let Err(e) = fs::remove_file(&dst) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %dst.display(), error = %e, "Failed to remove partial copy");
            }
        }
        return Err(RetentionError::Io { path: dst, source });
    }

    info!(src = %src.display(), dst = %dst.display(), size, "File saved");
    Ok(dst)
}

/// Run [`save_file_bounded`] on the blocking pool.
pub fn spawn_save_bounded(
    dir: PathBuf,
    src: PathBuf,
    max_size_kb: u64,
) -> JoinHandle<Result<PathBuf>> {
    tokio::task::spawn_blocking(move || save_file_bounded(&dir, &src, max_size_kb))
}

/// Await a [`spawn_save_bounded`] handle, folding a join failure into the
/// result.
pub async fn join_save(handle: JoinHandle<Result<PathBuf>>) -> Result<PathBuf> {
    handle
        .await
        .map_err(|e| RetentionError::Join(e.to_string()))?
}
