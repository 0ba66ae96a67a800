//! Extraction workspace
//!
//! A workspace is a directory that holds the staging directory (uploaded
//! archives) and the extraction root (one destination subtree per archive
//! stem). Directories are created lazily and persist across requests.

mod lock;
mod retention;

pub use lock::{LockError, WorkspaceLock, LOCK_FILENAME};
pub use retention::{RetentionPolicy, RetentionReport, MAX_AGE_HOURS};

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tracing::{debug, info};

use zipcheck_archive::ARCHIVE_SUFFIX;

use crate::config::Settings;

/// Destination name used when an archive stem is unusable
pub const FALLBACK_STEM: &str = "upload";

/// No archive could be located.
#[derive(Debug, Error)]
pub enum NotFoundError {
    #[error("no archive present in {staging_dir}")]
    NoArchivePresent { staging_dir: PathBuf },

    #[error("staging directory {path} is unreadable: {source}")]
    StagingUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// An upload could not be stored.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid upload file name: {0:?}")]
    InvalidName(String),

    #[error("upload must be a .zip archive: {0:?}")]
    UnsupportedType(String),

    #[error("upload of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("failed to store upload at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Workspace layout plus the operations on it.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    staging_dir: PathBuf,
    extract_root: PathBuf,
    lock_timeout: Duration,
    max_upload_bytes: u64,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            staging_dir: root.join("uploads"),
            extract_root: root.join("dest"),
            root,
            lock_timeout: Duration::from_secs(30),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            root: settings.workspace.root.clone(),
            staging_dir: settings.staging_path(),
            extract_root: settings.extract_root(),
            lock_timeout: settings.lock_timeout(),
            max_upload_bytes: settings.server.max_upload_bytes,
        }
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    pub fn with_extract_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extract_root = dir.into();
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_max_upload_bytes(mut self, limit: u64) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn extract_root(&self) -> &Path {
        &self.extract_root
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Take the workspace lock
    pub fn lock(&self) -> Result<WorkspaceLock, LockError> {
        WorkspaceLock::acquire(&self.root, self.lock_timeout)
    }

    pub fn locate_uploaded_archive(&self) -> Result<PathBuf, NotFoundError> {
        locate_uploaded_archive(&self.staging_dir)
    }

    /// `<extract_root>/<stem>` for an archive file name
    pub fn destination_for(&self, archive_name: &str) -> PathBuf {
        self.extract_root.join(archive_stem(archive_name))
    }

    /// Store uploaded bytes under the staging directory.
    ///
    /// The client-supplied name is reduced to its final component and must
    /// carry the archive suffix. Bytes land in a temp file first and are
    /// renamed into place.
    pub fn store_upload(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, UploadError> {
        let size = bytes.len() as u64;
        if size > self.max_upload_bytes {
            return Err(UploadError::TooLarge {
                size,
                limit: self.max_upload_bytes,
            });
        }

        let name = sanitize_upload_name(file_name)?;

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| UploadError::Io { path, source }
        };

        fs::create_dir_all(&self.staging_dir).map_err(io_err(&self.staging_dir))?;

        let target = self.staging_dir.join(&name);
        let temp = self.staging_dir.join(format!(".{}.partial", name));
        {
            let mut file = fs::File::create(&temp).map_err(io_err(&temp))?;
            file.write_all(bytes).map_err(io_err(&temp))?;
            file.sync_all().map_err(io_err(&temp))?;
        }
        if let Err(e) = fs::rename(&temp, &target) {
            let _ = fs::remove_file(&temp);
            return Err(io_err(&target)(e));
        }

        info!(path = %target.display(), bytes = size, "stored upload");
        Ok(target)
    }

    /// Clear `dest` so a new extraction starts from an empty subtree.
    pub fn prepare_destination(&self, dest: &Path) -> io::Result<()> {
        if dest.exists() {
            debug!(path = %dest.display(), "clearing previous destination");
            fs::remove_dir_all(dest)?;
        }
        fs::create_dir_all(dest)
    }
}

/// Find the uploaded archive in `staging_dir`.
///
/// Only immediate regular files ending in the archive suffix (any case) are
/// candidates. The most recently modified wins; ties go to the smallest name.
/// A missing staging directory means no archive is present.
pub fn locate_uploaded_archive(staging_dir: &Path) -> Result<PathBuf, NotFoundError> {
    let unreadable = |source: io::Error| NotFoundError::StagingUnreadable {
        path: staging_dir.to_path_buf(),
        source,
    };

    let entries = match fs::read_dir(staging_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(NotFoundError::NoArchivePresent {
                staging_dir: staging_dir.to_path_buf(),
            })
        }
        Err(e) => return Err(unreadable(e)),
    };

    let mut best: Option<(SystemTime, String, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(unreadable)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !has_archive_suffix(&name) {
            continue;
        }
        let metadata = entry.metadata().map_err(unreadable)?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        let better = match &best {
            None => true,
            Some((best_time, best_name, _)) => {
                modified > *best_time || (modified == *best_time && name < *best_name)
            }
        };
        if better {
            best = Some((modified, name, entry.path()));
        }
    }

    best.map(|(_, _, path)| path)
        .ok_or_else(|| NotFoundError::NoArchivePresent {
            staging_dir: staging_dir.to_path_buf(),
        })
}

/// Base name of an archive without its suffix, or the fallback name.
pub fn archive_stem(archive_name: &str) -> String {
    let base = archive_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(archive_name);
    let stem = if has_archive_suffix(base) {
        &base[..base.len() - ARCHIVE_SUFFIX.len()]
    } else {
        base
    };

    match stem {
        "" | "." | ".." => FALLBACK_STEM.to_string(),
        s => s.to_string(),
    }
}

/// Reduce a client-supplied file name to a safe final component.
pub fn sanitize_upload_name(raw: &str) -> Result<String, UploadError> {
    if raw.contains('\0') {
        return Err(UploadError::InvalidName(raw.to_string()));
    }
    let base = raw.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if base.is_empty() || base == "." || base == ".." || base.starts_with('.') {
        return Err(UploadError::InvalidName(raw.to_string()));
    }
    if !has_archive_suffix(base) {
        return Err(UploadError::UnsupportedType(raw.to_string()));
    }
    Ok(base.to_string())
}

fn has_archive_suffix(name: &str) -> bool {
    name.len() >= ARCHIVE_SUFFIX.len()
        && name.is_char_boundary(name.len() - ARCHIVE_SUFFIX.len())
        && name[name.len() - ARCHIVE_SUFFIX.len()..].eq_ignore_ascii_case(ARCHIVE_SUFFIX)
}
