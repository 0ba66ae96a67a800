//! Deterministic ZIP building from a directory tree.
//!
//! Regular files are collected into a sorted map keyed by their `/`-separated
//! relative path, then written with a fixed timestamp and normalized modes so
//! identical trees produce identical bytes. Directories are implied by file
//! paths and not emitted; symlinks are skipped.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::exclude::{ExcludeError, ExcludeRules};

/// Errors for building operations
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("zip writer error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("exclude rules error: {0}")]
    Exclude(#[from] ExcludeError),

    #[error("archive size {actual_bytes} exceeds limit {limit_bytes}")]
    SizeExceeded {
        actual_bytes: u64,
        limit_bytes: u64,
    },
}

/// Result of building an archive
#[derive(Debug)]
pub struct BuildResult {
    /// The ZIP bytes
    pub bytes: Vec<u8>,
    /// SHA-256 of the ZIP bytes
    pub sha256: String,
    /// Relative paths written, in archive order
    pub entries: Vec<String>,
}

impl BuildResult {
    /// Write the archive to a file
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        fs::write(path, &self.bytes)
    }

    /// Archive size in bytes
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Archive builder for a source directory
pub struct ArchiveBuilder {
    root: PathBuf,
    exclude: ExcludeRules,
    max_bytes: Option<u64>,
}

impl ArchiveBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exclude: ExcludeRules::default(),
            max_bytes: None,
        }
    }

    /// Drop the default exclusions
    pub fn without_default_excludes(mut self) -> Self {
        self.exclude = ExcludeRules::none();
        self
    }

    /// Add exclude patterns
    pub fn with_excludes(mut self, patterns: &[&str]) -> Result<Self, BuildError> {
        self.exclude = self.exclude.with_patterns(patterns)?;
        Ok(self)
    }

    /// Set maximum archive size in bytes (0 means no limit)
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = if max_bytes > 0 { Some(max_bytes) } else { None };
        self
    }

    /// Collect regular files, keyed by `/`-separated relative path
    fn collect_files(&self) -> Result<BTreeMap<String, PathBuf>, BuildError> {
        let mut files = BTreeMap::new();

        for entry in WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let Ok(rel_path) = path.strip_prefix(&self.root) else {
                continue;
            };
            if self.exclude.is_excluded(rel_path) {
                continue;
            }

            let key = rel_path
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.insert(key, path.to_path_buf());
        }

        Ok(files)
    }

    /// Build the archive in memory
    pub fn build(&self) -> Result<BuildResult, BuildError> {
        let files = self.collect_files()?;

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let mut entries = Vec::with_capacity(files.len());

        for (name, full_path) in &files {
            let io_err = |source| BuildError::Io {
                path: full_path.clone(),
                source,
            };

            let mut file = File::open(full_path).map_err(io_err)?;
            let mut contents = Vec::new();
            file.read_to_end(&mut contents).map_err(io_err)?;

            let mode = if is_executable(&file) { 0o755 } else { 0o644 };
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .last_modified_time(zip::DateTime::default())
                .unix_permissions(mode);

            writer.start_file(name.as_str(), options)?;
            writer.write_all(&contents).map_err(io_err)?;
            entries.push(name.clone());
            debug!(entry = %name, bytes = contents.len(), "added file");
        }

        let bytes = writer.finish()?.into_inner();

        let actual = bytes.len() as u64;
        if let Some(limit) = self.max_bytes {
            if actual > limit {
                return Err(BuildError::SizeExceeded {
                    actual_bytes: actual,
                    limit_bytes: limit,
                });
            }
        }

        let sha256 = hex::encode(Sha256::digest(&bytes));

        Ok(BuildResult {
            bytes,
            sha256,
            entries,
        })
    }
}

/// Build an archive of `source_root` with the default exclusions.
pub fn build(source_root: &Path) -> Result<BuildResult, BuildError> {
    ArchiveBuilder::new(source_root).build()
}

fn is_executable(file: &File) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = file.metadata() {
            return metadata.permissions().mode() & 0o111 != 0;
        }
    }
    #[cfg(not(unix))]
    let _ = file;
    false
}
