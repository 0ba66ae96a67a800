//! ZIP extraction into a destination root.
//!
//! Every entry name is normalized with [`crate::path_safety`] before any write
//! for that entry. Extraction is not transactional: on the first failing entry
//! the error is returned and entries already written stay on disk.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::path_safety::{resolve_under, UnsafeReason};

/// Errors from extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("archive {archive} is unreadable: {reason}")]
    Unreadable { archive: PathBuf, reason: String },

    #[error("entry {entry:?} escapes the destination root ({})", reason.as_str())]
    PathTraversal { entry: String, reason: UnsafeReason },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{what} limit exceeded: {max}")]
    LimitExceeded { what: &'static str, max: u64 },
}

impl ExtractError {
    /// Short stable label for the error subtype.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractError::Unreadable { .. } => "unreadable",
            ExtractError::PathTraversal { .. } => "path_traversal",
            ExtractError::Io { .. } => "io",
            ExtractError::LimitExceeded { .. } => "limit_exceeded",
        }
    }

    fn io(path: &Path, source: io::Error) -> Self {
        ExtractError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Upper bounds applied while extracting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractLimits {
    /// Maximum number of entries in the archive
    pub max_entries: u64,
    /// Maximum number of bytes written across all files
    pub max_total_bytes: u64,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            max_total_bytes: 1024 * 1024 * 1024, // 1 GiB
        }
    }
}

/// Counts from a completed extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractReport {
    pub files: u64,
    pub directories: u64,
    pub bytes_written: u64,
}

/// ZIP extractor.
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    limits: ExtractLimits,
}

impl Extractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set extraction limits
    pub fn with_limits(mut self, limits: ExtractLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Extract `archive_path` under `destination_root`.
    ///
    /// The destination root is created if missing. Existing files at colliding
    /// paths are truncated and overwritten.
    pub fn extract(
        &self,
        archive_path: &Path,
        destination_root: &Path,
    ) -> Result<ExtractReport, ExtractError> {
        let unreadable = |reason: String| ExtractError::Unreadable {
            archive: archive_path.to_path_buf(),
            reason,
        };

        let file = File::open(archive_path).map_err(|e| unreadable(e.to_string()))?;
        let mut archive =
            zip::ZipArchive::new(BufReader::new(file)).map_err(|e| unreadable(e.to_string()))?;

        if archive.len() as u64 > self.limits.max_entries {
            return Err(ExtractError::LimitExceeded {
                what: "entry count",
                max: self.limits.max_entries,
            });
        }

        fs::create_dir_all(destination_root).map_err(|e| ExtractError::io(destination_root, e))?;

        let mut report = ExtractReport::default();

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| unreadable(e.to_string()))?;

            let raw_name = entry.name().to_string();
            let target = resolve_under(destination_root, &raw_name).map_err(|reason| {
                ExtractError::PathTraversal {
                    entry: raw_name.clone(),
                    reason,
                }
            })?;
            if target.as_path() == destination_root {
                continue;
            }

            let mode = entry.unix_mode().map(|m| m & 0o777);

            if entry.is_dir() {
                fs::create_dir_all(&target).map_err(|e| ExtractError::io(&target, e))?;
                if let Some(mode) = mode {
                    set_mode(&target, mode | 0o700)?;
                }
                report.directories += 1;
                debug!(entry = %raw_name, "created directory");
                continue;
            }

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| ExtractError::io(parent, e))?;
            }

            let mut out = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&target)
                .map_err(|e| ExtractError::io(&target, e))?;

            let budget = self.limits.max_total_bytes.saturating_sub(report.bytes_written);
            let written = copy_entry(&mut entry, &mut out, &target, budget, archive_path)
                .map_err(|e| match e {
                    ExtractError::LimitExceeded { what, .. } => ExtractError::LimitExceeded {
                        what,
                        max: self.limits.max_total_bytes,
                    },
                    other => other,
                })?;
            out.flush().map_err(|e| ExtractError::io(&target, e))?;
            drop(out);

            if let Some(mode) = mode {
                set_mode(&target, mode | 0o600)?;
            }

            report.files += 1;
            report.bytes_written += written;
            debug!(entry = %raw_name, bytes = written, "extracted file");
        }

        Ok(report)
    }
}

/// Extract with default limits.
pub fn extract(archive_path: &Path, destination_root: &Path) -> Result<ExtractReport, ExtractError> {
    Extractor::new().extract(archive_path, destination_root)
}

/// Copy an entry stream, separating read failures (corrupt archive data) from
/// write failures (destination I/O). Fails once `budget` would be exceeded.
fn copy_entry<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    target: &Path,
    budget: u64,
    archive_path: &Path,
) -> Result<u64, ExtractError> {
    let mut buffer = [0u8; 64 * 1024];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(ExtractError::Unreadable {
                    archive: archive_path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };

        total += n as u64;
        if total > budget {
            return Err(ExtractError::LimitExceeded {
                what: "uncompressed size",
                max: budget,
            });
        }

        writer
            .write_all(&buffer[..n])
            .map_err(|e| ExtractError::io(target, e))?;
    }

    Ok(total)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), ExtractError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| ExtractError::io(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), ExtractError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, files: &[(&str, &str)], dirs: &[&str]) {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for name in dirs {
            writer.add_directory(*name, options).unwrap();
        }
        for (name, content) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        let cursor = writer.finish().unwrap();
        fs::write(path, cursor.into_inner()).unwrap();
    }

    #[test]
    fn test_extract_sample_layout() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("sample.zip");
        write_zip(&archive, &[("a.txt", "hello"), ("sub/b.txt", "world")], &[]);

        let dest = dir.path().join("dest").join("sample");
        let report = extract(&archive, &dest).unwrap();

        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "hello");
        assert_eq!(fs::read_to_string(dest.join("sub/b.txt")).unwrap(), "world");
        assert_eq!(report.files, 2);
        assert_eq!(report.bytes_written, 10);
    }

    #[test]
    fn test_root_entry_skipped() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("root.zip");
        write_zip(&archive, &[("./a.txt", "hi")], &["./", "sub/"]);

        let dest = dir.path().join("out");
        let report = extract(&archive, &dest).unwrap();

        assert_eq!(report.directories, 1);
        assert_eq!(report.files, 1);
        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "hi");
    }

    #[test]
    fn test_directory_entries_idempotent() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("dirs.zip");
        write_zip(&archive, &[], &["empty/", "empty/inner/"]);

        let dest = dir.path().join("out");
        fs::create_dir_all(dest.join("empty")).unwrap();
        let report = extract(&archive, &dest).unwrap();
        let again = extract(&archive, &dest).unwrap();

        assert!(dest.join("empty/inner").is_dir());
        assert_eq!(report.directories, 2);
        assert_eq!(report, again);
        assert_eq!(report.files, 0);
    }

    #[test]
    fn test_existing_file_overwritten() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("over.zip");
        write_zip(&archive, &[("a.txt", "new")], &[]);

        let dest = dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("a.txt"), "much longer old content").unwrap();

        extract(&archive, &dest).unwrap();
        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "new");
    }

    #[test]
    fn test_traversal_rejected_without_escaped_write() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("../evil.txt", "pwned")], &[]);

        let dest = dir.path().join("nested").join("dest");
        let err = extract(&archive, &dest).unwrap_err();

        assert!(matches!(err, ExtractError::PathTraversal { .. }));
        assert_eq!(err.kind(), "path_traversal");
        assert!(!dir.path().join("nested").join("evil.txt").exists());
    }

    #[test]
    fn test_partial_extraction_not_rolled_back() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("mixed.zip");
        write_zip(&archive, &[("ok.txt", "fine"), ("../../bad.txt", "nope")], &[]);

        let dest = dir.path().join("out");
        let err = extract(&archive, &dest).unwrap_err();

        assert!(matches!(err, ExtractError::PathTraversal { .. }));
        assert_eq!(fs::read_to_string(dest.join("ok.txt")).unwrap(), "fine");
    }

    #[test]
    fn test_malformed_archive_unreadable() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("junk.zip");
        fs::write(&archive, b"this is not a zip file").unwrap();

        let err = extract(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, ExtractError::Unreadable { .. }));
    }

    #[test]
    fn test_missing_archive_unreadable() {
        let dir = TempDir::new().unwrap();
        let err = extract(&dir.path().join("absent.zip"), &dir.path().join("out")).unwrap_err();
        assert_eq!(err.kind(), "unreadable");
    }

    #[test]
    fn test_entry_count_limit() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("many.zip");
        write_zip(&archive, &[("a", "1"), ("b", "2"), ("c", "3")], &[]);

        let extractor = Extractor::new().with_limits(ExtractLimits {
            max_entries: 2,
            max_total_bytes: 1024,
        });
        let err = extractor.extract(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, ExtractError::LimitExceeded { what: "entry count", .. }));
    }

    #[test]
    fn test_total_bytes_limit() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("big.zip");
        let chunk = "x".repeat(600);
        write_zip(&archive, &[("a", chunk.as_str()), ("b", chunk.as_str())], &[]);

        let extractor = Extractor::new().with_limits(ExtractLimits {
            max_entries: 10,
            max_total_bytes: 1000,
        });
        let err = extractor.extract(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(
            err,
            ExtractError::LimitExceeded { what: "uncompressed size", .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_permission_bits_preserved() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("modes.zip");
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
            writer
                .start_file("run.sh", SimpleFileOptions::default().unix_permissions(0o755))
                .unwrap();
            writer.write_all(b"#!/bin/sh\n").unwrap();
            let cursor = writer.finish().unwrap();
            fs::write(&archive, cursor.into_inner()).unwrap();
        }

        let dest = dir.path().join("out");
        extract(&archive, &dest).unwrap();

        let mode = fs::metadata(dest.join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
