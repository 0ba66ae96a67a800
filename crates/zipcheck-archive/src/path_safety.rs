//! Entry-name normalization for extraction.
//!
//! Archive entry names are untrusted. They are normalized here against a
//! virtual root before anything touches the filesystem: `.` and empty
//! segments are dropped, `..` pops a previously pushed segment, and anything
//! that would climb above the root, start at the filesystem root, or carry a
//! drive prefix is rejected.

use std::path::{Path, PathBuf};

/// Why an entry name was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsafeReason {
    /// Name starts with `/` or `\`
    Absolute,
    /// Name starts with a drive prefix such as `C:`
    DrivePrefix,
    /// A `..` segment walks above the destination root
    EscapesRoot,
    /// Name contains a NUL byte
    NulByte,
}

impl UnsafeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnsafeReason::Absolute => "absolute path",
            UnsafeReason::DrivePrefix => "drive prefix",
            UnsafeReason::EscapesRoot => "parent segment escapes root",
            UnsafeReason::NulByte => "NUL byte in name",
        }
    }
}

/// Normalize a raw entry name into a relative path that stays under the root.
///
/// Both `/` and `\` are treated as separators. The returned path may be empty
/// (for names such as `./`), in which case the entry refers to the root itself.
pub fn normalize_entry_name(raw: &str) -> Result<PathBuf, UnsafeReason> {
    if raw.contains('\0') {
        return Err(UnsafeReason::NulByte);
    }
    if raw.starts_with('/') || raw.starts_with('\\') {
        return Err(UnsafeReason::Absolute);
    }
    if has_drive_prefix(raw) {
        return Err(UnsafeReason::DrivePrefix);
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(UnsafeReason::EscapesRoot);
                }
            }
            normal => segments.push(normal),
        }
    }

    Ok(segments.iter().collect())
}

/// Resolve a raw entry name under `root`.
///
/// The result is always `root` joined with a normalized relative path, so it
/// is a descendant of `root` (or `root` itself).
pub fn resolve_under(root: &Path, raw: &str) -> Result<PathBuf, UnsafeReason> {
    let relative = normalize_entry_name(raw)?;
    Ok(root.join(relative))
}

fn has_drive_prefix(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_pass_through() {
        assert_eq!(normalize_entry_name("a.txt").unwrap(), PathBuf::from("a.txt"));
        assert_eq!(
            normalize_entry_name("sub/b.txt").unwrap(),
            PathBuf::from("sub").join("b.txt")
        );
    }

    #[test]
    fn test_dot_and_empty_segments_dropped() {
        assert_eq!(
            normalize_entry_name("./sub//./b.txt").unwrap(),
            PathBuf::from("sub").join("b.txt")
        );
        assert_eq!(normalize_entry_name("./").unwrap(), PathBuf::new());
    }

    #[test]
    fn test_inner_parent_segment_allowed() {
        assert_eq!(
            normalize_entry_name("sub/../a.txt").unwrap(),
            PathBuf::from("a.txt")
        );
    }

    #[test]
    fn test_escaping_parent_rejected() {
        assert_eq!(normalize_entry_name("../evil.txt"), Err(UnsafeReason::EscapesRoot));
        assert_eq!(
            normalize_entry_name("sub/../../evil.txt"),
            Err(UnsafeReason::EscapesRoot)
        );
        assert_eq!(
            normalize_entry_name("..\\..\\evil.txt"),
            Err(UnsafeReason::EscapesRoot)
        );
    }

    #[test]
    fn test_absolute_and_drive_rejected() {
        assert_eq!(normalize_entry_name("/etc/passwd"), Err(UnsafeReason::Absolute));
        assert_eq!(normalize_entry_name("\\windows\\x"), Err(UnsafeReason::Absolute));
        assert_eq!(normalize_entry_name("C:\\x.txt"), Err(UnsafeReason::DrivePrefix));
        assert_eq!(normalize_entry_name("c:x.txt"), Err(UnsafeReason::DrivePrefix));
    }

    #[test]
    fn test_nul_rejected() {
        assert_eq!(normalize_entry_name("a\0b"), Err(UnsafeReason::NulByte));
    }

    #[test]
    fn test_resolve_under_stays_inside() {
        let root = Path::new("/srv/dest/sample");
        let resolved = resolve_under(root, "sub/../sub/b.txt").unwrap();
        assert!(resolved.starts_with(root));
        assert_eq!(resolved, root.join("sub").join("b.txt"));
    }
}
