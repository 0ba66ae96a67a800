//! ZIP handling for zipcheck.
//!
//! - [`extract`]: path-safe extraction of an uploaded archive into a destination root
//! - [`build`]: deterministic archive building from a directory tree
//!
//! Extracting an archive and building from the destination reproduces the
//! original regular-file set and contents.

pub mod build;
pub mod exclude;
pub mod extract;
pub mod path_safety;

pub use build::{build, ArchiveBuilder, BuildError, BuildResult};
pub use exclude::{ExcludeError, ExcludeRules, DEFAULT_EXCLUDES};
pub use extract::{extract, ExtractError, ExtractLimits, ExtractReport, Extractor};
pub use path_safety::{normalize_entry_name, resolve_under, UnsafeReason};

/// File suffix recognized as an uploaded archive
pub const ARCHIVE_SUFFIX: &str = ".zip";
