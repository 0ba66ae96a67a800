//! Exclusion rules for archive building.
//!
//! The workspace lock file and in-flight upload temp files are always left out
//! of built archives unless the caller starts from [`ExcludeRules::none`].

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

/// Default patterns to exclude from archives
pub const DEFAULT_EXCLUDES: &[&str] = &["**/.zipcheck.lock", "**/.*.partial"];

/// Errors for exclusion rules
#[derive(Debug, thiserror::Error)]
pub enum ExcludeError {
    #[error("glob pattern error: {0}")]
    Glob(#[from] globset::Error),
}

/// Glob-based exclusion rules, matched against `/`-separated relative paths.
#[derive(Debug, Clone)]
pub struct ExcludeRules {
    patterns: Vec<String>,
    glob_set: GlobSet,
}

impl Default for ExcludeRules {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::none())
    }
}

impl ExcludeRules {
    /// Create rules with the default exclusions
    pub fn new() -> Result<Self, ExcludeError> {
        Self::none().with_patterns(DEFAULT_EXCLUDES)
    }

    /// Rules that exclude nothing
    pub fn none() -> Self {
        Self {
            patterns: Vec::new(),
            glob_set: GlobSet::empty(),
        }
    }

    /// Add patterns on top of the existing ones
    pub fn with_patterns(self, patterns: &[&str]) -> Result<Self, ExcludeError> {
        let mut all = self.patterns;
        all.extend(
            patterns
                .iter()
                .filter(|p| !p.is_empty())
                .map(|p| p.to_string()),
        );

        let mut builder = GlobSetBuilder::new();
        for pattern in &all {
            builder.add(Glob::new(pattern)?);
        }

        Ok(Self {
            patterns: all,
            glob_set: builder.build()?,
        })
    }

    /// Check if a relative path should be excluded
    pub fn is_excluded(&self, path: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let path_str = path.to_string_lossy().replace('\\', "/");
        self.glob_set.is_match(path_str.as_str())
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}
