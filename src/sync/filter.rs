//! Glob-based exclusion for sync sources.
//!
//! Patterns are matched against the whole source path string with shell
//! glob semantics (`*`, `?`, `[...]`). `*` is allowed to cross `/`, so
//! `*.log` excludes `/work/app/debug.log`.

use std::path::Path;
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::SyncError;

/// Compiled set of exclusion globs.
#[derive(Debug, Clone)]
pub struct PathFilter {
    /// Compiled glob set for matching.
    glob_set: Arc<GlobSet>,
    /// Raw pattern strings, in insertion order.
    patterns: Vec<String>,
}

impl Default for PathFilter {
    fn default() -> Self {
        Self::empty()
    }
}

impl PathFilter {
    /// A filter that excludes nothing.
    pub fn empty() -> Self {
        Self {
            glob_set: Arc::new(GlobSet::empty()),
            patterns: Vec::new(),
        }
    }

    /// Compile a pattern list. Any malformed pattern fails the whole set.
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self, SyncError> {
        let mut builder = GlobSetBuilder::new();
        let mut pattern_list = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = Glob::new(pattern).map_err(|e| {
                SyncError::Configuration(format!("invalid exclude pattern '{}': {}", pattern, e))
            })?;
            builder.add(glob);
            pattern_list.push(pattern.to_string());
        }

        let glob_set = builder
            .build()
            .map_err(|e| SyncError::Configuration(format!("invalid exclude patterns: {}", e)))?;

        Ok(Self {
            glob_set: Arc::new(glob_set),
            patterns: pattern_list,
        })
    }

    /// Check if a path should be excluded.
    pub fn is_excluded(&self, path: &Path) -> bool {
        if self.is_empty() {
            return false;
        }
        self.glob_set.is_match(path)
    }

    /// Get the list of patterns.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// One-shot form of [`PathFilter`]: is `path` matched by any of `patterns`?
pub fn is_excluded<S: AsRef<str>>(path: &Path, patterns: &[S]) -> Result<bool, SyncError> {
    Ok(PathFilter::from_patterns(patterns)?.is_excluded(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn excluded(filter: &PathFilter, path: &str) -> bool {
        filter.is_excluded(Path::new(path))
    }

    #[test]
    fn test_empty_set_never_excludes() {
        let filter = PathFilter::empty();
        assert!(!excluded(&filter, "/src/app/main.rs"));
        assert!(!excluded(&filter, ""));
        assert!(!is_excluded::<&str>(Path::new("anything"), &[]).unwrap());
    }

    #[test]
    fn test_star_matches_across_separators() {
        let filter = PathFilter::from_patterns(&["*.log"]).unwrap();

        assert!(excluded(&filter, "b.log"));
        assert!(excluded(&filter, "/work/app/b.log"));
        assert!(!excluded(&filter, "/work/app/a.txt"));
    }

    #[test]
    fn test_question_mark_and_class() {
        let filter = PathFilter::from_patterns(&["*/file?.txt", "*/[ab].bin"]).unwrap();

        assert!(excluded(&filter, "/data/file1.txt"));
        assert!(!excluded(&filter, "/data/file10.txt"));
        assert!(excluded(&filter, "/data/a.bin"));
        assert!(!excluded(&filter, "/data/c.bin"));
    }

    #[test]
    fn test_any_pattern_matches() {
        let filter = PathFilter::from_patterns(&["*.tmp", "*/.git", "*/node_modules"]).unwrap();

        assert!(excluded(&filter, "/repo/.git"));
        assert!(excluded(&filter, "/repo/web/node_modules"));
        assert!(excluded(&filter, "/repo/x.tmp"));
        assert!(!excluded(&filter, "/repo/src/lib.rs"));
    }

    #[test]
    fn test_malformed_pattern_is_configuration_error() {
        let err = PathFilter::from_patterns(&["[unclosed"]).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
        assert!(err.to_string().contains("[unclosed"));
    }

    #[test]
    fn test_patterns_keep_insertion_order() {
        let filter = PathFilter::from_patterns(&["*.log", "*.tmp"]).unwrap();
        assert_eq!(filter.patterns(), &["*.log", "*.tmp"]);
        assert!(!filter.is_empty());
        assert!(PathFilter::default().is_empty());
    }
}
