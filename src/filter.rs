//! Source file inclusion/exclusion filtering
//!
//! Sprint 2: regex-backed include/exclude predicate
//!
//! Discovery of candidate files and glob evaluation live in the
//! embedding tool; the core only needs a predicate answering "does
//! this path participate in coverage". `SourceFilter` is that seam,
//! with a regex-backed default implementation.

use anyhow::{Context, Result};
use regex::Regex;
use std::path::Path;

/// Predicate deciding whether a file participates in coverage
///
/// Consulted by the transform layer (skip instrumentation), the
/// process writer (excluded entries are never persisted), and the
/// merge engine (excluded entries never reach a report).
pub trait SourceFilter: Send + Sync {
    /// True when the file at `path` should be covered
    fn should_cover(&self, path: &Path) -> bool;
}

/// Filter that admits every path
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl SourceFilter for AllowAll {
    fn should_cover(&self, _path: &Path) -> bool {
        true
    }
}

/// Regex include/exclude filter
///
/// An empty include list admits everything; exclusion always wins over
/// inclusion.
#[derive(Debug, Clone, Default)]
pub struct RegexFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl RegexFilter {
    /// Build a filter from include and exclude pattern lists
    pub fn from_patterns(include: &[&str], exclude: &[&str]) -> Result<Self> {
        let compile = |patterns: &[&str]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| Regex::new(p).with_context(|| format!("Invalid filter pattern: {}", p)))
                .collect()
        };
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// Filter that only excludes (include list empty = admit all)
    pub fn exclude_only(exclude: &[&str]) -> Result<Self> {
        Self::from_patterns(&[], exclude)
    }
}

impl SourceFilter for RegexFilter {
    fn should_cover(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        if self.exclude.iter().any(|re| re.is_match(&text)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|re| re.is_match(&text))
    }
}
