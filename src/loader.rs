//! Load-time interception seam
//!
//! Sprint 5: composable loader abstraction
//!
//! Instead of patching a runtime's module machinery, the host routes
//! its source loading through one explicit hook point: resolve a
//! specifier to a path, load the path, and let the coverage layer
//! substitute instrumented code for files the filter admits.

use crate::filter::SourceFilter;
use crate::transform_cache::{TransformCache, TransformMode};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Single interception point for module loading
pub trait SourceLoader: Send + Sync {
    /// Resolve a specifier (as written in source) to an absolute path
    fn resolve(&self, specifier: &str, referrer: Option<&Path>) -> Result<PathBuf>;

    /// Load the source text for a resolved path
    fn load(&self, path: &Path) -> Result<String>;
}

/// Plain filesystem loader: relative specifiers resolve against the
/// referrer's directory, absolute ones pass through
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLoader;

impl SourceLoader for FsLoader {
    fn resolve(&self, specifier: &str, referrer: Option<&Path>) -> Result<PathBuf> {
        let path = Path::new(specifier);
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        let base = referrer
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .map_or_else(std::env::current_dir, Ok)?;
        Ok(base.join(path))
    }

    fn load(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).with_context(|| format!("Failed to load {}", path.display()))
    }
}

/// Loader that substitutes instrumented code for admitted files
///
/// Wraps any base loader; resolution is delegated untouched, loads go
/// through the transform cache when the filter admits the path.
pub struct InstrumentingLoader<L: SourceLoader> {
    base: L,
    cache: Arc<TransformCache>,
    filter: Arc<dyn SourceFilter>,
    mode: TransformMode,
}

impl<L: SourceLoader> InstrumentingLoader<L> {
    /// Wrap `base` with instrumentation in normal (execute) mode
    pub fn new(base: L, cache: Arc<TransformCache>, filter: Arc<dyn SourceFilter>) -> Self {
        Self {
            base,
            cache,
            filter,
            mode: TransformMode::Normal,
        }
    }

    /// Switch the loader's transform mode (discovery for baselines)
    pub fn with_mode(mut self, mode: TransformMode) -> Self {
        self.mode = mode;
        self
    }
}

impl<L: SourceLoader> SourceLoader for InstrumentingLoader<L> {
    fn resolve(&self, specifier: &str, referrer: Option<&Path>) -> Result<PathBuf> {
        self.base.resolve(specifier, referrer)
    }

    fn load(&self, path: &Path) -> Result<String> {
        let source = self.base.load(path)?;
        if !self.filter.should_cover(path) {
            return Ok(source);
        }
        self.cache
            .transform(&source, path, self.mode)
            .with_context(|| format!("Failed to transform {}", path.display()))
    }
}
