//! Session wiring and teardown
//!
//! One `CoverageSession` per process assembles the core components
//! from a single configuration and a single instrumenter instance.
//! The instrumenter is constructed by the host exactly once and
//! passed in by reference; nothing here materializes one lazily.

use crate::accumulator::CoverageAccumulator;
use crate::config::{CoverageConfig, PRESERVE_CACHE_ENV};
use crate::filter::{AllowAll, SourceFilter};
use crate::merge::MergeEngine;
use crate::process_writer::{CoverageWriter, ExitFlush, ProcessIdentity};
use crate::source_map::SourceMapRegistry;
use crate::threshold::{check_coverage, ThresholdOutcome, Thresholds};
use crate::transform_cache::{Instrumenter, TransformCache, TransformMode};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// One process's coverage session
pub struct CoverageSession {
    config: CoverageConfig,
    identity: ProcessIdentity,
    registry: Arc<SourceMapRegistry>,
    cache: Arc<TransformCache>,
    accumulator: Arc<CoverageAccumulator>,
    filter: Arc<dyn SourceFilter>,
}

impl CoverageSession {
    /// Create a session covering every file
    pub fn new(config: CoverageConfig, instrumenter: Arc<dyn Instrumenter>) -> Self {
        Self::with_filter(config, instrumenter, Arc::new(AllowAll))
    }

    /// Create a session with an explicit inclusion/exclusion predicate
    pub fn with_filter(
        config: CoverageConfig,
        instrumenter: Arc<dyn Instrumenter>,
        filter: Arc<dyn SourceFilter>,
    ) -> Self {
        let registry = Arc::new(SourceMapRegistry::new());
        let cache = Arc::new(TransformCache::new(&config, instrumenter, registry.clone()));
        Self {
            config,
            identity: ProcessIdentity::generate(),
            registry,
            cache,
            accumulator: Arc::new(CoverageAccumulator::new()),
            filter,
        }
    }

    /// Session configuration
    pub fn config(&self) -> &CoverageConfig {
        &self.config
    }

    /// This process's identity
    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    /// The shared source-map registry
    pub fn registry(&self) -> &Arc<SourceMapRegistry> {
        &self.registry
    }

    /// The shared transform cache
    pub fn cache(&self) -> &Arc<TransformCache> {
        &self.cache
    }

    /// The process-owned coverage accumulator
    pub fn accumulator(&self) -> &Arc<CoverageAccumulator> {
        &self.accumulator
    }

    /// Transform source through the session cache
    pub fn transform(
        &self,
        source: &str,
        path: &Path,
        mode: TransformMode,
    ) -> crate::transform_cache::Result<String> {
        self.cache.transform(source, path, mode)
    }

    /// Build this process's coverage writer
    pub fn writer(&self) -> CoverageWriter {
        CoverageWriter::new(
            &self.config,
            self.identity.clone(),
            self.accumulator.clone(),
            Some(self.cache.clone()),
            self.registry.clone(),
            self.filter.clone(),
        )
    }

    /// Arm the exit flush for this process
    pub fn install_exit_flush(&self) -> ExitFlush {
        ExitFlush::install(self.writer())
    }

    /// Build the merge engine for the report pass
    pub fn merge_engine(&self) -> MergeEngine {
        MergeEngine::new(&self.config, self.registry.clone(), self.filter.clone())
    }

    /// Merge all persisted snapshots and evaluate thresholds
    pub fn check(&self, thresholds: &Thresholds, per_file: bool) -> Result<ThresholdOutcome> {
        let merged = self.merge_engine().merged_coverage_map(None)?;
        Ok(check_coverage(&merged, thresholds, per_file))
    }

    /// Remove the session's temp and cache directories
    ///
    /// Honors the preserve environment variable so nested or chained
    /// invocations can share persisted state: when it is set, nothing
    /// is deleted.
    pub fn cleanup(&self) -> Result<()> {
        if std::env::var_os(PRESERVE_CACHE_ENV).is_some() {
            debug!(
                "{} is set, preserving {} and {}",
                PRESERVE_CACHE_ENV,
                self.config.temp_dir.display(),
                self.config.cache_dir.display()
            );
            return Ok(());
        }
        remove_dir_if_present(&self.config.temp_dir)
            .with_context(|| format!("Failed to remove {}", self.config.temp_dir.display()))?;
        remove_dir_if_present(&self.config.cache_dir)
            .with_context(|| format!("Failed to remove {}", self.config.cache_dir.display()))?;
        Ok(())
    }
}

fn remove_dir_if_present(dir: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
