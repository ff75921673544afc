//! Multi-file coverage merge engine
//!
//! Sprint 8: merging persisted per-process snapshots
//!
//! The report pass runs after every writer process has exited (the
//! caller sequences that; this core supplies no cross-process
//! synchronization). It reads every snapshot in the temp directory,
//! tolerates partial or corrupt files from killed processes, merges
//! everything into one map, and applies exclusion filtering and
//! source-map remapping in the configured order. Remap happens
//! exactly once per pass: this engine owns the only call site.

use crate::config::{CoverageConfig, FilterStage};
use crate::coverage::CoverageMap;
use crate::filter::SourceFilter;
use crate::source_map::SourceMapRegistry;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Merges persisted coverage snapshots into one reportable map
pub struct MergeEngine {
    temp_dir: PathBuf,
    cache_dir: PathBuf,
    filter_stage: FilterStage,
    registry: Arc<SourceMapRegistry>,
    filter: Arc<dyn SourceFilter>,
}

impl MergeEngine {
    /// Create an engine bound to one session's config and registry
    pub fn new(
        config: &CoverageConfig,
        registry: Arc<SourceMapRegistry>,
        filter: Arc<dyn SourceFilter>,
    ) -> Self {
        Self {
            temp_dir: config.temp_dir.clone(),
            cache_dir: config.cache_dir.clone(),
            filter_stage: config.filter_stage,
            registry,
            filter,
        }
    }

    /// Enumerate the snapshot files a pass would read
    ///
    /// Either the explicit list or every `*.json` directly under the
    /// base directory (default: the temp directory). The
    /// `processinfo/` subdirectory holds identity records, not
    /// snapshots, and is skipped by construction.
    fn report_files(
        &self,
        files: Option<&[PathBuf]>,
        base_dir: Option<&Path>,
    ) -> Result<Vec<PathBuf>> {
        if let Some(files) = files {
            return Ok(files.to_vec());
        }
        let dir = base_dir.unwrap_or(&self.temp_dir);
        let entries = fs::read_dir(dir)
            .with_context(|| format!("Failed to read coverage directory {}", dir.display()))?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Invoke `iterator` with each snapshot's coverage map
    ///
    /// A snapshot that cannot be read or parsed (the signature of a
    /// process killed mid-write) contributes an empty map and the
    /// pass continues. Source maps implied by each report's content
    /// hashes are reloaded from the cache directory before the
    /// iterator runs, so remapping works in a process that never
    /// transformed the files itself.
    pub fn each_report<F>(
        &self,
        files: Option<&[PathBuf]>,
        base_dir: Option<&Path>,
        mut iterator: F,
    ) -> Result<()>
    where
        F: FnMut(CoverageMap, &Path),
    {
        for path in self.report_files(files, base_dir)? {
            let map = match fs::read_to_string(&path) {
                Ok(text) => match serde_json::from_str::<CoverageMap>(&text) {
                    Ok(map) => map,
                    Err(e) => {
                        warn!(
                            "Ignoring corrupt coverage file {}: {}",
                            path.display(),
                            e
                        );
                        CoverageMap::new()
                    }
                },
                Err(e) => {
                    warn!("Ignoring unreadable coverage file {}: {}", path.display(), e);
                    CoverageMap::new()
                }
            };
            self.registry.reload_cached_source_maps(&map, &self.cache_dir);
            iterator(map, &path);
        }
        Ok(())
    }

    /// Merge every snapshot into one filtered, remapped coverage map
    ///
    /// Merging sums hit counts per identical location identity and is
    /// commutative and associative, so the result is independent of
    /// file-processing order. Filtering runs before or after remap
    /// per the configured [`FilterStage`]; the two are semantically
    /// distinct (generated-file vs original-file identity) and
    /// neither is inferred.
    pub fn merged_coverage_map(&self, base_dir: Option<&Path>) -> Result<CoverageMap> {
        let mut merged = CoverageMap::new();
        let mut report_count = 0usize;
        self.each_report(None, base_dir, |map, path| {
            debug!("Merging {} files from {}", map.len(), path.display());
            merged.merge(map);
            report_count += 1;
        })?;
        debug!("Merged {} reports covering {} files", report_count, merged.len());

        let map = match self.filter_stage {
            FilterStage::BeforeRemap => {
                let mut map = merged;
                map.retain_files(|path| self.filter.should_cover(Path::new(path)));
                self.registry.remap_coverage(map)
            }
            FilterStage::AfterRemap => {
                let mut map = self.registry.remap_coverage(merged);
                map.retain_files(|path| self.filter.should_cover(Path::new(path)));
                map
            }
        };
        Ok(map)
    }
}
