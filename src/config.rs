//! Session configuration
//!
//! Sprint 1: configuration surface shared by every component
//!
//! This crate is a library: flag parsing and config-file loading belong
//! to the embedding tool. `CoverageConfig` is a plain struct with
//! serde derives so hosts can nest it inside their own configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable carrying the parent process identity
///
/// A supervisor sets this (see `ProcessIdentity::child_env`) when
/// spawning workers so their process records link back to it.
pub const PARENT_ID_ENV: &str = "CUBRIR_PARENT_ID";

/// Environment variable that suppresses teardown cleanup
///
/// When set (to any value), `CoverageSession::cleanup` leaves the temp
/// and cache directories in place so nested or chained invocations can
/// share persisted state across process boundaries.
pub const PRESERVE_CACHE_ENV: &str = "CUBRIR_PRESERVE_CACHE";

/// What to do when the instrumentation engine fails on a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureMode {
    /// Log the failing filename and propagate the error; the host
    /// process is expected to abort
    #[default]
    Fatal,
    /// Log a warning and fall back to the original uninstrumented
    /// source; that file reports zero coverage
    Degraded,
}

/// When the include/exclude predicate runs relative to source-map remap
///
/// The two stages are semantically distinct: `BeforeRemap` matches
/// paths of the generated files that actually executed, `AfterRemap`
/// matches original-source paths produced by the remap. Neither is
/// inferred; the report pass does exactly what is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterStage {
    /// Filter by generated-file identity, then remap
    #[default]
    BeforeRemap,
    /// Remap, then filter by original-file identity
    AfterRemap,
}

/// Configuration subset that affects instrumentation output
///
/// This struct is the salt source: its canonical JSON serialization is
/// folded into every cache key, so changing any field invalidates all
/// cached entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentOptions {
    /// Ask the engine to emit a source map with the instrumented code
    pub produce_source_maps: bool,
    /// Keep comments in the instrumented output
    pub preserve_comments: bool,
    /// Identifier prefix the engine uses for injected counters
    pub counter_id: String,
}

impl Default for InstrumentOptions {
    fn default() -> Self {
        Self {
            produce_source_maps: true,
            preserve_comments: false,
            counter_id: "__cub".to_string(),
        }
    }
}

/// Top-level configuration for a coverage session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageConfig {
    /// Directory receiving per-process coverage files and the
    /// `processinfo/` record subdirectory
    pub temp_dir: PathBuf,
    /// Directory holding content-addressed transform cache entries
    pub cache_dir: PathBuf,
    /// Enable the persistent transform cache; when false, coverage is
    /// remapped at write time instead of being hash-stamped
    pub cache: bool,
    /// Instrumentation failure handling
    pub failure_mode: FailureMode,
    /// Where exclusion filtering runs in the report pass
    pub filter_stage: FilterStage,
    /// Salt-relevant instrumentation options
    pub instrument_options: InstrumentOptions,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            temp_dir: PathBuf::from(".cubrir_output"),
            cache_dir: PathBuf::from(".cubrir_cache"),
            cache: true,
            failure_mode: FailureMode::default(),
            filter_stage: FilterStage::default(),
            instrument_options: InstrumentOptions::default(),
        }
    }
}

impl CoverageConfig {
    /// Create a configuration with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the temp directory
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Set the cache directory
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Enable or disable the persistent transform cache
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache = enabled;
        self
    }

    /// Set the instrumentation failure mode
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Set the filter stage for the report pass
    pub fn with_filter_stage(mut self, stage: FilterStage) -> Self {
        self.filter_stage = stage;
        self
    }

    /// Directory holding per-process identity records
    pub fn processinfo_dir(&self) -> PathBuf {
        self.temp_dir.join("processinfo")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoverageConfig::default();
        assert!(config.cache);
        assert_eq!(config.failure_mode, FailureMode::Fatal);
        assert_eq!(config.filter_stage, FilterStage::BeforeRemap);
    }

    #[test]
    fn test_builder_chain() {
        let config = CoverageConfig::new()
            .with_temp_dir("/tmp/cov")
            .with_cache(false)
            .with_failure_mode(FailureMode::Degraded)
            .with_filter_stage(FilterStage::AfterRemap);
        assert_eq!(config.temp_dir, PathBuf::from("/tmp/cov"));
        assert!(!config.cache);
        assert_eq!(config.failure_mode, FailureMode::Degraded);
        assert_eq!(config.filter_stage, FilterStage::AfterRemap);
    }

    #[test]
    fn test_processinfo_dir_under_temp() {
        let config = CoverageConfig::new().with_temp_dir("/tmp/cov");
        assert_eq!(config.processinfo_dir(), PathBuf::from("/tmp/cov/processinfo"));
    }

    #[test]
    fn test_instrument_options_serialize_stable() {
        let opts = InstrumentOptions::default();
        let a = serde_json::to_string(&opts).unwrap();
        let b = serde_json::to_string(&opts).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_failure_mode_kebab_case() {
        let json = serde_json::to_string(&FailureMode::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
    }
}
