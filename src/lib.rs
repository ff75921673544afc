//! Cubrir - Multi-process code coverage core
//!
//! This library provides the core machinery for collecting coverage
//! from programs composed of many independently executed processes:
//! a content-addressable cache around a pluggable instrumenter,
//! source-map registration and remapping, per-process snapshot
//! persistence with a guaranteed exit flush, a corruption-tolerant
//! multi-file merge engine, and threshold enforcement.

pub mod accumulator;
pub mod config;
pub mod coverage;
pub mod filter;
pub mod loader;
pub mod merge;
pub mod process_writer;
pub mod report;
pub mod session;
pub mod source_map;
pub mod summary;
pub mod threshold;
pub mod transform_cache;

pub use accumulator::CoverageAccumulator;
pub use config::{CoverageConfig, FailureMode, FilterStage, InstrumentOptions};
pub use coverage::{CoverageMap, FileCoverage};
pub use filter::{AllowAll, RegexFilter, SourceFilter};
pub use merge::MergeEngine;
pub use process_writer::{CoverageWriter, ExitFlush, ProcessIdentity, ProcessRecord};
pub use session::CoverageSession;
pub use source_map::{SourceMap, SourceMapRegistry};
pub use summary::{CoverageSummary, Metric, MetricCoverage};
pub use threshold::{check_coverage, ThresholdOutcome, Thresholds, Watermarks};
pub use transform_cache::{Instrumenter, TransformCache, TransformMode};
