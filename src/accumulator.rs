//! Process-local coverage accumulator
//!
//! Sprint 1: explicit accumulator object
//!
//! One accumulator is owned per process and passed by reference into
//! every instrumentation call site; there is no ambient global lookup.
//! The interior mutex exists so instrumented call sites and the
//! exit-time flush can share one object, not for parallelism; this
//! core has no intra-process concurrency.

use crate::coverage::{CoverageMap, FileCoverage};
use std::sync::Mutex;

/// Accumulates raw hit counts for one process
#[derive(Debug, Default)]
pub struct CoverageAccumulator {
    inner: Mutex<CoverageMap>,
}

impl CoverageAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the location table for a file, typically at load time
    ///
    /// Registering a file that is already tracked merges the incoming
    /// record, so re-loading a file is harmless.
    pub fn register_file(&self, coverage: FileCoverage) {
        let mut map = self.inner.lock().expect("accumulator poisoned");
        map.add_file(coverage);
    }

    /// Record one execution of a statement
    pub fn hit_statement(&self, path: &str, id: u32) {
        let mut map = self.inner.lock().expect("accumulator poisoned");
        let file = map
            .files
            .entry(path.to_string())
            .or_insert_with(|| FileCoverage::new(path));
        *file.statement_hits.entry(id).or_insert(0) += 1;
    }

    /// Record one invocation of a function
    pub fn hit_function(&self, path: &str, id: u32) {
        let mut map = self.inner.lock().expect("accumulator poisoned");
        let file = map
            .files
            .entry(path.to_string())
            .or_insert_with(|| FileCoverage::new(path));
        *file.function_hits.entry(id).or_insert(0) += 1;
    }

    /// Record one execution of a branch arm
    pub fn hit_branch(&self, path: &str, id: u32, arm: usize) {
        let mut map = self.inner.lock().expect("accumulator poisoned");
        let file = map
            .files
            .entry(path.to_string())
            .or_insert_with(|| FileCoverage::new(path));
        let arms = file.branch_hits.entry(id).or_default();
        if arms.len() <= arm {
            arms.resize(arm + 1, 0);
        }
        arms[arm] += 1;
    }

    /// Clone the current state
    pub fn snapshot(&self) -> CoverageMap {
        self.inner.lock().expect("accumulator poisoned").clone()
    }

    /// Drain the accumulator, leaving it empty
    pub fn take(&self) -> CoverageMap {
        std::mem::take(&mut *self.inner.lock().expect("accumulator poisoned"))
    }

    /// True when nothing has been recorded or registered
    pub fn is_empty(&self) -> bool {
        self.inner.lock().expect("accumulator poisoned").is_empty()
    }
}
