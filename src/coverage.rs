//! Coverage data model: per-file location tables and hit counts
//!
//! Sprint 1: MVP coverage map with commutative merge
//!
//! A `CoverageMap` is the unit of persistence (one per process) and the
//! unit of reporting (all process snapshots merged into one). Location
//! tables are keyed by numeric ids that are stable for a given file
//! content identity, so merging snapshots produced from the same
//! instrumented source reduces to summing the parallel hit tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A position in a source file (1-based line, 0-based column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A half-open source range from `start` to `end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Location,
    pub end: Location,
}

impl Range {
    pub fn new(start_line: u32, start_column: u32, end_line: u32, end_column: u32) -> Self {
        Self {
            start: Location::new(start_line, start_column),
            end: Location::new(end_line, end_column),
        }
    }
}

/// Location table entry for a single function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionMapping {
    /// Function name as it appears in the instrumented source
    pub name: String,
    /// Declaration range (the `fn name(...)` span)
    pub decl: Range,
    /// Full body range
    pub loc: Range,
    /// Line the declaration starts on
    pub line: u32,
}

/// Location table entry for a single branch site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchMapping {
    /// Branch kind (e.g. "if", "match-arm", "cond-expr")
    pub kind: String,
    /// Range of the whole branch construct
    pub loc: Range,
    /// One range per alternative; parallel to the hit vector
    pub arms: Vec<Range>,
}

/// Coverage record for one source file
///
/// The three location tables describe what was instrumented; the three
/// hit tables are parallel to them by id. `content_hash` is stamped by
/// the process coverage writer when cross-run caching is enabled and
/// lets a later reporting pass reload cached source maps for files it
/// never transformed itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileCoverage {
    /// Absolute path of the covered file
    pub path: String,
    /// Statement id -> source range
    #[serde(default)]
    pub statements: BTreeMap<u32, Range>,
    /// Function id -> declaration/body ranges
    #[serde(default)]
    pub functions: BTreeMap<u32, FunctionMapping>,
    /// Branch id -> alternative ranges
    #[serde(default)]
    pub branches: BTreeMap<u32, BranchMapping>,
    /// Statement id -> hit count
    #[serde(default)]
    pub statement_hits: BTreeMap<u32, u64>,
    /// Function id -> hit count
    #[serde(default)]
    pub function_hits: BTreeMap<u32, u64>,
    /// Branch id -> per-arm hit counts (parallel to `arms`)
    #[serde(default)]
    pub branch_hits: BTreeMap<u32, Vec<u64>>,
    /// Salted content hash, present only when cross-run caching is on
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub content_hash: Option<String>,
}

impl FileCoverage {
    /// Create an empty record for a file
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            statements: BTreeMap::new(),
            functions: BTreeMap::new(),
            branches: BTreeMap::new(),
            statement_hits: BTreeMap::new(),
            function_hits: BTreeMap::new(),
            branch_hits: BTreeMap::new(),
            content_hash: None,
        }
    }

    /// Register a statement location with a zero hit count
    pub fn add_statement(&mut self, id: u32, range: Range) {
        self.statements.insert(id, range);
        self.statement_hits.entry(id).or_insert(0);
    }

    /// Register a function location with a zero hit count
    pub fn add_function(&mut self, id: u32, mapping: FunctionMapping) {
        self.functions.insert(id, mapping);
        self.function_hits.entry(id).or_insert(0);
    }

    /// Register a branch site with zeroed per-arm counts
    pub fn add_branch(&mut self, id: u32, mapping: BranchMapping) {
        let arms = mapping.arms.len();
        self.branches.insert(id, mapping);
        self.branch_hits.entry(id).or_insert_with(|| vec![0; arms]);
    }

    /// Zero every hit count, keeping the location tables
    ///
    /// Used for discovery-mode baselines: a file that was never
    /// executed still contributes its full location table at zero.
    pub fn reset_hits(&mut self) {
        for count in self.statement_hits.values_mut() {
            *count = 0;
        }
        for count in self.function_hits.values_mut() {
            *count = 0;
        }
        for arms in self.branch_hits.values_mut() {
            arms.iter_mut().for_each(|c| *c = 0);
        }
    }

    /// Merge another record for the same file into this one
    ///
    /// Hit counts for ids present on both sides are summed; ids seen
    /// only on one side are carried over together with their location
    /// table entries. Ids are stable per content identity, so valid
    /// snapshots of the same file agree on their location tables and
    /// the operation is commutative and associative.
    pub fn merge(&mut self, other: FileCoverage) {
        for (id, range) in other.statements {
            self.statements.entry(id).or_insert(range);
        }
        for (id, mapping) in other.functions {
            self.functions.entry(id).or_insert(mapping);
        }
        for (id, mapping) in other.branches {
            self.branches.entry(id).or_insert(mapping);
        }
        for (id, count) in other.statement_hits {
            *self.statement_hits.entry(id).or_insert(0) += count;
        }
        for (id, count) in other.function_hits {
            *self.function_hits.entry(id).or_insert(0) += count;
        }
        for (id, arms) in other.branch_hits {
            let mine = self.branch_hits.entry(id).or_default();
            if mine.len() < arms.len() {
                mine.resize(arms.len(), 0);
            }
            for (slot, count) in mine.iter_mut().zip(arms) {
                *slot += count;
            }
        }
        if self.content_hash.is_none() {
            self.content_hash = other.content_hash;
        }
    }
}

/// Coverage for a whole process or a whole merged report
///
/// Keyed by absolute file path. BTreeMap keeps serialization
/// deterministic: identical coverage always produces identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverageMap {
    pub files: BTreeMap<String, FileCoverage>,
}

impl CoverageMap {
    /// Create an empty coverage map
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files tracked
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True when no files are tracked
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Insert or merge a per-file record under its own path
    pub fn add_file(&mut self, coverage: FileCoverage) {
        match self.files.get_mut(&coverage.path) {
            Some(existing) => existing.merge(coverage),
            None => {
                self.files.insert(coverage.path.clone(), coverage);
            }
        }
    }

    /// Merge an entire snapshot into this one
    pub fn merge(&mut self, other: CoverageMap) {
        for (_, coverage) in other.files {
            self.add_file(coverage);
        }
    }

    /// Drop every file whose path fails the predicate
    pub fn retain_files<F: FnMut(&str) -> bool>(&mut self, mut keep: F) {
        self.files.retain(|path, _| keep(path));
    }
}
