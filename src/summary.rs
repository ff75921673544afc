//! Coverage summaries
//!
//! Sprint 6: per-file and aggregate metric summaries
//!
//! A summary reduces a coverage record to covered/total pairs for the
//! four metrics thresholds understand. The line metric is derived
//! from the statement table: a line's hit count is the maximum hit
//! count of the statements starting on it.

use crate::coverage::{CoverageMap, FileCoverage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// The metrics a summary tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Statements,
    Branches,
    Functions,
    Lines,
}

impl Metric {
    /// Metric name as it appears in diagnostics
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Statements => "statements",
            Metric::Branches => "branches",
            Metric::Functions => "functions",
            Metric::Lines => "lines",
        }
    }
}

/// Covered/total pair for one metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetricCoverage {
    pub covered: u64,
    pub total: u64,
}

impl MetricCoverage {
    /// Coverage percentage; an empty metric is vacuously 100%
    pub fn pct(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.covered as f64 / self.total as f64) * 100.0
    }

    fn add(&mut self, other: MetricCoverage) {
        self.covered += other.covered;
        self.total += other.total;
    }
}

/// Summary of one file or one merged map
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub statements: MetricCoverage,
    pub branches: MetricCoverage,
    pub functions: MetricCoverage,
    pub lines: MetricCoverage,
}

impl CoverageSummary {
    /// Summarize a single file record
    pub fn of_file(coverage: &FileCoverage) -> Self {
        let statement_ids: BTreeSet<u32> = coverage
            .statements
            .keys()
            .chain(coverage.statement_hits.keys())
            .copied()
            .collect();
        let statements = MetricCoverage {
            covered: statement_ids
                .iter()
                .filter(|&id| coverage.statement_hits.get(id).is_some_and(|&c| c > 0))
                .count() as u64,
            total: statement_ids.len() as u64,
        };

        let function_ids: BTreeSet<u32> = coverage
            .functions
            .keys()
            .chain(coverage.function_hits.keys())
            .copied()
            .collect();
        let functions = MetricCoverage {
            covered: function_ids
                .iter()
                .filter(|&id| coverage.function_hits.get(id).is_some_and(|&c| c > 0))
                .count() as u64,
            total: function_ids.len() as u64,
        };

        let mut branches = MetricCoverage::default();
        let branch_ids: BTreeSet<u32> = coverage
            .branches
            .keys()
            .chain(coverage.branch_hits.keys())
            .copied()
            .collect();
        for id in branch_ids {
            let arm_count = coverage
                .branches
                .get(&id)
                .map(|b| b.arms.len())
                .unwrap_or(0)
                .max(coverage.branch_hits.get(&id).map(Vec::len).unwrap_or(0));
            branches.total += arm_count as u64;
            if let Some(hits) = coverage.branch_hits.get(&id) {
                branches.covered += hits.iter().filter(|&&c| c > 0).count() as u64;
            }
        }

        // Line metric: max statement hit count per starting line
        let mut line_hits: BTreeMap<u32, u64> = BTreeMap::new();
        for (id, range) in &coverage.statements {
            let count = coverage.statement_hits.get(id).copied().unwrap_or(0);
            let slot = line_hits.entry(range.start.line).or_insert(0);
            *slot = (*slot).max(count);
        }
        let lines = MetricCoverage {
            covered: line_hits.values().filter(|&&c| c > 0).count() as u64,
            total: line_hits.len() as u64,
        };

        Self {
            statements,
            branches,
            functions,
            lines,
        }
    }

    /// Aggregate summary over every file in a merged map
    pub fn of_map(map: &CoverageMap) -> Self {
        let mut aggregate = Self::default();
        for coverage in map.files.values() {
            aggregate.merge(Self::of_file(coverage));
        }
        aggregate
    }

    /// Fold another summary into this one
    pub fn merge(&mut self, other: CoverageSummary) {
        self.statements.add(other.statements);
        self.branches.add(other.branches);
        self.functions.add(other.functions);
        self.lines.add(other.lines);
    }

    /// Access one metric's covered/total pair
    pub fn metric(&self, metric: Metric) -> MetricCoverage {
        match metric {
            Metric::Statements => self.statements,
            Metric::Branches => self.branches,
            Metric::Functions => self.functions,
            Metric::Lines => self.lines,
        }
    }
}
