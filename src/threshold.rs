//! Coverage threshold enforcement
//!
//! Sprint 6: minimum-percentage checks over merged coverage
//!
//! Thresholds are evaluated against a merged summary, either one
//! aggregate check or one check per tracked file. Evaluation never
//! short-circuits: every configured metric of every file is checked
//! so the diagnostics name all violations in one pass. The outcome
//! carries a failure flag for the caller to map to an exit status;
//! the library itself never terminates the process.

use crate::coverage::CoverageMap;
use crate::summary::{CoverageSummary, Metric};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;

/// Minimum required percentage per metric; unset metrics are not checked
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub statements: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub branches: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub functions: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lines: Option<f64>,
}

impl Thresholds {
    /// No thresholds configured
    pub fn none() -> Self {
        Self::default()
    }

    /// Require a minimum statement percentage
    pub fn statements(mut self, pct: f64) -> Self {
        self.statements = Some(pct);
        self
    }

    /// Require a minimum branch percentage
    pub fn branches(mut self, pct: f64) -> Self {
        self.branches = Some(pct);
        self
    }

    /// Require a minimum function percentage
    pub fn functions(mut self, pct: f64) -> Self {
        self.functions = Some(pct);
        self
    }

    /// Require a minimum line percentage
    pub fn lines(mut self, pct: f64) -> Self {
        self.lines = Some(pct);
        self
    }

    /// The configured (metric, minimum) pairs
    fn configured(&self) -> Vec<(Metric, f64)> {
        [
            (Metric::Statements, self.statements),
            (Metric::Branches, self.branches),
            (Metric::Functions, self.functions),
            (Metric::Lines, self.lines),
        ]
        .into_iter()
        .filter_map(|(metric, min)| min.map(|m| (metric, m)))
        .collect()
    }
}

/// One threshold miss
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdViolation {
    /// Metric that missed
    pub metric: Metric,
    /// Observed percentage
    pub actual: f64,
    /// Required minimum percentage
    pub required: f64,
    /// File the check was scoped to (per-file mode only)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub file: Option<String>,
}

impl fmt::Display for ThresholdViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(
                f,
                "coverage for {} ({}%) does not meet threshold ({}%) for {}",
                self.metric.as_str(),
                self.actual,
                self.required,
                file
            ),
            None => write!(
                f,
                "coverage for {} ({}%) does not meet threshold ({}%)",
                self.metric.as_str(),
                self.actual,
                self.required
            ),
        }
    }
}

/// Result of a threshold pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOutcome {
    /// Every violation found, in check order
    pub violations: Vec<ThresholdViolation>,
}

impl ThresholdOutcome {
    /// True when at least one threshold was missed
    ///
    /// This is the process-level failure signal: the embedding tool
    /// maps it to a nonzero exit status.
    pub fn failed(&self) -> bool {
        !self.violations.is_empty()
    }
}

/// Evaluate thresholds over a merged coverage map
///
/// `per_file = true` computes and checks one summary per tracked
/// file; `per_file = false` checks a single aggregate summary. A
/// metric fails when its percentage is strictly below the required
/// minimum; equality passes.
pub fn check_coverage(map: &CoverageMap, thresholds: &Thresholds, per_file: bool) -> ThresholdOutcome {
    let mut outcome = ThresholdOutcome::default();
    if per_file {
        for (path, coverage) in &map.files {
            let summary = CoverageSummary::of_file(coverage);
            check_summary(&summary, thresholds, Some(path.as_str()), &mut outcome);
        }
    } else {
        let summary = CoverageSummary::of_map(map);
        check_summary(&summary, thresholds, None, &mut outcome);
    }
    outcome
}

fn check_summary(
    summary: &CoverageSummary,
    thresholds: &Thresholds,
    file: Option<&str>,
    outcome: &mut ThresholdOutcome,
) {
    for (metric, required) in thresholds.configured() {
        let actual = summary.metric(metric).pct();
        if actual < required {
            let violation = ThresholdViolation {
                metric,
                actual,
                required,
                file: file.map(str::to_string),
            };
            error!("{}", violation);
            outcome.violations.push(violation);
        }
    }
}

/// Low/high watermarks per metric, consumed by report renderers
///
/// Percentages below `low` render as danger, between `low` and `high`
/// as warning, at or above `high` as healthy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Watermarks {
    pub statements: (f64, f64),
    pub branches: (f64, f64),
    pub functions: (f64, f64),
    pub lines: (f64, f64),
}

impl Default for Watermarks {
    fn default() -> Self {
        Self {
            statements: (50.0, 80.0),
            branches: (50.0, 80.0),
            functions: (50.0, 80.0),
            lines: (50.0, 80.0),
        }
    }
}
