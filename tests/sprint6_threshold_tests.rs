// Sprint 6: Summaries and threshold enforcement
// Integration tests for metric computation and the failure signal

use cubrir::coverage::{FileCoverage, Range};
use cubrir::{check_coverage, CoverageMap, CoverageSummary, Thresholds};

fn file_with_pct(path: &str, covered: u32, total: u32) -> FileCoverage {
    let mut fc = FileCoverage::new(path);
    for id in 0..total {
        fc.add_statement(id, Range::new(id + 1, 0, id + 1, 12));
        fc.statement_hits.insert(id, u64::from(id < covered));
    }
    fc
}

#[test]
fn test_seventy_nine_fails_eighty() {
    let mut map = CoverageMap::new();
    map.add_file(file_with_pct("/a.rs", 79, 100));

    let outcome = check_coverage(&map, &Thresholds::none().statements(80.0), false);
    assert!(outcome.failed());

    let message = outcome.violations[0].to_string();
    assert!(message.contains("79"));
    assert!(message.contains("80"));
    assert!(message.contains("statements"));
}

#[test]
fn test_exactly_eighty_passes() {
    let mut map = CoverageMap::new();
    map.add_file(file_with_pct("/a.rs", 80, 100));

    let outcome = check_coverage(&map, &Thresholds::none().statements(80.0), false);
    assert!(!outcome.failed());
    assert!(outcome.violations.is_empty());
}

#[test]
fn test_global_mode_aggregates_before_checking() {
    // 90% and 70% files aggregate to 80%, which passes an 80% bar
    // even though one file alone would fail it
    let mut map = CoverageMap::new();
    map.add_file(file_with_pct("/hot.rs", 90, 100));
    map.add_file(file_with_pct("/cold.rs", 70, 100));

    let outcome = check_coverage(&map, &Thresholds::none().statements(80.0), false);
    assert!(!outcome.failed());
}

#[test]
fn test_per_file_mode_checks_each_file() {
    let mut map = CoverageMap::new();
    map.add_file(file_with_pct("/hot.rs", 90, 100));
    map.add_file(file_with_pct("/cold.rs", 70, 100));

    let outcome = check_coverage(&map, &Thresholds::none().statements(80.0), true);
    assert!(outcome.failed());
    assert_eq!(outcome.violations.len(), 1);
    assert_eq!(outcome.violations[0].file.as_deref(), Some("/cold.rs"));
}

#[test]
fn test_all_violations_reported_not_just_the_first() {
    let mut map = CoverageMap::new();
    map.add_file(file_with_pct("/one.rs", 10, 100));
    map.add_file(file_with_pct("/two.rs", 20, 100));
    map.add_file(file_with_pct("/three.rs", 30, 100));

    let thresholds = Thresholds::none().statements(50.0).lines(50.0);
    let outcome = check_coverage(&map, &thresholds, true);
    // Two configured metrics, three failing files: six violations
    assert_eq!(outcome.violations.len(), 6);
}

#[test]
fn test_line_metric_follows_statements() {
    let mut fc = FileCoverage::new("/a.rs");
    // Two statements on the same line, only one executed
    fc.add_statement(0, Range::new(5, 0, 5, 10));
    fc.add_statement(1, Range::new(5, 12, 5, 20));
    fc.statement_hits.insert(0, 1);
    fc.statement_hits.insert(1, 0);
    // One statement alone on an unexecuted line
    fc.add_statement(2, Range::new(9, 0, 9, 4));

    let summary = CoverageSummary::of_file(&fc);
    assert_eq!(summary.lines.total, 2);
    assert_eq!(summary.lines.covered, 1);

    let mut map = CoverageMap::new();
    map.add_file(fc);
    let outcome = check_coverage(&map, &Thresholds::none().lines(60.0), false);
    assert!(outcome.failed());
}

#[test]
fn test_multiple_metrics_evaluated_independently() {
    let mut map = CoverageMap::new();
    map.add_file(file_with_pct("/a.rs", 85, 100));

    let thresholds = Thresholds::none().statements(80.0).branches(90.0);
    let outcome = check_coverage(&map, &thresholds, false);
    // Branch metric is vacuously 100%: both pass
    assert!(!outcome.failed());
}

#[test]
fn test_outcome_serializes_for_host_reporting() {
    let mut map = CoverageMap::new();
    map.add_file(file_with_pct("/a.rs", 10, 100));

    let outcome = check_coverage(&map, &Thresholds::none().statements(80.0), true);
    let json = serde_json::to_string(&outcome).unwrap();
    assert!(json.contains("statements"));
    assert!(json.contains("/a.rs"));
}
