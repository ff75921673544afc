//! Comprehensive property-based tests for pre-commit hook
//!
//! Core properties covered:
//! 1. Merge commutativity and associativity over arbitrary snapshots
//! 2. Cache key stability and sensitivity to content changes
//! 3. Corrupt report bytes never panic the parser
//! 4. Summary percentages stay in range
//! 5. Threshold boundary semantics

use cubrir::coverage::{FileCoverage, Range};
use cubrir::source_map::SourceMap;
use cubrir::summary::CoverageSummary;
use cubrir::{check_coverage, CoverageMap, Thresholds};
use proptest::prelude::*;

/// One recorded hit: (file index, statement id, count)
type Hit = (u8, u8, u32);

fn map_from_hits(hits: &[Hit]) -> CoverageMap {
    let mut map = CoverageMap::new();
    for &(file, id, count) in hits {
        let path = format!("/src/file_{}.rs", file % 4);
        let id = u32::from(id % 16);
        let mut fc = FileCoverage::new(&path);
        fc.add_statement(id, Range::new(id + 1, 0, id + 1, 10));
        fc.statement_hits.insert(id, u64::from(count));
        map.add_file(fc);
    }
    map
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_merge_is_commutative(
        a in prop::collection::vec((0u8..4, 0u8..16, 0u32..1000), 0..20),
        b in prop::collection::vec((0u8..4, 0u8..16, 0u32..1000), 0..20),
    ) {
        let mut ab = map_from_hits(&a);
        ab.merge(map_from_hits(&b));

        let mut ba = map_from_hits(&b);
        ba.merge(map_from_hits(&a));

        prop_assert_eq!(ab, ba);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_merge_is_associative(
        a in prop::collection::vec((0u8..4, 0u8..16, 0u32..1000), 0..12),
        b in prop::collection::vec((0u8..4, 0u8..16, 0u32..1000), 0..12),
        c in prop::collection::vec((0u8..4, 0u8..16, 0u32..1000), 0..12),
    ) {
        let mut left = map_from_hits(&a);
        left.merge(map_from_hits(&b));
        left.merge(map_from_hits(&c));

        let mut bc = map_from_hits(&b);
        bc.merge(map_from_hits(&c));
        let mut right = map_from_hits(&a);
        right.merge(bc);

        prop_assert_eq!(left, right);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_merge_totals_are_preserved(
        snapshots in prop::collection::vec(
            prop::collection::vec((0u8..4, 0u8..16, 0u32..1000), 0..10),
            0..6,
        ),
    ) {
        // The merged grand total equals the sum of per-snapshot totals
        let total_of = |map: &CoverageMap| -> u64 {
            map.files
                .values()
                .flat_map(|fc| fc.statement_hits.values())
                .sum()
        };

        let parts: Vec<CoverageMap> = snapshots.iter().map(|s| map_from_hits(s)).collect();
        let expected: u64 = parts.iter().map(total_of).sum();

        let mut merged = CoverageMap::new();
        for part in parts {
            merged.merge(part);
        }
        prop_assert_eq!(total_of(&merged), expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_corrupt_report_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        // Property: arbitrary bytes either parse or fail cleanly
        if let Ok(text) = std::str::from_utf8(&bytes) {
            let _ = serde_json::from_str::<CoverageMap>(text);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_malformed_source_maps_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        if let Ok(text) = std::str::from_utf8(&bytes) {
            let _ = SourceMap::from_json(text);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_summary_percentages_in_range(
        hits in prop::collection::vec((0u8..4, 0u8..16, 0u32..1000), 0..30),
    ) {
        let map = map_from_hits(&hits);
        let summary = CoverageSummary::of_map(&map);
        for metric in [summary.statements, summary.branches, summary.functions, summary.lines] {
            let pct = metric.pct();
            prop_assert!((0.0..=100.0).contains(&pct));
            prop_assert!(metric.covered <= metric.total || metric.total == 0);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_threshold_boundary_is_inclusive(covered in 0u32..=100) {
        let mut fc = FileCoverage::new("/a.rs");
        for id in 0..100u32 {
            fc.add_statement(id, Range::new(id + 1, 0, id + 1, 10));
            fc.statement_hits.insert(id, u64::from(id < covered));
        }
        let mut map = CoverageMap::new();
        map.add_file(fc);

        let outcome = check_coverage(&map, &Thresholds::none().statements(f64::from(covered)), false);
        // Actual == required must always pass
        prop_assert!(!outcome.failed());

        if covered < 100 {
            let stricter = check_coverage(
                &map,
                &Thresholds::none().statements(f64::from(covered) + 0.5),
                false,
            );
            prop_assert!(stricter.failed());
        }
    }
}
