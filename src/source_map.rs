//! Source map registry and coverage remapping
//!
//! Sprint 3: generated-to-original coordinate correlation
//!
//! Instrumented code is often itself generated from another source
//! (transpiled, macro-expanded, bundled). A source map carries the
//! mapping back to original coordinates; the registry holds one map
//! per `(filename, content hash)` pair and can rewrite a whole
//! coverage map from generated to original locations in one pass.
//!
//! Malformed or absent map data is never an error: the file's
//! coordinates simply stay as generated.

use crate::coverage::{CoverageMap, FileCoverage, Location, Range};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Source map format version (currently only v1 supported)
const SUPPORTED_VERSION: u32 = 1;

/// Marker comment carrying an inline base64 source map
pub const INLINE_MAP_PREFIX: &str = "//# sourceMappingURL=data:application/json;base64,";

/// Single mapping entry (generated location -> original location)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMapping {
    /// Line number in the generated code (1-based)
    pub generated_line: u32,
    /// Column in the generated code (0-based)
    pub generated_column: u32,
    /// Line number in the original source (1-based)
    pub original_line: u32,
    /// Column in the original source (0-based)
    pub original_column: u32,
}

/// Parsed source map for one generated file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMap {
    /// Source map format version
    pub version: u32,
    /// Generated file path
    pub file: String,
    /// Original source file path
    pub source_file: String,
    /// Mappings sorted by generated position
    pub mappings: Vec<SourceMapping>,
}

impl SourceMap {
    /// Parse and normalize a source map from JSON text
    ///
    /// Returns `None` on any malformed input; callers treat that as
    /// "no map present".
    pub fn from_json(text: &str) -> Option<Self> {
        let mut map: SourceMap = match serde_json::from_str(text) {
            Ok(map) => map,
            Err(e) => {
                warn!("Discarding malformed source map: {}", e);
                return None;
            }
        };
        if map.version != SUPPORTED_VERSION {
            warn!(
                "Discarding source map with unsupported version {} (expected {})",
                map.version, SUPPORTED_VERSION
            );
            return None;
        }
        if map.source_file.is_empty() {
            warn!("Discarding source map with empty source_file");
            return None;
        }
        map.mappings
            .sort_by_key(|m| (m.generated_line, m.generated_column));
        Some(map)
    }

    /// Encode this map as an inline `sourceMappingURL` comment line
    pub fn to_inline_comment(&self) -> String {
        let json = serde_json::to_string(self).expect("source map serialization");
        format!("{}{}", INLINE_MAP_PREFIX, BASE64.encode(json))
    }

    /// Resolve a generated location to the original source
    ///
    /// Uses the closest mapping at or before the queried position;
    /// positions before the first mapping resolve to nothing and the
    /// caller keeps the generated coordinates.
    pub fn lookup(&self, line: u32, column: u32) -> Option<(u32, u32)> {
        let idx = self
            .mappings
            .partition_point(|m| (m.generated_line, m.generated_column) <= (line, column));
        if idx == 0 {
            return None;
        }
        let m = &self.mappings[idx - 1];
        Some((m.original_line, m.original_column))
    }

    fn remap_location(&self, loc: Location) -> Location {
        match self.lookup(loc.line, loc.column) {
            Some((line, column)) => Location::new(line, column),
            None => loc,
        }
    }

    fn remap_range(&self, range: Range) -> Range {
        Range {
            start: self.remap_location(range.start),
            end: self.remap_location(range.end),
        }
    }
}

/// In-memory registry of source maps keyed by `(filename, hash)`
///
/// Lazily populated on first transform of a file; purgeable to bound
/// memory; reconstructible from the content hashes carried by a
/// persisted coverage report.
#[derive(Debug, Default)]
pub struct SourceMapRegistry {
    maps: Mutex<HashMap<(String, String), SourceMap>>,
}

impl SourceMapRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parsed map under `(filename, hash)`
    pub fn register(&self, filename: &str, hash: &str, map: SourceMap) {
        let mut maps = self.maps.lock().expect("registry poisoned");
        maps.insert((filename.to_string(), hash.to_string()), map);
    }

    /// Extract a map embedded in (or shipped beside) generated code
    ///
    /// Recognizes a trailing inline base64 data-URL comment first,
    /// then a `<filename>.map` sidecar. Registers and returns the
    /// normalized map, or `None` when nothing valid is found.
    pub fn extract_and_register(&self, code: &str, filename: &Path, hash: &str) -> Option<SourceMap> {
        let map = Self::extract_inline(code).or_else(|| Self::extract_sidecar(filename))?;
        self.register(&filename.to_string_lossy(), hash, map.clone());
        debug!("Registered source map for {}", filename.display());
        Some(map)
    }

    fn extract_inline(code: &str) -> Option<SourceMap> {
        let line = code
            .lines()
            .rev()
            .find(|l| l.trim_start().starts_with(INLINE_MAP_PREFIX))?;
        let payload = line.trim_start().trim_start_matches(INLINE_MAP_PREFIX);
        let bytes = match BASE64.decode(payload.trim_end()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Discarding inline source map with invalid base64: {}", e);
                return None;
            }
        };
        let text = String::from_utf8(bytes).ok()?;
        SourceMap::from_json(&text)
    }

    fn extract_sidecar(filename: &Path) -> Option<SourceMap> {
        let mut sidecar = filename.as_os_str().to_owned();
        sidecar.push(".map");
        let text = fs::read_to_string(Path::new(&sidecar)).ok()?;
        SourceMap::from_json(&text)
    }

    /// Look up the map for a file, preferring an exact hash match
    fn map_for(&self, filename: &str, hash: Option<&str>) -> Option<SourceMap> {
        let maps = self.maps.lock().expect("registry poisoned");
        if let Some(hash) = hash {
            if let Some(map) = maps.get(&(filename.to_string(), hash.to_string())) {
                return Some(map.clone());
            }
        }
        maps.iter()
            .find(|((name, _), _)| name.as_str() == filename)
            .map(|(_, map)| map.clone())
    }

    /// Number of registered maps
    pub fn len(&self) -> usize {
        self.maps.lock().expect("registry poisoned").len()
    }

    /// True when no maps are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard every held map
    ///
    /// Invoked when persistent caching is disabled, to bound memory
    /// across large file sets.
    pub fn purge(&self) {
        self.maps.lock().expect("registry poisoned").clear();
    }

    /// Re-register maps named by a persisted report's content hashes
    ///
    /// A reporting process that never transformed the files can still
    /// remap them: each entry carrying a `content_hash` is looked up
    /// as `<cache_dir>/<hash>.map.json`. Returns the number of maps
    /// reloaded; missing or invalid cache entries are skipped.
    pub fn reload_cached_source_maps(&self, report: &CoverageMap, cache_dir: &Path) -> usize {
        let mut reloaded = 0;
        for (path, coverage) in &report.files {
            let Some(hash) = coverage.content_hash.as_deref() else {
                continue;
            };
            let map_path = cache_dir.join(format!("{}.map.json", hash));
            let Ok(text) = fs::read_to_string(&map_path) else {
                continue;
            };
            if let Some(map) = SourceMap::from_json(&text) {
                self.register(path, hash, map);
                reloaded += 1;
            }
        }
        debug!("Reloaded {} cached source maps", reloaded);
        reloaded
    }

    /// Rewrite a whole coverage map from generated to original coordinates
    ///
    /// Consumes the input. Files with a registered map have every
    /// statement, function, and branch range rewritten and are rekeyed
    /// under the map's original source path; files without a map pass
    /// through unchanged. The merge engine owns the single production
    /// call site, so a reporting pass remaps at most once.
    pub fn remap_coverage(&self, map: CoverageMap) -> CoverageMap {
        let mut out = CoverageMap::new();
        for (path, mut coverage) in map.files {
            let Some(source_map) = self.map_for(&path, coverage.content_hash.as_deref()) else {
                out.add_file(coverage);
                continue;
            };

            for range in coverage.statements.values_mut() {
                *range = source_map.remap_range(*range);
            }
            for mapping in coverage.functions.values_mut() {
                mapping.decl = source_map.remap_range(mapping.decl);
                mapping.loc = source_map.remap_range(mapping.loc);
                mapping.line = mapping.decl.start.line;
            }
            for mapping in coverage.branches.values_mut() {
                mapping.loc = source_map.remap_range(mapping.loc);
                for arm in &mut mapping.arms {
                    *arm = source_map.remap_range(*arm);
                }
            }

            coverage.path = source_map.source_file.clone();
            debug!("Remapped {} -> {}", path, coverage.path);
            out.add_file(coverage);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn simple_map(source_file: &str) -> SourceMap {
        SourceMap {
            version: 1,
            file: "gen.rs".to_string(),
            source_file: source_file.to_string(),
            mappings: vec![
                SourceMapping {
                    generated_line: 1,
                    generated_column: 0,
                    original_line: 10,
                    original_column: 0,
                },
                SourceMapping {
                    generated_line: 5,
                    generated_column: 0,
                    original_line: 20,
                    original_column: 4,
                },
            ],
        }
    }

    #[test]
    fn test_parse_valid_map() {
        let json = serde_json::to_string(&simple_map("orig.src")).unwrap();
        let map = SourceMap::from_json(&json).unwrap();
        assert_eq!(map.source_file, "orig.src");
        assert_eq!(map.mappings.len(), 2);
    }

    #[test]
    fn test_parse_malformed_json_is_none() {
        assert!(SourceMap::from_json("{ not json").is_none());
    }

    #[test]
    fn test_parse_unsupported_version_is_none() {
        let mut map = simple_map("orig.src");
        map.version = 9;
        let json = serde_json::to_string(&map).unwrap();
        assert!(SourceMap::from_json(&json).is_none());
    }

    #[test]
    fn test_parse_empty_source_file_is_none() {
        let json = serde_json::to_string(&simple_map("")).unwrap();
        assert!(SourceMap::from_json(&json).is_none());
    }

    #[test]
    fn test_parse_sorts_mappings() {
        let mut map = simple_map("orig.src");
        map.mappings.reverse();
        let json = serde_json::to_string(&map).unwrap();
        let parsed = SourceMap::from_json(&json).unwrap();
        assert_eq!(parsed.mappings[0].generated_line, 1);
    }

    #[test]
    fn test_lookup_closest_preceding() {
        let map = simple_map("orig.src");
        assert_eq!(map.lookup(1, 0), Some((10, 0)));
        assert_eq!(map.lookup(3, 7), Some((10, 0)));
        assert_eq!(map.lookup(5, 0), Some((20, 4)));
        assert_eq!(map.lookup(9, 2), Some((20, 4)));
    }

    #[test]
    fn test_lookup_before_first_mapping() {
        let mut map = simple_map("orig.src");
        map.mappings[0].generated_line = 4;
        map.mappings
            .sort_by_key(|m| (m.generated_line, m.generated_column));
        assert_eq!(map.lookup(1, 0), None);
    }

    #[test]
    fn test_inline_extraction_round_trip() {
        let registry = SourceMapRegistry::new();
        let code = format!(
            "fn main() {{}}\n{}\n",
            simple_map("orig.src").to_inline_comment()
        );
        let map = registry
            .extract_and_register(&code, Path::new("/gen.rs"), "h1")
            .unwrap();
        assert_eq!(map.source_file, "orig.src");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_inline_extraction_bad_base64() {
        let registry = SourceMapRegistry::new();
        let code = format!("fn main() {{}}\n{}!!!not-base64!!!\n", INLINE_MAP_PREFIX);
        assert!(registry
            .extract_and_register(&code, Path::new("/gen.rs"), "h1")
            .is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sidecar_extraction() {
        let dir = TempDir::new().unwrap();
        let generated = dir.path().join("gen.rs");
        std::fs::write(&generated, "fn main() {}\n").unwrap();
        let mut sidecar = std::fs::File::create(dir.path().join("gen.rs.map")).unwrap();
        sidecar
            .write_all(serde_json::to_string(&simple_map("orig.src")).unwrap().as_bytes())
            .unwrap();

        let registry = SourceMapRegistry::new();
        let map = registry
            .extract_and_register("fn main() {}\n", &generated, "h1")
            .unwrap();
        assert_eq!(map.source_file, "orig.src");
    }

    #[test]
    fn test_no_map_registers_nothing() {
        let registry = SourceMapRegistry::new();
        assert!(registry
            .extract_and_register("fn main() {}\n", Path::new("/gen.rs"), "h1")
            .is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remap_rewrites_and_rekeys() {
        let registry = SourceMapRegistry::new();
        registry.register("/gen.rs", "h1", simple_map("/orig.src"));

        let mut coverage = FileCoverage::new("/gen.rs");
        coverage.add_statement(0, Range::new(5, 0, 5, 12));
        coverage.statement_hits.insert(0, 3);
        coverage.content_hash = Some("h1".to_string());
        let mut map = CoverageMap::new();
        map.add_file(coverage);

        let remapped = registry.remap_coverage(map);
        assert!(remapped.files.contains_key("/orig.src"));
        let fc = &remapped.files["/orig.src"];
        assert_eq!(fc.statements[&0].start, Location::new(20, 4));
        assert_eq!(fc.statement_hits[&0], 3);
    }

    #[test]
    fn test_remap_without_map_passes_through() {
        let registry = SourceMapRegistry::new();
        let mut coverage = FileCoverage::new("/plain.rs");
        coverage.add_statement(0, Range::new(2, 0, 2, 8));
        let mut map = CoverageMap::new();
        map.add_file(coverage.clone());

        let remapped = registry.remap_coverage(map);
        assert_eq!(remapped.files["/plain.rs"], coverage);
    }

    #[test]
    fn test_remap_after_purge_is_identity() {
        let registry = SourceMapRegistry::new();
        registry.register("/gen.rs", "h1", simple_map("/orig.src"));

        let mut coverage = FileCoverage::new("/gen.rs");
        coverage.add_statement(0, Range::new(5, 0, 5, 12));
        let mut map = CoverageMap::new();
        map.add_file(coverage);

        let once = registry.remap_coverage(map);
        registry.purge();
        let twice = registry.remap_coverage(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_reload_cached_source_maps() {
        let dir = TempDir::new().unwrap();
        let map_json = serde_json::to_string(&simple_map("/orig.src")).unwrap();
        std::fs::write(dir.path().join("h1.map.json"), map_json).unwrap();

        let mut coverage = FileCoverage::new("/gen.rs");
        coverage.content_hash = Some("h1".to_string());
        let mut report = CoverageMap::new();
        report.add_file(coverage);

        let registry = SourceMapRegistry::new();
        assert_eq!(registry.reload_cached_source_maps(&report, dir.path()), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reload_skips_missing_and_corrupt() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.map.json"), "{ nope").unwrap();

        let mut a = FileCoverage::new("/a.rs");
        a.content_hash = Some("missing".to_string());
        let mut b = FileCoverage::new("/b.rs");
        b.content_hash = Some("bad".to_string());
        let mut report = CoverageMap::new();
        report.add_file(a);
        report.add_file(b);

        let registry = SourceMapRegistry::new();
        assert_eq!(registry.reload_cached_source_maps(&report, dir.path()), 0);
    }
}
