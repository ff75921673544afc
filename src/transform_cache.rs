//! Content-addressable transform cache
//!
//! Sprint 4: salted content hashing around a pluggable instrumenter
//!
//! The cache wraps an external instrumentation engine. Keys derive
//! from file content plus a salt computed from the configuration
//! subset that affects instrumentation output, so identical
//! `(content, salt)` pairs always yield byte-identical instrumented
//! code and any config change invalidates every entry at once.
//!
//! Entries are immutable and append-only; two processes racing on the
//! same key write identical bytes, so no cross-process locking is
//! needed. Writes go through a temp file and rename so a torn write
//! never appears under a final key name.

use crate::config::{CoverageConfig, FailureMode, InstrumentOptions};
use crate::source_map::{SourceMap, SourceMapRegistry};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Errors surfaced by the transform cache
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Instrumentation failed for {path}: {message}")]
    Instrumentation { path: String, message: String },

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for transform operations
pub type Result<T> = std::result::Result<T, TransformError>;

/// External instrumentation engine
///
/// The engine is constructed once per session by the host and passed
/// to the cache by reference; the cache never materializes one itself.
pub trait Instrumenter: Send + Sync {
    /// Rewrite `source` into counter-emitting code
    fn instrument(&self, source: &str, path: &Path) -> anyhow::Result<String>;

    /// Produce a no-op stub that registers baseline coverage for
    /// `path` without executing any of the file's top-level effects
    fn baseline_stub(&self, source: &str, path: &Path) -> String;
}

/// How a transform request should be served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformMode {
    /// Execute-for-coverage: serve from cache when possible
    Normal,
    /// Zero-baseline discovery: always produce a fresh stub, never
    /// consult or populate the cache
    Discovery,
}

/// Content-addressable cache around an [`Instrumenter`]
pub struct TransformCache {
    cache_dir: PathBuf,
    cache_enabled: bool,
    failure_mode: FailureMode,
    salt: String,
    instrumenter: Arc<dyn Instrumenter>,
    registry: Arc<SourceMapRegistry>,
    /// HashRecord: absolute path -> last-computed content hash
    hashes: Mutex<HashMap<PathBuf, String>>,
}

impl TransformCache {
    /// Create a cache bound to one session's config, engine, and registry
    pub fn new(
        config: &CoverageConfig,
        instrumenter: Arc<dyn Instrumenter>,
        registry: Arc<SourceMapRegistry>,
    ) -> Self {
        Self {
            cache_dir: config.cache_dir.clone(),
            cache_enabled: config.cache,
            failure_mode: config.failure_mode,
            salt: compute_salt(&config.instrument_options),
            instrumenter,
            registry,
            hashes: Mutex::new(HashMap::new()),
        }
    }

    /// The salt folded into every cache key
    pub fn salt(&self) -> &str {
        &self.salt
    }

    /// Salted content hash for `source` under this cache's config
    pub fn content_hash(&self, source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update(self.salt.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Last-computed content hash for a file, if it was transformed
    pub fn hash_for(&self, path: &Path) -> Option<String> {
        self.hashes
            .lock()
            .expect("hash record poisoned")
            .get(path)
            .cloned()
    }

    /// Snapshot of the whole HashRecord
    pub fn hash_record(&self) -> HashMap<PathBuf, String> {
        self.hashes.lock().expect("hash record poisoned").clone()
    }

    /// Transform `source` into instrumented code
    ///
    /// Normal mode serves cached output when the salted content hash
    /// matches an existing entry; discovery mode always returns a
    /// fresh baseline stub and ignores the cache in both directions.
    pub fn transform(&self, source: &str, path: &Path, mode: TransformMode) -> Result<String> {
        let hash = self.content_hash(source);
        self.hashes
            .lock()
            .expect("hash record poisoned")
            .insert(path.to_path_buf(), hash.clone());

        if mode == TransformMode::Discovery {
            debug!("Discovery stub for {}", path.display());
            return Ok(self.instrumenter.baseline_stub(source, path));
        }

        if self.cache_enabled {
            if let Some(code) = self.read_entry(&hash) {
                debug!("Cache hit for {} ({})", path.display(), &hash[..12]);
                self.register_cached_map(path, &hash);
                return Ok(code);
            }
        }

        let code = match self.instrumenter.instrument(source, path) {
            Ok(code) => code,
            Err(e) => return self.handle_failure(source, path, e),
        };

        let map = self.registry.extract_and_register(&code, path, &hash);
        if self.cache_enabled {
            self.write_entry(&hash, &code)?;
            if let Some(map) = map {
                self.write_map(&hash, &map)?;
            }
        }
        debug!("Cache miss for {} ({})", path.display(), &hash[..12]);
        Ok(code)
    }

    fn handle_failure(&self, source: &str, path: &Path, e: anyhow::Error) -> Result<String> {
        match self.failure_mode {
            FailureMode::Fatal => {
                error!("Instrumentation failed for {}: {}", path.display(), e);
                Err(TransformError::Instrumentation {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })
            }
            FailureMode::Degraded => {
                warn!(
                    "Instrumentation failed for {}, running uninstrumented: {}",
                    path.display(),
                    e
                );
                Ok(source.to_string())
            }
        }
    }

    fn entry_path(&self, hash: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.code", hash))
    }

    fn map_path(&self, hash: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.map.json", hash))
    }

    fn read_entry(&self, hash: &str) -> Option<String> {
        fs::read_to_string(self.entry_path(hash)).ok()
    }

    fn register_cached_map(&self, path: &Path, hash: &str) {
        let Ok(text) = fs::read_to_string(self.map_path(hash)) else {
            return;
        };
        if let Some(map) = SourceMap::from_json(&text) {
            self.registry
                .register(&path.to_string_lossy(), hash, map);
        }
    }

    fn write_entry(&self, hash: &str, code: &str) -> Result<()> {
        write_atomic(&self.entry_path(hash), code.as_bytes())
    }

    fn write_map(&self, hash: &str, map: &SourceMap) -> Result<()> {
        let json = serde_json::to_string(map).expect("source map serialization");
        write_atomic(&self.map_path(hash), json.as_bytes())
    }
}

/// Salt = SHA-256 of the canonical serialization of the options that
/// affect instrumentation output
fn compute_salt(options: &InstrumentOptions) -> String {
    let canonical = serde_json::to_string(options).expect("options serialization");
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Write through a temp file and rename so concurrent writers of the
/// same content-addressed entry can only race to identical bytes
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
