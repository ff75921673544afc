//! Per-process coverage persistence
//!
//! Sprint 7: identity, exit flush, and the snapshot write protocol
//!
//! Every process owns one identity and writes exactly one coverage
//! file named by it, so concurrent workers never contend for a file.
//! The exit flush is the only operation that must run synchronously
//! to completion on every termination path: a guard value flushes on
//! drop (normal exit and unwinding), and signal handlers flush before
//! re-raising for SIGINT/SIGTERM/SIGHUP/SIGQUIT. SIGKILL cannot be
//! hooked; a killed process leaves a missing or partial file, which
//! the merge engine already tolerates.

use crate::accumulator::CoverageAccumulator;
use crate::config::{CoverageConfig, PARENT_ID_ENV};
use crate::coverage::CoverageMap;
use crate::filter::SourceFilter;
use crate::source_map::SourceMapRegistry;
use crate::transform_cache::TransformCache;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once, OnceLock};
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

/// Errors surfaced while persisting a coverage snapshot
///
/// All of these are fatal: a snapshot that cannot be written means
/// that process's coverage is lost, which must never happen silently.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Failed to write coverage snapshot: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize coverage snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type for persistence operations
pub type Result<T> = std::result::Result<T, PersistError>;

/// One process's identity for the lifetime of that process
#[derive(Debug, Clone)]
pub struct ProcessIdentity {
    id: String,
    parent_id: Option<String>,
}

impl ProcessIdentity {
    /// Generate a fresh identity, inheriting the parent id from the
    /// environment when a supervisor set one
    pub fn generate() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: std::env::var(PARENT_ID_ENV).ok(),
        }
    }

    /// This process's unique id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The supervising process's id, if any
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// Environment pair a supervisor sets when spawning workers so
    /// their records link back to this process
    pub fn child_env(&self) -> (&'static str, String) {
        (PARENT_ID_ENV, self.id.clone())
    }

    /// Name of the coverage file this identity owns
    pub fn coverage_filename(&self) -> String {
        format!("{}.json", self.id)
    }
}

/// Persisted identity record for one coverage-producing process
///
/// Written once at shutdown under `processinfo/`, never mutated. The
/// process-tree renderer that consumes the parent/child relationships
/// is external; the core only writes these fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// Process-unique identity
    pub id: String,
    /// Identity of the supervising process, if any
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_id: Option<String>,
    /// Operating system process id
    pub pid: u32,
    /// Name of the coverage file this process wrote
    pub coverage_filename: String,
    /// Files with coverage entries in the written snapshot
    pub files: Vec<String>,
    /// Directory the snapshot was written into
    pub storage_dir: String,
}

/// Writes one process's coverage snapshot at shutdown
pub struct CoverageWriter {
    temp_dir: PathBuf,
    cache_dir: PathBuf,
    cache_enabled: bool,
    identity: ProcessIdentity,
    accumulator: Arc<CoverageAccumulator>,
    cache: Option<Arc<TransformCache>>,
    registry: Arc<SourceMapRegistry>,
    filter: Arc<dyn SourceFilter>,
}

impl CoverageWriter {
    /// Create a writer bound to one process identity
    pub fn new(
        config: &CoverageConfig,
        identity: ProcessIdentity,
        accumulator: Arc<CoverageAccumulator>,
        cache: Option<Arc<TransformCache>>,
        registry: Arc<SourceMapRegistry>,
        filter: Arc<dyn SourceFilter>,
    ) -> Self {
        Self {
            temp_dir: config.temp_dir.clone(),
            cache_dir: config.cache_dir.clone(),
            cache_enabled: config.cache,
            identity,
            accumulator,
            cache,
            registry,
            filter,
        }
    }

    /// This writer's identity
    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    /// Flush the accumulator to `<temp_dir>/<id>.json`
    ///
    /// Excluded files are dropped before anything touches the disk.
    /// With caching enabled each retained entry is stamped with its
    /// content hash and remap is deferred to the report pass; with
    /// caching disabled coordinates are remapped now and the registry
    /// is purged to bound memory. Returns the written path.
    pub fn write_coverage_file(&self) -> Result<PathBuf> {
        let mut map = self.accumulator.snapshot();

        map.retain_files(|path| self.filter.should_cover(Path::new(path)));

        if self.cache_enabled {
            if let Some(cache) = &self.cache {
                for (path, coverage) in map.files.iter_mut() {
                    coverage.content_hash = cache.hash_for(Path::new(path));
                }
            }
        } else {
            map = self.registry.remap_coverage(map);
            self.registry.purge();
        }

        fs::create_dir_all(&self.temp_dir)?;
        let coverage_path = self.temp_dir.join(self.identity.coverage_filename());
        fs::write(&coverage_path, serde_json::to_vec(&map)?)?;
        debug!(
            "Wrote coverage for {} files to {}",
            map.len(),
            coverage_path.display()
        );

        self.write_process_record(&map)?;
        Ok(coverage_path)
    }

    fn write_process_record(&self, map: &CoverageMap) -> Result<()> {
        let record = ProcessRecord {
            id: self.identity.id().to_string(),
            parent_id: self.identity.parent_id().map(str::to_string),
            pid: std::process::id(),
            coverage_filename: self.identity.coverage_filename(),
            files: map.files.keys().cloned().collect(),
            storage_dir: self.temp_dir.display().to_string(),
        };
        let dir = self.temp_dir.join("processinfo");
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", record.id));
        fs::write(path, serde_json::to_vec(&record)?)?;
        Ok(())
    }

    /// Cache directory this writer's session persists into
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// The pending flush, shared between the guard and signal handlers
static FLUSH_SLOT: OnceLock<Mutex<Option<CoverageWriter>>> = OnceLock::new();
static INSTALL_HANDLERS: Once = Once::new();

const HOOKED_SIGNALS: [Signal; 4] = [
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGHUP,
    Signal::SIGQUIT,
];

/// Run the pending flush, if any, exactly once
///
/// Taking the writer out of the slot is the once-latch: a second
/// caller finds the slot empty and does nothing. The signal path uses
/// `try_lock` so a handler interrupting an in-progress flush skips
/// instead of deadlocking on the lock the interrupted flush holds.
fn flush_pending(blocking: bool) {
    let Some(slot) = FLUSH_SLOT.get() else {
        return;
    };
    let writer = if blocking {
        slot.lock().ok().and_then(|mut guard| guard.take())
    } else {
        slot.try_lock().ok().and_then(|mut guard| guard.take())
    };
    if let Some(writer) = writer {
        if let Err(e) = writer.write_coverage_file() {
            error!("Exit flush failed, coverage lost for this process: {}", e);
        }
    }
}

extern "C" fn handle_termination(signum: nix::libc::c_int) {
    flush_pending(false);
    if let Ok(sig) = Signal::try_from(signum) {
        unsafe {
            let _ = signal::signal(sig, SigHandler::SigDfl);
        }
        let _ = signal::raise(sig);
    }
}

/// Guard guaranteeing the coverage flush runs on every exit path
///
/// Create it early in `main` so it drops after the host's own
/// cleanup; the snapshot then reflects the final process state.
/// Dropping flushes; terminating signals flush and re-raise; either
/// way the write happens exactly once.
#[must_use = "the exit flush runs when this guard drops"]
pub struct ExitFlush {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ExitFlush {
    /// Arm the exit flush with this process's writer
    ///
    /// Installs the signal handlers on first use. Arming again
    /// replaces a writer that has not flushed yet; one process should
    /// hold at most one live guard.
    pub fn install(writer: CoverageWriter) -> Self {
        let slot = FLUSH_SLOT.get_or_init(|| Mutex::new(None));
        *slot.lock().expect("flush slot poisoned") = Some(writer);

        INSTALL_HANDLERS.call_once(|| {
            let action = SigAction::new(
                SigHandler::Handler(handle_termination),
                SaFlags::empty(),
                SigSet::empty(),
            );
            for sig in HOOKED_SIGNALS {
                let installed = unsafe { signal::sigaction(sig, &action) };
                if installed.is_err() {
                    error!("Failed to hook {:?} for the coverage exit flush", sig);
                }
            }
        });

        Self {
            _not_send: std::marker::PhantomData,
        }
    }

    /// Flush now instead of waiting for drop, surfacing any error
    pub fn flush(self) -> Result<Option<PathBuf>> {
        let result = match FLUSH_SLOT
            .get()
            .and_then(|slot| slot.lock().ok().and_then(|mut guard| guard.take()))
        {
            Some(writer) => writer.write_coverage_file().map(Some),
            None => Ok(None),
        };
        std::mem::forget(self);
        result
    }
}

impl Drop for ExitFlush {
    fn drop(&mut self) {
        flush_pending(true);
    }
}
