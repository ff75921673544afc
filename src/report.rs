//! Report renderer interface
//!
//! Rendering is external: HTML, LCOV, console tables and friends live
//! in the embedding tool. The core hands every renderer the same
//! inputs: a fully merged, remapped, filtered coverage map, a target
//! directory, and the watermark configuration.

use crate::coverage::CoverageMap;
use crate::threshold::Watermarks;
use anyhow::Result;
use std::path::Path;

/// A pluggable report renderer
pub trait Renderer {
    /// Renderer name (e.g. "html", "lcov")
    fn name(&self) -> &str;

    /// Render `coverage` into `out_dir`
    fn render(&self, coverage: &CoverageMap, out_dir: &Path, watermarks: &Watermarks)
        -> Result<()>;
}
