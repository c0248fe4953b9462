//! High-level API for repro-pe operations

use crate::exceptions::Result;
use crate::patcher;
use std::path::{Path, PathBuf};

pub use crate::patcher::{AppliedPatch, PatchReport};

/// Options for a patch operation.
#[derive(Debug, Default)]
pub struct PatchOptions {
    /// Path to the paired PDB, if its signature should be rebound too.
    pub pdb_path: Option<PathBuf>,
    /// Compute and log what would change without modifying either file.
    pub dry_run: bool,
}

/// Rewrite a PE image's non-deterministic fields (and its paired PDB's
/// signature, if one is given) to deterministic, content-derived values.
pub fn patch(image_path: &Path, options: PatchOptions) -> Result<PatchReport> {
    patcher::patch_image(image_path, options.pdb_path.as_deref(), options.dry_run)
}
