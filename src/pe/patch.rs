//! Deferred, append-only overwrite intents, committed atomically once the
//! whole image has been validated.

use crate::exceptions::{PatchError, Result};
use log::{debug, trace};

/// Where a patch's replacement bytes come from.
///
/// The source material is a small, closed set of constants owned by the
/// `ImagePatcher` that built this patch set, not a raw pointer into the
/// mmap, which would otherwise tie a `Patch`'s lifetime to the buffer it
/// is meant to mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchSource {
    /// The fixed 4-byte reproducible timestamp.
    Timestamp,
    /// The 16-byte content-derived PDB signature, resolved at commit
    /// time (it isn't known until `SkipChecksum` has run over every
    /// other pending patch).
    PdbSignature,
    /// The fixed 4-byte PDB age.
    PdbAge,
}

impl PatchSource {
    /// Number of bytes this source supplies.
    pub fn len(self) -> usize {
        match self {
            PatchSource::Timestamp | PatchSource::PdbAge => 4,
            PatchSource::PdbSignature => 16,
        }
    }
}

/// A byte pool holding the constant values `PatchSource` variants refer
/// to. The PDB signature starts zeroed and is filled in once
/// `SkipChecksum` has run.
#[derive(Debug)]
pub struct ConstantPool {
    pub timestamp: [u8; 4],
    pub pdb_signature: [u8; 16],
    pub pdb_age: [u8; 4],
}

impl ConstantPool {
    pub fn new(timestamp: u32, pdb_age: u32) -> Self {
        ConstantPool {
            timestamp: timestamp.to_le_bytes(),
            pdb_signature: [0u8; 16],
            pdb_age: pdb_age.to_le_bytes(),
        }
    }

    fn bytes(&self, source: PatchSource) -> &[u8] {
        match source {
            PatchSource::Timestamp => &self.timestamp,
            PatchSource::PdbSignature => &self.pdb_signature,
            PatchSource::PdbAge => &self.pdb_age,
        }
    }
}

/// A single pending overwrite.
#[derive(Debug, Clone)]
pub struct Patch {
    pub dest_offset: usize,
    pub source: PatchSource,
    pub label: String,
}

/// Append-only collection of pending patches. Validated and committed in
/// one shot so a parse failure partway through enumeration never leaves
/// the buffer half-modified.
#[derive(Debug, Default)]
pub struct PatchSet {
    patches: Vec<Patch>,
}

impl PatchSet {
    pub fn new() -> Self {
        PatchSet::default()
    }

    /// Register a pending patch. Does not touch the buffer.
    pub fn add(&mut self, dest_offset: usize, source: PatchSource, label: impl Into<String>) {
        let label = label.into();
        trace!("queued patch: {label} at 0x{dest_offset:x} ({} bytes)", source.len());
        self.patches.push(Patch {
            dest_offset,
            source,
            label,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Patch> {
        self.patches.iter()
    }

    /// Sort by destination offset. Must be called before `validate`/`commit`.
    pub fn sort(&mut self) {
        self.patches.sort_by_key(|p| p.dest_offset);
    }

    /// Check that every patch lies in bounds and that no two patches
    /// overlap. Requires the set to already be sorted.
    pub fn validate(&self, buf_len: usize, pool: &ConstantPool) -> Result<()> {
        let mut prev_end: Option<usize> = None;
        for patch in &self.patches {
            let len = patch.source.len();
            let end = patch.dest_offset.checked_add(len).ok_or_else(|| {
                PatchError::InvalidImage(format!("patch '{}' offset overflow", patch.label))
            })?;
            if end > buf_len {
                return Err(PatchError::InvalidImage(format!(
                    "patch '{}' at 0x{:x} (len {len}) is out of bounds (file is {buf_len} bytes)",
                    patch.label, patch.dest_offset
                )));
            }
            if let Some(prev_end) = prev_end {
                if patch.dest_offset < prev_end {
                    return Err(PatchError::InvalidImage(format!(
                        "patch '{}' at 0x{:x} overlaps a previous patch ending at 0x{prev_end:x}",
                        patch.label, patch.dest_offset
                    )));
                }
            }
            prev_end = Some(end);
            debug_assert_eq!(pool.bytes(patch.source).len(), len);
        }
        Ok(())
    }

    /// Apply every pending patch to `buf` (or, in `dry_run` mode, log
    /// what would have been written without touching `buf`).
    pub fn commit(&mut self, buf: &mut [u8], pool: &ConstantPool, dry_run: bool) -> Result<()> {
        self.sort();
        self.validate(buf.len(), pool)?;

        for patch in &self.patches {
            let src = pool.bytes(patch.source);
            if dry_run {
                debug!(
                    "[dry-run] would patch '{}' at 0x{:x}: {} -> {}",
                    patch.label,
                    patch.dest_offset,
                    hex::encode(&buf[patch.dest_offset..patch.dest_offset + src.len()]),
                    hex::encode(src),
                );
            } else {
                buf[patch.dest_offset..patch.dest_offset + src.len()].copy_from_slice(src);
                trace!("patched '{}' at 0x{:x}", patch.label, patch.dest_offset);
            }
        }
        Ok(())
    }
}
