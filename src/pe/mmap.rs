//! Memory-mapped access to the PE file being patched.

use crate::exceptions::Result;
use memmap2::{Mmap, MmapMut};
use std::fs::OpenOptions;
use std::path::Path;

/// Owns the open file and its memory mapping for the duration of a patch
/// operation. In `dry_run` mode the mapping is read-only, since nothing
/// will ever be written through it.
#[derive(Debug)]
pub enum MemMap {
    /// A writable mapping backing an in-place patch.
    Writable(MmapMut),
    /// A read-only mapping used only to compute what *would* be patched.
    ReadOnly(Mmap),
}

impl MemMap {
    /// Open `path` and map it into memory. `writable` should be `false`
    /// exactly when the caller intends a dry run.
    pub fn open(path: &Path, writable: bool) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(writable).open(path)?;

        // SAFETY: the mapping's validity depends on `path` not being
        // truncated or remapped by another process while this handle is
        // alive. The caller is required to hold exclusive access to the
        // file for the duration of a patch operation (see the crate's
        // documented concurrency model).
        #[allow(unsafe_code)]
        if writable {
            let mmap = unsafe { MmapMut::map_mut(&file)? };
            Ok(MemMap::Writable(mmap))
        } else {
            let mmap = unsafe { Mmap::map(&file)? };
            Ok(MemMap::ReadOnly(mmap))
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            MemMap::Writable(m) => m,
            MemMap::ReadOnly(m) => m,
        }
    }

    /// Mutable access to the mapped bytes. Returns `None` for a
    /// read-only (dry-run) mapping.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match self {
            MemMap::Writable(m) => Some(m),
            MemMap::ReadOnly(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush pending writes to disk. A no-op for read-only mappings.
    pub fn flush(&self) -> Result<()> {
        if let MemMap::Writable(m) = self {
            m.flush()?;
        }
        Ok(())
    }
}
