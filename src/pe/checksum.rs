//! Content-addressed signature computation.
//!
//! The PDB signature embedded in the PE must be a pure function of the
//! file's *stable* bytes, bytes that are not themselves about to be
//! overwritten by the patch set currently being built, including the
//! signature field itself. `skip_checksum` absorbs everything else.

use crate::pe::patch::PatchSet;
use log::trace;
use md5::{Digest, Md5};

/// Compute a 128-bit digest over `buf`, skipping the byte ranges claimed
/// by `patches`. `patches` must already be sorted (see `PatchSet::sort`).
pub fn skip_checksum(buf: &[u8], patches: &PatchSet) -> [u8; 16] {
    let mut hasher = Md5::new();
    let mut pos = 0usize;

    for patch in patches.iter() {
        if patch.dest_offset > pos {
            hasher.update(&buf[pos..patch.dest_offset]);
        }
        pos = patch.dest_offset + patch.source.len();
        trace!("skip-checksum: skipping '{}' [0x{:x}, 0x{pos:x})", patch.label, patch.dest_offset);
    }
    if pos < buf.len() {
        hasher.update(&buf[pos..]);
    }

    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pe::patch::PatchSource;

    #[test]
    fn identical_stable_bytes_produce_identical_signature() {
        let mut buf_a = vec![0xAAu8; 64];
        let mut buf_b = buf_a.clone();
        // Differ only inside the patched range.
        buf_a[4..8].copy_from_slice(&[1, 2, 3, 4]);
        buf_b[4..8].copy_from_slice(&[9, 9, 9, 9]);

        let mut patches = PatchSet::new();
        patches.add(4, PatchSource::Timestamp, "ts");
        patches.sort();

        assert_eq!(skip_checksum(&buf_a, &patches), skip_checksum(&buf_b, &patches));
    }

    #[test]
    fn stable_byte_mutation_changes_signature() {
        let mut buf_a = vec![0xAAu8; 64];
        let mut buf_b = buf_a.clone();
        buf_a[40] = 1;
        buf_b[40] = 2;

        let mut patches = PatchSet::new();
        patches.add(4, PatchSource::Timestamp, "ts");
        patches.sort();

        assert_ne!(skip_checksum(&buf_a, &patches), skip_checksum(&buf_b, &patches));
    }

    #[test]
    fn no_patches_hashes_whole_buffer() {
        let buf = vec![0x11u8; 32];
        let patches = PatchSet::new();
        let mut hasher = Md5::new();
        hasher.update(&buf);
        let expected = hasher.finalize();
        assert_eq!(&skip_checksum(&buf, &patches)[..], &expected[..]);
    }
}
