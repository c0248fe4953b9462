//! The patch-enumeration driver.
//!
//! Builds a [`PEView`], walks every non-deterministic field in a fixed
//! order, seeds the content-addressed PDB signature via
//! [`skip_checksum`], optionally rewrites the paired PDB, then commits
//! the whole [`PatchSet`] in one shot.

use crate::exceptions::{PatchError, Result};
use crate::pdb::rewrite_pdb;
use crate::pe::constants::{CV_SIGNATURE_RSDS, DEBUG_TYPE_CODEVIEW, PDB_AGE, TIMESTAMP_CONSTANT};
use crate::pe::view::read_u32;
use crate::pe::{skip_checksum, ConstantPool, MemMap, PEView, PatchSet, PatchSource};
use log::{debug, info};
use std::path::Path;

/// Size of a `CV_INFO_PDB70` record's fixed-length prefix: 4-byte "RSDS"
/// signature, 16-byte GUID, 4-byte age. The variable-length PDB file
/// name that follows is not touched.
const CV_INFO_PDB70_FIXED_LEN: usize = 24;

/// One patch that was (or, in dry-run mode, would be) applied.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AppliedPatch {
    pub label: String,
    pub offset: usize,
}

/// Summary of a completed (or simulated) patch operation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PatchReport {
    pub timestamp: u32,
    /// Hex-encoded content-addressed PDB signature.
    pub signature: String,
    pub pdb_rewritten: bool,
    pub patches: Vec<AppliedPatch>,
}

/// Rewrite `image_path`'s non-deterministic fields, and (if `pdb_path`
/// is given) bind the paired PDB to the resulting signature.
///
/// In `dry_run` mode, neither file is modified; the report describes
/// what would have been written.
pub fn patch_image(
    image_path: &Path,
    pdb_path: Option<&Path>,
    dry_run: bool,
) -> Result<PatchReport> {
    info!("🔍 patching image: {}", image_path.display());

    let mut mmap = MemMap::open(image_path, !dry_run)?;
    let mut patches = PatchSet::new();
    let mut pool = ConstantPool::new(TIMESTAMP_CONSTANT, PDB_AGE);

    let mut codeview_seen = false;
    let mut existing_pdb_age = 0u32;
    let mut existing_pdb_signature = [0u8; 16];

    {
        let buf = mmap.as_slice();
        let view = PEView::parse(buf)?;
        debug!("optional header variant: {:?}", view.optional_header_variant);

        patches.add(
            view.file_header_timestamp_offset(),
            PatchSource::Timestamp,
            "FILE_HEADER.TimeDateStamp",
        );

        debug!("OPTIONAL_HEADER.CheckSum is overwritten with the timestamp constant, not recomputed");
        patches.add(
            view.checksum_offset(),
            PatchSource::Timestamp,
            "OPTIONAL_HEADER.CheckSum",
        );

        if let Some(off) = view.export_directory_timestamp_offset(buf)? {
            patches.add(off, PatchSource::Timestamp, "IMAGE_EXPORT_DIRECTORY.TimeDateStamp");
        }
        if let Some(off) = view.resource_directory_timestamp_offset(buf)? {
            patches.add(off, PatchSource::Timestamp, "IMAGE_RESOURCE_DIRECTORY.TimeDateStamp");
        }

        for (i, entry) in view.debug_entries(buf)?.into_iter().enumerate() {
            if entry.timestamp != 0 {
                patches.add(
                    entry.timestamp_offset,
                    PatchSource::Timestamp,
                    format!("IMAGE_DEBUG_DIRECTORY[{i}].TimeDateStamp"),
                );
            } else {
                debug!("debug entry {i} has a zero TimeDateStamp; leaving it alone");
            }

            if entry.entry_type == DEBUG_TYPE_CODEVIEW {
                if codeview_seen {
                    return Err(PatchError::InvalidImage(
                        "found multiple CodeView debug entries".into(),
                    ));
                }
                codeview_seen = true;

                let cv_off = entry.pointer_to_raw_data as usize;
                if !PEView::is_valid_ref(buf, cv_off, CV_INFO_PDB70_FIXED_LEN) {
                    return Err(PatchError::InvalidImage(
                        "CodeView debug entry points outside the file".into(),
                    ));
                }
                if &buf[cv_off..cv_off + 4] != CV_SIGNATURE_RSDS {
                    return Err(PatchError::InvalidImage(
                        "CodeView debug entry is not a PDB 7.0 (RSDS) record".into(),
                    ));
                }
                existing_pdb_signature.copy_from_slice(&buf[cv_off + 4..cv_off + 20]);
                existing_pdb_age = read_u32(buf, cv_off + 20)?;

                patches.add(cv_off + 4, PatchSource::PdbSignature, "CV_INFO_PDB70.Signature");
                patches.add(cv_off + 20, PatchSource::PdbAge, "CV_INFO_PDB70.Age");
            }
        }
    }

    patches.sort();

    // Seed the PDB signature from a hash of everything that isn't about
    // to change. This must happen after every patch site is known, and
    // before the patch set is committed.
    let signature = skip_checksum(mmap.as_slice(), &patches);
    pool.pdb_signature = signature;
    info!("🔏 content-addressed PDB signature: {}", hex::encode(signature));

    let pdb_rewritten = match pdb_path {
        Some(pdb_path) if codeview_seen => {
            rewrite_pdb(
                pdb_path,
                existing_pdb_age,
                existing_pdb_signature,
                TIMESTAMP_CONSTANT,
                PDB_AGE,
                signature,
                dry_run,
            )?;
            true
        }
        Some(_) => {
            return Err(PatchError::InvalidImage(
                "PDB path given but image has no CodeView debug entry to bind it to".into(),
            ));
        }
        None => false,
    };

    let applied: Vec<AppliedPatch> = patches
        .iter()
        .map(|p| AppliedPatch {
            label: p.label.clone(),
            offset: p.dest_offset,
        })
        .collect();

    match mmap.as_mut_slice() {
        Some(buf) => {
            patches.commit(buf, &pool, false)?;
            mmap.flush()?;
            info!("💾 committed {} patches to {}", applied.len(), image_path.display());
        }
        None => {
            let mut scratch = mmap.as_slice().to_vec();
            patches.commit(&mut scratch, &pool, true)?;
        }
    }

    Ok(PatchReport {
        timestamp: TIMESTAMP_CONSTANT,
        signature: hex::encode(signature),
        pdb_rewritten,
        patches: applied,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdb::msf::Msf;
    use crate::pe::constants::{
        DEBUG_DIRECTORY_ENTRY_SIZE, NT_SIGNATURE, OPTIONAL_HDR32_MAGIC, SECTION_HEADER_SIZE,
    };
    use tempfile::tempdir;

    struct DebugEntrySpec {
        timestamp: u32,
        entry_type: u32,
        codeview: Option<([u8; 16], u32, &'static str)>,
    }

    /// Build a minimal single-section PE32 image whose debug directory
    /// holds `entries`, laid out back to back starting at the section's
    /// raw data, with any CodeView records packed after the table.
    fn build_pe(entries: &[DebugEntrySpec]) -> Vec<u8> {
        let opt_hdr_size: usize = 224;
        let e_lfanew: usize = 0x80;
        let file_header_off = e_lfanew + 4;
        let optional_header_off = file_header_off + 20;
        let section_table_off = optional_header_off + opt_hdr_size;
        let section_raw_off = 0x200usize;

        let debug_table_off = section_raw_off;
        let debug_table_size = entries.len() * DEBUG_DIRECTORY_ENTRY_SIZE;

        let mut cv_offsets = Vec::with_capacity(entries.len());
        let mut cursor = debug_table_off + debug_table_size;
        for entry in entries {
            if let Some((_, _, name)) = entry.codeview {
                cv_offsets.push(Some(cursor));
                cursor += 24 + name.len() + 1;
            } else {
                cv_offsets.push(None);
            }
        }
        let total = cursor.max(section_table_off + SECTION_HEADER_SIZE);

        let mut buf = vec![0u8; total];
        buf[0] = b'M';
        buf[1] = b'Z';
        buf[0x3C..0x40].copy_from_slice(&(e_lfanew as u32).to_le_bytes());
        buf[e_lfanew..e_lfanew + 4].copy_from_slice(NT_SIGNATURE.as_slice());
        buf[file_header_off + 2..file_header_off + 4].copy_from_slice(&1u16.to_le_bytes());
        buf[file_header_off + 16..file_header_off + 18]
            .copy_from_slice(&(opt_hdr_size as u16).to_le_bytes());
        buf[optional_header_off..optional_header_off + 2]
            .copy_from_slice(&OPTIONAL_HDR32_MAGIC.to_le_bytes());

        let dir_debug_off = optional_header_off + 96 + 6 * 8;
        buf[dir_debug_off..dir_debug_off + 4].copy_from_slice(&0x2000u32.to_le_bytes());
        buf[dir_debug_off + 4..dir_debug_off + 8]
            .copy_from_slice(&(debug_table_size as u32).to_le_bytes());

        let sec_off = section_table_off;
        let section_span = (total - section_raw_off) as u32;
        buf[sec_off + 8..sec_off + 12].copy_from_slice(&section_span.to_le_bytes()); // VirtualSize
        buf[sec_off + 12..sec_off + 16].copy_from_slice(&0x2000u32.to_le_bytes()); // VirtualAddress
        buf[sec_off + 16..sec_off + 20].copy_from_slice(&section_span.to_le_bytes()); // SizeOfRawData
        buf[sec_off + 20..sec_off + 24].copy_from_slice(&(section_raw_off as u32).to_le_bytes());

        for (i, entry) in entries.iter().enumerate() {
            let off = debug_table_off + i * DEBUG_DIRECTORY_ENTRY_SIZE;
            buf[off + 4..off + 8].copy_from_slice(&entry.timestamp.to_le_bytes());
            buf[off + 12..off + 16].copy_from_slice(&entry.entry_type.to_le_bytes());
            let (size_of_data, ptr) = match (&entry.codeview, cv_offsets[i]) {
                (Some((sig, age, name)), Some(cv_off)) => {
                    buf[cv_off..cv_off + 4].copy_from_slice(b"RSDS");
                    buf[cv_off + 4..cv_off + 20].copy_from_slice(sig);
                    buf[cv_off + 20..cv_off + 24].copy_from_slice(&age.to_le_bytes());
                    buf[cv_off + 24..cv_off + 24 + name.len()].copy_from_slice(name.as_bytes());
                    ((24 + name.len() + 1) as u32, cv_off as u32)
                }
                _ => (0u32, 0u32),
            };
            buf[off + 16..off + 20].copy_from_slice(&size_of_data.to_le_bytes());
            buf[off + 24..off + 28].copy_from_slice(&ptr.to_le_bytes());
        }

        buf
    }

    /// Build a minimal two-stream MSF PDB: the reserved old-directory
    /// stream (empty) and a header stream carrying `age`/`sig70`.
    fn write_pdb(path: &std::path::Path, age: u32, sig70: [u8; 16]) {
        let page_size = 512usize;
        let mut header_stream = vec![0u8; 28];
        header_stream[0..4].copy_from_slice(&crate::pe::constants::PDB_VERSION_VC70.to_le_bytes());
        header_stream[4..8].copy_from_slice(&0xDEADBEEFu32.to_le_bytes());
        header_stream[8..12].copy_from_slice(&age.to_le_bytes());
        header_stream[12..28].copy_from_slice(&sig70);

        let streams = [Vec::new(), header_stream];
        let mut pages: Vec<Vec<u8>> = vec![vec![0u8; page_size], vec![0u8; page_size]];
        let mut stream_sizes = Vec::new();
        let mut stream_pages = Vec::new();
        for s in &streams {
            stream_sizes.push(s.len() as u32);
            let mut plist = Vec::new();
            for chunk in s.chunks(page_size) {
                let mut p = vec![0u8; page_size];
                p[..chunk.len()].copy_from_slice(chunk);
                plist.push(pages.len() as u32);
                pages.push(p);
            }
            stream_pages.push(plist);
        }
        let mut dir = Vec::new();
        dir.extend_from_slice(&(stream_sizes.len() as u32).to_le_bytes());
        for sz in &stream_sizes {
            dir.extend_from_slice(&sz.to_le_bytes());
        }
        for plist in &stream_pages {
            for p in plist {
                dir.extend_from_slice(&p.to_le_bytes());
            }
        }
        let mut dir_page_numbers = Vec::new();
        for chunk in dir.chunks(page_size) {
            let mut p = vec![0u8; page_size];
            p[..chunk.len()].copy_from_slice(chunk);
            dir_page_numbers.push(pages.len() as u32);
            pages.push(p);
        }
        let mut block_map = vec![0u8; page_size];
        for (i, pn) in dir_page_numbers.iter().enumerate() {
            block_map[i * 4..i * 4 + 4].copy_from_slice(&pn.to_le_bytes());
        }
        let block_map_addr = pages.len() as u32;
        pages.push(block_map);

        let mut superblock = vec![0u8; page_size];
        superblock[0..32].copy_from_slice(b"Microsoft C/C++ MSF 7.00\r\n\x1aDS\0\0\0".as_slice());
        superblock[32..36].copy_from_slice(&(page_size as u32).to_le_bytes());
        superblock[36..40].copy_from_slice(&1u32.to_le_bytes());
        superblock[40..44].copy_from_slice(&(pages.len() as u32).to_le_bytes());
        superblock[44..48].copy_from_slice(&(dir.len() as u32).to_le_bytes());
        superblock[52..56].copy_from_slice(&block_map_addr.to_le_bytes());
        pages[0] = superblock;

        let mut out = Vec::new();
        for p in pages {
            out.extend_from_slice(&p);
        }
        std::fs::write(path, out).unwrap();
    }

    #[test]
    fn end_to_end_patch_rewrites_pe_and_pdb_and_preserves_zero_timestamps() {
        let dir = tempdir().unwrap();
        let image_path = dir.path().join("app.exe");
        let pdb_path = dir.path().join("app.pdb");

        let sig = [0x11u8; 16];
        std::fs::write(
            &image_path,
            build_pe(&[DebugEntrySpec {
                timestamp: 0,
                entry_type: DEBUG_TYPE_CODEVIEW,
                codeview: Some((sig, 7, "a.pdb")),
            }]),
        )
        .unwrap();
        write_pdb(&pdb_path, 7, sig);

        let report = patch_image(&image_path, Some(&pdb_path), false).unwrap();
        assert_eq!(report.timestamp, TIMESTAMP_CONSTANT);
        assert!(report.pdb_rewritten);

        let patched = std::fs::read(&image_path).unwrap();
        let file_header_ts_off = 0x80 + 4 + 4; // e_lfanew + 4 (FILE_HEADER start) + TimeDateStamp
        assert_eq!(
            u32::from_le_bytes(patched[file_header_ts_off..file_header_ts_off + 4].try_into().unwrap()),
            TIMESTAMP_CONSTANT,
        );

        let debug_table_off = 0x200usize;
        assert_eq!(
            u32::from_le_bytes(patched[debug_table_off + 4..debug_table_off + 8].try_into().unwrap()),
            0,
            "a zero TimeDateStamp must be left alone",
        );

        let cv_off = debug_table_off + DEBUG_DIRECTORY_ENTRY_SIZE;
        let expected_sig = hex::decode(&report.signature).unwrap();
        assert_eq!(&patched[cv_off + 4..cv_off + 20], expected_sig.as_slice());
        assert_eq!(
            u32::from_le_bytes(patched[cv_off + 20..cv_off + 24].try_into().unwrap()),
            PDB_AGE,
        );

        let msf = Msf::open(&pdb_path).unwrap();
        let header = msf.read_stream(1).unwrap();
        assert_eq!(&header[12..28], expected_sig.as_slice());
        assert_eq!(u32::from_le_bytes(header[8..12].try_into().unwrap()), PDB_AGE);
    }

    #[test]
    fn dry_run_leaves_both_files_untouched() {
        let dir = tempdir().unwrap();
        let image_path = dir.path().join("app.exe");
        let pdb_path = dir.path().join("app.pdb");

        let sig = [0x22u8; 16];
        let image_bytes = build_pe(&[DebugEntrySpec {
            timestamp: 123,
            entry_type: DEBUG_TYPE_CODEVIEW,
            codeview: Some((sig, 3, "b.pdb")),
        }]);
        std::fs::write(&image_path, &image_bytes).unwrap();
        write_pdb(&pdb_path, 3, sig);
        let pdb_bytes_before = std::fs::read(&pdb_path).unwrap();

        patch_image(&image_path, Some(&pdb_path), true).unwrap();

        assert_eq!(std::fs::read(&image_path).unwrap(), image_bytes);
        assert_eq!(std::fs::read(&pdb_path).unwrap(), pdb_bytes_before);
    }

    #[test]
    fn mismatched_pdb_signature_is_rejected() {
        let dir = tempdir().unwrap();
        let image_path = dir.path().join("app.exe");
        let pdb_path = dir.path().join("app.pdb");

        std::fs::write(
            &image_path,
            build_pe(&[DebugEntrySpec {
                timestamp: 0,
                entry_type: DEBUG_TYPE_CODEVIEW,
                codeview: Some(([0x33; 16], 5, "c.pdb")),
            }]),
        )
        .unwrap();
        write_pdb(&pdb_path, 5, [0xFF; 16]); // wrong signature

        assert!(patch_image(&image_path, Some(&pdb_path), false).is_err());
    }

    #[test]
    fn multiple_codeview_entries_are_rejected() {
        let dir = tempdir().unwrap();
        let image_path = dir.path().join("app.exe");
        std::fs::write(
            &image_path,
            build_pe(&[
                DebugEntrySpec {
                    timestamp: 0,
                    entry_type: DEBUG_TYPE_CODEVIEW,
                    codeview: Some(([0x44; 16], 1, "d.pdb")),
                },
                DebugEntrySpec {
                    timestamp: 0,
                    entry_type: DEBUG_TYPE_CODEVIEW,
                    codeview: None,
                },
            ]),
        )
        .unwrap();

        let err = patch_image(&image_path, None, false).unwrap_err();
        assert!(matches!(err, PatchError::InvalidImage(_)));
    }
}
