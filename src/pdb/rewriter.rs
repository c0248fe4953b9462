//! Rewrites a PDB's header stream so its signature and age match the PE
//! it is paired with, after the PE itself has been made deterministic.

use crate::exceptions::{PatchError, Result};
use crate::pdb::msf::{read_u32, Msf};
use crate::pe::constants::PDB_VERSION_VC70;
use log::{debug, info};
use std::path::Path;
use tempfile::Builder;

/// Reserved stream index of the back-compat "old directory" shadow
/// stream. Emptied on rewrite so a rewritten PDB carries no stale
/// directory snapshot.
const STREAM_OLD_DIRECTORY: usize = 0;
/// Stream index of the PDB info ("header") stream.
const STREAM_PDB_HEADER: usize = 1;

const HEADER_MIN_LEN: usize = 28; // version(4) + timestamp(4) + age(4) + sig70(16)

/// Rewrite `pdb_path`'s header stream in place (via a named temp file in
/// the same directory and an atomic rename), binding it to a PE whose
/// CodeView record will carry `new_signature`/`new_age` after this
/// crate's own patch set is committed.
///
/// `existing_pe_age`/`existing_pe_signature` are the *pre-patch* values
/// read from the PE's own CodeView record; they must match the PDB's
/// current header exactly, or this function fails (that mismatch means
/// the caller handed this tool the wrong PDB for the given PE).
pub fn rewrite_pdb(
    pdb_path: &Path,
    existing_pe_age: u32,
    existing_pe_signature: [u8; 16],
    new_timestamp: u32,
    new_age: u32,
    new_signature: [u8; 16],
    dry_run: bool,
) -> Result<()> {
    info!("rewriting PDB: {}", pdb_path.display());

    let mut msf = Msf::open(pdb_path)?;
    if msf.stream_count() == 0 {
        return Err(PatchError::InvalidPdb("PDB has no streams".into()));
    }

    let header = msf.read_stream(STREAM_PDB_HEADER)?;
    if header.len() < HEADER_MIN_LEN {
        return Err(PatchError::InvalidPdb(format!(
            "PDB header stream is {} bytes, expected at least {HEADER_MIN_LEN}",
            header.len()
        )));
    }

    let version = read_u32(&header, 0)?;
    if version < PDB_VERSION_VC70 {
        return Err(PatchError::InvalidPdb(format!(
            "PDB header version {version} predates VC70 ({PDB_VERSION_VC70})"
        )));
    }

    let header_age = read_u32(&header, 8)?;
    let mut header_sig70 = [0u8; 16];
    header_sig70.copy_from_slice(&header[12..28]);

    if header_age != existing_pe_age || header_sig70 != existing_pe_signature {
        return Err(PatchError::InvalidPdb(
            "PE and PDB signatures do not match".into(),
        ));
    }
    debug!(
        "PDB header matches PE: age={header_age} sig70={}",
        hex::encode(header_sig70)
    );

    // The old-directory shadow stream is reserved for backward
    // compatibility with pre-7.0 readers; blank it so the rewritten file
    // carries no stale directory snapshot.
    msf.replace_stream(STREAM_OLD_DIRECTORY, Vec::new())?;

    let mut new_header = header;
    new_header[0..4].copy_from_slice(&version.to_le_bytes());
    new_header[4..8].copy_from_slice(&new_timestamp.to_le_bytes());
    new_header[8..12].copy_from_slice(&new_age.to_le_bytes());
    new_header[12..28].copy_from_slice(&new_signature);
    msf.replace_stream(STREAM_PDB_HEADER, new_header)?;

    let parent = pdb_path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = Builder::new()
        .prefix(".repro-pe-pdb-")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    msf.write_to(tmp.path())?;

    if dry_run {
        debug!("dry-run: discarding {}", tmp.path().display());
        drop(tmp);
    } else {
        tmp.persist(pdb_path).map_err(|e| e.error)?;
        info!(
            "PDB rewritten: age={new_age} sig70={}",
            hex::encode(new_signature)
        );
    }

    Ok(())
}
