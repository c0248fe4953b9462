//! Bounds-checked, read-only navigation of a PE image's headers.
//!
//! Every accessor validates its inputs against the buffer length before
//! touching a byte; nothing here ever reads past `buffer.len()`.

use crate::exceptions::{PatchError, Result};
use crate::pe::constants::*;
use log::{debug, trace, warn};

fn read_u16(buf: &[u8], off: usize) -> Result<u16> {
    let bytes: [u8; 2] = buf
        .get(off..off + 2)
        .ok_or_else(|| PatchError::InvalidImage(format!("read past end of file at 0x{off:x}")))?
        .try_into()
        .map_err(|_| PatchError::InvalidImage(format!("bad u16 at 0x{off:x}")))?;
    Ok(u16::from_le_bytes(bytes))
}

pub(crate) fn read_u32(buf: &[u8], off: usize) -> Result<u32> {
    let bytes: [u8; 4] = buf
        .get(off..off + 4)
        .ok_or_else(|| PatchError::InvalidImage(format!("read past end of file at 0x{off:x}")))?
        .try_into()
        .map_err(|_| PatchError::InvalidImage(format!("bad u32 at 0x{off:x}")))?;
    Ok(u32::from_le_bytes(bytes))
}

/// Which optional-header layout this image uses. The field offsets that
/// differ between the two (the data directory array's start) are carried
/// as data on the variant instead of dispatched through a templated code
/// path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionalHeaderVariant {
    /// 32-bit image (`IMAGE_OPTIONAL_HEADER32`, magic `0x10b`).
    Pe32,
    /// 64-bit image (`IMAGE_OPTIONAL_HEADER64`, magic `0x20b`).
    Pe32Plus,
}

impl OptionalHeaderVariant {
    fn from_magic(magic: u16) -> Result<Self> {
        match magic {
            OPTIONAL_HDR32_MAGIC => Ok(Self::Pe32),
            OPTIONAL_HDR64_MAGIC => Ok(Self::Pe32Plus),
            other => Err(PatchError::InvalidImage(format!(
                "unsupported optional header magic 0x{other:x}"
            ))),
        }
    }

    /// Offset of the `CheckSum` field, relative to the start of the
    /// optional header. Identical for both variants.
    fn checksum_offset(self) -> usize {
        64
    }

    /// Offset of `DataDirectory[0]`, relative to the start of the
    /// optional header.
    fn data_directory_offset(self) -> usize {
        match self {
            Self::Pe32 => 96,
            Self::Pe32Plus => 112,
        }
    }
}

/// A section header's fields relevant to RVA→file-offset translation.
#[derive(Debug, Clone, Copy)]
pub struct SectionHeader {
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub pointer_to_raw_data: u32,
    pub size_of_raw_data: u32,
}

/// One `IMAGE_DEBUG_DIRECTORY` entry, plus the absolute file offset of
/// its `TimeDateStamp` field and (if resolvable) its raw payload.
#[derive(Debug, Clone, Copy)]
pub struct DebugEntry {
    /// Absolute offset of this entry's `TimeDateStamp` field.
    pub timestamp_offset: usize,
    pub timestamp: u32,
    pub entry_type: u32,
    pub size_of_data: u32,
    /// File offset of the raw debug payload (already RVA-resolved via
    /// `PointerToRawData`, which for debug entries is a file offset, not
    /// an RVA, unlike most other directory entries).
    pub pointer_to_raw_data: u32,
}

/// Bounds-validated view over a PE image's headers.
#[derive(Debug)]
pub struct PEView {
    pub nt_headers_off: usize,
    pub file_header_off: usize,
    pub optional_header_off: usize,
    pub size_of_optional_header: usize,
    pub optional_header_variant: OptionalHeaderVariant,
    pub number_of_sections: u16,
    pub section_table_off: usize,
}

impl PEView {
    /// Parse and validate the PE headers backing `buf`. Does not look at
    /// section contents beyond the section table itself.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 0x40 {
            return Err(PatchError::InvalidImage("file too small for DOS header".into()));
        }
        if buf[0] != DOS_MAGIC[0] || buf[1] != DOS_MAGIC[1] {
            return Err(PatchError::InvalidImage("missing 'MZ' signature".into()));
        }

        let e_lfanew = read_u32(buf, 0x3C)? as usize;
        if buf.len() < e_lfanew + 4 {
            return Err(PatchError::InvalidImage("e_lfanew points past end of file".into()));
        }
        if &buf[e_lfanew..e_lfanew + 4] != NT_SIGNATURE {
            return Err(PatchError::InvalidImage(format!(
                "missing 'PE\\0\\0' signature at 0x{e_lfanew:x}"
            )));
        }
        trace!("NT headers at 0x{e_lfanew:x}");

        let file_header_off = e_lfanew + 4;
        if buf.len() < file_header_off + 20 {
            return Err(PatchError::InvalidImage("file header truncated".into()));
        }

        let number_of_sections = read_u16(buf, file_header_off + 2)?;
        let size_of_optional_header = read_u16(buf, file_header_off + 16)? as usize;
        if size_of_optional_header < 2 {
            return Err(PatchError::InvalidImage("optional header too small".into()));
        }

        let optional_header_off = file_header_off + 20;
        if buf.len() < optional_header_off + size_of_optional_header {
            return Err(PatchError::InvalidImage("optional header truncated".into()));
        }

        let magic = read_u16(buf, optional_header_off)?;
        let optional_header_variant = OptionalHeaderVariant::from_magic(magic)?;
        debug!("optional header variant: {optional_header_variant:?}");

        let section_table_off = optional_header_off + size_of_optional_header;
        let section_table_end =
            section_table_off + number_of_sections as usize * SECTION_HEADER_SIZE;
        if buf.len() < section_table_end {
            return Err(PatchError::InvalidImage("section table truncated".into()));
        }

        Ok(PEView {
            nt_headers_off: e_lfanew,
            file_header_off,
            optional_header_off,
            size_of_optional_header,
            optional_header_variant,
            number_of_sections,
            section_table_off,
        })
    }

    /// Absolute offset of `FILE_HEADER.TimeDateStamp`.
    pub fn file_header_timestamp_offset(&self) -> usize {
        self.file_header_off + 4
    }

    /// Absolute offset of `OPTIONAL_HEADER.CheckSum`.
    pub fn checksum_offset(&self) -> usize {
        self.optional_header_off + self.optional_header_variant.checksum_offset()
    }

    fn data_directory_table_offset(&self) -> usize {
        self.optional_header_off + self.optional_header_variant.data_directory_offset()
    }

    /// Read data directory entry `index` as `(virtual_address, size)`.
    /// Returns `None` for an index beyond `NumberOfRvaAndSizes`'s declared
    /// table bounds (checked indirectly via the optional header size) or
    /// whose size is zero (meaning "not present").
    pub fn data_directory(&self, buf: &[u8], index: usize) -> Result<Option<(u32, u32)>> {
        if index >= NUM_DATA_DIRECTORIES {
            return Err(PatchError::InvalidImage(format!(
                "data directory index {index} out of range"
            )));
        }
        let entry_off = self.data_directory_table_offset() + index * 8;
        if entry_off + 8 > self.section_table_off {
            // Declared optional header size doesn't reach this entry.
            return Ok(None);
        }
        let virtual_address = read_u32(buf, entry_off)?;
        let size = read_u32(buf, entry_off + 4)?;
        if size == 0 {
            return Ok(None);
        }
        Ok(Some((virtual_address, size)))
    }

    /// Read the section header table.
    pub fn sections(&self, buf: &[u8]) -> Result<Vec<SectionHeader>> {
        let mut out = Vec::with_capacity(self.number_of_sections as usize);
        for i in 0..self.number_of_sections as usize {
            let off = self.section_table_off + i * SECTION_HEADER_SIZE;
            out.push(SectionHeader {
                virtual_size: read_u32(buf, off + 8)?,
                virtual_address: read_u32(buf, off + 12)?,
                size_of_raw_data: read_u32(buf, off + 16)?,
                pointer_to_raw_data: read_u32(buf, off + 20)?,
            });
        }
        Ok(out)
    }

    /// Translate an RVA to an absolute file offset by locating the
    /// section whose virtual range contains it.
    pub fn rva_to_file_offset(&self, buf: &[u8], rva: u32) -> Result<usize> {
        for section in self.sections(buf)? {
            let span = section.virtual_size.max(section.size_of_raw_data);
            if rva >= section.virtual_address && rva < section.virtual_address + span {
                let delta = rva - section.virtual_address;
                return Ok(section.pointer_to_raw_data as usize + delta as usize);
            }
        }
        Err(PatchError::InvalidImage(format!(
            "RVA 0x{rva:x} does not fall within any section"
        )))
    }

    /// Returns `true` if `[offset, offset+len)` lies entirely within
    /// `buf`.
    pub fn is_valid_ref(buf: &[u8], offset: usize, len: usize) -> bool {
        offset
            .checked_add(len)
            .is_some_and(|end| end <= buf.len())
    }

    /// Resolve the export directory's `TimeDateStamp` field offset, if
    /// an export directory is present.
    pub fn export_directory_timestamp_offset(&self, buf: &[u8]) -> Result<Option<usize>> {
        let Some((rva, size)) = self.data_directory(buf, DIR_EXPORT)? else {
            return Ok(None);
        };
        if size < 8 {
            warn!("export directory present but too small to hold a timestamp");
            return Ok(None);
        }
        let file_off = self.rva_to_file_offset(buf, rva)?;
        // IMAGE_EXPORT_DIRECTORY.TimeDateStamp is the second field, at +4.
        let ts_off = file_off + 4;
        if !Self::is_valid_ref(buf, ts_off, 4) {
            return Err(PatchError::InvalidImage(
                "export directory timestamp out of bounds".into(),
            ));
        }
        Ok(Some(ts_off))
    }

    /// Resolve the resource directory's `TimeDateStamp` field offset, if
    /// a resource directory is present.
    pub fn resource_directory_timestamp_offset(&self, buf: &[u8]) -> Result<Option<usize>> {
        let Some((rva, size)) = self.data_directory(buf, DIR_RESOURCE)? else {
            return Ok(None);
        };
        if size < 4 {
            warn!("resource directory present but too small to hold a timestamp");
            return Ok(None);
        }
        let file_off = self.rva_to_file_offset(buf, rva)?;
        // IMAGE_RESOURCE_DIRECTORY.TimeDateStamp is the second field, at +4.
        let ts_off = file_off + 4;
        if !Self::is_valid_ref(buf, ts_off, 4) {
            return Err(PatchError::InvalidImage(
                "resource directory timestamp out of bounds".into(),
            ));
        }
        Ok(Some(ts_off))
    }

    /// Read every entry of the debug directory, if present.
    ///
    /// The debug directory's `PointerToRawData` fields are themselves
    /// file offsets (not RVAs, despite living in an RVA-addressed data
    /// directory), a long-standing PE quirk this crate relies on.
    pub fn debug_entries(&self, buf: &[u8]) -> Result<Vec<DebugEntry>> {
        let Some((rva, size)) = self.data_directory(buf, DIR_DEBUG)? else {
            return Ok(Vec::new());
        };
        if size as usize % DEBUG_DIRECTORY_ENTRY_SIZE != 0 {
            return Err(PatchError::InvalidImage(format!(
                "debug directory size {size} is not a multiple of {DEBUG_DIRECTORY_ENTRY_SIZE}"
            )));
        }
        let table_off = self.rva_to_file_offset(buf, rva)?;
        let count = size as usize / DEBUG_DIRECTORY_ENTRY_SIZE;
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            let off = table_off + i * DEBUG_DIRECTORY_ENTRY_SIZE;
            if !Self::is_valid_ref(buf, off, DEBUG_DIRECTORY_ENTRY_SIZE) {
                return Err(PatchError::InvalidImage(format!(
                    "debug directory entry {i} out of bounds"
                )));
            }
            out.push(DebugEntry {
                timestamp_offset: off + 4,
                timestamp: read_u32(buf, off + 4)?,
                entry_type: read_u32(buf, off + 12)?,
                size_of_data: read_u32(buf, off + 16)?,
                pointer_to_raw_data: read_u32(buf, off + 24)?,
            });
        }
        Ok(out)
    }
}
