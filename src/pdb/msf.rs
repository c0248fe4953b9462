//! A minimal reader/writer for the classic Multi-Stream File (MSF)
//! container that backs a PDB.
//!
//! This is not a general-purpose PDB library: it understands the
//! superblock, free-page bookkeeping (only enough to avoid colliding with
//! it), and the stream directory, and treats every stream's content as
//! opaque bytes. That is exactly the surface `PdbRewriter` needs: list
//! streams, read one, replace one, and serialize the result to a new
//! file.

use crate::exceptions::{PatchError, Result};
use log::{debug, trace};
use std::collections::HashMap;
use std::path::Path;

const MSF_MAGIC: &[u8; 32] = b"Microsoft C/C++ MSF 7.00\r\n\x1aDS\0\0\0";
const SUPERBLOCK_SIZE: usize = 56;

pub(crate) fn read_u32(buf: &[u8], off: usize) -> Result<u32> {
    let bytes: [u8; 4] = buf
        .get(off..off + 4)
        .ok_or_else(|| PatchError::InvalidPdb(format!("read past end of file at 0x{off:x}")))?
        .try_into()
        .map_err(|_| PatchError::InvalidPdb(format!("bad u32 at 0x{off:x}")))?;
    Ok(u32::from_le_bytes(bytes))
}

/// An open MSF container.
#[derive(Debug)]
pub struct Msf {
    page_size: usize,
    data: Vec<u8>,
    stream_sizes: Vec<u32>,
    stream_pages: Vec<Vec<u32>>,
    replacements: HashMap<usize, Vec<u8>>,
}

impl Msf {
    /// Open and parse an existing MSF container.
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        if data.len() < SUPERBLOCK_SIZE || &data[0..32] != MSF_MAGIC.as_slice() {
            return Err(PatchError::InvalidPdb(
                "not an MSF container (bad magic)".into(),
            ));
        }

        let page_size = read_u32(&data, 32)? as usize;
        if page_size == 0 || data.len() % page_size != 0 {
            return Err(PatchError::InvalidPdb(format!(
                "invalid MSF page size: {page_size}"
            )));
        }
        let num_directory_bytes = read_u32(&data, 44)? as usize;
        let block_map_addr = read_u32(&data, 52)? as usize;
        debug!(
            "MSF: page_size={page_size} num_directory_bytes={num_directory_bytes} block_map_addr={block_map_addr}"
        );

        let dir_page_count = num_directory_bytes.div_ceil(page_size);
        let block_map_page = Self::page_bytes(&data, page_size, block_map_addr)?;
        if dir_page_count * 4 > block_map_page.len() {
            return Err(PatchError::InvalidPdb(
                "stream directory spans more pages than this reader supports".into(),
            ));
        }
        let mut dir_pages = Vec::with_capacity(dir_page_count);
        for i in 0..dir_page_count {
            dir_pages.push(read_u32(block_map_page, i * 4)?);
        }

        let mut dir_bytes = Vec::with_capacity(dir_page_count * page_size);
        for page in &dir_pages {
            dir_bytes.extend_from_slice(Self::page_bytes(&data, page_size, *page as usize)?);
        }
        dir_bytes.truncate(num_directory_bytes);

        let num_streams = read_u32(&dir_bytes, 0)? as usize;
        let mut cursor = 4usize;
        let mut stream_sizes = Vec::with_capacity(num_streams);
        for _ in 0..num_streams {
            let raw = read_u32(&dir_bytes, cursor)?;
            stream_sizes.push(if raw == u32::MAX { 0 } else { raw });
            cursor += 4;
        }

        let mut stream_pages = Vec::with_capacity(num_streams);
        for &size in &stream_sizes {
            let count = (size as usize).div_ceil(page_size);
            let mut pages = Vec::with_capacity(count);
            for _ in 0..count {
                pages.push(read_u32(&dir_bytes, cursor)?);
                cursor += 4;
            }
            stream_pages.push(pages);
        }

        trace!("MSF: {num_streams} streams");
        Ok(Msf {
            page_size,
            data,
            stream_sizes,
            stream_pages,
            replacements: HashMap::new(),
        })
    }

    fn page_bytes(data: &[u8], page_size: usize, page: usize) -> Result<&[u8]> {
        let start = page * page_size;
        data.get(start..start + page_size)
            .ok_or_else(|| PatchError::InvalidPdb(format!("page {page} out of bounds")))
    }

    pub fn stream_count(&self) -> usize {
        self.stream_sizes.len()
    }

    /// Read a stream's current content (its pending replacement, if any
    /// was staged via `replace_stream`, otherwise its original bytes).
    pub fn read_stream(&self, index: usize) -> Result<Vec<u8>> {
        if let Some(replacement) = self.replacements.get(&index) {
            return Ok(replacement.clone());
        }
        let size = *self
            .stream_sizes
            .get(index)
            .ok_or_else(|| PatchError::InvalidPdb(format!("no such stream: {index}")))?
            as usize;
        let pages = &self.stream_pages[index];
        let mut out = Vec::with_capacity(pages.len() * self.page_size);
        for &page in pages {
            out.extend_from_slice(Self::page_bytes(&self.data, self.page_size, page as usize)?);
        }
        out.truncate(size);
        Ok(out)
    }

    /// Stage new content for a stream. Takes effect only once `write_to`
    /// is called.
    pub fn replace_stream(&mut self, index: usize, content: Vec<u8>) -> Result<()> {
        if index >= self.stream_sizes.len() {
            return Err(PatchError::InvalidPdb(format!("no such stream: {index}")));
        }
        self.replacements.insert(index, content);
        Ok(())
    }

    /// Serialize this container, with all staged replacements applied,
    /// to a fresh file at `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let page_size = self.page_size;
        let mut pages: Vec<Vec<u8>> = Vec::new();

        // Reserve page 0 (superblock) and page 1 (free page map); their
        // final content is patched in after we know the page count.
        pages.push(vec![0u8; page_size]);
        pages.push(vec![0u8; page_size]);

        let mut stream_sizes = Vec::with_capacity(self.stream_sizes.len());
        let mut stream_pages = Vec::with_capacity(self.stream_sizes.len());

        for index in 0..self.stream_sizes.len() {
            let content = self.read_stream(index)?;
            stream_sizes.push(content.len() as u32);
            let mut page_list = Vec::new();
            for chunk in content.chunks(page_size) {
                let mut page = vec![0u8; page_size];
                page[..chunk.len()].copy_from_slice(chunk);
                page_list.push(pages.len() as u32);
                pages.push(page);
            }
            stream_pages.push(page_list);
        }

        let mut dir_bytes = Vec::new();
        dir_bytes.extend_from_slice(&(stream_sizes.len() as u32).to_le_bytes());
        for size in &stream_sizes {
            dir_bytes.extend_from_slice(&size.to_le_bytes());
        }
        for page_list in &stream_pages {
            for page in page_list {
                dir_bytes.extend_from_slice(&page.to_le_bytes());
            }
        }

        let mut dir_page_numbers = Vec::new();
        for chunk in dir_bytes.chunks(page_size) {
            let mut page = vec![0u8; page_size];
            page[..chunk.len()].copy_from_slice(chunk);
            dir_page_numbers.push(pages.len() as u32);
            pages.push(page);
        }

        if dir_page_numbers.len() * 4 > page_size {
            return Err(PatchError::InvalidPdb(
                "rebuilt stream directory needs more pages than this writer supports".into(),
            ));
        }
        let mut block_map_page = vec![0u8; page_size];
        for (i, page_no) in dir_page_numbers.iter().enumerate() {
            block_map_page[i * 4..i * 4 + 4].copy_from_slice(&page_no.to_le_bytes());
        }
        let block_map_addr = pages.len() as u32;
        pages.push(block_map_page);

        let mut superblock = vec![0u8; page_size];
        superblock[0..32].copy_from_slice(MSF_MAGIC.as_slice());
        superblock[32..36].copy_from_slice(&(page_size as u32).to_le_bytes());
        superblock[36..40].copy_from_slice(&1u32.to_le_bytes()); // free_block_map_block
        superblock[40..44].copy_from_slice(&(pages.len() as u32).to_le_bytes());
        superblock[44..48].copy_from_slice(&(dir_bytes.len() as u32).to_le_bytes());
        superblock[48..52].copy_from_slice(&0u32.to_le_bytes()); // unknown/reserved
        superblock[52..56].copy_from_slice(&block_map_addr.to_le_bytes());
        pages[0] = superblock;

        let mut out = Vec::with_capacity(pages.len() * page_size);
        for page in pages {
            out.extend_from_slice(&page);
        }
        std::fs::write(path, out)?;
        Ok(())
    }
}
