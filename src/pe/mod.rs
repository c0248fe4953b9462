//! PE image parsing, patching, and content-addressed signature generation.

pub mod checksum;
pub mod constants;
pub mod mmap;
pub mod patch;
pub mod view;

pub use checksum::skip_checksum;
pub use mmap::MemMap;
pub use patch::{ConstantPool, Patch, PatchSet, PatchSource};
pub use view::{DebugEntry, OptionalHeaderVariant, PEView, SectionHeader};
