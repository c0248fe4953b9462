//! Reading and rewriting the PDB paired with a patched PE.

pub mod msf;
pub mod rewriter;

pub use msf::Msf;
pub use rewriter::rewrite_pdb;
