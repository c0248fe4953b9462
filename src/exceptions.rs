//! Error types for repro-pe

use std::fmt;

/// Main error type for PE/PDB patching operations
#[derive(Debug)]
pub enum PatchError {
    /// The PE image is malformed, truncated, or structured in a way this
    /// crate does not support (e.g. multiple CodeView entries).
    InvalidImage(String),

    /// The PDB's MSF container or header stream is malformed, too old, or
    /// does not match the PE it was paired with.
    InvalidPdb(String),

    /// IO error
    IoError(std::io::Error),

    /// Generic error with message
    Generic(String),
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchError::InvalidImage(msg) => write!(f, "invalid PE image: {msg}"),
            PatchError::InvalidPdb(msg) => write!(f, "invalid PDB: {msg}"),
            PatchError::IoError(err) => write!(f, "IO error: {err}"),
            PatchError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for PatchError {}

impl From<std::io::Error> for PatchError {
    fn from(err: std::io::Error) -> Self {
        PatchError::IoError(err)
    }
}

impl From<anyhow::Error> for PatchError {
    fn from(err: anyhow::Error) -> Self {
        PatchError::Generic(err.to_string())
    }
}

/// Result type for repro-pe operations
pub type Result<T> = std::result::Result<T, PatchError>;
