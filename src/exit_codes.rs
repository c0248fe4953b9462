//! Standard exit codes for the repro-pe binary

/// Successful execution
pub const EXIT_SUCCESS: i32 = 0;

/// Generic error (avoid using - be more specific)
pub const EXIT_ERROR: i32 = 1;

/// Panic or unrecoverable error
pub const EXIT_PANIC: i32 = 101;

/// PE structure error (bad magic, truncated headers, unsupported layout)
pub const EXIT_INVALID_IMAGE: i32 = 102;

/// PDB structure error (bad MSF container, version too old, signature
/// mismatch against the PE)
pub const EXIT_INVALID_PDB: i32 = 103;

/// Invalid command-line arguments
pub const EXIT_INVALID_ARGS: i32 = 105;

/// I/O error (file not found, permission denied, disk error)
pub const EXIT_IO_ERROR: i32 = 106;
