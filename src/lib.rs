//! repro-pe - deterministic PE/PDB rewriting for reproducible builds
//!
//! Rewrites the non-deterministic fields a standard linker embeds in a
//! Windows PE image (link timestamps, the optional-header checksum, and
//! the GUID binding it to its PDB) with values derived from the image's
//! own stable content, so that two builds from identical source produce
//! byte-identical output.

// Enforce strict code quality and reliability
#![deny(
    // Safety
    unsafe_code,

    // Correctness
    missing_debug_implementations,
    unreachable_pub,

    // Future compatibility
    future_incompatible,

    // Rust 2018 idioms
    rust_2018_idioms,

    // All warnings must be fixed
    warnings,
)]
#![warn(
    // Documentation
    missing_docs,

    // Error handling best practices
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo,

    // Performance
    clippy::inefficient_to_string,
    clippy::large_enum_variant,

    // Code clarity and maintainability
    clippy::cognitive_complexity,
    clippy::too_many_arguments,
    clippy::type_complexity,

    // Best practices
    clippy::clone_on_ref_ptr,
    clippy::wildcard_imports,
    clippy::enum_glob_use,
    clippy::if_not_else,
    clippy::single_match_else,
    clippy::needless_continue,
    clippy::explicit_iter_loop,
    clippy::explicit_into_iter_loop,
)]
#![allow(
    missing_docs, // TODO: document every public item; pe/pdb modules come first
    clippy::too_many_arguments,
)]

pub mod api;
pub mod exceptions;
pub mod exit_codes;
pub mod logger;
pub mod patcher;
pub mod pdb;
pub mod pe;
pub mod utils;
pub mod version;

// Re-export the main entry point
pub use api::{PatchOptions, patch};
pub use exceptions::PatchError;
pub use patcher::{AppliedPatch, PatchReport, patch_image};
pub use utils::get_platform_string;
