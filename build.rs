use std::env;

fn main() {
    // Allow CI to stamp an exact version string; otherwise fall back to the
    // crate's own Cargo.toml version.
    let version = env::var("REPRO_PE_VERSION")
        .unwrap_or_else(|_| env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string()));

    println!("cargo:rustc-env=REPRO_PE_VERSION={}", version);
    println!("cargo:rerun-if-env-changed=REPRO_PE_VERSION");
}
