//! repro-pe CLI binary

use clap::Parser;
use repro_pe::exit_codes::*;
use repro_pe::{PatchOptions, patch};
use std::{env, panic, path::PathBuf, process};

const VERSION: &str = repro_pe::version::VERSION;

#[derive(Parser, Debug)]
#[command(version = VERSION, about = "Rewrite PE timestamps and PDB signatures for reproducible builds")]
struct Args {
    /// Path to the PE image to patch (.exe/.dll)
    image: PathBuf,

    /// Path to the paired PDB to rebind to the new signature
    #[arg(long)]
    pdb: Option<PathBuf>,

    /// Compute and log what would change without modifying either file
    #[arg(long)]
    dry_run: bool,

    /// Print the patch report as JSON instead of a human-readable summary
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() {
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("PANIC: {}", panic_info);
        process::exit(EXIT_PANIC);
    }));

    let result = panic::catch_unwind(run);

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(_) => {
            eprintln!("Fatal: unhandled panic in repro-pe");
            process::exit(EXIT_PANIC);
        }
    }
}

fn run() -> i32 {
    if env::args().nth(1).as_deref() == Some("--version") {
        println!("repro-pe {}", repro_pe::version::full_version());
        return EXIT_SUCCESS;
    }

    let args = Args::parse();

    if let Some(ref level) = args.log_level {
        repro_pe::logger::JsonLogger::init_with_level(level, "CLI --log-level");
    } else {
        repro_pe::logger::JsonLogger::init();
    }

    let options = PatchOptions {
        pdb_path: args.pdb,
        dry_run: args.dry_run,
    };

    match patch(&args.image, options) {
        Ok(report) => {
            if args.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        eprintln!("Failed to encode patch report: {e}");
                        return EXIT_ERROR;
                    }
                }
            } else {
                println!(
                    "patched {} field(s); timestamp=0x{:08x} signature={}{}",
                    report.patches.len(),
                    report.timestamp,
                    report.signature,
                    if report.pdb_rewritten { "; PDB rewritten" } else { "" }
                );
            }
            EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            match e {
                repro_pe::PatchError::InvalidImage(_) => EXIT_INVALID_IMAGE,
                repro_pe::PatchError::InvalidPdb(_) => EXIT_INVALID_PDB,
                repro_pe::PatchError::IoError(_) => EXIT_IO_ERROR,
                repro_pe::PatchError::Generic(_) => EXIT_ERROR,
            }
        }
    }
}
