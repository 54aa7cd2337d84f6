//! Writes the CRD manifests for every registered model to a directory.
//!
//! Usage: `crdgen [output-dir]` (defaults to `config/crd`).

use std::path::PathBuf;
use std::process::ExitCode;

use crds::generator::write_crd_manifests;
use crds::registry::{ModelRegistry, builtin_sources};

fn main() -> ExitCode {
    let dir = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("config/crd"), PathBuf::from);

    let registry = match ModelRegistry::discover(&builtin_sources()) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("model catalog error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match write_crd_manifests(&registry, &dir) {
        Ok(files) => {
            for file in files {
                println!("{}", dir.join(file).display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("CRD generation failed: {e}");
            ExitCode::FAILURE
        }
    }
}
