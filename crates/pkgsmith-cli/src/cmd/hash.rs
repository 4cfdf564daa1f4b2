//! Hash command

use std::path::PathBuf;

use anyhow::Result;
use pkgsmith_core::{FileHasher, NativeHasher};

/// Compute SHA256 hash of files
pub fn run(files: &[PathBuf]) -> Result<()> {
    for file in files {
        let digest = NativeHasher.digest_file(file)?;
        println!("{} {}", digest, file.display());
    }
    Ok(())
}
