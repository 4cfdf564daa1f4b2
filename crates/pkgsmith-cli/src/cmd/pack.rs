//! Pack command: build one package artifact from a source tree.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pkgsmith_core::PackageBuilder;
use pkgsmith_core::archive::{ArchiverConfig, FallbackPolicy};

/// Build the artifact for `src_dir` and record its digest in the manifest.
pub fn run(
    src_dir: &Path,
    out_root: &Path,
    packtool: Option<PathBuf>,
    no_fallback: bool,
    keep_temp: bool,
) -> Result<()> {
    let config = ArchiverConfig {
        tool_override: packtool,
        fallback: if no_fallback {
            FallbackPolicy::Disabled
        } else {
            FallbackPolicy::Deterministic
        },
        keep_temp,
        ..ArchiverConfig::default()
    };

    let builder = PackageBuilder::new(out_root, config);
    let outcome = builder
        .build(src_dir)
        .with_context(|| format!("failed to build {}", src_dir.display()))?;

    println!("SHA256: {}", outcome.digest);
    if let Some(warning) = &outcome.manifest_warning {
        eprintln!("warning: {warning}");
    }
    println!("Wrote package: {}", outcome.artifact.display());
    Ok(())
}
