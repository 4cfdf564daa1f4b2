//! Index command: scan a workspace and regenerate the registry documents.

use std::path::Path;

use anyhow::{Context, Result};
use pkgsmith_core::indexer::{IndexBuilder, UrlPolicy};
use pkgsmith_core::scan_workspace;

/// Generate `index.acl` and per-version manifests under `out`.
pub fn run(
    input: &Path,
    out: &Path,
    index_base: Option<String>,
    release_base: Option<String>,
    relative_urls: bool,
) -> Result<()> {
    let policy = if relative_urls {
        UrlPolicy::relative()
    } else {
        let mut policy = UrlPolicy::default();
        if let Some(base) = index_base {
            policy.index_base = Some(base);
        }
        if let Some(base) = release_base {
            policy.release_base = Some(base);
        }
        policy
    };

    let scan = scan_workspace(input)
        .with_context(|| format!("failed to scan {}", input.display()))?;
    if scan.is_empty() {
        anyhow::bail!("no packages found under {}", input.display());
    }

    // Render everything in memory first; a failure here writes nothing.
    let rendered = IndexBuilder::new(policy).render(&scan)?;
    let written = rendered.write(out)?;

    for path in &written {
        println!("Wrote {}", path.display());
    }
    println!("Indexed {} packages", scan.len());
    Ok(())
}
