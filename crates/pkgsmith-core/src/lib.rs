//! pkgsmith - reproducible package forging and registry indexing.
//!
//! # Overview
//!
//! pkgsmith turns a source tree into a deterministic `.pkg` artifact,
//! fingerprints it with SHA-256, and generates a content-addressed registry
//! index (`index.acl` plus one `manifest.acl` per published version) from a
//! workspace of built artifacts.
//!
//! # Architecture
//!
//! - **Lossless document model**: `.acl` manifests are parsed into an ordered
//!   node list that round-trips byte-for-byte, so a field upsert never
//!   disturbs comments, unknown fields, or formatting.
//! - **Backend ladder**: archiving tries an external `packtool`, then an
//!   on-demand compile of its source, then a deterministic in-process
//!   tar+gzip fallback (policy-gated).
//! - **Compute-then-write**: index generation renders every output document
//!   in memory before touching the filesystem, so a failed run writes
//!   nothing.
//!
//! # Workspace layout
//!
//! ```text
//! pkgs/<name>/<version>/<name>-<version>.pkg   # built artifacts
//! docs/index.acl                               # registry index
//! docs/pkgs/<name>/<version>/manifest.acl     # per-version manifests
//! ```

pub mod archive;
pub mod builder;
pub mod hasher;
pub mod indexer;
pub mod manifest;
pub mod scanner;
pub mod toolchain;

// Re-exports for convenience
pub use archive::{Archiver, ArchiverConfig, FallbackPolicy};
pub use builder::{BuildOutcome, PackageBuilder};
pub use hasher::{FileHasher, NativeHasher, Sha256Digest};
pub use indexer::{IndexBuilder, UrlPolicy};
pub use manifest::Document;
pub use scanner::scan_workspace;

use std::path::{Path, PathBuf};

/// File extension of produced artifacts (without the leading dot).
pub const ARTIFACT_EXT: &str = "pkg";

/// Manifest filename expected at the root of every source tree.
pub const MANIFEST_FILE: &str = "manifest.acl";

/// Filename of the generated registry index.
pub const INDEX_FILE: &str = "index.acl";

/// Canonical artifact filename for a package version: `<name>-<version>.pkg`.
pub fn artifact_file_name(name: &str, version: &str) -> String {
    format!("{name}-{version}.{ARTIFACT_EXT}")
}

/// Canonical artifact path under an output root:
/// `out_root/<name>/<version>/<name>-<version>.pkg`.
pub fn artifact_path(out_root: &Path, name: &str, version: &str) -> PathBuf {
    out_root
        .join(name)
        .join(version)
        .join(artifact_file_name(name, version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_path_layout() {
        let p = artifact_path(Path::new("pkgs"), "foo", "1.0.0");
        assert_eq!(p, Path::new("pkgs/foo/1.0.0/foo-1.0.0.pkg"));
    }
}
