//! Per-package build orchestration.
//!
//! Turns one source tree into one artifact: validate the tree, resolve an
//! archiver backend, produce the archive at the canonical output path, hash
//! it, and record the digest in the source manifest.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::archive::{ArchiveError, Archiver, ArchiverConfig};
use crate::hasher::{FileHasher, HashError, NativeHasher, Sha256Digest};
use crate::manifest::{Document, FieldValue};
use crate::{MANIFEST_FILE, artifact_path};

/// Errors from a package build.
#[derive(Error, Debug)]
pub enum BuildError {
    /// The source directory does not exist or is not a directory.
    #[error("source directory not found: {0}")]
    MissingSource(PathBuf),

    /// The trailing `<name>/<version>` path segments could not be derived.
    #[error("cannot derive package name and version from path: {0}")]
    BadSourcePath(PathBuf),

    /// No manifest file at the source tree root.
    #[error("manifest.acl not found in {0}")]
    MissingManifest(PathBuf),

    /// All archiver backend states were exhausted.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// The backend reported success but the artifact is missing.
    #[error("artifact missing after pack: {0}")]
    MissingArtifact(PathBuf),

    /// Digest computation failed; an artifact without a trustworthy digest
    /// must never be published.
    #[error(transparent)]
    Hash(#[from] HashError),

    /// Filesystem failure during the build.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result of a successful build.
#[derive(Debug)]
pub struct BuildOutcome {
    /// Package name derived from the source path.
    pub name: String,
    /// Package version derived from the source path.
    pub version: String,
    /// Canonical artifact location.
    pub artifact: PathBuf,
    /// Content digest of the artifact.
    pub digest: Sha256Digest,
    /// Set when the artifact was built but the manifest annotation failed.
    /// The artifact is usable; the inconsistency must be fixed before
    /// publishing.
    pub manifest_warning: Option<String>,
}

/// Builds one artifact per source tree.
pub struct PackageBuilder {
    out_root: PathBuf,
    archiver: Archiver,
    hasher: Box<dyn FileHasher>,
}

impl std::fmt::Debug for PackageBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageBuilder")
            .field("out_root", &self.out_root)
            .field("archiver", &self.archiver)
            .finish_non_exhaustive()
    }
}

impl PackageBuilder {
    /// Create a builder writing artifacts under `out_root`, hashing with the
    /// native in-process hasher.
    pub fn new(out_root: impl Into<PathBuf>, archiver: ArchiverConfig) -> Self {
        Self {
            out_root: out_root.into(),
            archiver: Archiver::new(archiver),
            hasher: Box::new(NativeHasher),
        }
    }

    /// Replace the content hasher (e.g. with the subprocess-delegating one).
    pub fn with_hasher(mut self, hasher: Box<dyn FileHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Build the artifact for `source_dir`.
    ///
    /// The source tree's trailing path components name the package:
    /// `.../<name>/<version>`. The artifact lands at
    /// `out_root/<name>/<version>/<name>-<version>.pkg`; the computed digest
    /// is upserted into the source manifest as `archive_sha256`.
    pub fn build(&self, source_dir: &Path) -> Result<BuildOutcome, BuildError> {
        if !source_dir.is_dir() {
            return Err(BuildError::MissingSource(source_dir.to_path_buf()));
        }
        let source_dir = source_dir.canonicalize()?;
        let (name, version) = derive_name_version(&source_dir)?;

        let manifest_path = source_dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(BuildError::MissingManifest(source_dir.clone()));
        }

        let out_path = artifact_path(&self.out_root, &name, &version);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        self.archiver.pack(&source_dir, &out_path)?;
        if !out_path.is_file() {
            return Err(BuildError::MissingArtifact(out_path));
        }

        let digest = self.hasher.digest_file(&out_path)?;
        tracing::info!("built {name}-{version}: sha256 {digest}");

        // A failed manifest patch after a successful build is a loud warning,
        // not an error: the artifact itself is complete and correct.
        let manifest_warning = match annotate_manifest(&manifest_path, &digest) {
            Ok(()) => None,
            Err(err) => {
                let warning = format!(
                    "failed to update {}: {err}",
                    manifest_path.display()
                );
                tracing::warn!("{warning}");
                Some(warning)
            }
        };

        Ok(BuildOutcome {
            name,
            version,
            artifact: out_path,
            digest,
            manifest_warning,
        })
    }
}

/// Derive `(name, version)` from the two trailing path components.
fn derive_name_version(source_dir: &Path) -> Result<(String, String), BuildError> {
    let bad = || BuildError::BadSourcePath(source_dir.to_path_buf());

    let version = source_dir
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(bad)?;
    let name = source_dir
        .parent()
        .and_then(Path::file_name)
        .and_then(|s| s.to_str())
        .ok_or_else(bad)?;

    if name.is_empty() || version.is_empty() {
        return Err(bad());
    }
    Ok((name.to_string(), version.to_string()))
}

/// Upsert the digest into the manifest, preserving all other content.
fn annotate_manifest(
    manifest_path: &Path,
    digest: &Sha256Digest,
) -> Result<(), crate::manifest::ManifestError> {
    let mut doc = Document::load(manifest_path)?;
    doc.upsert_field(
        "string",
        "archive_sha256",
        &["archive_sha"],
        &FieldValue::str(digest.as_str()),
    );
    doc.save(manifest_path)
}
