//! Registry index generation.
//!
//! Consumes a workspace scan and renders the whole registry: one
//! `Registry { ... }` index document plus one manifest document per version.
//! Rendering is total and in-memory; nothing touches the filesystem until
//! [`RenderedIndex::write`], so a failed run leaves zero output files.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::INDEX_FILE;
use crate::hasher::{FileHasher, HashError, NativeHasher};
use crate::manifest::{Block, Document, FieldValue};
use crate::scanner::VersionEntry;

/// Default base URL for the published index and manifests.
pub const DEFAULT_INDEX_BASE: &str = "https://pkgsmith.github.io/registry/";

/// Default base URL for release asset downloads.
pub const DEFAULT_RELEASE_BASE: &str = "https://github.com/pkgsmith/registry";

/// Errors from index generation.
#[derive(Error, Debug)]
pub enum IndexError {
    /// An artifact could not be digested.
    #[error(transparent)]
    Hash(#[from] HashError),

    /// Filesystem failure while writing output documents.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Maps registry-relative paths to URLs.
///
/// With a base configured, paths become absolute base-prefixed URLs; with
/// `None` they stay bare relative paths. This indirection lets one builder
/// serve both the fixed-hosting mode and caller-supplied bases.
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    /// Base for the index and manifest documents.
    pub index_base: Option<String>,
    /// Base for release asset downloads.
    pub release_base: Option<String>,
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self {
            index_base: Some(DEFAULT_INDEX_BASE.to_string()),
            release_base: Some(DEFAULT_RELEASE_BASE.to_string()),
        }
    }
}

impl UrlPolicy {
    /// A policy emitting bare relative paths.
    pub fn relative() -> Self {
        Self {
            index_base: None,
            release_base: None,
        }
    }

    /// Self-referential URL of the index document.
    pub fn index_url(&self) -> String {
        Self::resolve(self.index_base.as_deref(), INDEX_FILE)
    }

    /// URL of a document hosted alongside the index.
    pub fn docs_url(&self, rel: &str) -> String {
        Self::resolve(self.index_base.as_deref(), rel)
    }

    /// URL of a release asset.
    pub fn release_url(&self, rel: &str) -> String {
        Self::resolve(self.release_base.as_deref(), rel)
    }

    fn resolve(base: Option<&str>, rel: &str) -> String {
        match base {
            Some(base) => format!("{}/{rel}", base.trim_end_matches('/')),
            None => rel.to_string(),
        }
    }
}

/// The fully rendered registry: index text plus per-version manifests.
#[derive(Debug, Clone)]
pub struct RenderedIndex {
    /// Serialized `index.acl` content.
    pub index: String,
    /// `(relative path, content)` for every generated manifest.
    pub manifests: Vec<(PathBuf, String)>,
}

impl RenderedIndex {
    /// Write all documents under `docs_root`, returning the written paths.
    /// Manifests are written first, the index last.
    pub fn write(&self, docs_root: &Path) -> Result<Vec<PathBuf>, IndexError> {
        let mut written = Vec::new();
        for (rel, text) in &self.manifests {
            let path = docs_root.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, text)?;
            written.push(path);
        }
        std::fs::create_dir_all(docs_root)?;
        let index_path = docs_root.join(INDEX_FILE);
        std::fs::write(&index_path, &self.index)?;
        written.push(index_path);
        Ok(written)
    }
}

/// Renders the registry index from a workspace scan.
pub struct IndexBuilder {
    policy: UrlPolicy,
    hasher: Box<dyn FileHasher>,
}

impl std::fmt::Debug for IndexBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexBuilder")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl IndexBuilder {
    /// Create an index builder using the native in-process hasher.
    pub fn new(policy: UrlPolicy) -> Self {
        Self {
            policy,
            hasher: Box::new(NativeHasher),
        }
    }

    /// Replace the content hasher.
    pub fn with_hasher(mut self, hasher: Box<dyn FileHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Render the complete registry for `scan`.
    ///
    /// Package names ascend; versions descend by plain byte-wise comparison
    /// (the scan already carries them in that order), and the first version
    /// is `latest`. Each artifact is digested exactly once; the digest is
    /// shared between the index entry and the version's manifest.
    pub fn render(
        &self,
        scan: &BTreeMap<String, Vec<VersionEntry>>,
    ) -> Result<RenderedIndex, IndexError> {
        let mut root = Block::new("Registry", None, 0);
        root.push_field("string", "url", &FieldValue::str(self.policy.index_url()));
        root.push_field("int", "priority", &FieldValue::Int(100));
        root.push_field("bool", "require_signatures", &FieldValue::Bool(false));
        root.push_field("string", "cache_policy", &FieldValue::str("ttl=3600"));
        root.push_blank();

        let mut manifests = Vec::new();

        for (name, entries) in scan {
            let versions: Vec<String> = entries.iter().map(|e| e.version.clone()).collect();

            root.push_comment(&format!("/* {name} package */"));
            let mut pkg = Block::new("Package", Some(name.as_str()), 1);
            pkg.push_field("string[]", "versions", &FieldValue::List(versions.clone()));
            pkg.push_field("string", "latest", &FieldValue::str(versions[0].as_str()));
            pkg.push_field("string", "pkg_base_url", &FieldValue::str(""));
            pkg.push_blank();

            for entry in entries {
                let version = &entry.version;
                let digest = self.hasher.digest_file(&entry.artifact)?;
                tracing::debug!("indexed {name}-{version}: sha256 {digest}");

                let file_name = entry
                    .artifact
                    .file_name()
                    .and_then(|s| s.to_str())
                    .map_or_else(
                        || crate::artifact_file_name(name, version),
                        str::to_string,
                    );
                let manifest_rel = format!("pkgs/{name}/{version}/{}", crate::MANIFEST_FILE);
                let manifest_url = self.policy.docs_url(&manifest_rel);
                let pkg_url = self
                    .policy
                    .release_url(&format!("releases/download/{name}-{version}/{file_name}"));

                let mut ver_block = Block::new("Version", Some(version.as_str()), 2);
                ver_block.push_field("string", "manifest_url", &FieldValue::str(manifest_url.as_str()));
                ver_block.push_field("string", "pkg_url", &FieldValue::str(pkg_url.as_str()));
                ver_block.push_field("string", "sha256", &FieldValue::str(digest.as_str()));
                ver_block.push_field("bool", "deprecated", &FieldValue::Bool(false));
                pkg.push_block(ver_block);
                pkg.push_blank();

                let mut manifest = Block::new("Manifest", None, 0);
                manifest.push_field("string", "name", &FieldValue::str(name.as_str()));
                manifest.push_field("string", "version", &FieldValue::str(version.as_str()));
                manifest.push_field("string", "sha256", &FieldValue::str(digest.as_str()));
                manifest.push_field("string", "pkg_url", &FieldValue::str(pkg_url.as_str()));
                manifest.push_field("bool", "signed", &FieldValue::Bool(false));
                manifests.push((
                    PathBuf::from(manifest_rel),
                    Document::from_root(manifest).to_string(),
                ));
            }

            root.push_block(pkg);
            root.push_blank();
        }

        Ok(RenderedIndex {
            index: Document::from_root(root).to_string(),
            manifests,
        })
    }
}
