//! Workspace scanning: discover built artifacts under
//! `workspace_root/<name>/<version>/*.pkg`.
//!
//! All ordering comes from explicit sorts, never from directory enumeration
//! order, so the result is identical across filesystems.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::{ARTIFACT_EXT, artifact_file_name};

/// Errors from workspace scanning.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Filesystem failure while walking the workspace.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// One discovered package version and its canonical artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    /// Version string (the directory name).
    pub version: String,
    /// Canonical artifact file for this version.
    pub artifact: PathBuf,
}

/// Scan a workspace and return, per package name, its versions sorted
/// descending by plain byte-wise comparison of the version string.
///
/// Version directories without any `.pkg` candidate are skipped (not yet
/// built, not an error). When several candidates exist, the canonical one is
/// the file named exactly `<name>-<version>.pkg`, else the
/// lexicographically-first candidate.
pub fn scan_workspace(
    workspace_root: &Path,
) -> Result<BTreeMap<String, Vec<VersionEntry>>, ScanError> {
    let mut packages: BTreeMap<String, Vec<VersionEntry>> = BTreeMap::new();
    if !workspace_root.exists() {
        return Ok(packages);
    }

    for name_entry in fs::read_dir(workspace_root)? {
        let name_dir = name_entry?.path();
        if !name_dir.is_dir() {
            continue;
        }
        let Some(name) = name_dir.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        let name = name.to_string();

        let mut versions = Vec::new();
        for ver_entry in fs::read_dir(&name_dir)? {
            let ver_dir = ver_entry?.path();
            if !ver_dir.is_dir() {
                continue;
            }
            let Some(version) = ver_dir.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(artifact) = canonical_artifact(&ver_dir, &name, version)? {
                versions.push(VersionEntry {
                    version: version.to_string(),
                    artifact,
                });
            }
        }

        if !versions.is_empty() {
            versions.sort_by(|a, b| b.version.as_bytes().cmp(a.version.as_bytes()));
            packages.insert(name, versions);
        }
    }

    Ok(packages)
}

/// Pick the canonical artifact inside one version directory, or `None` when
/// the directory holds no candidates.
fn canonical_artifact(
    ver_dir: &Path,
    name: &str,
    version: &str,
) -> Result<Option<PathBuf>, ScanError> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(ver_dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == ARTIFACT_EXT) {
            candidates.push(path);
        }
    }
    if candidates.is_empty() {
        return Ok(None);
    }
    candidates.sort_by(|a, b| {
        a.file_name()
            .map(|n| n.as_encoded_bytes())
            .cmp(&b.file_name().map(|n| n.as_encoded_bytes()))
    });

    let expected = artifact_file_name(name, version);
    let exact = candidates
        .iter()
        .find(|p| p.file_name().is_some_and(|n| n == expected.as_str()));
    Ok(Some(exact.unwrap_or(&candidates[0]).clone()))
}
