//! Content hashing for artifacts.
//!
//! Two interchangeable strategies sit behind [`FileHasher`]: the in-process
//! [`NativeHasher`] (the default, and the only one tests rely on) and
//! [`ToolHasher`], which delegates to an external helper binary and exists
//! for compatibility with pre-existing tooling. Both must produce the same
//! 64-character lowercase hex SHA-256 digest.

use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::Command;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::toolchain::{self, ToolchainError};

/// Errors from digest computation.
#[derive(Error, Debug)]
pub enum HashError {
    /// Failure reading the input or invoking the helper.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Output that is not a 64-character hex digest.
    #[error("invalid SHA256 digest: expected 64 hex characters, got '{0}'")]
    Malformed(String),

    /// The helper binary could not be (re)built from its source.
    #[error("failed to build hash helper: {0}")]
    HelperBuild(#[from] ToolchainError),

    /// The helper binary ran but did not succeed.
    #[error("hash helper {tool} failed ({status}): {stderr}")]
    HelperRun {
        /// Path of the helper binary.
        tool: PathBuf,
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },
}

/// A validated SHA-256 digest (64 lowercase hex characters).
///
/// The newtype guarantees that every digest flowing through the system was
/// validated at construction, so a truncated or garbled hex string can never
/// reach a manifest or the index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Validate and normalize a digest string to lowercase hex.
    pub fn new(s: impl Into<String>) -> Result<Self, HashError> {
        let s = s.into();
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::Malformed(s));
        }
        Ok(Self(s.to_lowercase()))
    }

    /// The digest as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Sha256Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Computes the SHA-256 digest of a file.
pub trait FileHasher {
    /// Digest the file at `path`, streaming in bounded chunks.
    fn digest_file(&self, path: &Path) -> Result<Sha256Digest, HashError>;
}

/// In-process streaming SHA-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeHasher;

impl NativeHasher {
    /// Digest an arbitrary reader in 64 KiB chunks.
    pub fn digest_reader(reader: &mut dyn Read) -> Result<Sha256Digest, HashError> {
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 65536];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Sha256Digest::new(hex::encode(hasher.finalize()))
    }
}

impl FileHasher for NativeHasher {
    fn digest_file(&self, path: &Path) -> Result<Sha256Digest, HashError> {
        let mut file = std::fs::File::open(path)?;
        Self::digest_reader(&mut file)
    }
}

/// Subprocess-delegating hasher.
///
/// The helper's contract: print the hex digest of the file at `argv[1]` to
/// standard output and exit 0. With a configured source path the helper is
/// recompiled whenever the source is newer than the cached binary; a compile
/// failure is fatal, never silently skipped.
#[derive(Debug, Clone)]
pub struct ToolHasher {
    binary: PathBuf,
    source: Option<PathBuf>,
}

impl ToolHasher {
    /// Use an already-built helper binary.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            source: None,
        }
    }

    /// Use a helper compiled on demand from `source` into `binary`.
    pub fn with_source(binary: impl Into<PathBuf>, source: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            source: Some(source.into()),
        }
    }

    fn ensure_built(&self) -> Result<(), HashError> {
        let Some(source) = &self.source else {
            return Ok(());
        };
        if let (Ok(bin_meta), Ok(src_meta)) =
            (self.binary.metadata(), source.metadata())
        {
            if let (Ok(bin_mtime), Ok(src_mtime)) = (bin_meta.modified(), src_meta.modified()) {
                if src_mtime <= bin_mtime {
                    return Ok(());
                }
            }
        }
        tracing::debug!(
            "rebuilding hash helper {} from {}",
            self.binary.display(),
            source.display()
        );
        toolchain::compile(source, &self.binary)?;
        Ok(())
    }
}

impl FileHasher for ToolHasher {
    fn digest_file(&self, path: &Path) -> Result<Sha256Digest, HashError> {
        self.ensure_built()?;
        let output = Command::new(&self.binary).arg(path).output()?;
        if !output.status.success() {
            return Err(HashError::HelperRun {
                tool: self.binary.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        let hex = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Sha256Digest::new(hex)
    }
}
