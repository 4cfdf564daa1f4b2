//! Archiver backends and the fallback ladder.
//!
//! Producing an artifact tries, in order: an external `packtool` executable
//! (override path, then `$PATH`, then the local build output), a `packtool`
//! compiled on demand from its bundled source, and finally a deterministic
//! in-process tar+gzip builder. The fallback state is gated by an explicit
//! [`FallbackPolicy`] so a workspace never silently mixes archive formats.
//!
//! The deterministic builder guarantees byte-for-byte reproducible output:
//! entries are sorted by path bytes, owners and timestamps are normalized,
//! and the gzip wrapper embeds no timestamp.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use walkdir::WalkDir;

use crate::toolchain;

/// Default name of the external archiver executable.
pub const TOOL_NAME: &str = "packtool";

/// Environment variable carrying an explicit archiver override path.
pub const TOOL_ENV: &str = "PKGSMITH_PACKTOOL";

/// Whether the in-process deterministic archiver may be used when no
/// external backend can be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// Fall back to the deterministic tar+gzip builder (the default).
    #[default]
    Deterministic,
    /// Treat backend exhaustion as a hard failure.
    Disabled,
}

/// Configuration for backend resolution.
#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    /// Executable name looked up on the search path.
    pub tool_name: String,
    /// Explicit path to the external tool, tried first.
    pub tool_override: Option<PathBuf>,
    /// C source compiled on demand when no executable is located.
    pub tool_source: PathBuf,
    /// Directory receiving the on-demand build output.
    pub tool_build_dir: PathBuf,
    /// Fallback policy when no external backend can be obtained.
    pub fallback: FallbackPolicy,
    /// Preserve temporary files from a failed fallback run for diagnosis.
    pub keep_temp: bool,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            tool_name: TOOL_NAME.to_string(),
            tool_override: None,
            tool_source: PathBuf::from("tools").join(format!("{TOOL_NAME}.c")),
            tool_build_dir: PathBuf::from("build"),
            fallback: FallbackPolicy::default(),
            keep_temp: false,
        }
    }
}

/// Errors from archive production.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// No backend could be obtained through any permitted state.
    #[error("no archive backend available: {0}")]
    Unavailable(String),

    /// A backend ran and returned a non-zero exit code.
    #[error("backend {backend} failed ({status}): {stderr}")]
    Execution {
        /// Backend executable that was invoked.
        backend: String,
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// A backend exited 0 but the output file does not exist.
    #[error("backend {backend} exited 0 but produced no output file")]
    MissingOutput {
        /// Backend executable that was invoked.
        backend: String,
    },

    /// Filesystem failure while archiving.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Resolves and invokes an archiver backend for one pack operation.
#[derive(Debug, Clone, Default)]
pub struct Archiver {
    config: ArchiverConfig,
}

impl Archiver {
    /// Create an archiver with the given configuration.
    pub fn new(config: ArchiverConfig) -> Self {
        Self { config }
    }

    /// Produce an archive of `source_dir` at `out_path` via the fallback
    /// ladder. Each state is attempted only if the previous one was
    /// unavailable or failed; failures are logged with captured output.
    pub fn pack(&self, source_dir: &Path, out_path: &Path) -> Result<(), ArchiveError> {
        let mut last_failure: Option<ArchiveError> = None;
        let mut missing: Vec<String> = Vec::new();

        match self.locate_tool() {
            Some(tool) => match self.run_tool(&tool, source_dir, out_path) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::warn!("located backend {} failed: {err}", tool.display());
                    last_failure = Some(err);
                }
            },
            None => missing.push(format!(
                "no {} on the override path, $PATH, or in {}",
                self.config.tool_name,
                self.config.tool_build_dir.display()
            )),
        }

        match self.build_tool() {
            Ok(tool) => match self.run_tool(&tool, source_dir, out_path) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::warn!("freshly built backend {} failed: {err}", tool.display());
                    last_failure = Some(err);
                }
            },
            Err(reason) => {
                tracing::warn!("cannot build backend from source: {reason}");
                missing.push(reason);
            }
        }

        match self.config.fallback {
            FallbackPolicy::Deterministic => {
                tracing::info!(
                    "using deterministic fallback archiver for {}",
                    out_path.display()
                );
                pack_deterministic(source_dir, out_path, self.config.keep_temp)
            }
            FallbackPolicy::Disabled => Err(match last_failure {
                Some(err) => err,
                None => ArchiveError::Unavailable(missing.join("; ")),
            }),
        }
    }

    fn built_tool_path(&self) -> PathBuf {
        self.config.tool_build_dir.join(&self.config.tool_name)
    }

    /// Locate an existing external tool: override path, then `$PATH`, then
    /// the local build output.
    fn locate_tool(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config.tool_override {
            if path.is_file() {
                return Some(path.clone());
            }
            tracing::warn!("backend override {} does not exist", path.display());
        }
        if let Ok(path) = which::which(&self.config.tool_name) {
            return Some(path);
        }
        let built = self.built_tool_path();
        if built.is_file() {
            return Some(built);
        }
        None
    }

    /// Compile the bundled tool source; a missing source or failed compile
    /// makes this state unavailable (not an execution failure).
    fn build_tool(&self) -> Result<PathBuf, String> {
        let source = &self.config.tool_source;
        if !source.is_file() {
            return Err(format!("backend source {} not present", source.display()));
        }
        let out = self.built_tool_path();
        toolchain::compile(source, &out)
            .map_err(|e| format!("compile of {} failed: {e}", source.display()))?;
        Ok(out)
    }

    /// Invoke `tool pack <out> <src>`. Success requires exit 0 AND the
    /// output file existing afterwards.
    fn run_tool(&self, tool: &Path, source_dir: &Path, out_path: &Path) -> Result<(), ArchiveError> {
        tracing::debug!(
            "running {} pack {} {}",
            tool.display(),
            out_path.display(),
            source_dir.display()
        );
        let output = Command::new(tool)
            .arg("pack")
            .arg(out_path)
            .arg(source_dir)
            .output()?;

        if !output.stdout.is_empty() {
            tracing::debug!(
                "{} stdout: {}",
                tool.display(),
                String::from_utf8_lossy(&output.stdout).trim_end()
            );
        }
        if !output.status.success() {
            return Err(ArchiveError::Execution {
                backend: tool.display().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        if !out_path.is_file() {
            return Err(ArchiveError::MissingOutput {
                backend: tool.display().to_string(),
            });
        }
        Ok(())
    }
}

/// Build a byte-reproducible gzip-compressed tar of `source_dir` at
/// `out_path`.
///
/// Entries are sorted by raw path bytes (machine-independent), stored
/// relative to the source root, and normalized: uid/gid 0, empty
/// uname/gname, mtime 0, directory mode 0o755, file mode 0o755 or 0o644 by
/// executable bit. Compression level is fixed and the gzip header carries a
/// zero mtime. The archive is assembled in a temporary file next to the
/// destination and renamed into place on success; on failure the temp file
/// is removed unless `keep_temp` is set.
pub fn pack_deterministic(
    source_dir: &Path,
    out_path: &Path,
    keep_temp: bool,
) -> Result<(), ArchiveError> {
    let out_dir = out_path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(out_dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".pkgsmith-")
        .tempfile_in(out_dir)?;

    if let Err(err) = write_archive(source_dir, tmp.as_file_mut()) {
        if keep_temp {
            match tmp.keep() {
                Ok((_file, path)) => {
                    tracing::warn!("kept partial archive for inspection at {}", path.display());
                }
                Err(keep_err) => tracing::warn!("failed to keep temp file: {keep_err}"),
            }
        }
        return Err(err);
    }

    tmp.flush()?;
    tmp.persist(out_path).map_err(|e| ArchiveError::Io(e.error))?;
    Ok(())
}

fn write_archive(source_dir: &Path, out: &mut std::fs::File) -> Result<(), ArchiveError> {
    let mut entries: Vec<(PathBuf, PathBuf)> = Vec::new();
    for entry in WalkDir::new(source_dir).min_depth(1).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|_| io::Error::other("walked path escapes the source tree"))?
            .to_path_buf();
        entries.push((rel, entry.into_path()));
    }
    // Sort by raw bytes, not locale order, so the result is identical across
    // machines and directory enumeration orders.
    entries.sort_by(|a, b| {
        a.0.as_os_str()
            .as_encoded_bytes()
            .cmp(b.0.as_os_str().as_encoded_bytes())
    });

    let gz = flate2::GzBuilder::new()
        .mtime(0)
        .write(out, flate2::Compression::new(6));
    let mut tar = tar::Builder::new(gz);

    for (rel, abs) in &entries {
        let meta = std::fs::symlink_metadata(abs)?;
        let mut header = tar::Header::new_gnu();
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);

        if meta.file_type().is_symlink() {
            let target = std::fs::read_link(abs)?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_mode(0o777);
            header.set_size(0);
            tar.append_link(&mut header, rel, &target)?;
        } else if meta.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            tar.append_data(&mut header, rel, io::empty())?;
        } else {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(if is_executable(&meta) { 0o755 } else { 0o644 });
            header.set_size(meta.len());
            let file = std::fs::File::open(abs)?;
            tar.append_data(&mut header, rel, file)?;
        }
    }

    let gz = tar.into_inner()?;
    gz.finish()?;
    Ok(())
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}
