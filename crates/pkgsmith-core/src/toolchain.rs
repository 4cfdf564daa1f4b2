//! Locating a host C compiler and compiling single-file helper tools.
//!
//! Used by the build-from-source archiver state and the subprocess hasher.
//! Compiler selection and flags are overridable through `CC` and `CFLAGS`.

use std::io;
use std::path::Path;
use std::process::Command;

use thiserror::Error;

/// Environment variable selecting the C compiler.
pub const CC_ENV: &str = "CC";

/// Environment variable overriding compiler flags.
pub const CFLAGS_ENV: &str = "CFLAGS";

/// Flags used when `CFLAGS` is unset.
pub const DEFAULT_CFLAGS: &str = "-O2 -std=c11";

/// Errors from compiling a helper tool.
#[derive(Error, Debug)]
pub enum ToolchainError {
    /// No usable compiler on the search path.
    #[error("no C compiler found (tried $CC, cc, gcc, clang)")]
    NoCompiler,

    /// The compiler ran and failed.
    #[error("{compiler} failed ({status}): {stderr}")]
    Compile {
        /// Compiler executable that was invoked.
        compiler: String,
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// Filesystem failure around the compile.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Candidate compiler invocations in preference order, `$CC` first when set.
pub fn compiler_candidates() -> Vec<String> {
    let mut candidates = Vec::new();
    if let Ok(cc) = std::env::var(CC_ENV) {
        if !cc.is_empty() {
            candidates.push(cc);
        }
    }
    for name in ["cc", "gcc", "clang"] {
        if !candidates.iter().any(|c| c == name) {
            candidates.push(name.to_string());
        }
    }
    candidates
}

fn flags() -> Vec<String> {
    std::env::var(CFLAGS_ENV)
        .unwrap_or_else(|_| DEFAULT_CFLAGS.to_string())
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Compile `source` into an executable at `output`.
///
/// The first candidate compiler that resolves on the search path is used;
/// its non-zero exit is fatal to this compile, with stderr captured for the
/// caller's diagnostics.
pub fn compile(source: &Path, output: &Path) -> Result<(), ToolchainError> {
    let Some(compiler) = compiler_candidates()
        .into_iter()
        .find(|c| which::which(c).is_ok())
    else {
        return Err(ToolchainError::NoCompiler);
    };

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::debug!("compiling {} with {compiler}", source.display());
    let result = Command::new(&compiler)
        .args(flags())
        .arg(source)
        .arg("-o")
        .arg(output)
        .output()?;

    if !result.status.success() {
        return Err(ToolchainError::Compile {
            compiler,
            status: result.status.to_string(),
            stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
        });
    }

    make_executable(output)?;
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o111);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_cover_standard_compilers() {
        let candidates = compiler_candidates();
        for name in ["cc", "gcc", "clang"] {
            assert!(candidates.iter().any(|c| c == name));
        }
    }

    #[test]
    fn test_compile_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = compile(&dir.path().join("nope.c"), &dir.path().join("out"));
        assert!(result.is_err());
    }
}
