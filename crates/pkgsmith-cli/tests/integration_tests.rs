//! Integration tests for the `pkgsmith` binary.

use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Test context providing an isolated working directory for the binary.
struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    fn pkgsmith_cmd(&self) -> Command {
        let bin_path = env!("CARGO_BIN_EXE_pkgsmith");
        let mut cmd = Command::new(bin_path);
        // Run inside the temp dir so relative defaults (build/, tools/)
        // never touch the repository checkout.
        cmd.current_dir(self.root());
        cmd
    }

    /// Create a minimal source tree and return its path.
    fn make_source(&self, name: &str, version: &str, manifest: &str) -> PathBuf {
        let src = self.root().join("src").join(name).join(version);
        std::fs::create_dir_all(&src).expect("failed to create source tree");
        std::fs::write(src.join("manifest.acl"), manifest).expect("failed to write manifest");
        std::fs::write(src.join("main.c"), "int main(void) { return 0; }\n")
            .expect("failed to write source file");
        src
    }
}

/// Extract the value of a `key = "..."` field from document text.
fn field_value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let start = text.find(&format!("{key} = \""))? + key.len() + 4;
    let end = text[start..].find('"')? + start;
    Some(&text[start..end])
}

fn is_hex_digest(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[test]
fn test_help_command() {
    let ctx = TestContext::new();
    let output = ctx
        .pkgsmith_cmd()
        .arg("--help")
        .output()
        .expect("failed to run pkgsmith");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
}

#[test]
fn test_version_command() {
    let ctx = TestContext::new();
    let output = ctx
        .pkgsmith_cmd()
        .arg("--version")
        .output()
        .expect("failed to run pkgsmith");
    assert!(output.status.success());
}

#[test]
fn test_pack_builds_artifact_and_updates_manifest() {
    let ctx = TestContext::new();
    let src = ctx.make_source("foo", "1.0.0", "Manifest { string name = \"foo\"; }");

    let output = ctx
        .pkgsmith_cmd()
        .arg("pack")
        .arg(&src)
        .arg("--out-root")
        .arg(ctx.root().join("pkgs"))
        .output()
        .expect("failed to run pkgsmith pack");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "pack failed: {stderr}");

    let artifact = ctx.root().join("pkgs/foo/1.0.0/foo-1.0.0.pkg");
    assert!(artifact.is_file(), "artifact not produced");

    // Fallback output is a gzip stream.
    let bytes = std::fs::read(&artifact).unwrap();
    assert_eq!(&bytes[..2], &[0x1f, 0x8b]);

    let manifest = std::fs::read_to_string(src.join("manifest.acl")).unwrap();
    assert!(manifest.contains("string name = \"foo\";"));
    let sha = field_value(&manifest, "archive_sha256").expect("no archive_sha256 in manifest");
    assert!(is_hex_digest(sha), "bad digest: {sha}");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("SHA256:"));
    assert!(stdout.contains("Wrote package:"));
}

#[test]
fn test_pack_is_reproducible_across_runs() {
    let ctx = TestContext::new();
    let src = ctx.make_source("foo", "1.0.0", "Manifest {\n}\n");
    let out_root = ctx.root().join("pkgs");

    let run = |ctx: &TestContext| {
        let output = ctx
            .pkgsmith_cmd()
            .arg("pack")
            .arg(&src)
            .arg("--out-root")
            .arg(&out_root)
            .output()
            .expect("failed to run pkgsmith pack");
        assert!(output.status.success());
        std::fs::read(out_root.join("foo/1.0.0/foo-1.0.0.pkg")).unwrap()
    };

    // Packing annotates the manifest, so restore the tree between runs:
    // an identical source tree must produce identical bytes.
    let original = std::fs::read_to_string(src.join("manifest.acl")).unwrap();
    let first = run(&ctx);
    std::fs::write(src.join("manifest.acl"), &original).unwrap();
    let second = run(&ctx);
    assert_eq!(first, second, "rebuild produced different bytes");
}

#[test]
fn test_pack_no_fallback_fails_without_backend() {
    let ctx = TestContext::new();
    let src = ctx.make_source("foo", "1.0.0", "Manifest {\n}\n");

    let output = ctx
        .pkgsmith_cmd()
        .arg("pack")
        .arg(&src)
        .arg("--out-root")
        .arg(ctx.root().join("pkgs"))
        .arg("--no-fallback")
        .output()
        .expect("failed to run pkgsmith pack");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("no archive backend available"),
        "unexpected stderr: {stderr}"
    );
    assert!(!ctx.root().join("pkgs/foo/1.0.0/foo-1.0.0.pkg").exists());
}

#[test]
fn test_pack_requires_manifest() {
    let ctx = TestContext::new();
    let src = ctx.root().join("src/foo/1.0.0");
    std::fs::create_dir_all(&src).unwrap();

    let output = ctx
        .pkgsmith_cmd()
        .arg("pack")
        .arg(&src)
        .output()
        .expect("failed to run pkgsmith pack");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("manifest.acl"), "unexpected stderr: {stderr}");
}

#[test]
fn test_index_generates_registry_documents() {
    let ctx = TestContext::new();
    let out_root = ctx.root().join("pkgs");

    for version in ["1.0.0", "2.0.0"] {
        let src = ctx.make_source("bar", version, "Manifest {\n}\n");
        std::fs::write(src.join("payload.txt"), version).unwrap();
        let output = ctx
            .pkgsmith_cmd()
            .arg("pack")
            .arg(&src)
            .arg("--out-root")
            .arg(&out_root)
            .output()
            .expect("failed to run pkgsmith pack");
        assert!(output.status.success());
    }

    let docs = ctx.root().join("docs");
    let output = ctx
        .pkgsmith_cmd()
        .arg("index")
        .arg("--input")
        .arg(&out_root)
        .arg("--out")
        .arg(&docs)
        .output()
        .expect("failed to run pkgsmith index");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "index failed: {stderr}");

    let index = std::fs::read_to_string(docs.join("index.acl")).unwrap();
    assert!(index.contains("Registry {"));
    assert!(index.contains("Package \"bar\" {"));
    assert!(index.contains("string[] versions = { \"2.0.0\", \"1.0.0\" };"));
    assert!(index.contains("string latest = \"2.0.0\";"));

    for version in ["1.0.0", "2.0.0"] {
        let manifest_path = docs.join(format!("pkgs/bar/{version}/manifest.acl"));
        let manifest = std::fs::read_to_string(&manifest_path).unwrap();
        assert_eq!(field_value(&manifest, "version"), Some(version));
        let sha = field_value(&manifest, "sha256").expect("no sha256 in manifest");
        assert!(is_hex_digest(sha));
        // The index declares the same digest for this version.
        assert!(index.contains(sha));
    }
}

#[test]
fn test_index_fails_on_empty_workspace() {
    let ctx = TestContext::new();
    std::fs::create_dir_all(ctx.root().join("pkgs")).unwrap();

    let output = ctx
        .pkgsmith_cmd()
        .arg("index")
        .arg("--input")
        .arg(ctx.root().join("pkgs"))
        .arg("--out")
        .arg(ctx.root().join("docs"))
        .output()
        .expect("failed to run pkgsmith index");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no packages found"));
    assert!(!ctx.root().join("docs").exists());
}

#[test]
fn test_hash_command() {
    let ctx = TestContext::new();
    let file = ctx.root().join("abc.txt");
    std::fs::write(&file, b"abc").unwrap();

    let output = ctx
        .pkgsmith_cmd()
        .arg("hash")
        .arg(&file)
        .output()
        .expect("failed to run pkgsmith hash");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.starts_with("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
    );
}
