//! pkgsmith - reproducible package forging CLI

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "pkgsmith")]
#[command(
    author,
    version,
    about = "Build reproducible package artifacts and generate the registry index"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a package artifact from a source tree
    Pack {
        /// Source directory whose trailing components are <name>/<version>
        src_dir: PathBuf,
        /// Output root for built artifacts
        #[arg(long, default_value = "pkgs")]
        out_root: PathBuf,
        /// Path to an external packtool executable
        #[arg(long, env = "PKGSMITH_PACKTOOL")]
        packtool: Option<PathBuf>,
        /// Fail instead of falling back to the built-in deterministic archiver
        #[arg(long)]
        no_fallback: bool,
        /// Keep temporary files from a failed fallback run for diagnosis
        #[arg(long)]
        keep_temp: bool,
    },
    /// Generate index.acl and per-version manifests from a workspace
    Index {
        /// Workspace root of built artifacts
        #[arg(short, long)]
        input: PathBuf,
        /// Output directory for generated documents
        #[arg(short, long)]
        out: PathBuf,
        /// Base URL for the index and manifests
        #[arg(long, env = "PKGSMITH_INDEX_BASE")]
        index_base: Option<String>,
        /// Base URL for release downloads
        #[arg(long, env = "PKGSMITH_RELEASE_BASE")]
        release_base: Option<String>,
        /// Emit bare relative paths instead of absolute URLs
        #[arg(long, conflicts_with_all = ["index_base", "release_base"])]
        relative_urls: bool,
    },
    /// Compute SHA256 hash of a file (for package authoring)
    #[command(hide = true)]
    Hash {
        /// Files to hash
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Pack {
            src_dir,
            out_root,
            packtool,
            no_fallback,
            keep_temp,
        } => cmd::pack::run(&src_dir, &out_root, packtool, no_fallback, keep_temp),
        Commands::Index {
            input,
            out,
            index_base,
            release_base,
            relative_urls,
        } => cmd::index::run(&input, &out, index_base, release_base, relative_urls),
        Commands::Hash { files } => cmd::hash::run(&files),
    }
}
