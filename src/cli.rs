//! Command line interface definition using clap.
//!
//! This module defines the [`Cli`] structure. It is also compiled by the build
//! script to render the manual page, so it depends on nothing else in the
//! crate.

use clap::Parser;
use std::path::PathBuf;

/// Maximum number of jobs accepted by the CLI.
const MAX_JOBS: usize = 64;

fn parse_jobs(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("{s} is not a valid number"))?;
    if (1..=MAX_JOBS).contains(&value) {
        Ok(value)
    } else {
        Err(format!("jobs must be between 1 and {MAX_JOBS}"))
    }
}

/// Generate LLVM bitcode for every target of an Xcode archive by replaying
/// the compiler commands of its build log.
#[derive(Debug, Clone, Parser)]
#[command(name = "gen-ir", author, version, about, long_about = None)]
pub struct Cli {
    /// Build log of a clean `xcodebuild archive` run, or `-` for stdin.
    #[arg(value_name = "LOG")]
    pub log: PathBuf,

    /// The `.xcarchive` produced by that build.
    #[arg(value_name = "ARCHIVE")]
    pub archive: PathBuf,

    /// Root of the PIF cache the build wrote (`.../XCBuildData/PIFCache`).
    #[arg(long, value_name = "DIR")]
    pub pif_cache: PathBuf,

    /// Build products directory to clear of dangling symlinks before
    /// replaying commands.
    #[arg(long, value_name = "DIR")]
    pub build_cache: Option<PathBuf>,

    /// Directory receiving the IR tree; defaults to `<ARCHIVE>/IR`.
    #[arg(short, long, value_name = "DIR")]
    pub output_path: Option<PathBuf>,

    /// Set the number of targets compiled in parallel.
    #[arg(short, long, value_name = "N", value_parser = parse_jobs)]
    pub jobs: Option<usize>,

    /// Parse inputs and build the dependency graph without running compilers.
    #[arg(long)]
    pub dry_run: bool,

    /// Write the dependency graph to `<ARCHIVE>/graph.dot`.
    #[arg(long)]
    pub dump_dependency_graph: bool,

    /// Enable verbose logging output.
    #[arg(short, long)]
    pub verbose: bool,
}
