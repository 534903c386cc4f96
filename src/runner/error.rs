//! Error types for the runner module.
//!
//! This submodule isolates derive-macro-affected code to scope lint suppressions
//! narrowly.

// Scoped suppression for version-dependent lint false positives from
// miette/thiserror derive macros. The unused_assignments lint fires in some
// Rust versions but not others, so `#[expect]` cannot be used here.
// FIXME(rust-lang/rust#130021): remove once upstream is fixed.
#![allow(
    clippy::allow_attributes,
    clippy::allow_attributes_without_reason,
    unused_assignments
)]

use miette::Diagnostic;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while rewriting and replaying compiler commands.
#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    /// The captured command line has unbalanced quoting.
    #[error("cannot split compiler command: {command}")]
    #[diagnostic(code(gen_ir::runner::unsplittable_command))]
    UnsplittableCommand {
        /// The command text as captured from the transcript.
        command: String,
    },
    /// The captured command line holds no tokens.
    #[error("empty compiler command")]
    #[diagnostic(code(gen_ir::runner::empty_command))]
    EmptyCommand,
    /// A rewritten command cannot be joined back into a shell line.
    #[error("cannot quote compiler argument containing a NUL byte")]
    #[diagnostic(code(gen_ir::runner::unquotable_argument))]
    UnquotableArgument,
    /// `-output-file-map` is the last argument.
    #[error("-output-file-map is missing its path")]
    #[diagnostic(code(gen_ir::runner::missing_output_file_map))]
    MissingOutputFileMapPath,
    /// The output-file-map sidecar cannot be read.
    #[error("failed to read output file map {path}")]
    #[diagnostic(code(gen_ir::runner::output_file_map_io))]
    OutputFileMapIo {
        /// Path named by `-output-file-map`.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The output-file-map sidecar is not the expected JSON object.
    #[error("failed to decode output file map {path}")]
    #[diagnostic(code(gen_ir::runner::output_file_map_decode))]
    OutputFileMapDecode {
        /// Path named by `-output-file-map`.
        path: PathBuf,
        /// Underlying decoding failure.
        #[source]
        source: serde_json::Error,
    },
    /// The compiler could not be started.
    #[error("failed to run {program}")]
    #[diagnostic(code(gen_ir::runner::spawn))]
    Spawn {
        /// Compiler executable.
        program: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// An output directory or bitcode file could not be written.
    #[error("failed to write {path}")]
    #[diagnostic(code(gen_ir::runner::output_io))]
    OutputIo {
        /// Path being written.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// A path handed to the output tree is not valid UTF-8.
    #[error("output path is not valid UTF-8: {path}")]
    #[diagnostic(code(gen_ir::runner::non_utf8_path))]
    NonUtf8Path {
        /// The offending path.
        path: PathBuf,
    },
    /// The worker pool could not be created.
    #[error("failed to start the compiler worker pool")]
    #[diagnostic(code(gen_ir::runner::thread_pool))]
    ThreadPool {
        /// Underlying pool construction failure.
        #[source]
        source: rayon::ThreadPoolBuildError,
    },
}
