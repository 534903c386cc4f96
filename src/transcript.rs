//! Build transcript parsing.
//!
//! Scans the textual output of a full `xcodebuild` run and collects, for every
//! target it announces, the compiler invocations Xcode issued on its behalf.
//! Incremental transcripts under-report compiled modules; callers are expected
//! to supply the log of a clean build.
//!
//! ```
//! use gen_ir::transcript::TranscriptParser;
//!
//! let log = "\
//! CompileC /tmp/a.o /src/a.m normal arm64 objective-c (in target 'App' from project 'App')
//!     cd /src
//!     /usr/bin/clang -x objective-c -c /src/a.m -o /tmp/a.o
//! ";
//! let parsed = TranscriptParser::parse(log.lines()).expect("parse");
//! assert_eq!(parsed.commands_for("App").len(), 1);
//! ```

// Scoped suppression for version-dependent lint false positives from
// miette/thiserror derive macros.
#![allow(
    clippy::allow_attributes,
    clippy::allow_attributes_without_reason,
    unused_assignments
)]

use crate::compiler::{Compiler, CompilerCommand};
use indexmap::IndexMap;
use miette::Diagnostic;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Lines that introduce a compiler invocation block in the transcript.
const DRIVER_MARKERS: [&str; 3] = ["CompileC ", "SwiftDriver ", "CompileSwiftSources "];

/// Marker printed once at the start of every build cycle.
const BUILD_MARKER: &str = "Build description signature:";

/// Errors raised while reading a transcript.
#[derive(Debug, Error, Diagnostic)]
pub enum TranscriptError {
    /// No target announcement appeared anywhere in the transcript.
    #[error("no targets found in the build log")]
    #[diagnostic(
        code(gen_ir::transcript::no_targets),
        help("pass the log of a full `xcodebuild archive` run")
    )]
    NoTargets,
    /// Targets were announced but none of them ran a compiler.
    #[error("no compiler commands found for {targets} target(s)")]
    #[diagnostic(
        code(gen_ir::transcript::no_commands),
        help("the log looks incremental; clean the build folder and archive again")
    )]
    NoCommands {
        /// Number of targets that were announced.
        targets: usize,
    },
    /// The transcript could not be read.
    #[error("failed to read build log {path}")]
    #[diagnostic(code(gen_ir::transcript::io))]
    Io {
        /// Path of the transcript, or `-` for standard input.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

/// Compiler commands grouped by the target that issued them.
#[derive(Debug, Default, Clone)]
pub struct ParsedTranscript {
    /// Target name to commands, in encounter order. Targets announced without
    /// any compiler invocation map to an empty list.
    pub commands: IndexMap<String, Vec<CompilerCommand>>,
    /// Number of build cycles found in the transcript.
    pub build_count: usize,
}

impl ParsedTranscript {
    /// Commands captured for `target`, empty when the target is unknown.
    #[must_use]
    pub fn commands_for(&self, target: &str) -> &[CompilerCommand] {
        self.commands.get(target).map_or(&[], Vec::as_slice)
    }

    /// Names of every announced target.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    /// Total number of captured commands across all targets.
    #[must_use]
    pub fn total_commands(&self) -> usize {
        self.commands.values().map(Vec::len).sum()
    }
}

/// Streaming parser maintaining a "current target" cursor.
#[derive(Debug, Default)]
pub struct TranscriptParser {
    current_target: Option<String>,
    last_block_header: Option<String>,
    result: ParsedTranscript,
}

impl TranscriptParser {
    /// Parse a whole transcript supplied as lines.
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptError::NoTargets`] when no target was announced and
    /// [`TranscriptError::NoCommands`] when no compiler command was captured.
    pub fn parse<I, S>(lines: I) -> Result<ParsedTranscript, TranscriptError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parser = Self::default();
        for line in lines {
            parser.feed(line.as_ref());
        }
        parser.finish()
    }

    /// Parse a transcript from a file, or from standard input when `path` is
    /// `-`.
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptError::Io`] when the transcript cannot be read, and
    /// the errors of [`TranscriptParser::parse`] otherwise.
    pub fn parse_path(path: &Path) -> Result<ParsedTranscript, TranscriptError> {
        if path.as_os_str() == "-" {
            return Self::parse_reader(io::stdin().lock(), path);
        }
        let file = File::open(path).map_err(|source| TranscriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_reader(BufReader::new(file), path)
    }

    fn parse_reader<R: BufRead>(
        reader: R,
        path: &Path,
    ) -> Result<ParsedTranscript, TranscriptError> {
        let mut parser = Self::default();
        for line in reader.lines() {
            let text = line.map_err(|source| TranscriptError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            parser.feed(&text);
        }
        parser.finish()
    }

    /// Consume one transcript line.
    pub fn feed(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        if line.starts_with(BUILD_MARKER) {
            self.result.build_count += 1;
        }
        if let Some(target) = announced_target(line) {
            self.set_current_target(target);
        }

        if line.starts_with(char::is_whitespace) {
            self.capture_command(line);
        } else {
            self.last_block_header = Some(line.to_owned());
        }
    }

    fn set_current_target(&mut self, target: &str) {
        if self.current_target.as_deref() != Some(target) {
            debug!(target_name = target, "switching transcript cursor");
        }
        self.result.commands.entry(target.to_owned()).or_default();
        self.current_target = Some(target.to_owned());
    }

    fn capture_command(&mut self, line: &str) {
        let Some((command, compiler)) = compiler_command(line) else {
            return;
        };
        let introduced_by_driver = self
            .last_block_header
            .as_deref()
            .is_some_and(|header| DRIVER_MARKERS.iter().any(|m| header.starts_with(m)));
        if !introduced_by_driver {
            debug!(command, "ignoring compiler path outside a compile block");
            return;
        }
        let Some(target) = &self.current_target else {
            debug!(command, "ignoring compiler command seen before any target");
            return;
        };
        self.result
            .commands
            .entry(target.clone())
            .or_default()
            .push(CompilerCommand::new(command, compiler));
    }

    /// Finish parsing and validate that there is something to process.
    ///
    /// # Errors
    ///
    /// See [`TranscriptParser::parse`].
    pub fn finish(self) -> Result<ParsedTranscript, TranscriptError> {
        let result = self.result;
        if result.commands.is_empty() {
            return Err(TranscriptError::NoTargets);
        }
        if result.total_commands() == 0 {
            return Err(TranscriptError::NoCommands {
                targets: result.commands.len(),
            });
        }
        if result.build_count > 1 {
            warn!(
                build_count = result.build_count,
                "build log contains more than one build; commands from every cycle are replayed"
            );
        }
        Ok(result)
    }
}

/// Extract the target named by either announcement style.
fn announced_target(line: &str) -> Option<&str> {
    if let Some(rest) = line.trim_start().strip_prefix("=== BUILD TARGET ") {
        return rest.find(" OF PROJECT ").and_then(|end| rest.get(..end));
    }
    let start = line.find("(in target '")? + "(in target '".len();
    let rest = line.get(start..)?;
    let end = rest.find("' from ")?;
    rest.get(..end)
}

/// Recognise an absolute-path `clang` or `swiftc` invocation.
fn compiler_command(line: &str) -> Option<(&str, Compiler)> {
    let trimmed = line.trim();
    let start = trimmed.find('/')?;
    let stripped = trimmed.get(start..)?;
    if stripped.contains("-x assembler-with-cpp") {
        return None;
    }
    Compiler::ALL
        .into_iter()
        .find(|compiler| stripped.contains(&format!("/{} ", compiler.binary_name())))
        .map(|compiler| (stripped, compiler))
}
