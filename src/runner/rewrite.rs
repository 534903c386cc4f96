//! Compiler command rewriting.
//!
//! A captured command is tokenised the way a shell would, stripped of the
//! flags that conflict with bitcode emission, and extended with the flag that
//! makes its compiler family write bitcode. Rewriting an already rewritten
//! command yields the same command.

use super::RunnerError;
use crate::compiler::{Compiler, CompilerCommand};
use indexmap::IndexMap;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Flags removed from every command.
const STRIPPED_FLAGS: [&str; 3] = [
    "-parseable-output",
    "-use-frontend-parseable-output",
    "-experimental-emit-module-separately",
];

/// Embedding flags; combined with a bitcode flag they make the compiler emit
/// textual assembly instead.
const SWIFTC_EMBED_FLAGS: [&str; 2] = ["-embed-bitcode", "-embed-bitcode-marker"];
const CLANG_EMBED_FLAGS: [&str; 2] = ["-fembed-bitcode", "-fembed-bitcode-marker"];

const SWIFTC_EMIT_BITCODE: &str = "-emit-bc";
const CLANG_SAVE_TEMPS: &str = "-save-temps=cwd";
const OUTPUT_FILE_MAP: &str = "-output-file-map";
const CLANG_OUTPUT: &str = "-o";

/// A compiler invocation ready to be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenCommand {
    /// Compiler executable.
    pub program: PathBuf,
    /// Arguments following the executable.
    pub arguments: Vec<String>,
    /// Compiler family.
    pub compiler: Compiler,
    /// Output-file-map sidecar named by a `swiftc` command.
    pub output_file_map: Option<PathBuf>,
}

impl RewrittenCommand {
    /// Join the command back into a single shell-quoted line.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::UnquotableArgument`] when an argument holds a
    /// NUL byte.
    pub fn to_command_line(&self) -> Result<String, RunnerError> {
        let program = self.program.to_string_lossy();
        let words = std::iter::once(&*program).chain(self.arguments.iter().map(String::as_str));
        shlex::try_join(words).map_err(|_| RunnerError::UnquotableArgument)
    }

    /// Convert back into a [`CompilerCommand`].
    ///
    /// # Errors
    ///
    /// See [`RewrittenCommand::to_command_line`].
    pub fn to_compiler_command(&self) -> Result<CompilerCommand, RunnerError> {
        Ok(CompilerCommand::new(self.to_command_line()?, self.compiler))
    }
}

/// Rewrite `command` so that running it produces bitcode.
///
/// # Errors
///
/// Returns [`RunnerError::UnsplittableCommand`] for unbalanced quoting,
/// [`RunnerError::EmptyCommand`] when nothing remains after splitting, and
/// [`RunnerError::MissingOutputFileMapPath`] for a dangling
/// `-output-file-map`.
pub fn rewrite(command: &CompilerCommand) -> Result<RewrittenCommand, RunnerError> {
    let words = shlex::split(&command.command).ok_or_else(|| RunnerError::UnsplittableCommand {
        command: command.command.clone(),
    })?;
    let mut tokens = words.into_iter();
    let program = tokens.next().ok_or(RunnerError::EmptyCommand)?;
    let filtered: Vec<String> = tokens
        .filter(|token| !STRIPPED_FLAGS.contains(&token.as_str()))
        .collect();

    let (arguments, output_file_map) = match command.compiler {
        Compiler::Swiftc => rewrite_swiftc(filtered)?,
        Compiler::Clang => (rewrite_clang(filtered), None),
    };

    Ok(RewrittenCommand {
        program: PathBuf::from(program),
        arguments,
        compiler: command.compiler,
        output_file_map,
    })
}

fn rewrite_swiftc(arguments: Vec<String>) -> Result<(Vec<String>, Option<PathBuf>), RunnerError> {
    let mut kept: Vec<String> = arguments
        .into_iter()
        .filter(|arg| !SWIFTC_EMBED_FLAGS.contains(&arg.as_str()))
        .collect();

    let output_file_map = match kept.iter().position(|arg| arg == OUTPUT_FILE_MAP) {
        Some(index) => Some(
            kept.get(index + 1)
                .map(PathBuf::from)
                .ok_or(RunnerError::MissingOutputFileMapPath)?,
        ),
        None => None,
    };

    if !kept.iter().any(|arg| arg == SWIFTC_EMIT_BITCODE) {
        kept.push(SWIFTC_EMIT_BITCODE.to_owned());
    }
    Ok((kept, output_file_map))
}

fn rewrite_clang(arguments: Vec<String>) -> Vec<String> {
    let mut kept = Vec::with_capacity(arguments.len() + 1);
    let mut iter = arguments.into_iter();
    while let Some(arg) = iter.next() {
        if arg == CLANG_OUTPUT {
            iter.next();
            continue;
        }
        if CLANG_EMBED_FLAGS.contains(&arg.as_str()) {
            continue;
        }
        kept.push(arg);
    }
    if !kept.iter().any(|arg| arg == CLANG_SAVE_TEMPS) {
        kept.push(CLANG_SAVE_TEMPS.to_owned());
    }
    kept
}

#[derive(Debug, Deserialize)]
struct OutputFileMapEntry {
    #[serde(rename = "llvm-bc")]
    llvm_bc: Option<PathBuf>,
    object: Option<PathBuf>,
}

impl OutputFileMapEntry {
    fn bitcode_path(self) -> Option<PathBuf> {
        self.llvm_bc
            .or_else(|| self.object.map(|object| object.with_extension("bc")))
    }
}

/// Bitcode files `swiftc -emit-bc` writes for the output-file-map at `path`.
///
/// Each source entry contributes its `llvm-bc` path, or its `object` path
/// with the extension replaced by `.bc` when no `llvm-bc` entry exists.
/// Entries with neither, such as the module-wide `""` entry, are skipped.
///
/// # Errors
///
/// Returns [`RunnerError::OutputFileMapIo`] or
/// [`RunnerError::OutputFileMapDecode`] when the sidecar cannot be read.
pub fn bitcode_paths_from_output_file_map(path: &Path) -> Result<Vec<PathBuf>, RunnerError> {
    let text = fs::read_to_string(path).map_err(|source| RunnerError::OutputFileMapIo {
        path: path.to_path_buf(),
        source,
    })?;
    let entries: IndexMap<String, OutputFileMapEntry> =
        serde_json::from_str(&text).map_err(|source| RunnerError::OutputFileMapDecode {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(entries
        .into_values()
        .filter_map(OutputFileMapEntry::bitcode_path)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn swiftc(command: &str) -> CompilerCommand {
        CompilerCommand::new(command, Compiler::Swiftc)
    }

    fn clang(command: &str) -> CompilerCommand {
        CompilerCommand::new(command, Compiler::Clang)
    }

    #[test]
    fn swiftc_gains_emit_bc_and_loses_incompatible_flags() {
        let rewritten = rewrite(&swiftc(
            "/usr/bin/swiftc -module-name Core -parseable-output -embed-bitcode \
             -output-file-map /tmp/map.json /src/a.swift",
        ))
        .expect("rewrite");

        assert_eq!(rewritten.program, PathBuf::from("/usr/bin/swiftc"));
        assert_eq!(
            rewritten.arguments,
            [
                "-module-name",
                "Core",
                "-output-file-map",
                "/tmp/map.json",
                "/src/a.swift",
                "-emit-bc"
            ]
        );
        assert_eq!(rewritten.output_file_map, Some(PathBuf::from("/tmp/map.json")));
    }

    #[test]
    fn clang_drops_output_and_saves_temps() {
        let rewritten = rewrite(&clang(
            "/usr/bin/clang -x objective-c -fembed-bitcode -c /src/a.m -o /obj/a.o",
        ))
        .expect("rewrite");

        assert_eq!(
            rewritten.arguments,
            ["-x", "objective-c", "-c", "/src/a.m", "-save-temps=cwd"]
        );
        assert_eq!(rewritten.output_file_map, None);
    }

    #[test]
    fn escaped_paths_are_unquoted() {
        let rewritten = rewrite(&clang(r"/usr/bin/clang -c /src/My\ App/a.m")).expect("rewrite");
        assert_eq!(rewritten.arguments.get(1).map(String::as_str), Some("/src/My App/a.m"));
    }

    #[rstest]
    #[case::swiftc(swiftc("/usr/bin/swiftc -embed-bitcode-marker /src/a.swift"))]
    #[case::clang(clang("/usr/bin/clang -c '/src/b c.m' -o /obj/b.o"))]
    fn rewriting_is_idempotent(#[case] command: CompilerCommand) {
        let once = rewrite(&command).expect("first rewrite");
        let again = rewrite(&once.to_compiler_command().expect("join")).expect("second rewrite");
        assert_eq!(once, again);
    }

    #[rstest]
    #[case::unbalanced("/usr/bin/clang -c 'a.m", "cannot split")]
    #[case::dangling_map("/usr/bin/swiftc -output-file-map", "missing its path")]
    fn malformed_commands_are_rejected(#[case] command: &str, #[case] expected: &str) {
        let compiler = if command.contains("swiftc") {
            Compiler::Swiftc
        } else {
            Compiler::Clang
        };
        let err = rewrite(&CompilerCommand::new(command, compiler)).expect_err("should fail");
        assert!(err.to_string().contains(expected), "unexpected error: {err}");
    }

    #[test]
    fn output_file_map_prefers_llvm_bc_then_object() {
        let temp = TempDir::new().expect("temp dir");
        let map = temp.path().join("map.json");
        fs::write(
            &map,
            r#"{
                "": {"swift-dependencies": "/obj/master.swiftdeps"},
                "/src/a.swift": {"object": "/obj/a.o", "llvm-bc": "/obj/a.bc"},
                "/src/b.swift": {"object": "/obj/b.o"}
            }"#,
        )
        .expect("write map");

        let paths = bitcode_paths_from_output_file_map(&map).expect("read map");
        assert_eq!(paths, [PathBuf::from("/obj/a.bc"), PathBuf::from("/obj/b.bc")]);
    }
}
