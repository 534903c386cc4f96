//! Compiler families recognised in Xcode build transcripts.
//!
//! Xcode drives two compilers whose bitcode emission differs enough that the
//! runner treats them separately: `swiftc`, which writes an output-file-map
//! sidecar, and `clang`, which can only drop bitcode into its working
//! directory.

use std::fmt;

/// A compiler family that produced a captured command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compiler {
    /// The C-family compiler driver (`clang`).
    Clang,
    /// The Swift compiler driver (`swiftc`).
    Swiftc,
}

impl Compiler {
    /// Every family, in the order the transcript parser checks for them.
    pub const ALL: [Self; 2] = [Self::Swiftc, Self::Clang];

    /// Binary name as it appears at the end of an absolute path.
    #[must_use]
    pub const fn binary_name(self) -> &'static str {
        match self {
            Self::Clang => "clang",
            Self::Swiftc => "swiftc",
        }
    }

    /// Whether this family reports its outputs through an output-file-map.
    #[must_use]
    pub const fn uses_output_file_map(self) -> bool {
        matches!(self, Self::Swiftc)
    }
}

impl fmt::Display for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary_name())
    }
}

/// One compiler invocation captured from a build transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerCommand {
    /// Full command text, still escaped as Xcode printed it.
    pub command: String,
    /// Family that produced the command.
    pub compiler: Compiler,
}

impl CompilerCommand {
    /// Wrap captured command text.
    #[must_use]
    pub fn new(command: impl Into<String>, compiler: Compiler) -> Self {
        Self {
            command: command.into(),
            compiler,
        }
    }
}
