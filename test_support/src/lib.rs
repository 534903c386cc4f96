//! Test utilities for the gen-ir test suites.
//!
//! This crate provides fake compiler executables that mimic how `clang` and
//! `swiftc` drop bitcode, a builder for on-disk PIF caches, and helpers for
//! laying out archives and build logs.

pub mod compilers;
pub mod pif;

pub use compilers::{FakeToolchain, write_executable};
pub use pif::PifFixture;

use std::fs;
use std::path::{Path, PathBuf};

/// Create `<archive>/Products/<relative>` as a directory and return it.
///
/// Used to simulate the bundles an archive ships, such as
/// `Applications/App.app/Frameworks/Core.framework`.
pub fn archive_product(archive: &Path, relative: &str) -> PathBuf {
    let path = archive.join("Products").join(relative);
    fs::create_dir_all(&path).expect("create archive product");
    path
}

/// Sorted names of the entries directly inside `dir`.
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap_or_else(|err| panic!("read {}: {err}", dir.display()))
        .map(|entry| {
            entry
                .expect("dir entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    names.sort();
    names
}

/// Render a build log announcing each target in the new build system's
/// style and listing its compiler commands under a matching driver header.
pub fn build_log<'a>(targets: impl IntoIterator<Item = (&'a str, Vec<String>)>) -> String {
    let mut log = String::from("Build description signature: 0123456789abcdef\n");
    for (target, commands) in targets {
        log.push_str(&format!(
            "\nWriteAuxiliaryFile /tmp/{target}.hmap (in target '{target}' from project '{target}')\n"
        ));
        for command in commands {
            let header = if command.contains("/swiftc ") {
                format!("SwiftDriver {target} normal arm64 com.apple.xcode.tools.swift.compiler")
            } else {
                format!("CompileC /tmp/{target}.o /src/{target}.m normal arm64 objective-c com.apple.compilers.llvm.clang.1_0.compiler")
            };
            log.push_str(&format!(
                "\n{header} (in target '{target}' from project '{target}')\n    cd /src\n    {command}\n"
            ));
        }
    }
    log
}
