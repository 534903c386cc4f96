//! Xcode's PIF (project interchange format) cache.
//!
//! During a build Xcode serialises its project model into a cache directory
//! holding one workspace object plus one file per project and per target.
//! This module decodes those objects into [`Target`] values and indexes them
//! for dependency resolution.
//!
//! The format is undocumented and drifts between Xcode releases, so decoding
//! is strict only about the fields the pipeline relies on.

// Scoped suppression for version-dependent lint false positives from
// miette/thiserror derive macros.
#![allow(
    clippy::allow_attributes,
    clippy::allow_attributes_without_reason,
    unused_assignments
)]

mod cache;
mod model;

pub use cache::PifCache;
pub use model::{
    BuildConfiguration, BuildFile, BuildFileReference, BuildPhase, BuildPhaseCommon,
    FileReference, Group, Guid, PACKAGE_PRODUCT_TAG, PACKAGE_TARGET_TAG, PlatformFilter,
    ProductReference, ProductType, Project, Reference, ReferenceCommon, Target, TargetCommon,
    TargetDependency, Workspace,
};

use miette::Diagnostic;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading a PIF cache.
///
/// All of these are fatal: the pipeline cannot guess at a broken cache.
#[derive(Debug, Error, Diagnostic)]
pub enum PifError {
    /// The cache root or its `workspace` directory does not exist.
    #[error("no PIF cache found at {path}")]
    #[diagnostic(
        code(gen_ir::pif::missing_cache),
        help("archive the project first; the cache lives in XCBuildData/PIFCache")
    )]
    MissingCache {
        /// The cache root that was searched.
        path: PathBuf,
    },
    /// The workspace directory does not hold exactly one workspace object.
    #[error("expected exactly one workspace object in {path}, found {count}")]
    #[diagnostic(code(gen_ir::pif::workspace_count))]
    WorkspaceCount {
        /// The workspace directory.
        path: PathBuf,
        /// Number of workspace objects found.
        count: usize,
    },
    /// A cache object could not be read.
    #[error("failed to read PIF object {path}")]
    #[diagnostic(code(gen_ir::pif::io))]
    Io {
        /// Path of the object.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// A cache object is missing a required field or is not valid JSON.
    #[error("failed to decode PIF object {path}")]
    #[diagnostic(code(gen_ir::pif::decode))]
    Decode {
        /// Path of the object.
        path: PathBuf,
        /// Underlying decoding failure.
        #[source]
        source: serde_json::Error,
    },
}
