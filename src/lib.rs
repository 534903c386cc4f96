//! gen-ir core library.
//!
//! Reconstructs the targets of an Xcode build from its build log and PIF
//! cache, replays their compiler invocations with flags that emit LLVM
//! bitcode, and arranges the bitcode into one directory per shipped product.
//!
//! The pipeline is driven by [`runner::run`]; each phase is also usable on
//! its own:
//!
//! - [`transcript`] extracts compiler commands per target from a build log;
//! - [`pif`] decodes the PIF cache into targets;
//! - [`resolver`] and [`graph`] derive the dependency graph;
//! - [`runner`] rewrites and replays commands;
//! - [`reconcile`] folds statically linked IR into its dependents.

pub mod cache_repair;
pub mod cli;
pub mod compiler;
pub mod graph;
pub mod pif;
pub mod reconcile;
pub mod resolver;
pub mod runner;
pub mod transcript;
