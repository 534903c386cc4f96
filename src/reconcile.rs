//! Static/dynamic reconciliation of the IR output tree.
//!
//! A statically linked dependency ships inside the binary of whatever links
//! it, so its IR has to travel with that product. Dynamic frameworks the
//! archive embeds ship on their own and keep a standalone directory. Merging
//! only ever copies, so a dependency's own directory survives its dependents'
//! merges unchanged.

use crate::graph::{DependencyGraph, NodeId};
use crate::pif::Target;
use crate::runner::{OutputTree, RunnerError};
use camino::Utf8Path;
use indexmap::IndexSet;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Names, without extension, of the frameworks `archive` embeds as
/// standalone dynamic artefacts.
///
/// Every `*.framework` directory found under a `Frameworks` directory of the
/// archive's `Products` tree counts.
#[must_use]
pub fn embedded_frameworks(archive: &Path) -> BTreeSet<String> {
    let pattern = format!(
        "{}/Products/**/Frameworks/*.framework",
        glob::Pattern::escape(&archive.to_string_lossy())
    );
    let entries = match glob::glob(&pattern) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(%pattern, error = %err, "invalid embedded framework pattern");
            return BTreeSet::new();
        }
    };
    let mut embedded = BTreeSet::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_dir() => {
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    embedded.insert(stem.to_owned());
                }
            }
            Ok(_) => {}
            Err(err) => debug!(error = %err, "skipping unreadable archive entry"),
        }
    }
    debug!(count = embedded.len(), "found embedded frameworks");
    embedded
}

/// Totals reported by [`reconcile`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Dependency directories copied into a dependent.
    pub merged: usize,
    /// Dependencies whose directory was not in the tree.
    pub missing: usize,
    /// Top-level directories renamed to drop their extension.
    pub renamed: usize,
}

/// Merge statically linked dependency IR into its dependents, then strip the
/// extension from every top-level product directory.
///
/// Each product takes only its direct dependencies' directories. Products are
/// visited dependencies first, so a static dependency has already absorbed
/// its own static dependencies by the time it is copied.
///
/// # Errors
///
/// Returns [`RunnerError::OutputIo`] when copying or renaming fails.
pub fn reconcile(
    tree: &mut OutputTree,
    graph: &DependencyGraph<'_>,
    embedded: &BTreeSet<String>,
) -> Result<ReconcileStats, RunnerError> {
    let mut stats = ReconcileStats::default();

    for product in merge_order(tree, graph) {
        let Some(node) = node_for_product(tree, graph, &product) else {
            debug!(%product, "product has no node in the dependency graph");
            continue;
        };
        for dependency in graph.dependencies(node) {
            if is_embedded(dependency, embedded) {
                debug!(
                    %product,
                    dependency = dependency.name(),
                    "dynamic dependency stays standalone"
                );
                continue;
            }
            let Some(source) = directory_for_target(tree, dependency) else {
                error!(
                    %product,
                    dependency = dependency.name(),
                    "dependency IR missing from the output tree; skipping merge"
                );
                stats.missing += 1;
                continue;
            };
            if source == product {
                continue;
            }
            copy_tree(&tree.product_dir(&source), &tree.product_dir(&product))?;
            debug!(%product, dependency = %source, "merged static dependency IR");
            stats.merged += 1;
        }
    }

    stats.renamed = strip_extensions(tree)?;
    info!(
        merged = stats.merged,
        missing = stats.missing,
        renamed = stats.renamed,
        "reconciled output tree"
    );
    Ok(stats)
}

/// Product directories ordered so that each comes after its dependencies.
fn merge_order(tree: &OutputTree, graph: &DependencyGraph<'_>) -> IndexSet<String> {
    let mut visited = HashSet::new();
    let mut order = IndexSet::with_capacity(tree.products().len());
    for product in tree.products().keys() {
        if let Some(node) = node_for_product(tree, graph, product) {
            visit(graph, tree, node, &mut visited, &mut order);
        } else {
            order.insert(product.clone());
        }
    }
    order
}

fn visit(
    graph: &DependencyGraph<'_>,
    tree: &OutputTree,
    node: NodeId,
    visited: &mut HashSet<NodeId>,
    order: &mut IndexSet<String>,
) {
    if !visited.insert(node) {
        return;
    }
    for dependency in graph.dependencies(node) {
        if let Some(id) = graph.find_guid(dependency.guid()) {
            visit(graph, tree, id, visited, order);
        }
    }
    let Some(target) = graph.node(node).map(|n| n.target()) else {
        return;
    };
    if let Some(directory) = directory_for_target(tree, target) {
        order.insert(directory);
    }
}

fn node_for_product(
    tree: &OutputTree,
    graph: &DependencyGraph<'_>,
    product: &str,
) -> Option<NodeId> {
    tree.products()
        .get(product)
        .and_then(Option::as_ref)
        .and_then(|guid| graph.find_guid(guid))
        .or_else(|| graph.find(product))
}

/// The output directory holding `target`'s IR: the one recorded with its
/// GUID, else the first whose name the target answers to.
fn directory_for_target(tree: &OutputTree, target: &Target) -> Option<String> {
    tree.products()
        .iter()
        .find(|(_, guid)| guid.as_ref() == Some(target.guid()))
        .or_else(|| {
            tree.products()
                .iter()
                .find(|(name, _)| target.answers_to(name) || target.answers_to(stem(name)))
        })
        .map(|(name, _)| name.clone())
}

fn is_embedded(target: &Target, embedded: &BTreeSet<String>) -> bool {
    embedded.contains(target.name())
        || embedded.contains(stem(target.product_name()))
}

fn stem(name: &str) -> &str {
    Utf8Path::new(name).file_stem().unwrap_or(name)
}

/// Copy every file below `from` into `to`, replacing files that exist.
fn copy_tree(from: &Utf8Path, to: &Utf8Path) -> Result<(), RunnerError> {
    let io_error = |path: &Path| {
        let owned = path.to_path_buf();
        move |source: io::Error| RunnerError::OutputIo {
            path: owned,
            source,
        }
    };
    for item in WalkDir::new(from).min_depth(1) {
        let entry = match item {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable IR entry");
                continue;
            }
        };
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        let destination = to.as_std_path().join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination).map_err(io_error(&destination))?;
        } else {
            fs::copy(entry.path(), &destination).map_err(io_error(&destination))?;
        }
    }
    Ok(())
}

/// Rename `Name.ext` product directories to `Name`. Returns how many were
/// renamed; a rename onto an existing directory is logged and skipped.
fn strip_extensions(tree: &mut OutputTree) -> Result<usize, RunnerError> {
    let renames: Vec<(String, String)> = tree
        .products()
        .keys()
        .filter_map(|name| {
            let bare = stem(name);
            (bare != name.as_str() && !bare.is_empty()).then(|| (name.clone(), bare.to_owned()))
        })
        .collect();

    let mut renamed = 0;
    for (from, to) in renames {
        let source = tree.product_dir(&from);
        let destination = tree.product_dir(&to);
        if destination.exists() || tree.products().contains_key(&to) {
            warn!(%from, %to, "cannot strip extension; a directory with that name exists");
            continue;
        }
        fs::rename(&source, &destination).map_err(|source_err| RunnerError::OutputIo {
            path: destination.clone().into_std_path_buf(),
            source: source_err,
        })?;
        tree.rename_product(&from, &to);
        renamed += 1;
    }
    Ok(renamed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_drops_only_the_last_extension() {
        assert_eq!(stem("Core.framework"), "Core");
        assert_eq!(stem("App"), "App");
        assert_eq!(stem("My.Kit.framework"), "My.Kit");
    }
}
