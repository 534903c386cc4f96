//! Direct-dependency resolution over a [`PifCache`].
//!
//! A target's dependencies come from two independent places: the GUIDs it
//! declares, and the framework file references in its build phases. Declared
//! GUIDs may name Swift package products, which are not compiled themselves
//! and must be traced to the package target backing them.

use crate::pif::{BuildFileReference, Guid, PifCache, Target};
use indexmap::IndexMap;
use tracing::{debug, warn};

/// Resolves the direct dependencies of targets in a cache.
///
/// Resolution reads the cache only, so repeated calls yield the same result.
#[derive(Debug, Clone, Copy)]
pub struct DependencyResolver<'a> {
    cache: &'a PifCache,
}

impl<'a> DependencyResolver<'a> {
    /// Create a resolver over `cache`.
    #[must_use]
    pub const fn new(cache: &'a PifCache) -> Self {
        Self { cache }
    }

    /// Direct dependencies of `target`, declared ones first, without
    /// duplicates.
    #[must_use]
    pub fn dependencies(&self, target: &Target) -> Vec<&'a Target> {
        let mut found: IndexMap<&Guid, &'a Target> = IndexMap::new();

        for dependency in target.dependencies() {
            if let Some(resolved) = self.resolve_declared(&dependency.guid) {
                found.entry(resolved.guid()).or_insert(resolved);
            }
        }

        for file in target
            .build_phases()
            .iter()
            .flat_map(|phase| phase.build_files())
        {
            let BuildFileReference::File(reference) = &file.reference else {
                continue;
            };
            if let Some(framework) = self.cache.framework_for_file(reference) {
                found.entry(framework.guid()).or_insert(framework);
            }
        }

        found.shift_remove(target.guid());
        found.into_values().collect()
    }

    /// Resolve one declared dependency GUID to the target that is compiled for
    /// it.
    #[must_use]
    pub fn resolve_declared(&self, guid: &Guid) -> Option<&'a Target> {
        let Some(target) = self.cache.target(guid.as_str()) else {
            debug!(guid = %guid, "dependency not present in the PIF cache");
            return None;
        };
        match target {
            Target::PackageProduct(_) => self.resolve_package_product(target),
            Target::Standard(_) | Target::Aggregate(_) => Some(target),
        }
    }

    /// Trace a package product to the package target of the same name.
    ///
    /// Products with no package-target dependencies are prebuilt; products
    /// whose package targets all carry other names are stubs over binary
    /// artefacts. Neither contributes a compiled dependency. When several
    /// package targets share the product's name, the first is taken.
    #[must_use]
    pub fn resolve_package_product(&self, product: &Target) -> Option<&'a Target> {
        let bare_name = product
            .guid()
            .package_product_name()
            .unwrap_or_else(|| product.name());

        let candidates: Vec<&Guid> = product
            .dependencies()
            .iter()
            .map(|dependency| &dependency.guid)
            .filter(|guid| guid.package_target_name().is_some())
            .collect();
        if candidates.is_empty() {
            debug!(
                product = bare_name,
                "package product has no package targets; treating as prebuilt"
            );
            return None;
        }

        let matches: Vec<&Guid> = candidates
            .into_iter()
            .filter(|guid| guid.package_target_name() == Some(bare_name))
            .collect();
        let Some(chosen) = matches.first() else {
            debug!(
                product = bare_name,
                "no package target matches the product name; treating as a binary stub"
            );
            return None;
        };
        if matches.len() > 1 {
            warn!(
                product = bare_name,
                candidates = matches.len(),
                chosen = %chosen,
                "several package targets match the product name; using the first"
            );
        }
        let resolved = self.cache.target(chosen.as_str());
        if resolved.is_none() {
            debug!(guid = %chosen, "package target not present in the PIF cache");
        }
        resolved
    }
}
