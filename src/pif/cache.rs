//! Loading and indexing of an on-disk PIF cache.

use super::PifError;
use super::model::{FileReference, Guid, Project, Target, Workspace};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

/// File type of framework bundles in the group tree.
const FRAMEWORK_FILE_TYPE: &str = "wrapper.framework";
/// Suffix Xcode appends to every cached object.
const OBJECT_SUFFIX: &str = "-json";
/// Prefix of the workspace object's file name.
const WORKSPACE_PREFIX: &str = "WORKSPACE@";

/// A decoded PIF cache snapshot.
///
/// The cache is read once and never written back. Targets are kept in
/// workspace order so iteration is deterministic across runs.
#[derive(Debug)]
pub struct PifCache {
    workspace: Workspace,
    projects: Vec<Project>,
    targets: IndexMap<Guid, Target>,
    frameworks: OnceLock<HashMap<Guid, Guid>>,
}

impl PifCache {
    /// Load the workspace found under `root` and every project and target it
    /// lists.
    ///
    /// # Errors
    ///
    /// Returns [`PifError::MissingCache`] when `root` has no `workspace`
    /// directory, [`PifError::WorkspaceCount`] when it does not hold exactly
    /// one workspace object, and I/O or decoding errors for any listed object.
    pub fn load(root: &Path) -> Result<Self, PifError> {
        let workspace_path = locate_workspace(root)?;
        info!(path = %workspace_path.display(), "loading PIF workspace");
        let workspace: Workspace = read_object(&workspace_path)?;

        let mut projects = Vec::with_capacity(workspace.projects.len());
        for signature in &workspace.projects {
            let project: Project = read_object(&object_path(root, "project", signature))?;
            debug!(project = %project.guid, path = project.path.as_str(), "loaded project");
            projects.push(project);
        }

        let mut targets = IndexMap::new();
        for project in &projects {
            for signature in &project.targets {
                let target: Target = read_object(&object_path(root, "target", signature))?;
                debug!(target_name = target.name(), guid = %target.guid(), "loaded target");
                targets.insert(target.guid().clone(), target);
            }
        }
        info!(
            projects = projects.len(),
            targets = targets.len(),
            "loaded PIF cache"
        );
        Ok(Self::from_parts(workspace, projects, targets.into_values()))
    }

    /// Assemble a cache from already decoded objects.
    #[must_use]
    pub fn from_parts(
        workspace: Workspace,
        projects: Vec<Project>,
        targets: impl IntoIterator<Item = Target>,
    ) -> Self {
        let indexed = targets
            .into_iter()
            .map(|target| (target.guid().clone(), target))
            .collect();
        Self {
            workspace,
            projects,
            targets: indexed,
            frameworks: OnceLock::new(),
        }
    }

    /// The workspace object.
    #[must_use]
    pub const fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Every project of the workspace.
    #[must_use]
    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    /// Every target, in workspace order.
    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.values()
    }

    /// Look up a target by GUID.
    #[must_use]
    pub fn target(&self, guid: &str) -> Option<&Target> {
        self.targets.get(guid)
    }

    /// Look up a target by name.
    ///
    /// Target names are tried first, then product names with and without
    /// their extension, since neither is unique on its own.
    #[must_use]
    pub fn target_named(&self, name: &str) -> Option<&Target> {
        self.targets()
            .find(|target| target.name() == name)
            .or_else(|| self.targets().find(|target| target.answers_to(name)))
    }

    /// Map of framework file-reference GUID to the GUID of the target that
    /// builds that framework.
    ///
    /// Build phases reference frameworks by file, not by target; this index
    /// bridges the two. It is computed on first use.
    pub fn frameworks(&self) -> &HashMap<Guid, Guid> {
        self.frameworks.get_or_init(|| self.build_frameworks_index())
    }

    /// The target building the framework referenced by `file`.
    #[must_use]
    pub fn framework_for_file(&self, file: &Guid) -> Option<&Target> {
        self.frameworks()
            .get(file)
            .and_then(|guid| self.target(guid.as_str()))
    }

    fn build_frameworks_index(&self) -> HashMap<Guid, Guid> {
        let mut framework_files: Vec<&FileReference> = Vec::new();
        for project in &self.projects {
            project.group_tree.for_each_file(&mut |file| {
                if file.file_type == FRAMEWORK_FILE_TYPE {
                    framework_files.push(file);
                }
            });
        }

        let framework_targets: HashMap<&str, &Target> = self
            .targets()
            .filter(|target| target.product_type().is_framework())
            .map(|target| {
                let key = if target.product_name().is_empty() {
                    target.guid().as_str()
                } else {
                    target.product_name()
                };
                (key, target)
            })
            .collect();

        let mut index = HashMap::new();
        for file in framework_files {
            let common = &file.common;
            let target = framework_targets
                .get(common.path.as_str())
                .or_else(|| framework_targets.get(common.display_name()));
            if let Some(target) = target {
                index.insert(common.guid.clone(), target.guid().clone());
            }
        }
        debug!(entries = index.len(), "built frameworks index");
        index
    }
}

fn object_path(root: &Path, kind: &str, signature: &str) -> PathBuf {
    root.join(kind).join(format!("{signature}{OBJECT_SUFFIX}"))
}

fn locate_workspace(root: &Path) -> Result<PathBuf, PifError> {
    let dir = root.join("workspace");
    if !dir.is_dir() {
        return Err(PifError::MissingCache {
            path: root.to_path_buf(),
        });
    }
    let entries = fs::read_dir(&dir).map_err(|source| PifError::Io {
        path: dir.clone(),
        source,
    })?;
    let mut candidates = Vec::new();
    for item in entries {
        let entry = item.map_err(|source| PifError::Io {
            path: dir.clone(),
            source,
        })?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        if name.starts_with(WORKSPACE_PREFIX) && name.ends_with(OBJECT_SUFFIX) {
            candidates.push(entry.path());
        }
    }
    match candidates.as_slice() {
        [single] => Ok(single.clone()),
        _ => Err(PifError::WorkspaceCount {
            path: dir,
            count: candidates.len(),
        }),
    }
}

fn read_object<T: DeserializeOwned>(path: &Path) -> Result<T, PifError> {
    let bytes = fs::read(path).map_err(|source| PifError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| PifError::Decode {
        path: path.to_path_buf(),
        source,
    })
}
