//! Decoded PIF objects.
//!
//! Xcode serialises its project model as loosely typed JSON in which the
//! concrete shape of a node depends on a `type` string. Each polymorphic node
//! is therefore decoded in two passes: the raw value is read into a minimal
//! envelope carrying the discriminant, then handed to the decoder for that
//! variant. Discriminants introduced by newer Xcode releases are skipped with
//! a diagnostic where the node is optional (group children, build phases) and
//! rejected where it is not (targets).

use indexmap::IndexMap;
use serde::de::{Deserializer, Error as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;
use tracing::debug;

/// Tag carried by dependency GUIDs that name a Swift package product.
pub const PACKAGE_PRODUCT_TAG: &str = "PACKAGE-PRODUCT:";
/// Tag carried by dependency GUIDs that name a Swift package target.
pub const PACKAGE_TARGET_TAG: &str = "PACKAGE-TARGET:";

/// Opaque identifier of a PIF object.
///
/// GUIDs are stable across cache snapshots but are not guaranteed to be
/// canonical UUID strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Guid(String);

impl Guid {
    /// Wrap a raw identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bare product name when this GUID names a package product.
    #[must_use]
    pub fn package_product_name(&self) -> Option<&str> {
        self.0.strip_prefix(PACKAGE_PRODUCT_TAG)
    }

    /// Bare target name when this GUID names a package target.
    #[must_use]
    pub fn package_target_name(&self) -> Option<&str> {
        self.0.strip_prefix(PACKAGE_TARGET_TAG)
    }
}

impl Borrow<str> for Guid {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Guid {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Minimal view of a polymorphic node: just enough to dispatch on.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

fn envelope_kind<E: serde::de::Error>(value: &Value) -> Result<String, E> {
    Envelope::deserialize(value)
        .map(|envelope| envelope.kind)
        .map_err(E::custom)
}

fn decode<T, E>(value: Value) -> Result<T, E>
where
    T: for<'de> Deserialize<'de>,
    E: serde::de::Error,
{
    serde_json::from_value(value).map_err(E::custom)
}

/// The single workspace object at the root of a PIF cache.
#[derive(Debug, Clone, Deserialize)]
pub struct Workspace {
    /// Workspace identifier.
    pub guid: Guid,
    /// Display name.
    pub name: String,
    /// Path of the `.xcworkspace` or `.xcodeproj` the workspace came from.
    pub path: String,
    /// Signatures of the project objects, used as file names in the cache.
    pub projects: Vec<String>,
}

/// One Xcode project or Swift package.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Project identifier.
    pub guid: Guid,
    /// Path of the project on disk.
    pub path: String,
    /// Project name, absent for some package projects.
    #[serde(default)]
    pub project_name: Option<String>,
    /// Root of the project's file-reference tree.
    pub group_tree: Reference,
    /// Signatures of the target objects, used as file names in the cache.
    #[serde(default)]
    pub targets: Vec<String>,
}

/// Fields shared by every node of the group tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceCommon {
    /// Reference identifier.
    pub guid: Guid,
    /// Path relative to `source_tree`.
    #[serde(default)]
    pub path: String,
    /// Optional display name overriding the last path component.
    #[serde(default)]
    pub name: Option<String>,
    /// Anchor the path is relative to, e.g. `BUILT_PRODUCTS_DIR`.
    #[serde(default)]
    pub source_tree: String,
}

impl ReferenceCommon {
    /// Display name, falling back to the path.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.path)
    }
}

/// A group of references: plain, variant (localised) or version (model).
#[derive(Debug, Clone, Deserialize)]
pub struct Group {
    /// Shared reference fields.
    #[serde(flatten)]
    pub common: ReferenceCommon,
    /// Child references; unknown kinds are dropped during decoding.
    #[serde(default, deserialize_with = "decode_references")]
    pub children: Vec<Reference>,
}

/// A reference to a single file on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReference {
    /// Shared reference fields.
    #[serde(flatten)]
    pub common: ReferenceCommon,
    /// Uniform type identifier, e.g. `wrapper.framework`.
    #[serde(default)]
    pub file_type: String,
}

/// A node in a project's group tree.
#[derive(Debug, Clone)]
pub enum Reference {
    /// An ordinary group.
    Group(Group),
    /// A localised variant group.
    VariantGroup(Group),
    /// A versioned group such as a Core Data model.
    VersionGroup(Group),
    /// A file.
    File(FileReference),
}

impl Reference {
    /// Decode one node, returning `None` for kinds this crate does not model.
    ///
    /// # Errors
    ///
    /// Returns an error when the node lacks a `type` or a required field of
    /// its variant.
    pub fn from_value<E: serde::de::Error>(value: Value) -> Result<Option<Self>, E> {
        let kind = envelope_kind::<E>(&value)?;
        let reference = match kind.as_str() {
            "group" => Self::Group(decode::<_, E>(value)?),
            "variantGroup" => Self::VariantGroup(decode::<_, E>(value)?),
            "versionGroup" => Self::VersionGroup(decode::<_, E>(value)?),
            "file" => Self::File(decode::<_, E>(value)?),
            other => {
                debug!(kind = other, "skipping unrecognised reference type");
                return Ok(None);
            }
        };
        Ok(Some(reference))
    }

    /// Fields shared by all reference kinds.
    #[must_use]
    pub const fn common(&self) -> &ReferenceCommon {
        match self {
            Self::Group(group) | Self::VariantGroup(group) | Self::VersionGroup(group) => {
                &group.common
            }
            Self::File(file) => &file.common,
        }
    }

    /// Visit every file reference beneath this node, depth first.
    pub fn for_each_file<'a>(&'a self, visit: &mut impl FnMut(&'a FileReference)) {
        match self {
            Self::File(file) => visit(file),
            Self::Group(group) | Self::VariantGroup(group) | Self::VersionGroup(group) => {
                for child in &group.children {
                    child.for_each_file(visit);
                }
            }
        }
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value::<D::Error>(value)?
            .ok_or_else(|| D::Error::custom("unrecognised root reference"))
    }
}

fn decode_references<'de, D>(deserializer: D) -> Result<Vec<Reference>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Value>::deserialize(deserializer)?;
    let mut references = Vec::with_capacity(raw.len());
    for value in raw {
        if let Some(reference) = Reference::from_value::<D::Error>(value)? {
            references.push(reference);
        }
    }
    Ok(references)
}

/// Platform restriction attached to a build file or dependency.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlatformFilter {
    /// Platform name, e.g. `ios`.
    #[serde(default)]
    pub platform: String,
    /// Optional environment, e.g. `simulator`.
    #[serde(default)]
    pub environment: Option<String>,
}

/// What a build file points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildFileReference {
    /// A file reference in some project's group tree.
    File(Guid),
    /// Another target, used by embed and link phases.
    Target(Guid),
}

/// One entry of a build phase.
#[derive(Debug, Clone)]
pub struct BuildFile {
    /// Build file identifier.
    pub guid: Guid,
    /// The file or target this entry refers to.
    pub reference: BuildFileReference,
    /// Platforms this entry is restricted to; empty means all.
    pub platform_filters: Vec<PlatformFilter>,
}

impl<'de> Deserialize<'de> for BuildFile {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RawBuildFile {
            guid: Guid,
            file_reference: Option<Guid>,
            target_reference: Option<Guid>,
            #[serde(default)]
            platform_filters: Vec<PlatformFilter>,
        }

        let raw = RawBuildFile::deserialize(deserializer)?;
        let reference = match (raw.file_reference, raw.target_reference) {
            (Some(file), None) => BuildFileReference::File(file),
            (None, Some(target)) => BuildFileReference::Target(target),
            (Some(_), Some(_)) => {
                return Err(D::Error::custom(format!(
                    "build file {} references both a file and a target",
                    raw.guid
                )));
            }
            (None, None) => {
                return Err(D::Error::custom(format!(
                    "build file {} references neither a file nor a target",
                    raw.guid
                )));
            }
        };
        Ok(Self {
            guid: raw.guid,
            reference,
            platform_filters: raw.platform_filters,
        })
    }
}

/// Fields shared by every build phase.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildPhaseCommon {
    /// Phase identifier.
    pub guid: Guid,
    /// Ordered entries of the phase.
    #[serde(default)]
    pub build_files: Vec<BuildFile>,
}

/// A build phase of a target.
#[derive(Debug, Clone)]
pub enum BuildPhase {
    /// `com.apple.buildphase.sources`
    Sources(BuildPhaseCommon),
    /// `com.apple.buildphase.frameworks`
    Frameworks(BuildPhaseCommon),
    /// `com.apple.buildphase.headers`
    Headers(BuildPhaseCommon),
    /// `com.apple.buildphase.resources`
    Resources(BuildPhaseCommon),
    /// `com.apple.buildphase.copy-files`
    CopyFiles(BuildPhaseCommon),
    /// `com.apple.buildphase.shell-script`
    ShellScript(BuildPhaseCommon),
    /// `com.apple.buildphase.rez`
    Rez(BuildPhaseCommon),
    /// `com.apple.buildphase.apple-script`
    AppleScript(BuildPhaseCommon),
}

impl BuildPhase {
    /// Decode one phase, returning `None` for kinds this crate does not model.
    ///
    /// # Errors
    ///
    /// Returns an error when the phase lacks a `type` or a required field.
    pub fn from_value<E: serde::de::Error>(value: Value) -> Result<Option<Self>, E> {
        let kind = envelope_kind::<E>(&value)?;
        let constructor: fn(BuildPhaseCommon) -> Self = match kind.as_str() {
            "com.apple.buildphase.sources" => Self::Sources,
            "com.apple.buildphase.frameworks" => Self::Frameworks,
            "com.apple.buildphase.headers" => Self::Headers,
            "com.apple.buildphase.resources" => Self::Resources,
            "com.apple.buildphase.copy-files" => Self::CopyFiles,
            "com.apple.buildphase.shell-script" => Self::ShellScript,
            "com.apple.buildphase.rez" => Self::Rez,
            "com.apple.buildphase.apple-script" => Self::AppleScript,
            other => {
                debug!(kind = other, "skipping unrecognised build phase type");
                return Ok(None);
            }
        };
        Ok(Some(constructor(decode::<_, E>(value)?)))
    }

    /// Fields shared by all phase kinds.
    #[must_use]
    pub const fn common(&self) -> &BuildPhaseCommon {
        match self {
            Self::Sources(common)
            | Self::Frameworks(common)
            | Self::Headers(common)
            | Self::Resources(common)
            | Self::CopyFiles(common)
            | Self::ShellScript(common)
            | Self::Rez(common)
            | Self::AppleScript(common) => common,
        }
    }

    /// Ordered entries of the phase.
    #[must_use]
    pub fn build_files(&self) -> &[BuildFile] {
        &self.common().build_files
    }
}

impl<'de> Deserialize<'de> for BuildPhase {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value::<D::Error>(value)?
            .ok_or_else(|| D::Error::custom("unrecognised build phase"))
    }
}

fn decode_phases<'de, D>(deserializer: D) -> Result<Vec<BuildPhase>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Value>::deserialize(deserializer)?;
    let mut phases = Vec::with_capacity(raw.len());
    for value in raw {
        if let Some(phase) = BuildPhase::from_value::<D::Error>(value)? {
            phases.push(phase);
        }
    }
    Ok(phases)
}

/// Kind of product a target builds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProductType {
    /// An application bundle.
    Application,
    /// An app, share or widget extension.
    AppExtension,
    /// A dynamic framework.
    Framework,
    /// A static framework.
    StaticFramework,
    /// A generic loadable bundle.
    Bundle,
    /// A unit test bundle.
    UnitTestBundle,
    /// A UI test bundle.
    UiTestBundle,
    /// A command-line tool.
    Tool,
    /// A static library.
    StaticLibrary,
    /// A dynamic library.
    DynamicLibrary,
    /// A Swift package product; never compiled itself.
    PackageProduct,
    /// An XPC service.
    XpcService,
    /// A watchOS application or extension.
    Watch,
    /// No product, as for aggregate targets.
    None,
    /// An identifier not modelled here.
    Other(String),
}

impl ProductType {
    /// Whether the product is a framework, static or dynamic.
    #[must_use]
    pub const fn is_framework(&self) -> bool {
        matches!(self, Self::Framework | Self::StaticFramework)
    }
}

impl From<&str> for ProductType {
    fn from(identifier: &str) -> Self {
        match identifier {
            "com.apple.product-type.application"
            | "com.apple.product-type.application.on-demand-install-capable"
            | "com.apple.product-type.application.messages" => Self::Application,
            "com.apple.product-type.app-extension"
            | "com.apple.product-type.extensionkit-extension"
            | "com.apple.product-type.app-extension.messages" => Self::AppExtension,
            "com.apple.product-type.framework" => Self::Framework,
            "com.apple.product-type.framework.static" => Self::StaticFramework,
            "com.apple.product-type.bundle" => Self::Bundle,
            "com.apple.product-type.bundle.unit-test" => Self::UnitTestBundle,
            "com.apple.product-type.bundle.ui-testing" => Self::UiTestBundle,
            "com.apple.product-type.tool" => Self::Tool,
            "com.apple.product-type.library.static" => Self::StaticLibrary,
            "com.apple.product-type.library.dynamic" => Self::DynamicLibrary,
            "packageProduct" => Self::PackageProduct,
            "com.apple.product-type.xpc-service" => Self::XpcService,
            "com.apple.product-type.application.watchapp2"
            | "com.apple.product-type.application.watchapp2-container"
            | "com.apple.product-type.watchkit2-extension" => Self::Watch,
            "" => Self::None,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// A declared dependency on another target.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDependency {
    /// GUID of the dependency, possibly carrying a package tag.
    pub guid: Guid,
    /// Platforms the dependency applies to; empty means all.
    #[serde(default)]
    pub platform_filters: Vec<PlatformFilter>,
}

/// A named configuration and its settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfiguration {
    /// Configuration identifier.
    #[serde(default)]
    pub guid: Option<Guid>,
    /// Configuration name, e.g. `Release`.
    pub name: String,
    /// Raw settings; values are strings or string lists.
    #[serde(default)]
    pub build_settings: IndexMap<String, Value>,
}

/// The file a target produces.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductReference {
    /// Reference identifier.
    pub guid: Guid,
    /// File name of the product, e.g. `Core.framework`.
    #[serde(default)]
    pub name: String,
}

/// Fields shared by every target kind.
#[derive(Debug, Clone)]
pub struct TargetCommon {
    /// Target identifier.
    pub guid: Guid,
    /// Target name.
    pub name: String,
    /// Declared dependencies, in declaration order.
    pub dependencies: Vec<TargetDependency>,
    /// Build phases, in execution order.
    pub build_phases: Vec<BuildPhase>,
    /// Build configurations with their settings.
    pub build_configurations: Vec<BuildConfiguration>,
    /// Kind of product built.
    pub product_type: ProductType,
    /// Product file name; empty when the target declares none.
    pub product_name: String,
}

/// A target decoded from the cache.
#[derive(Debug, Clone)]
pub enum Target {
    /// A target that compiles and links a product.
    Standard(TargetCommon),
    /// A target that only groups dependencies and scripts.
    Aggregate(TargetCommon),
    /// A Swift package product: an indirection over package targets.
    PackageProduct(TargetCommon),
}

impl Target {
    /// Fields shared by all target kinds.
    #[must_use]
    pub const fn common(&self) -> &TargetCommon {
        match self {
            Self::Standard(common) | Self::Aggregate(common) | Self::PackageProduct(common) => {
                common
            }
        }
    }

    /// Target identifier.
    #[must_use]
    pub const fn guid(&self) -> &Guid {
        &self.common().guid
    }

    /// Target name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.common().name
    }

    /// Product file name; empty when the target declares none.
    #[must_use]
    pub fn product_name(&self) -> &str {
        &self.common().product_name
    }

    /// Kind of product built.
    #[must_use]
    pub const fn product_type(&self) -> &ProductType {
        &self.common().product_type
    }

    /// Build phases in execution order.
    #[must_use]
    pub fn build_phases(&self) -> &[BuildPhase] {
        &self.common().build_phases
    }

    /// Declared dependencies in declaration order.
    #[must_use]
    pub fn dependencies(&self) -> &[TargetDependency] {
        &self.common().dependencies
    }

    /// Whether `name` matches the target name or its product name, with or
    /// without the product's file extension.
    #[must_use]
    pub fn answers_to(&self, name: &str) -> bool {
        let product = self.product_name();
        self.name() == name
            || (!product.is_empty()
                && (product == name || product.rsplit_once('.').is_some_and(|(s, _)| s == name)))
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RawTarget {
            guid: Guid,
            name: String,
            #[serde(default)]
            dependencies: Vec<TargetDependency>,
            #[serde(default, deserialize_with = "decode_phases")]
            build_phases: Vec<BuildPhase>,
            #[serde(default)]
            frameworks_build_phase: Option<Value>,
            #[serde(default)]
            build_configurations: Vec<BuildConfiguration>,
            #[serde(default)]
            product_type_identifier: Option<String>,
            #[serde(default)]
            product_reference: Option<ProductReference>,
        }

        let value = Value::deserialize(deserializer)?;
        let kind = envelope_kind::<D::Error>(&value)?;
        let raw: RawTarget = decode::<_, D::Error>(value)?;

        let mut build_phases = raw.build_phases;
        if let Some(phase) = raw.frameworks_build_phase {
            build_phases.extend(BuildPhase::from_value::<D::Error>(phase)?);
        }
        let product_type = match (kind.as_str(), raw.product_type_identifier.as_deref()) {
            ("packageProduct", _) => ProductType::PackageProduct,
            (_, Some(identifier)) => ProductType::from(identifier),
            (_, None) => ProductType::None,
        };
        let common = TargetCommon {
            guid: raw.guid,
            name: raw.name,
            dependencies: raw.dependencies,
            build_phases,
            build_configurations: raw.build_configurations,
            product_type,
            product_name: raw.product_reference.map(|p| p.name).unwrap_or_default(),
        };

        match kind.as_str() {
            "standard" => Ok(Self::Standard(common)),
            "aggregate" => Ok(Self::Aggregate(common)),
            "packageProduct" => Ok(Self::PackageProduct(common)),
            other => Err(D::Error::custom(format!(
                "target {} has unrecognised type `{other}`",
                common.guid
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn group_tree_skips_unknown_children() {
        let tree: Reference = serde_json::from_value(json!({
            "guid": "G1",
            "type": "group",
            "path": "",
            "children": [
                { "guid": "F1", "type": "file", "path": "Core.framework",
                  "fileType": "wrapper.framework", "sourceTree": "BUILT_PRODUCTS_DIR" },
                { "guid": "X1", "type": "syncedFolder", "path": "Sources" },
                { "guid": "V1", "type": "variantGroup", "path": "Main.storyboard",
                  "children": [ { "guid": "F2", "type": "file", "path": "Base.lproj/Main.storyboard" } ] }
            ]
        }))
        .expect("decode");

        let mut files = Vec::new();
        tree.for_each_file(&mut |file| files.push(file.common.guid.as_str()));
        assert_eq!(files, ["F1", "F2"]);
    }

    #[test]
    fn target_skips_unknown_phases_and_reads_product() {
        let target: Target = serde_json::from_value(json!({
            "guid": "T1",
            "type": "standard",
            "name": "Core",
            "productTypeIdentifier": "com.apple.product-type.framework",
            "productReference": { "guid": "P1", "name": "Core.framework", "type": "file" },
            "buildPhases": [
                { "guid": "B1", "type": "com.apple.buildphase.sources",
                  "buildFiles": [ { "guid": "BF1", "fileReference": "F9" } ] },
                { "guid": "B2", "type": "com.apple.buildphase.something-new", "buildFiles": [] }
            ],
            "dependencies": [ { "guid": "T2" } ]
        }))
        .expect("decode");

        assert!(matches!(target, Target::Standard(_)));
        assert_eq!(target.product_type(), &ProductType::Framework);
        assert_eq!(target.product_name(), "Core.framework");
        assert_eq!(target.build_phases().len(), 1);
        assert!(target.answers_to("Core"));
        assert!(target.answers_to("Core.framework"));
    }

    #[test]
    fn package_product_folds_frameworks_phase() {
        let target: Target = serde_json::from_value(json!({
            "guid": "PACKAGE-PRODUCT:Logging",
            "type": "packageProduct",
            "name": "Logging",
            "dependencies": [ { "guid": "PACKAGE-TARGET:Logging" } ],
            "frameworksBuildPhase": {
                "guid": "FB", "type": "com.apple.buildphase.frameworks",
                "buildFiles": [ { "guid": "BF", "targetReference": "PACKAGE-TARGET:Logging" } ]
            }
        }))
        .expect("decode");

        assert!(matches!(target, Target::PackageProduct(_)));
        assert_eq!(target.guid().package_product_name(), Some("Logging"));
        assert_eq!(target.build_phases().len(), 1);
    }

    #[test]
    fn unknown_target_type_is_rejected() {
        let result: Result<Target, _> = serde_json::from_value(json!({
            "guid": "T1", "type": "mystery", "name": "X"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn build_file_requires_exactly_one_reference() {
        let result: Result<BuildFile, _> = serde_json::from_value(json!({ "guid": "BF" }));
        assert!(result.is_err());
    }
}
