//! Builder for on-disk PIF caches.
//!
//! Writes one workspace, one project and a target object per added target,
//! laid out the way Xcode's `XCBuildData/PIFCache` directory is.

use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Product type identifier of applications.
pub const APPLICATION: &str = "com.apple.product-type.application";
/// Product type identifier of dynamic frameworks.
pub const FRAMEWORK: &str = "com.apple.product-type.framework";
/// Product type identifier of static libraries.
pub const STATIC_LIBRARY: &str = "com.apple.product-type.library.static";

/// An in-progress PIF cache.
#[derive(Default)]
pub struct PifFixture {
    targets: Vec<Value>,
    files: Vec<Value>,
}

/// A standard target object.
pub fn standard_target(
    guid: &str,
    name: &str,
    product_type: &str,
    product_name: &str,
    dependencies: &[&str],
) -> Value {
    json!({
        "guid": guid,
        "type": "standard",
        "name": name,
        "productTypeIdentifier": product_type,
        "productReference": { "guid": format!("{guid}-product"), "name": product_name, "type": "file" },
        "buildPhases": [],
        "dependencies": dependencies.iter().map(|dep| json!({ "guid": dep })).collect::<Vec<_>>(),
        "buildConfigurations": [
            { "guid": format!("{guid}-release"), "name": "Release", "buildSettings": { "SKIP_INSTALL": "NO" } }
        ]
    })
}

/// A Swift package product depending on the given package targets.
pub fn package_product(name: &str, package_targets: &[&str]) -> Value {
    json!({
        "guid": format!("PACKAGE-PRODUCT:{name}"),
        "type": "packageProduct",
        "name": name,
        "dependencies": package_targets
            .iter()
            .map(|target| json!({ "guid": format!("PACKAGE-TARGET:{target}") }))
            .collect::<Vec<_>>()
    })
}

/// A package target, as Xcode records the targets backing package products.
pub fn package_target(name: &str) -> Value {
    let guid = format!("PACKAGE-TARGET:{name}");
    standard_target(&guid, name, "com.apple.product-type.objfile", &format!("{name}.o"), &[])
}

/// Attach a frameworks phase linking the given file-reference GUIDs.
pub fn with_linked_files(mut target: Value, file_refs: &[&str]) -> Value {
    let guid = target["guid"].as_str().unwrap_or("target").to_owned();
    let files: Vec<Value> = file_refs
        .iter()
        .enumerate()
        .map(|(index, file)| json!({ "guid": format!("{guid}-bf{index}"), "fileReference": file }))
        .collect();
    if let Some(phases) = target["buildPhases"].as_array_mut() {
        phases.push(json!({
            "guid": format!("{guid}-frameworks"),
            "type": "com.apple.buildphase.frameworks",
            "buildFiles": files
        }));
    }
    target
}

impl PifFixture {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target object.
    pub fn target(mut self, target: Value) -> Self {
        self.targets.push(target);
        self
    }

    /// Add a `wrapper.framework` file reference to the project's group tree.
    pub fn framework_file(mut self, guid: &str, path: &str) -> Self {
        self.files.push(json!({
            "guid": guid,
            "type": "file",
            "path": path,
            "fileType": "wrapper.framework",
            "sourceTree": "BUILT_PRODUCTS_DIR"
        }));
        self
    }

    /// Write the cache under `root`.
    pub fn write_to(&self, root: &Path) {
        let signatures: Vec<String> = (0..self.targets.len())
            .map(|index| format!("TARGET@v11_hash={index:032x}"))
            .collect();
        write_object(
            root,
            "workspace",
            "WORKSPACE@v11_hash=0000",
            &json!({
                "guid": "WORKSPACE",
                "name": "Fixture",
                "path": "/src/Fixture.xcworkspace",
                "projects": ["PROJECT@v11_hash=0000"]
            }),
        );
        write_object(
            root,
            "project",
            "PROJECT@v11_hash=0000",
            &json!({
                "guid": "PROJECT",
                "path": "/src/Fixture.xcodeproj",
                "projectName": "Fixture",
                "groupTree": {
                    "guid": "ROOT-GROUP",
                    "type": "group",
                    "path": "",
                    "children": self.files
                },
                "targets": signatures
            }),
        );
        for (signature, target) in signatures.iter().zip(&self.targets) {
            write_object(root, "target", signature, target);
        }
    }

    /// Write the cache into a fresh temporary directory.
    pub fn build(&self) -> TempDir {
        let dir = TempDir::new().expect("temp dir");
        self.write_to(dir.path());
        dir
    }
}

fn write_object(root: &Path, kind: &str, signature: &str, object: &Value) {
    let dir = root.join(kind);
    fs::create_dir_all(&dir).expect("create cache dir");
    let body = serde_json::to_string_pretty(object).expect("serialise object");
    fs::write(dir.join(format!("{signature}-json")), body).expect("write object");
}
