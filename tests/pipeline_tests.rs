//! End-to-end tests for the IR pipeline using fake compilers.
//!
//! The fixture is an app embedding one framework built with
//! `SKIP_INSTALL=NO`: the framework ships in the archive, so its IR keeps a
//! directory of its own.

#![cfg(unix)]

use gen_ir::cache_repair::NoopRepair;
use gen_ir::runner::{self, PipelineConfig};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use test_support::pif::{APPLICATION, FRAMEWORK, PifFixture, standard_target, with_linked_files};
use test_support::{FakeToolchain, archive_product, build_log, dir_entries};

struct Workspace {
    root: TempDir,
    toolchain: FakeToolchain,
}

impl Workspace {
    fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    fn archive(&self) -> PathBuf {
        self.path("App.xcarchive")
    }

    fn config(&self) -> PipelineConfig {
        PipelineConfig {
            log: self.path("build.log"),
            archive: self.archive(),
            pif_cache: self.path("PIFCache"),
            output: None,
            jobs: 2,
            dry_run: false,
            dump_dependency_graph: false,
        }
    }
}

fn write_output_file_map(path: &Path, obj: &Path, sources: &[&str]) {
    let mut map = serde_json::Map::new();
    map.insert("".to_owned(), json!({ "swift-dependencies": obj.join("master.swiftdeps") }));
    for source in sources {
        map.insert(
            format!("/src/{source}.swift"),
            json!({
                "object": obj.join(format!("{source}.o")),
                "llvm-bc": obj.join(format!("{source}.bc"))
            }),
        );
    }
    fs::write(path, serde_json::to_string_pretty(&map).expect("json")).expect("write map");
}

fn workspace() -> Workspace {
    let root = TempDir::new().expect("temp dir");
    let toolchain = FakeToolchain::new(0);
    let obj = root.path().join("obj");
    fs::create_dir_all(&obj).expect("obj dir");

    PifFixture::new()
        .framework_file("FILE-ORGMODEL", "OrgModel.framework")
        .target(with_linked_files(
            standard_target("APP", "App", APPLICATION, "App.app", &["ORGMODEL"]),
            &["FILE-ORGMODEL"],
        ))
        .target(standard_target(
            "ORGMODEL",
            "OrgModel",
            FRAMEWORK,
            "OrgModel.framework",
            &[],
        ))
        .write_to(&root.path().join("PIFCache"));

    let archive = root.path().join("App.xcarchive");
    archive_product(&archive, "Applications/App.app/Frameworks/OrgModel.framework");

    let app_map = root.path().join("App-OutputFileMap.json");
    let model_map = root.path().join("OrgModel-OutputFileMap.json");
    write_output_file_map(&app_map, &obj, &["AppDelegate"]);
    write_output_file_map(&model_map, &obj, &["OrgModel"]);

    let clang = toolchain.clang();
    let swiftc = toolchain.swiftc();
    let log = build_log([
        (
            "OrgModel",
            vec![
                format!(
                    "{} -x c -fembed-bitcode -c /derived/Common_vers.c -o /obj/Common_vers.o",
                    clang.display()
                ),
                format!(
                    "{} -x objective-c -c /src/Common-dummy.m -o /obj/Common-dummy.o",
                    clang.display()
                ),
                format!(
                    "builtin-SwiftDriver -- {} -module-name OrgModel -parseable-output -output-file-map {} /src/OrgModel.swift",
                    swiftc.display(),
                    model_map.display()
                ),
            ],
        ),
        (
            "App",
            vec![format!(
                "builtin-SwiftDriver -- {} -module-name App -output-file-map {} /src/AppDelegate.swift",
                swiftc.display(),
                app_map.display()
            )],
        ),
    ]);
    fs::write(root.path().join("build.log"), log).expect("write log");

    Workspace { root, toolchain }
}

#[test]
fn embedded_framework_keeps_its_own_ir() {
    let ws = workspace();
    let report = runner::run(&ws.config(), &NoopRepair).expect("pipeline");

    let ir = ws.archive().join("IR");
    assert_eq!(dir_entries(&ir), ["App", "OrgModel"]);
    assert_eq!(
        dir_entries(&ir.join("OrgModel")),
        ["Common-dummy.bc", "Common_vers.bc", "OrgModel.bc"]
    );
    assert_eq!(dir_entries(&ir.join("App")), ["AppDelegate.bc"]);
    assert_eq!(report.stats.commands, 4);
    assert_eq!(report.stats.modules, 4);
    assert_eq!(report.stats.failed, 0);
    assert_eq!(report.build_count, 1);
    assert_eq!(report.transcript_targets, 2);
    assert_eq!(report.graph_nodes, 2);
    assert_eq!(report.graph_dump, None);
    let mut products = report.products.clone();
    products.sort();
    assert_eq!(products, ["App", "OrgModel"]);
    let reconciled = report.reconcile.expect("reconcile stats");
    assert_eq!(reconciled.merged, 0, "embedded framework stays standalone");
    assert_eq!(reconciled.renamed, 2);
}

#[test]
fn replayed_commands_carry_bitcode_flags() {
    let ws = workspace();
    runner::run(&ws.config(), &NoopRepair).expect("pipeline");

    let invocations = ws.toolchain.invocations();
    assert_eq!(invocations.len(), 4);
    for line in &invocations {
        assert!(!line.contains("-parseable-output"), "{line}");
        assert!(!line.contains("-fembed-bitcode"), "{line}");
        if line.contains("/swiftc ") {
            assert!(line.ends_with("-emit-bc"), "{line}");
        } else {
            assert!(line.contains("-save-temps=cwd"), "{line}");
            assert!(!line.contains(" -o "), "{line}");
        }
    }
}

#[test]
fn failing_compilers_are_logged_not_fatal() {
    let ws = workspace();
    let failing = FakeToolchain::new(1);
    let working_clang = ws.toolchain.clang().display().to_string();
    let failing_clang = failing.clang().display().to_string();
    let log = fs::read_to_string(ws.path("build.log"))
        .expect("read log")
        .replace(&working_clang, &failing_clang);
    fs::write(ws.path("build.log"), log).expect("rewrite log");

    let report = runner::run(&ws.config(), &NoopRepair).expect("pipeline");

    assert_eq!(report.stats.failed, 2);
    assert_eq!(report.stats.commands, 4);
    assert_eq!(report.stats.modules, 4, "bitcode of failed commands is kept");
    assert_eq!(
        dir_entries(&ws.archive().join("IR").join("OrgModel")),
        ["Common-dummy.bc", "Common_vers.bc", "OrgModel.bc"]
    );
}

#[test]
fn dry_run_builds_the_graph_but_writes_no_ir() {
    let ws = workspace();
    let mut config = ws.config();
    config.dry_run = true;
    config.dump_dependency_graph = true;

    let report = runner::run(&config, &NoopRepair).expect("pipeline");

    assert!(!ws.archive().join("IR").exists());
    assert!(ws.toolchain.invocations().is_empty());
    assert_eq!(report.graph_nodes, 2);
    assert_eq!(report.reconcile, None);
    assert_eq!(report.graph_dump, Some(ws.archive().join("graph.dot")));
    let dot = fs::read_to_string(ws.archive().join("graph.dot")).expect("graph dump");
    assert!(dot.contains("\"App\" -> \"OrgModel\";"));
}

#[test]
fn explicit_output_path_is_honoured() {
    let ws = workspace();
    let mut config = ws.config();
    config.output = Some(ws.path("out"));

    runner::run(&config, &NoopRepair).expect("pipeline");

    assert_eq!(dir_entries(&ws.path("out")), ["App", "OrgModel"]);
    assert!(!ws.archive().join("IR").exists());
}

#[test]
fn missing_workspace_is_fatal() {
    let ws = workspace();
    fs::remove_dir_all(ws.path("PIFCache").join("workspace")).expect("remove workspace");

    let err = runner::run(&ws.config(), &NoopRepair).expect_err("should fail");
    assert!(format!("{err:#}").contains("no PIF cache found"), "{err:#}");
}
