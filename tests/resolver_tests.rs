//! Tests for dependency resolution over a PIF cache on disk.
//!
//! Covers Swift package product indirection and framework links declared only
//! through a frameworks build phase.

use gen_ir::pif::{Guid, PifCache};
use gen_ir::resolver::DependencyResolver;
use rstest::rstest;
use test_support::pif::{
    APPLICATION, FRAMEWORK, PifFixture, package_product, package_target, standard_target,
    with_linked_files,
};

fn names(targets: &[&gen_ir::pif::Target]) -> Vec<String> {
    targets.iter().map(|t| t.name().to_owned()).collect()
}

#[rstest]
#[case::exact_match(&["Logging", "LoggingCore"], Some("Logging"))]
#[case::no_match(&["LoggingBinary"], None)]
#[case::prebuilt(&[], None)]
fn package_products_resolve_to_matching_package_target(
    #[case] package_targets: &[&str],
    #[case] expected: Option<&str>,
) {
    let mut fixture = PifFixture::new()
        .target(standard_target(
            "APP",
            "App",
            APPLICATION,
            "App.app",
            &["PACKAGE-PRODUCT:Logging"],
        ))
        .target(package_product("Logging", package_targets));
    for name in package_targets {
        fixture = fixture.target(package_target(name));
    }
    let dir = fixture.build();
    let cache = PifCache::load(dir.path()).expect("load cache");
    let resolver = DependencyResolver::new(&cache);

    let app = cache.target("APP").expect("app target");
    let first = resolver.dependencies(app);
    let second = resolver.dependencies(app);

    assert_eq!(names(&first), names(&second), "resolution is deterministic");
    assert_eq!(
        first.first().map(|t| t.name()),
        expected,
        "resolved {:?}",
        names(&first)
    );
    assert!(first.len() <= 1);
}

#[test]
fn repeated_package_target_matches_resolve_to_the_first() {
    let dir = PifFixture::new()
        .target(standard_target(
            "APP",
            "App",
            APPLICATION,
            "App.app",
            &["PACKAGE-PRODUCT:Logging"],
        ))
        .target(package_product("Logging", &["LoggingCore", "Logging", "Logging"]))
        .target(package_target("LoggingCore"))
        .target(package_target("Logging"))
        .build();
    let cache = PifCache::load(dir.path()).expect("load cache");
    let resolver = DependencyResolver::new(&cache);

    let product = cache.target("PACKAGE-PRODUCT:Logging").expect("package product");
    let chosen = resolver.resolve_package_product(product).expect("resolved");
    assert_eq!(chosen.guid(), &Guid::from("PACKAGE-TARGET:Logging"));

    let app = cache.target("APP").expect("app target");
    assert_eq!(names(&resolver.dependencies(app)), ["Logging"]);
}

#[test]
fn framework_file_references_become_dependencies() {
    let dir = PifFixture::new()
        .framework_file("FILE-CORE", "Core.framework")
        .target(with_linked_files(
            standard_target("APP", "App", APPLICATION, "App.app", &[]),
            &["FILE-CORE"],
        ))
        .target(standard_target("CORE", "Core", FRAMEWORK, "Core.framework", &[]))
        .build();
    let cache = PifCache::load(dir.path()).expect("load cache");

    assert_eq!(
        cache.frameworks().get(&Guid::from("FILE-CORE")),
        Some(&Guid::from("CORE"))
    );
    let resolver = DependencyResolver::new(&cache);
    let app = cache.target_named("App").expect("app");
    assert_eq!(names(&resolver.dependencies(app)), ["Core"]);
}

#[test]
fn declared_and_linked_dependencies_are_not_duplicated() {
    let dir = PifFixture::new()
        .framework_file("FILE-CORE", "Core.framework")
        .target(with_linked_files(
            standard_target("APP", "App", APPLICATION, "App.app", &["CORE", "MISSING"]),
            &["FILE-CORE"],
        ))
        .target(standard_target("CORE", "Core", FRAMEWORK, "Core.framework", &[]))
        .build();
    let cache = PifCache::load(dir.path()).expect("load cache");
    let resolver = DependencyResolver::new(&cache);
    let app = cache.target_named("App.app").expect("lookup by product name");

    assert_eq!(names(&resolver.dependencies(app)), ["Core"]);
}
