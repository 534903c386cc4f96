//! Tests for building the dependency graph from a PIF cache and rendering it.

use gen_ir::graph::{DependencyGraph, EdgeKind};
use gen_ir::pif::PifCache;
use gen_ir::resolver::DependencyResolver;
use test_support::pif::{APPLICATION, FRAMEWORK, PifFixture, STATIC_LIBRARY, standard_target};

fn diamond() -> tempfile::TempDir {
    PifFixture::new()
        .target(standard_target(
            "APP",
            "App",
            APPLICATION,
            "App.app",
            &["UI", "MODEL"],
        ))
        .target(standard_target("UI", "UI", FRAMEWORK, "UI.framework", &["MODEL"]))
        .target(standard_target("MODEL", "Model", STATIC_LIBRARY, "libModel.a", &[]))
        .build()
}

#[test]
fn graph_covers_reachable_targets_with_symmetric_edges() {
    let dir = diamond();
    let cache = PifCache::load(dir.path()).expect("load cache");
    let resolver = DependencyResolver::new(&cache);
    let app = cache.target_named("App").expect("app");
    let graph = DependencyGraph::build([app], &resolver);

    assert_eq!(graph.len(), 3);
    for (id, node) in graph.nodes() {
        for edge in node.edges() {
            let other = graph.node(edge.to).expect("neighbour");
            let back: Vec<_> = other.edges().iter().filter(|e| e.to == id).collect();
            assert_eq!(back.len(), 1, "{} -> {}", node.name(), other.name());
            assert_eq!(back.first().map(|e| e.kind), Some(edge.kind.opposite()));
        }
    }
}

#[test]
fn chain_reaches_every_node_dependencies_first() {
    let dir = diamond();
    let cache = PifCache::load(dir.path()).expect("load cache");
    let resolver = DependencyResolver::new(&cache);
    let graph = DependencyGraph::build(cache.targets(), &resolver);

    let app = graph.find("App").expect("app");
    let chain: Vec<&str> = graph.chain(app).iter().map(|t| t.name()).collect();
    assert_eq!(chain, ["Model", "UI", "App"]);

    let model = graph.find("Model").expect("model");
    let mut dependers: Vec<&str> = graph.dependers(model).iter().map(|t| t.name()).collect();
    dependers.sort_unstable();
    assert_eq!(dependers, ["App", "UI"]);
    assert!(graph.dependers(app).is_empty());
}

#[test]
fn cycles_terminate_and_dedup_by_name() {
    let dir = PifFixture::new()
        .target(standard_target("A", "Alpha", FRAMEWORK, "Alpha.framework", &["B"]))
        .target(standard_target("B", "Beta", FRAMEWORK, "Beta.framework", &["A"]))
        .build();
    let cache = PifCache::load(dir.path()).expect("load cache");
    let resolver = DependencyResolver::new(&cache);
    let graph = DependencyGraph::build(cache.targets(), &resolver);

    let alpha = graph.find("Alpha").expect("alpha");
    let beta = graph.find("Beta").expect("beta");
    assert_eq!(graph.len(), 2);
    // Beta already holds an edge named Alpha, so Beta -> Alpha is dropped.
    assert_eq!(graph.node(beta).expect("beta node").edges().len(), 1);
    assert!(
        graph
            .node(beta)
            .expect("beta node")
            .edges()
            .iter()
            .all(|edge| edge.to == alpha && edge.kind == EdgeKind::Depender)
    );
    assert!(graph.dependencies(beta).is_empty());
    assert_eq!(graph.dependencies(alpha).len(), 1);
}

#[test]
fn dot_lists_every_dependency_edge() {
    let dir = diamond();
    let cache = PifCache::load(dir.path()).expect("load cache");
    let resolver = DependencyResolver::new(&cache);
    let app = cache.target_named("App").expect("app");
    let dot = DependencyGraph::build([app], &resolver).to_dot();

    assert!(dot.starts_with("digraph DependencyGraph {"));
    assert!(dot.contains("\"App\" -> \"Model\";"));
    assert!(dot.contains("\"App\" -> \"UI\";"));
    assert!(dot.contains("\"UI\" -> \"Model\";"));
    assert!(!dot.contains("\"Model\" -> \"App\";"));
    assert!(dot.trim_end().ends_with('}'));
}
