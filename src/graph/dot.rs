//! Graphviz rendering of a [`DependencyGraph`].
//!
//! Only `Dependency` edges are drawn; each `Depender` edge is the same
//! relation seen from the other end. Output is sorted so dumps of the same
//! cache diff cleanly.

use super::{DependencyGraph, EdgeKind, Node};
use itertools::Itertools;
use std::fmt::{self, Display, Formatter};

/// Display adapter writing a graph in DOT syntax.
#[derive(Debug, Clone, Copy)]
pub struct DotGraph<'g, 'a> {
    graph: &'g DependencyGraph<'a>,
}

impl<'g, 'a> DotGraph<'g, 'a> {
    /// Wrap `graph` for rendering.
    #[must_use]
    pub const fn new(graph: &'g DependencyGraph<'a>) -> Self {
        Self { graph }
    }
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}

impl Display for DotGraph<'_, '_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "digraph DependencyGraph {{")?;
        for name in self.graph.nodes().map(|(_, node)| node.name()).sorted() {
            writeln!(f, "  {};", quote(name))?;
        }
        let edges = self
            .graph
            .nodes()
            .flat_map(|(_, node)| {
                node.edges()
                    .iter()
                    .filter(|edge| edge.kind == EdgeKind::Dependency)
                    .filter_map(move |edge| {
                        self.graph
                            .node(edge.to)
                            .map(|to| (node.name(), Node::name(to)))
                    })
            })
            .sorted()
            .dedup();
        for (from, to) in edges {
            writeln!(f, "  {} -> {};", quote(from), quote(to))?;
        }
        writeln!(f, "}}")
    }
}
