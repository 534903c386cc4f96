//! Target dependency graph.
//!
//! Nodes live in an arena owned by the graph and edges refer to their
//! neighbours by [`NodeId`], so the graph holds no reference cycles even though
//! every relation is stored from both ends. The graph is built once, from a
//! set of root targets and a [`DependencyResolver`], and is read-only
//! afterwards.
//!
//! ```ignore
//! use gen_ir::graph::DependencyGraph;
//! use gen_ir::resolver::DependencyResolver;
//!
//! let resolver = DependencyResolver::new(&cache);
//! let graph = DependencyGraph::build(cache.targets(), &resolver);
//! println!("{}", graph.to_dot());
//! ```

mod dot;

pub use dot::DotGraph;

use crate::pif::{Guid, Target};
use crate::resolver::DependencyResolver;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Stable handle to a node in a [`DependencyGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Direction of an edge relative to the node that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// The neighbour is a dependency of the owning node.
    Dependency,
    /// The neighbour depends on the owning node.
    Depender,
}

impl EdgeKind {
    /// The kind recorded on the other end of the same relation.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Dependency => Self::Depender,
            Self::Depender => Self::Dependency,
        }
    }
}

/// An outgoing edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// The neighbour.
    pub to: NodeId,
    /// How the neighbour relates to the owning node.
    pub kind: EdgeKind,
}

/// A target and its outgoing edges.
#[derive(Debug, Clone)]
pub struct Node<'a> {
    target: &'a Target,
    edges: Vec<Edge>,
}

impl<'a> Node<'a> {
    /// The wrapped target.
    #[must_use]
    pub const fn target(&self) -> &'a Target {
        self.target
    }

    /// Target name; the key edges are deduplicated on.
    #[must_use]
    pub fn name(&self) -> &'a str {
        self.target.name()
    }

    /// Outgoing edges in insertion order.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }
}

/// Directed graph of targets with symmetric dependency/depender edges.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph<'a> {
    nodes: Vec<Node<'a>>,
    by_guid: HashMap<&'a Guid, NodeId>,
}

impl<'a> DependencyGraph<'a> {
    /// Build the graph reachable from `roots`.
    ///
    /// Every root is added, its dependencies resolved, and each dependency
    /// visited in turn. A target is expanded at most once, so cyclic
    /// dependency declarations terminate.
    #[must_use]
    pub fn build<I>(roots: I, resolver: &DependencyResolver<'a>) -> Self
    where
        I: IntoIterator<Item = &'a Target>,
    {
        let mut graph = Self::default();
        let mut expanded = HashSet::new();
        for root in roots {
            graph.visit(root, resolver, &mut expanded);
        }
        debug!(nodes = graph.len(), "built dependency graph");
        graph
    }

    fn visit(
        &mut self,
        target: &'a Target,
        resolver: &DependencyResolver<'a>,
        expanded: &mut HashSet<NodeId>,
    ) -> NodeId {
        let id = self.add_or_find(target);
        if !expanded.insert(id) {
            return id;
        }
        for dependency in resolver.dependencies(target) {
            let dependency_id = self.add_or_find(dependency);
            self.add_edge(id, dependency_id, EdgeKind::Dependency);
            self.visit(dependency, resolver, expanded);
        }
        id
    }

    /// Return the node for `target`, inserting it when absent.
    ///
    /// Targets are compared by GUID, so inserting an equal target twice yields
    /// the same node.
    pub fn add_or_find(&mut self, target: &'a Target) -> NodeId {
        if let Some(&id) = self.by_guid.get(target.guid()) {
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            target,
            edges: Vec::new(),
        });
        self.by_guid.insert(target.guid(), id);
        id
    }

    /// Record that `from` relates to `to` as `kind`, and the opposite relation
    /// on `to`.
    ///
    /// A node keeps at most one edge per neighbour name whatever its kind; an
    /// edge that would duplicate an existing neighbour name is dropped.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) {
        self.push_edge(from, to, kind);
        self.push_edge(to, from, kind.opposite());
    }

    fn push_edge(&mut self, owner: NodeId, to: NodeId, kind: EdgeKind) {
        let Some(neighbour_name) = self.node(to).map(Node::name) else {
            return;
        };
        let names: Vec<&str> = self
            .node(owner)
            .map(|node| {
                node.edges
                    .iter()
                    .filter_map(|edge| self.node(edge.to).map(Node::name))
                    .collect()
            })
            .unwrap_or_default();
        if names.contains(&neighbour_name) {
            return;
        }
        if let Some(node) = self.nodes.get_mut(owner.0) {
            node.edges.push(Edge { to, kind });
        }
    }

    /// Node behind `id`.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node<'a>> {
        self.nodes.get(id.0)
    }

    /// All nodes in insertion order with their ids.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node<'a>)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (NodeId(index), node))
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node wrapping the target with `guid`.
    #[must_use]
    pub fn find_guid(&self, guid: &Guid) -> Option<NodeId> {
        self.by_guid.get(guid).copied()
    }

    /// First node whose target answers to `name` (target or product name).
    #[must_use]
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes()
            .find(|(_, node)| node.name() == name)
            .or_else(|| self.nodes().find(|(_, node)| node.target.answers_to(name)))
            .map(|(id, _)| id)
    }

    /// Direct dependencies of `id`: one hop along `Dependency` edges.
    #[must_use]
    pub fn dependencies(&self, id: NodeId) -> Vec<&'a Target> {
        self.neighbours(id, EdgeKind::Dependency)
    }

    /// Direct dependers of `id`: one hop along `Depender` edges.
    #[must_use]
    pub fn dependers(&self, id: NodeId) -> Vec<&'a Target> {
        self.neighbours(id, EdgeKind::Depender)
    }

    fn neighbours(&self, id: NodeId, kind: EdgeKind) -> Vec<&'a Target> {
        self.node(id)
            .map(|node| {
                node.edges
                    .iter()
                    .filter(|edge| edge.kind == kind)
                    .filter_map(|edge| self.node(edge.to).map(Node::target))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every node reachable from `id` over edges of either kind, in
    /// depth-first post-order. `id` itself comes last.
    ///
    /// Intended for diagnostics and reachability checks only; IR placement
    /// relies on [`DependencyGraph::dependencies`].
    #[must_use]
    pub fn chain(&self, id: NodeId) -> Vec<&'a Target> {
        let mut visited = HashSet::new();
        let mut chain = Vec::new();
        self.depth_first(id, &mut visited, &mut chain);
        chain
    }

    fn depth_first(
        &self,
        id: NodeId,
        visited: &mut HashSet<NodeId>,
        chain: &mut Vec<&'a Target>,
    ) {
        if !visited.insert(id) {
            return;
        }
        let Some(node) = self.node(id) else {
            return;
        };
        for edge in &node.edges {
            self.depth_first(edge.to, visited, chain);
        }
        chain.push(node.target);
    }

    /// Render the dependency edges in Graphviz DOT syntax.
    #[must_use]
    pub fn to_dot(&self) -> String {
        DotGraph::new(self).to_string()
    }
}
