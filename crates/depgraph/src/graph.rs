//! Directed multigraph with labeled edges and a cached reversal

use crate::edge::{Edge, EdgeLabel, EventName};
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use std::cell::OnceCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;

/// Anything that can be stored as a vertex
///
/// Vertices are identified by value equality, so two equal values are the
/// same vertex.
pub trait Vertex: Clone + Eq + Hash + fmt::Debug + fmt::Display {}

impl<T> Vertex for T where T: Clone + Eq + Hash + fmt::Debug + fmt::Display {}

/// Which way to follow edges from a vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Edges leaving the vertex (towards dependents)
    #[default]
    Out,
    /// Edges entering the vertex (towards dependencies)
    In,
}

impl Direction {
    fn flow(self) -> petgraph::Direction {
        match self {
            Self::Out => petgraph::Direction::Outgoing,
            Self::In => petgraph::Direction::Incoming,
        }
    }
}

/// A directed graph over [`Vertex`] values
///
/// Edges point from a dependency to its dependent. Several edges may join
/// the same pair of vertices as long as their labels differ; adding an
/// identical edge twice is a no-op.
#[derive(Debug, Clone)]
pub struct DirectedGraph<V> {
    pub(crate) graph: StableDiGraph<V, EdgeLabel>,
    index: HashMap<V, NodeIndex>,
    reversal: OnceCell<Box<DirectedGraph<V>>>,
}

impl<V: Vertex> Default for DirectedGraph<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Vertex> DirectedGraph<V> {
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::default(),
            index: HashMap::new(),
            reversal: OnceCell::new(),
        }
    }

    /// Number of vertices
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    // ========================================================================
    // Vertices
    // ========================================================================

    /// Add a vertex; returns false if it was already present
    pub fn add_vertex(&mut self, vertex: V) -> bool {
        if self.index.contains_key(&vertex) {
            return false;
        }
        self.invalidate();
        let node = self.graph.add_node(vertex.clone());
        self.index.insert(vertex, node);
        true
    }

    /// Remove a vertex and every edge touching it
    pub fn remove_vertex(&mut self, vertex: &V) -> bool {
        let Some(node) = self.index.remove(vertex) else {
            return false;
        };
        self.invalidate();
        self.graph.remove_node(node);
        true
    }

    pub fn contains_vertex(&self, vertex: &V) -> bool {
        self.index.contains_key(vertex)
    }

    pub fn vertices(&self) -> Vec<V> {
        self.graph
            .node_indices()
            .filter_map(|node| self.graph.node_weight(node).cloned())
            .collect()
    }

    /// Vertices without incoming edges
    pub fn roots(&self) -> Vec<V> {
        self.graph
            .node_indices()
            .filter(|node| {
                self.graph
                    .edges_directed(*node, petgraph::Direction::Incoming)
                    .next()
                    .is_none()
            })
            .filter_map(|node| self.graph.node_weight(node).cloned())
            .collect()
    }

    pub(crate) fn node(&self, vertex: &V) -> Option<NodeIndex> {
        self.index.get(vertex).copied()
    }

    fn node_for(&mut self, vertex: V) -> NodeIndex {
        if let Some(node) = self.index.get(&vertex) {
            return *node;
        }
        let node = self.graph.add_node(vertex.clone());
        self.index.insert(vertex, node);
        node
    }

    pub(crate) fn weight(&self, node: NodeIndex) -> Option<&V> {
        self.graph.node_weight(node)
    }

    // ========================================================================
    // Edges
    // ========================================================================

    /// Add an edge, creating missing endpoints; returns false for a duplicate
    pub fn add_edge(&mut self, source: V, target: V, label: EdgeLabel) -> bool {
        self.invalidate();
        let from = self.node_for(source);
        let to = self.node_for(target);
        let duplicate = self
            .graph
            .edges_directed(from, petgraph::Direction::Outgoing)
            .any(|edge| edge.target() == to && *edge.weight() == label);
        if duplicate {
            return false;
        }
        self.graph.add_edge(from, to, label);
        true
    }

    pub fn add(&mut self, edge: Edge<V>) -> bool {
        self.add_edge(edge.source, edge.target, edge.label)
    }

    /// Remove one edge with exactly this source, target and label
    pub fn remove_edge(&mut self, edge: &Edge<V>) -> bool {
        let (Some(from), Some(to)) = (self.node(&edge.source), self.node(&edge.target)) else {
            return false;
        };
        let found = self
            .graph
            .edges_directed(from, petgraph::Direction::Outgoing)
            .find(|candidate| candidate.target() == to && *candidate.weight() == edge.label)
            .map(|candidate| candidate.id());
        match found {
            Some(id) => {
                self.invalidate();
                self.graph.remove_edge(id);
                true
            }
            None => false,
        }
    }

    /// Whether at least one edge runs from `source` to `target`
    pub fn contains_edge(&self, source: &V, target: &V) -> bool {
        match (self.node(source), self.node(target)) {
            (Some(from), Some(to)) => self.graph.find_edge(from, to).is_some(),
            _ => false,
        }
    }

    /// Every edge from `source` to `target`
    pub fn edges_between(&self, source: &V, target: &V) -> Vec<Edge<V>> {
        self.adjacent_edges(source, Direction::Out)
            .into_iter()
            .filter(|edge| &edge.target == target)
            .collect()
    }

    pub fn edges(&self) -> Vec<Edge<V>> {
        self.graph
            .edge_indices()
            .filter_map(|id| self.edge_at(id))
            .collect()
    }

    fn edge_at(&self, id: EdgeIndex) -> Option<Edge<V>> {
        let (from, to) = self.graph.edge_endpoints(id)?;
        Some(Edge::new(
            self.graph.node_weight(from)?.clone(),
            self.graph.node_weight(to)?.clone(),
            self.graph.edge_weight(id)?.clone(),
        ))
    }

    /// Edges touching `vertex` in `direction`, oldest first
    pub fn adjacent_edges(&self, vertex: &V, direction: Direction) -> Vec<Edge<V>> {
        let Some(node) = self.node(vertex) else {
            return Vec::new();
        };
        let mut ids: Vec<EdgeIndex> = self
            .graph
            .edges_directed(node, direction.flow())
            .map(|edge| edge.id())
            .collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| self.edge_at(id)).collect()
    }

    /// Distinct vertices one edge away from `vertex` in `direction`
    pub fn adjacent(&self, vertex: &V, direction: Direction) -> Vec<V> {
        let mut seen = HashSet::new();
        self.adjacent_edges(vertex, direction)
            .into_iter()
            .map(|edge| match direction {
                Direction::Out => edge.target,
                Direction::In => edge.source,
            })
            .filter(|other| seen.insert(other.clone()))
            .collect()
    }

    pub fn direct_dependents(&self, vertex: &V) -> Vec<V> {
        self.adjacent(vertex, Direction::Out)
    }

    pub fn direct_dependencies(&self, vertex: &V) -> Vec<V> {
        self.adjacent(vertex, Direction::In)
    }

    /// Everything downstream of `vertex`, nearest first
    pub fn dependents(&self, vertex: &V) -> Vec<V> {
        self.walk(vertex, Direction::Out)
    }

    /// Everything upstream of `vertex`, nearest first
    pub fn dependencies(&self, vertex: &V) -> Vec<V> {
        self.walk(vertex, Direction::In)
    }

    fn walk(&self, start: &V, direction: Direction) -> Vec<V> {
        let mut seen: HashSet<V> = HashSet::from([start.clone()]);
        let mut queue: VecDeque<V> = VecDeque::from([start.clone()]);
        let mut reached = Vec::new();
        while let Some(current) = queue.pop_front() {
            for next in self.adjacent(&current, direction) {
                if seen.insert(next.clone()) {
                    reached.push(next.clone());
                    queue.push_back(next);
                }
            }
        }
        reached
    }

    /// Vertices reachable from `vertex` that have nowhere further to go
    pub fn leaves(&self, vertex: &V, direction: Direction) -> Vec<V> {
        if !self.contains_vertex(vertex) {
            return Vec::new();
        }
        std::iter::once(vertex.clone())
            .chain(self.walk(vertex, direction))
            .filter(|candidate| self.adjacent(candidate, direction).is_empty())
            .collect()
    }

    /// Out-edges of `source` whose subscription matches `event`
    pub fn matching_edges(&self, source: &V, event: &EventName) -> Vec<Edge<V>> {
        if !self.contains_vertex(source) {
            log::info!("Could not find {source} in the graph; not matching '{event}'");
            return Vec::new();
        }
        self.adjacent_edges(source, Direction::Out)
            .into_iter()
            .filter(|edge| edge.matches(event))
            .collect()
    }

    // ========================================================================
    // Whole-graph operations
    // ========================================================================

    /// The graph with every edge flipped
    ///
    /// Built on first use after any mutation and cached until the next one.
    pub fn reversal(&self) -> &Self {
        self.reversal.get_or_init(|| Box::new(self.reversed()))
    }

    fn reversed(&self) -> Self {
        let mut flipped = Self::new();
        for vertex in self.vertices() {
            flipped.add_vertex(vertex);
        }
        for edge in self.edges() {
            flipped.add_edge(edge.target, edge.source, edge.label);
        }
        flipped
    }

    pub fn clear(&mut self) {
        self.invalidate();
        self.graph.clear();
        self.index.clear();
    }

    fn invalidate(&mut self) {
        self.reversal.take();
    }

    /// Render as a Graphviz digraph
    pub fn to_dot(&self, name: &str) -> String {
        let mut dot = format!("digraph {} {{\n", quote(name));
        for vertex in self.vertices() {
            dot.push_str(&format!("    {};\n", quote(&vertex.to_string())));
        }
        for edge in self.edges() {
            dot.push_str(&format!(
                "    {} -> {}",
                quote(&edge.source.to_string()),
                quote(&edge.target.to_string())
            ));
            if let (Some(event), Some(callback)) = (edge.event(), edge.callback()) {
                dot.push_str(&format!(" [label={}]", quote(&format!("{callback} on {event}"))));
            }
            dot.push_str(";\n");
        }
        dot.push_str("}\n");
        dot
    }
}

pub(crate) fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}
