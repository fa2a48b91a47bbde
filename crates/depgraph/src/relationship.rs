//! Relationship graph: a dependency graph that knows how to walk itself
//!
//! On top of [`DirectedGraph`] it tracks, per vertex, an evaluation priority
//! and the number of dependencies still pending ("blockers"). A traversal
//! releases a vertex once all of its dependencies are done, picking the
//! lowest priority among the ready ones.

use crate::edge::{Edge, EdgeLabel};
use crate::error::CycleError;
use crate::graph::{DirectedGraph, Vertex};
use crate::priority::{Priority, SequentialPrioritizer};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Deref;

/// Callbacks driven by [`RelationshipGraph::traverse`]
pub trait TraversalVisitor<V> {
    /// Polled before each vertex; false cancels the rest of the walk
    fn should_continue(&mut self) -> bool {
        true
    }

    /// Whether `vertex` can be visited now; false defers it
    fn ready(&mut self, _vertex: &V) -> bool {
        true
    }

    /// Evaluate one vertex; the graph may be extended from here
    fn visit(&mut self, graph: &mut RelationshipGraph<V>, vertex: &V);

    /// A deferred vertex that never became ready
    fn overly_deferred(&mut self, _vertex: &V) {}

    /// A vertex left over after the walk was canceled
    fn canceled(&mut self, _vertex: &V) {}

    /// Cycles found before the walk; nothing will be visited
    fn cycles_found(&mut self, _cycles: &[Vec<V>]) {}
}

/// A container to splice out of the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container<V> {
    pub vertex: V,
    pub contents: Vec<V>,
    /// Sentinel everything inside the container depends on
    pub admissible: V,
    /// Sentinel depending on everything inside the container
    pub completed: V,
}

#[derive(Debug, Clone)]
pub struct RelationshipGraph<V> {
    graph: DirectedGraph<V>,
    prioritizer: SequentialPrioritizer<V>,
    blockers: HashMap<V, usize>,
    done: HashSet<V>,
    ready: BTreeMap<(Priority, u64), V>,
    queued: HashSet<V>,
    sequence: u64,
}

impl<V: Vertex> Default for RelationshipGraph<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Deref for RelationshipGraph<V> {
    type Target = DirectedGraph<V>;

    fn deref(&self) -> &Self::Target {
        &self.graph
    }
}

impl<V: Vertex> RelationshipGraph<V> {
    pub fn new() -> Self {
        Self {
            graph: DirectedGraph::new(),
            prioritizer: SequentialPrioritizer::new(),
            blockers: HashMap::new(),
            done: HashSet::new(),
            ready: BTreeMap::new(),
            queued: HashSet::new(),
            sequence: 0,
        }
    }

    pub fn graph(&self) -> &DirectedGraph<V> {
        &self.graph
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Add a vertex; a vertex already present keeps its priority
    pub fn add_vertex(&mut self, vertex: V) -> Priority {
        let priority = self.prioritizer.generate_priority_for(&vertex);
        self.graph.add_vertex(vertex);
        priority
    }

    pub fn add_vertex_with_priority(&mut self, vertex: V, priority: Priority) {
        self.prioritizer.record_priority_for(vertex.clone(), priority);
        self.graph.add_vertex(vertex);
    }

    /// Add a vertex that runs directly after `container` and its earlier children
    pub fn add_vertex_contained_in(&mut self, container: &V, vertex: V) -> Priority {
        let priority = self
            .prioritizer
            .generate_priority_contained_in(container, &vertex);
        self.graph.add_vertex(vertex);
        priority
    }

    pub fn remove_vertex(&mut self, vertex: &V) -> bool {
        self.prioritizer.forget(vertex);
        self.blockers.remove(vertex);
        self.done.remove(vertex);
        self.graph.remove_vertex(vertex)
    }

    /// Add an edge; new endpoints get the next priorities
    pub fn add_edge(&mut self, source: V, target: V, label: EdgeLabel) -> bool {
        for vertex in [&source, &target] {
            if !self.graph.contains_vertex(vertex) {
                self.prioritizer.generate_priority_for(vertex);
            }
        }
        self.graph.add_edge(source, target, label)
    }

    pub fn add(&mut self, edge: Edge<V>) -> bool {
        self.add_edge(edge.source, edge.target, edge.label)
    }

    pub fn remove_edge(&mut self, edge: &Edge<V>) -> bool {
        self.graph.remove_edge(edge)
    }

    pub fn clear(&mut self) {
        self.graph.clear();
        self.prioritizer.clear();
        self.blockers.clear();
        self.done.clear();
        self.ready.clear();
        self.queued.clear();
    }

    pub fn resource_priority(&self, vertex: &V) -> Option<&Priority> {
        self.prioritizer.priority_of(vertex)
    }

    // ========================================================================
    // Blockers
    // ========================================================================

    pub fn blockers_of(&self, vertex: &V) -> Option<usize> {
        self.blockers.get(vertex).copied()
    }

    pub fn set_blockers(&mut self, vertex: V, count: usize) {
        self.blockers.insert(vertex, count);
    }

    /// Forget every blocker count; they are recomputed on demand
    pub fn clear_blockers(&mut self) {
        self.blockers.clear();
    }

    /// One dependency of `vertex` finished; true when none remain
    pub fn unblock(&mut self, vertex: &V) -> bool {
        let count = match self.blockers.get(vertex) {
            Some(count) => *count,
            None => self
                .graph
                .direct_dependencies(vertex)
                .iter()
                .filter(|dependency| !self.done.contains(*dependency))
                .count(),
        };

        let remaining = if count > 0 {
            count - 1
        } else {
            log::warn!("{vertex} appears to have a negative number of dependencies");
            0
        };
        self.blockers.insert(vertex.clone(), remaining);
        remaining == 0
    }

    pub fn is_done(&self, vertex: &V) -> bool {
        self.done.contains(vertex)
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    /// Reset progress and queue every vertex without dependencies
    pub fn enqueue_roots(&mut self) {
        self.blockers.clear();
        self.done.clear();
        self.ready.clear();
        self.queued.clear();
        for vertex in self.graph.vertices() {
            let count = self.graph.direct_dependencies(&vertex).len();
            self.blockers.insert(vertex.clone(), count);
            if count == 0 {
                self.enqueue(vertex);
            }
        }
    }

    pub fn enqueue(&mut self, vertex: V) {
        if self.done.contains(&vertex) || !self.queued.insert(vertex.clone()) {
            return;
        }
        let priority = self.prioritizer.generate_priority_for(&vertex);
        self.sequence += 1;
        self.ready.insert((priority, self.sequence), vertex);
    }

    /// Ready vertex with the lowest priority
    pub fn next_resource(&mut self) -> Option<V> {
        let (_, vertex) = self.ready.pop_first()?;
        self.queued.remove(&vertex);
        Some(vertex)
    }

    /// Mark `vertex` done and release dependents with no blockers left
    pub fn finish(&mut self, vertex: &V) {
        for dependent in self.graph.direct_dependents(vertex) {
            if self.unblock(&dependent) {
                self.enqueue(dependent);
            }
        }
        self.done.insert(vertex.clone());
    }

    /// Visit every vertex after its dependencies
    ///
    /// Fails without visiting anything when the graph has cycles.
    pub fn traverse<T>(&mut self, visitor: &mut T) -> Result<(), CycleError<V>>
    where
        T: TraversalVisitor<V>,
        V: Ord,
    {
        if let Err(err) = self.graph.report_cycles_in_graph() {
            visitor.cycles_found(&err.cycles);
            return Err(err);
        }
        self.unguarded_traverse(visitor);
        Ok(())
    }

    fn unguarded_traverse<T: TraversalVisitor<V>>(&mut self, visitor: &mut T) {
        self.enqueue_roots();

        let mut deferred: Vec<V> = Vec::new();
        let mut made_progress = false;

        while visitor.should_continue() {
            let Some(vertex) = self.next_resource() else {
                break;
            };

            if visitor.ready(&vertex) {
                made_progress = true;
                visitor.visit(self, &vertex);
                self.finish(&vertex);
            } else {
                deferred.push(vertex);
            }

            if self.ready.is_empty() && !deferred.is_empty() {
                if made_progress {
                    for vertex in deferred.drain(..) {
                        self.enqueue(vertex);
                    }
                } else {
                    for vertex in std::mem::take(&mut deferred) {
                        visitor.overly_deferred(&vertex);
                        self.finish(&vertex);
                    }
                }
                made_progress = false;
            }
        }

        if !visitor.should_continue() {
            for vertex in deferred {
                self.enqueue(vertex);
            }
            while let Some(vertex) = self.next_resource() {
                visitor.canceled(&vertex);
                self.finish(&vertex);
            }
        }
    }

    // ========================================================================
    // Containers
    // ========================================================================

    /// Replace each container vertex with its pair of sentinels
    ///
    /// Contents depend on the admissible sentinel and the completed sentinel
    /// depends on the contents. Edges into a container now enter its
    /// admissible sentinel and edges out of it leave from its completed
    /// sentinel, keeping their labels. Containers nested in containers are
    /// wired sentinel to sentinel.
    pub fn replace_containers_with_sentinels(&mut self, containers: &[Container<V>]) {
        let admissible: HashMap<&V, &V> = containers
            .iter()
            .map(|container| (&container.vertex, &container.admissible))
            .collect();
        let completed: HashMap<&V, &V> = containers
            .iter()
            .map(|container| (&container.vertex, &container.completed))
            .collect();
        let entry = |vertex: &V| (*admissible.get(vertex).unwrap_or(&vertex)).clone();
        let exit = |vertex: &V| (*completed.get(vertex).unwrap_or(&vertex)).clone();

        for container in containers {
            match self.prioritizer.priority_of(&container.vertex).cloned() {
                Some(priority) => {
                    self.add_vertex_with_priority(container.admissible.clone(), priority.clone());
                    self.add_vertex_with_priority(container.completed.clone(), priority);
                }
                None => {
                    self.add_vertex(container.admissible.clone());
                    self.add_vertex(container.completed.clone());
                }
            }
        }

        for container in containers {
            if container.contents.is_empty() {
                self.add_edge(
                    container.admissible.clone(),
                    container.completed.clone(),
                    EdgeLabel::default(),
                );
            }
            for child in &container.contents {
                self.add_edge(container.admissible.clone(), entry(child), EdgeLabel::refresh());
                self.add_edge(exit(child), container.completed.clone(), EdgeLabel::refresh());
            }

            for edge in self.graph.adjacent_edges(&container.vertex, crate::Direction::In) {
                self.add_edge(exit(&edge.source), container.admissible.clone(), edge.label.clone());
                self.graph.remove_edge(&edge);
            }
            for edge in self.graph.adjacent_edges(&container.vertex, crate::Direction::Out) {
                self.add_edge(container.completed.clone(), entry(&edge.target), edge.label.clone());
                self.graph.remove_edge(&edge);
            }
        }

        for container in containers {
            self.remove_vertex(&container.vertex);
        }
    }
}
