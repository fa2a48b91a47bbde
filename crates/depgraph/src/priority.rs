//! Evaluation priorities
//!
//! Ready vertices are released in priority order. Priorities are handed out
//! in the order vertices are added, and vertices created while evaluating
//! another vertex are slotted directly underneath it.

use crate::graph::Vertex;
use std::collections::HashMap;
use std::fmt;

/// Hierarchical priority key, compared lexicographically
///
/// `[2] < [2, 1] < [2, 2] < [3]`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(Vec<u64>);

impl Priority {
    /// Key before every top-level key
    pub fn origin() -> Self {
        Self(vec![0])
    }

    /// Sibling immediately after this key
    pub fn next(&self) -> Self {
        let mut parts = self.0.clone();
        if let Some(last) = parts.last_mut() {
            *last += 1;
        }
        Self(parts)
    }

    /// First slot underneath this key, before any child handed out
    pub fn down(&self) -> Self {
        let mut parts = self.0.clone();
        parts.push(0);
        Self(parts)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

/// Hands out priorities in insertion order
#[derive(Debug, Clone)]
pub struct SequentialPrioritizer<V> {
    priorities: HashMap<V, Priority>,
    count: Priority,
    containers: HashMap<V, Priority>,
}

impl<V: Vertex> Default for SequentialPrioritizer<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Vertex> SequentialPrioritizer<V> {
    pub fn new() -> Self {
        Self {
            priorities: HashMap::new(),
            count: Priority::origin(),
            containers: HashMap::new(),
        }
    }

    /// Existing priority of `vertex`, or the next top-level one
    pub fn generate_priority_for(&mut self, vertex: &V) -> Priority {
        if let Some(priority) = self.priorities.get(vertex) {
            return priority.clone();
        }
        self.count = self.count.next();
        self.record_priority_for(vertex.clone(), self.count.clone());
        self.count.clone()
    }

    /// Next priority underneath `container`
    ///
    /// An unknown container is given a top-level priority first.
    pub fn generate_priority_contained_in(&mut self, container: &V, vertex: &V) -> Priority {
        let last = match self.containers.get(container) {
            Some(last) => last.clone(),
            None => self.generate_priority_for(container).down(),
        };
        let priority = last.next();
        self.containers.insert(container.clone(), priority.clone());
        self.record_priority_for(vertex.clone(), priority.clone());
        priority
    }

    pub fn record_priority_for(&mut self, vertex: V, priority: Priority) {
        self.priorities.insert(vertex, priority);
    }

    pub fn priority_of(&self, vertex: &V) -> Option<&Priority> {
        self.priorities.get(vertex)
    }

    /// Drop the priority of a removed vertex; it is never handed out again
    pub fn forget(&mut self, vertex: &V) {
        self.priorities.remove(vertex);
        self.containers.remove(vertex);
    }

    pub fn clear(&mut self) {
        self.priorities.clear();
        self.containers.clear();
    }
}
