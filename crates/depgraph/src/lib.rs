//! # Depgraph
//!
//! Dependency graphs for ordered evaluation.
//!
//! ## Core Concepts
//!
//! - **DirectedGraph**: vertices joined by labeled edges pointing from a
//!   dependency to its dependent, with a cached reversal
//! - **Cycles**: strongly connected components, explained by their shortest
//!   closed paths
//! - **RelationshipGraph**: a graph that walks itself, releasing each vertex
//!   once its dependencies are done, lowest priority first
//! - **Containers**: grouping vertices replaced by an admissible/completed
//!   sentinel pair before the walk
//!
//! ## Example
//!
//! ```
//! use depgraph::{EdgeLabel, RelationshipGraph, TraversalVisitor};
//!
//! struct Collect(Vec<&'static str>);
//!
//! impl TraversalVisitor<&'static str> for Collect {
//!     fn visit(&mut self, _graph: &mut RelationshipGraph<&'static str>, vertex: &&'static str) {
//!         self.0.push(*vertex);
//!     }
//! }
//!
//! let mut graph = RelationshipGraph::new();
//! graph.add_vertex("first");
//! graph.add_vertex("second");
//! graph.add_vertex("third");
//! // first requires third
//! graph.add_edge("third", "first", EdgeLabel::default());
//!
//! let mut order = Collect(Vec::new());
//! graph.traverse(&mut order).unwrap();
//! assert_eq!(order.0, vec!["second", "third", "first"]);
//! ```

pub mod cycles;
pub mod edge;
pub mod error;
pub mod graph;
pub mod priority;
pub mod relationship;

pub use cycles::{MAX_PATHS_PER_CYCLE, MAX_REPORTED_CYCLES};
pub use edge::{Edge, EdgeLabel, EventName};
pub use error::{CycleError, Error, Result};
pub use graph::{DirectedGraph, Direction, Vertex};
pub use priority::{Priority, SequentialPrioritizer};
pub use relationship::{Container, RelationshipGraph, TraversalVisitor};
