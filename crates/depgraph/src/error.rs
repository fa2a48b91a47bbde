//! Error types for the depgraph crate

use std::fmt;
use thiserror::Error;

/// Errors that can occur during graph operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Path enumeration was asked for zero paths
    #[error("max_paths must be at least 1, got {0}")]
    InvalidMaxPaths(usize),
}

/// Dependency cycles found in a graph
///
/// `cycles` holds every strongly connected component (each sorted), and
/// `message` the human readable report listing one path per cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CycleError<V: fmt::Debug> {
    pub cycles: Vec<Vec<V>>,
    pub message: String,
}

impl<V: fmt::Debug> CycleError<V> {
    /// Number of distinct cycles
    pub fn count(&self) -> usize {
        self.cycles.len()
    }

    /// Every vertex taking part in some cycle, in cycle order
    pub fn members(&self) -> impl Iterator<Item = &V> {
        self.cycles.iter().flatten()
    }
}

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, Error>;
