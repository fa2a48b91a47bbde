//! Apply context and progress hooks
//!
//! These keep the converge crate free of any particular terminal or
//! progress-bar implementation.

use crate::reference::ResourceRef;
use crate::status::ResourceStatus;
use crate::types::PropertyMap;

/// Context passed to resource state retrieval and sync
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyContext<'a> {
    /// Whether this is a dry run (report, never change)
    pub noop: bool,
    /// Current state gathered by the provider's prefetch, if it ran
    pub prefetched: Option<&'a PropertyMap>,
}

impl<'a> ApplyContext<'a> {
    pub fn new(noop: bool) -> Self {
        Self {
            noop,
            prefetched: None,
        }
    }

    pub fn with_prefetched(mut self, prefetched: Option<&'a PropertyMap>) -> Self {
        self.prefetched = prefetched;
        self
    }
}

/// Progress callback for a transaction
///
/// Implement this trait to receive updates while resources are evaluated.
pub trait TransactionObserver: Send {
    /// Called once before traversal with the number of graph vertices
    fn on_run_start(&mut self, total: usize);

    /// Called when a resource is about to be evaluated
    fn on_resource_start(&mut self, resource: &ResourceRef);

    /// Called when a resource is done, skipped or failed
    fn on_resource_complete(&mut self, resource: &ResourceRef, status: &ResourceStatus);

    /// Called after traversal
    fn on_run_complete(&mut self);
}

/// No-op observer
pub struct NoProgress;

impl TransactionObserver for NoProgress {
    fn on_run_start(&mut self, _total: usize) {}
    fn on_resource_start(&mut self, _resource: &ResourceRef) {}
    fn on_resource_complete(&mut self, _resource: &ResourceRef, _status: &ResourceStatus) {}
    fn on_run_complete(&mut self) {}
}
