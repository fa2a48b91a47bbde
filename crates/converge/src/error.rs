//! Error types for the converge crate

use crate::provider::ProviderId;
use crate::reference::ResourceRef;
use depgraph::CycleError;
use thiserror::Error;

/// Errors that abort a transaction or reject a catalog
///
/// Failures of individual resources are never errors; they are recorded on
/// the resource's status and the run carries on.
#[derive(Error, Debug)]
pub enum TransactionError {
    /// One or more resources refused to run
    #[error("Some pre-run checks failed ({count} failed)")]
    PreRunChecksFailed { count: usize },

    /// The relationship graph is not acyclic
    #[error("One or more resource dependency cycles detected in graph")]
    DependencyCycles(#[from] CycleError<ResourceRef>),

    /// A provider asked for the whole run to stop
    #[error("provider {provider} aborted the transaction: {message}")]
    ProviderAborted { provider: ProviderId, message: String },

    /// Two resources share a reference
    #[error("duplicate declaration: {0} is already declared")]
    DuplicateResource(ResourceRef),

    /// A relationship or containment names a resource that is not declared
    #[error("could not find resource '{0}' in the catalog")]
    UnknownResource(ResourceRef),

    /// Text that does not look like `Type[title]`
    #[error("invalid resource reference: {0}")]
    InvalidReference(String),

    /// Tag that is not a valid tag name
    #[error("invalid tag: {0:?}")]
    InvalidTag(String),

    /// A provider is named that nothing registered
    #[error("no provider named '{name}' for type '{resource_type}'")]
    UnknownProvider { resource_type: String, name: String },

    /// Reading or writing persisted state failed
    #[error("transaction store error: {0}")]
    Persistence(#[source] anyhow::Error),
}

impl TransactionError {
    /// Cycles behind a [`TransactionError::DependencyCycles`]
    pub fn cycles(&self) -> Option<&[Vec<ResourceRef>]> {
        match self {
            Self::DependencyCycles(err) => Some(&err.cycles),
            _ => None,
        }
    }
}

/// Result type for transaction operations
pub type Result<T> = std::result::Result<T, TransactionError>;
