//! # Converge
//!
//! Catalog transactions: evaluate declared resources in dependency order.
//!
//! A [`Catalog`] holds resources, containers and the relationships between
//! them. A [`Transaction`] turns it into a relationship graph, walks the graph
//! and brings every resource to its desired state, routing the events one
//! resource produces to the resources that subscribe to it.
//!
//! ## Core Concepts
//!
//! - **Resource**: something with desired and current state, synced one
//!   property at a time
//! - **Provider**: a backend serving resources of one type; may prefetch the
//!   state of all its resources at once
//! - **Event**: the record of one change, failure or simulated change
//! - **EventManager**: queues events on subscribers and runs their callbacks
//!   (usually `refresh`) at most once per run
//! - **Report**: per-resource statuses plus the run's metrics
//!
//! ## Example
//!
//! ```ignore
//! use converge::{Catalog, RelationshipKind, ResourceRef, Transaction, TransactionOptions};
//!
//! let mut catalog = Catalog::for_host();
//! catalog.add_resource(Box::new(config_file))?;
//! catalog.add_resource(Box::new(service))?;
//! catalog.add_relationship(
//!     ResourceRef::new("file", "/etc/app.conf"),
//!     RelationshipKind::Notify,
//!     ResourceRef::new("service", "app"),
//! );
//!
//! let mut transaction = Transaction::new(catalog, TransactionOptions::default())?;
//! transaction.evaluate()?;
//! let report = transaction.into_report();
//! println!("{}", report.summary());
//! ```

pub mod catalog;
pub mod context;
pub mod error;
pub mod event;
pub mod event_manager;
pub mod generator;
pub mod harness;
pub mod persistence;
pub mod provider;
pub mod reference;
pub mod report;
pub mod resource;
pub mod schedule;
pub mod status;
pub mod tags;
pub mod transaction;
pub mod types;

#[cfg(test)]
mod testing;

pub use catalog::{Catalog, ContainerDecl, Relationship, RelationshipKind};
pub use context::{ApplyContext, NoProgress, TransactionObserver};
pub use error::{Result, TransactionError};
pub use event::{Event, EventStatus};
pub use event_manager::EventManager;
pub use generator::AdditionalResourceGenerator;
pub use harness::ResourceHarness;
pub use persistence::{Persistence, TransactionStore};
pub use provider::{PrefetchError, Provider, ProviderId, ProviderRegistry};
pub use reference::ResourceRef;
pub use report::{Report, ReportStatus};
pub use resource::{BoxedResource, Resource, ResourceMeta, Whit};
pub use schedule::Schedule;
pub use status::ResourceStatus;
pub use transaction::Transaction;
pub use types::{ABSENT, ENSURE, PRESENT, PropertyMap, StopFlag, TransactionOptions, Value};
