//! Core types shared across the transaction

use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Value of a resource property
pub type Value = serde_json::Value;

/// Property name to value
pub type PropertyMap = BTreeMap<String, Value>;

/// Property that decides whether a resource exists at all
pub const ENSURE: &str = "ensure";

/// `ensure` value of a missing resource, and the value of an unset property
pub const ABSENT: &str = "absent";

/// `ensure` value of a resource that exists in no particular form
pub const PRESENT: &str = "present";

/// The value meaning "not there"
pub fn absent() -> Value {
    Value::String(ABSENT.to_string())
}

pub fn is_absent(value: &Value) -> bool {
    value.as_str() == Some(ABSENT) || value.is_null()
}

/// Render a value for change messages: strings quoted, the rest as JSON
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(text) => format!("'{text}'"),
        other => other.to_string(),
    }
}

/// Shared cancellation switch
///
/// Cloning shares the flag; a signal handler or another thread can request
/// a stop that the transaction observes between resources.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options controlling one transaction
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// Report what would change without changing anything
    pub noop: bool,
    /// Only apply resources carrying one of these tags (empty: all)
    pub tags: Vec<String>,
    /// Never apply resources carrying one of these tags
    pub skip_tags: Vec<String>,
    /// Ignore `tags` entirely
    pub ignore_tags: bool,
    /// Apply resources outside their schedule
    pub ignore_schedules: bool,
    /// Running against a network device instead of a host
    pub for_network_device: bool,
    /// Coalesce "failed dependencies" warnings per declaring container
    pub merge_dependency_warnings: bool,
    pub stop: StopFlag,
    /// Clock used for schedules; `None` means the real time
    pub now: Option<DateTime<Local>>,
}

impl TransactionOptions {
    pub fn noop(mut self, noop: bool) -> Self {
        self.noop = noop;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_skip_tags(mut self, tags: Vec<String>) -> Self {
        self.skip_tags = tags;
        self
    }

    pub fn with_stop(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }
}
