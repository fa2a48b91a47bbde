//! Per-resource outcome of a run

use crate::event::{Event, EventStatus};
use crate::reference::ResourceRef;
use crate::resource::Resource;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

/// Event name used for failures that are not tied to a property
pub const RESOURCE_ERROR: &str = "resource_error";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceStatus {
    pub resource: ResourceRef,
    pub events: Vec<Event>,
    pub change_count: usize,
    pub out_of_sync_count: usize,
    pub changed: bool,
    pub out_of_sync: bool,
    pub skipped: bool,
    pub failed: bool,
    pub failed_to_restart: bool,
    pub restarted: bool,
    pub scheduled: bool,
    pub corrective_change: bool,
    /// Failed resources upstream that caused this one to be skipped
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_dependencies: Vec<ResourceRef>,
    pub tags: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_used: Option<String>,
    pub time: DateTime<Utc>,
    /// Seconds spent evaluating the resource
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_time: Option<f64>,
}

impl ResourceStatus {
    pub fn new(resource: &dyn Resource) -> Self {
        let mut status = Self::for_ref(resource.reference().clone());
        status.tags = resource.tags().clone();
        status.provider_used = resource.meta().provider.clone();
        status
    }

    /// Status for a reference with no resource behind it
    pub fn for_ref(resource: ResourceRef) -> Self {
        Self {
            resource,
            events: Vec::new(),
            change_count: 0,
            out_of_sync_count: 0,
            changed: false,
            out_of_sync: false,
            skipped: false,
            failed: false,
            failed_to_restart: false,
            restarted: false,
            scheduled: false,
            corrective_change: false,
            failed_dependencies: Vec::new(),
            tags: BTreeSet::new(),
            provider_used: None,
            time: Utc::now(),
            evaluation_time: None,
        }
    }

    pub fn add_event(&mut self, event: Event) {
        match event.status {
            EventStatus::Failure => self.failed = true,
            EventStatus::Success => {
                self.changed = true;
                self.change_count += 1;
            }
            EventStatus::Noop => {}
        }
        self.out_of_sync = true;
        self.out_of_sync_count += 1;
        if event.corrective_change {
            self.corrective_change = true;
        }
        self.events.push(event);
    }

    /// Fail with an explanatory `resource_error` event
    pub fn fail_with_event(&mut self, message: impl Into<String>) {
        let event = Event::new(
            RESOURCE_ERROR,
            self.resource.clone(),
            EventStatus::Failure,
            message,
        );
        event.send_log();
        self.add_event(event);
    }

    /// Record an error that stopped the resource from being evaluated
    pub fn failed_because(&mut self, err: &anyhow::Error) {
        log::error!("{}: Could not evaluate: {err:#}", self.resource);
        self.fail_with_event(format!("Could not evaluate: {err:#}"));
    }

    /// Whether a failed upstream resource prevents this one from running
    pub fn dependency_failed(&self) -> bool {
        !self.failed_dependencies.is_empty()
    }

    /// Record `roots` as failed ancestors, keeping the list free of repeats
    pub fn add_failed_dependencies<'a>(&mut self, roots: impl IntoIterator<Item = &'a ResourceRef>) {
        for root in roots {
            if !self.failed_dependencies.contains(root) {
                self.failed_dependencies.push(root.clone());
            }
        }
    }

    pub fn events_with_status(&self, status: EventStatus) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(move |event| event.status == status)
    }
}
