//! Events: what happened to a resource during a run

use crate::reference::ResourceRef;
use crate::types::Value;
use chrono::{DateTime, Utc};
use depgraph::EventName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome recorded by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Success,
    Failure,
    /// A change that would have been made
    Noop,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Noop => "noop",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: EventName,
    pub resource: ResourceRef,
    pub status: EventStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub historical_value: Option<Value>,
    #[serde(default)]
    pub corrective_change: bool,
    /// Cancels a refresh already queued on the same resource
    #[serde(default)]
    pub invalidate_refreshes: bool,
    pub default_log_level: log::Level,
    pub time: DateTime<Utc>,
}

impl Event {
    pub fn new(
        name: impl Into<EventName>,
        resource: ResourceRef,
        status: EventStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            resource,
            status,
            message: message.into(),
            property: None,
            previous_value: None,
            desired_value: None,
            historical_value: None,
            corrective_change: false,
            invalidate_refreshes: false,
            default_log_level: log::Level::Info,
            time: Utc::now(),
        }
    }

    /// Change event for one property
    pub fn for_property(
        name: impl Into<EventName>,
        resource: ResourceRef,
        property: &str,
        previous: Value,
        desired: Value,
    ) -> Self {
        let mut event = Self::new(name, resource, EventStatus::Success, String::new());
        event.property = Some(property.to_string());
        event.previous_value = Some(previous);
        event.desired_value = Some(desired);
        event
    }

    pub fn with_log_level(mut self, level: log::Level) -> Self {
        self.default_log_level = level;
        self
    }

    pub fn invalidating_refreshes(mut self) -> Self {
        self.invalidate_refreshes = true;
        self
    }

    /// Mark the change corrective when last run left the property at the
    /// value we want again now, meaning something drifted it since
    pub fn calculate_corrective_change(&mut self, old_system_value: Option<&Value>) {
        self.corrective_change = match (old_system_value, &self.desired_value) {
            (Some(old), Some(desired)) => old == desired,
            _ => false,
        };
    }

    /// Log the event's message at its level (failures always as errors)
    pub fn send_log(&self) {
        let level = match self.status {
            EventStatus::Failure => log::Level::Error,
            _ => self.default_log_level,
        };
        match &self.property {
            Some(property) => log::log!(level, "{}/{}: {}", self.resource, property, self.message),
            None => log::log!(level, "{}: {}", self.resource, self.message),
        }
    }
}
