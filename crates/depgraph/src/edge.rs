//! Edges and the labels that route events along them

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of an event flowing along an edge
///
/// Two names are reserved: [`EventName::ALL_EVENTS`] matches every event
/// and [`EventName::NONE`] never triggers anything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventName(String);

impl EventName {
    /// Wildcard subscription
    pub const ALL_EVENTS: &'static str = "ALL_EVENTS";
    /// Event that never matches a subscription
    pub const NONE: &'static str = "NONE";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn all_events() -> Self {
        Self::new(Self::ALL_EVENTS)
    }

    pub fn none() -> Self {
        Self::new(Self::NONE)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_all_events(&self) -> bool {
        self.0 == Self::ALL_EVENTS
    }

    pub fn is_none(&self) -> bool {
        self.0 == Self::NONE
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for EventName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Subscription carried by an edge
///
/// An unlabeled edge (both fields `None`) only orders its endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeLabel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<EventName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
}

impl EdgeLabel {
    /// Callback used by notification relationships
    pub const REFRESH: &'static str = "refresh";

    /// Subscribe `callback` to events named `event`
    pub fn subscribe(event: impl Into<EventName>, callback: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            callback: Some(callback.into()),
        }
    }

    /// Refresh on any event; the label used for notify/subscribe
    pub fn refresh() -> Self {
        Self::subscribe(EventName::all_events(), Self::REFRESH)
    }

    pub fn is_empty(&self) -> bool {
        self.event.is_none() && self.callback.is_none()
    }
}

/// Directed edge `source -> target`; the target depends on the source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge<V> {
    pub source: V,
    pub target: V,
    #[serde(default, skip_serializing_if = "EdgeLabel::is_empty")]
    pub label: EdgeLabel,
}

impl<V> Edge<V> {
    pub fn new(source: V, target: V, label: EdgeLabel) -> Self {
        Self {
            source,
            target,
            label,
        }
    }

    /// Ordering-only edge
    pub fn unlabeled(source: V, target: V) -> Self {
        Self::new(source, target, EdgeLabel::default())
    }

    pub fn callback(&self) -> Option<&str> {
        self.label.callback.as_deref()
    }

    pub fn event(&self) -> Option<&EventName> {
        self.label.event.as_ref()
    }

    /// Whether an event called `event` leaving `source` should trigger
    /// this edge's callback on `target`
    pub fn matches(&self, event: &EventName) -> bool {
        if self.label.callback.is_none() || event.is_none() {
            return false;
        }
        match &self.label.event {
            Some(subscribed) => subscribed.is_all_events() || subscribed == event,
            None => false,
        }
    }
}

impl<V: fmt::Display> fmt::Display for Edge<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.source, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_requires_callback() {
        let edge = Edge::new(
            "a",
            "b",
            EdgeLabel {
                event: Some(EventName::all_events()),
                callback: None,
            },
        );
        assert!(!edge.matches(&EventName::new("file_changed")));
    }

    #[test]
    fn test_matches_all_events() {
        let edge = Edge::new("a", "b", EdgeLabel::refresh());
        assert!(edge.matches(&EventName::new("file_changed")));
        assert!(edge.matches(&EventName::new("restarted")));
    }

    #[test]
    fn test_matches_named_event_only() {
        let edge = Edge::new("a", "b", EdgeLabel::subscribe("file_changed", "refresh"));
        assert!(edge.matches(&EventName::new("file_changed")));
        assert!(!edge.matches(&EventName::new("file_created")));
    }

    #[test]
    fn test_none_event_never_matches() {
        let edge = Edge::new("a", "b", EdgeLabel::refresh());
        assert!(!edge.matches(&EventName::none()));
    }

    #[test]
    fn test_label_without_event_never_matches() {
        let edge = Edge::new(
            "a",
            "b",
            EdgeLabel {
                event: None,
                callback: Some("refresh".into()),
            },
        );
        assert!(!edge.matches(&EventName::new("file_changed")));
    }

    #[test]
    fn test_unlabeled_serializes_without_label() {
        let edge = Edge::unlabeled("a", "b");
        let json = serde_json::to_string(&edge).unwrap();
        assert_eq!(json, r#"{"source":"a","target":"b"}"#);
    }

    #[test]
    fn test_display() {
        assert_eq!(Edge::unlabeled("a", "b").to_string(), "a => b");
    }
}
