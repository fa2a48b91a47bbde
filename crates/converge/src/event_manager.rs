//! Routing events along graph edges into callbacks

use crate::catalog::Catalog;
use crate::event::{Event, EventStatus};
use crate::reference::ResourceRef;
use crate::status::ResourceStatus;
use depgraph::{DirectedGraph, EdgeLabel, EventName};
use std::collections::{BTreeMap, HashMap};

/// Event name queued when a resource ran at least one callback
pub const RESTARTED: &str = "restarted";

/// Event name queued when a callback was only simulated
pub const NOOP_RESTART: &str = "noop_restart";

/// Collects events and the callbacks they trigger
///
/// Queues are keyed by target and callback, so a callback runs at most once
/// per target however many events or edges asked for it.
#[derive(Debug, Default)]
pub struct EventManager {
    events: Vec<Event>,
    event_queues: HashMap<ResourceRef, BTreeMap<String, Vec<Event>>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event seen so far
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Record `events` from `source` and queue callbacks on whoever listens
    pub fn queue_events(
        &mut self,
        graph: &DirectedGraph<ResourceRef>,
        catalog: &Catalog,
        source: &ResourceRef,
        events: Vec<Event>,
    ) {
        if events.is_empty() {
            return;
        }
        self.events.extend(events.iter().cloned());

        let mut by_name: BTreeMap<EventName, Vec<Event>> = BTreeMap::new();
        for event in events {
            by_name.entry(event.name.clone()).or_default().push(event);
        }

        let refreshes_itself = catalog
            .resource(source)
            .is_some_and(|resource| resource.self_refresh() && !resource.deleting());

        for (name, group) in by_name {
            for edge in graph.matching_edges(source, &name) {
                let Some(callback) = edge.callback() else {
                    continue;
                };
                let responds = catalog
                    .resource(&edge.target)
                    .is_some_and(|target| target.responds_to(callback));
                if !responds {
                    log::debug!("{}: Not scheduling {callback}, it does not respond to it", edge.target);
                    continue;
                }
                self.queue_events_for_resource(source, &edge.target, callback, group.clone());
            }

            if refreshes_itself {
                self.queue_events_for_resource(source, source, EdgeLabel::REFRESH, group.clone());
            }

            if group.iter().any(|event| event.invalidate_refreshes) {
                self.dequeue_events_for_resource(source, EdgeLabel::REFRESH);
            }
        }
    }

    pub fn queue_events_for_resource(
        &mut self,
        source: &ResourceRef,
        target: &ResourceRef,
        callback: &str,
        events: Vec<Event>,
    ) {
        if source.is_whit() {
            log::debug!("{source}: Scheduling {callback} of {target}");
        } else {
            log::info!("{source}: Scheduling {callback} of {target}");
        }
        self.event_queues
            .entry(target.clone())
            .or_default()
            .entry(callback.to_string())
            .or_default()
            .extend(events);
    }

    /// Callbacks queued on `target`, with the events behind each
    pub fn queued_events(&self, target: &ResourceRef) -> impl Iterator<Item = (&str, &[Event])> {
        self.event_queues
            .get(target)
            .into_iter()
            .flatten()
            .map(|(callback, events)| (callback.as_str(), events.as_slice()))
    }

    pub fn dequeue_events_for_resource(&mut self, target: &ResourceRef, callback: &str) {
        let Some(queues) = self.event_queues.get_mut(target) else {
            return;
        };
        if queues.remove(callback).is_some() {
            log::info!("{target}: Unscheduling {callback} on {target}");
        }
        if queues.is_empty() {
            self.event_queues.remove(target);
        }
    }

    /// Drop everything queued on `target`, e.g. because it is skipped
    pub fn dequeue_all_events_for_resource(&mut self, target: &ResourceRef) {
        if let Some(queues) = self.event_queues.remove(target)
            && !queues.is_empty()
        {
            log::info!("{target}: Unscheduling all events on {target}");
        }
    }

    /// Run the callbacks queued on the resource behind `status`
    pub fn process_events(
        &mut self,
        graph: &DirectedGraph<ResourceRef>,
        catalog: &mut Catalog,
        status: &mut ResourceStatus,
        run_noop: bool,
    ) {
        let reference = status.resource.clone();
        let Some(queues) = self.event_queues.remove(&reference) else {
            return;
        };

        let mut restarted = false;
        for (callback, events) in queues {
            let Some(resource) = catalog.resource_mut(&reference) else {
                continue;
            };
            let count = events.len();
            let all_noop = events.iter().all(|event| event.status == EventStatus::Noop);

            if all_noop || run_noop || resource.meta().noop {
                log::info!("{reference}: Would have triggered '{callback}' from {count} event(s)");
                let event = Event::new(NOOP_RESTART, reference.clone(), EventStatus::Noop, "");
                self.queue_events(graph, catalog, &reference, vec![event]);
                continue;
            }

            match resource.callback(&callback) {
                Ok(()) => {
                    restarted = true;
                    if !resource.is_sentinel() {
                        let message = format!("Triggered '{callback}' from {count} event(s)");
                        log::info!("{reference}: {message}");
                        status.add_event(Event::new(
                            callback.as_str(),
                            reference.clone(),
                            EventStatus::Success,
                            message,
                        ));
                    }
                }
                Err(err) => {
                    let message = format!("Failed to call {callback}: {err:#}");
                    log::error!("{reference}: {message}");
                    status.failed_to_restart = true;
                    status.fail_with_event(message);
                }
            }
        }

        if restarted {
            status.restarted = true;
            let event = Event::new(RESTARTED, reference.clone(), EventStatus::Success, RESTARTED);
            self.queue_events(graph, catalog, &reference, vec![event]);
        }
    }
}
