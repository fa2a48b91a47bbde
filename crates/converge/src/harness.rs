//! Bringing one resource in line with its desired state

use crate::context::ApplyContext;
use crate::event::{Event, EventStatus};
use crate::persistence::Persistence;
use crate::reference::ResourceRef;
use crate::resource::Resource;
use crate::status::ResourceStatus;
use crate::types::{ENSURE, PropertyMap, Value, absent, format_value, is_absent};
use chrono::{DateTime, Local};
use std::time::Instant;

/// Compares current and desired state and syncs the difference
#[derive(Debug, Clone, Default)]
pub struct ResourceHarness {
    ignore_schedules: bool,
    now: Option<DateTime<Local>>,
}

impl ResourceHarness {
    pub fn new(ignore_schedules: bool, now: Option<DateTime<Local>>) -> Self {
        Self {
            ignore_schedules,
            now,
        }
    }

    /// Whether the resource's schedule allows it to run now
    pub fn scheduled(&self, resource: &dyn Resource) -> bool {
        let Some(schedule) = &resource.meta().schedule else {
            return true;
        };
        if self.ignore_schedules {
            return true;
        }
        let now = self.now.unwrap_or_else(Local::now);
        let matches = schedule.matches(now);
        if !matches {
            log::debug!(
                "{}: Not scheduled ({} does not match {})",
                resource.reference(),
                schedule.name,
                now.format("%a %H:%M")
            );
        }
        matches
    }

    /// Evaluate `resource` and return what happened
    ///
    /// Errors never escape: a failed retrieval or sync is recorded on the
    /// returned status.
    pub fn evaluate(
        &self,
        resource: &mut dyn Resource,
        prefetched: Option<&PropertyMap>,
        noop: bool,
        persistence: &mut dyn Persistence,
    ) -> ResourceStatus {
        let started = Instant::now();
        let mut status = ResourceStatus::new(resource);
        let noop = noop || resource.meta().noop;
        let ctx = ApplyContext::new(noop).with_prefetched(prefetched);

        let current = match prefetched {
            Some(state) => Ok(state.clone()),
            None => resource.current_state(&ctx),
        };
        match current {
            Ok(current) => {
                let mut sync = PropertySync {
                    resource,
                    ctx: &ctx,
                    persistence,
                    status: &mut status,
                };
                sync.run(&current);
            }
            Err(err) => status.failed_because(&err),
        }

        status.evaluation_time = Some(started.elapsed().as_secs_f64());
        status
    }
}

/// One evaluation in progress
struct PropertySync<'a, 'c> {
    resource: &'a mut dyn Resource,
    ctx: &'a ApplyContext<'c>,
    persistence: &'a mut dyn Persistence,
    status: &'a mut ResourceStatus,
}

impl PropertySync<'_, '_> {
    fn run(&mut self, current: &PropertyMap) {
        let desired = self.resource.desired_state();
        let reference = self.resource.reference().clone();

        if let Some(wanted) = desired.get(ENSURE) {
            let have = current.get(ENSURE).cloned().unwrap_or_else(absent);
            if have != *wanted {
                self.sync_property(&reference, ENSURE, have, wanted);
                self.finish();
                return;
            }
            self.persistence
                .set_system_value(&reference, ENSURE, wanted.clone());
            if is_absent(wanted) {
                return;
            }
        } else if current.get(ENSURE).is_some_and(is_absent) {
            log::debug!("{reference}: Nothing to manage: no ensure and the resource doesn't exist");
            return;
        }

        for (property, wanted) in desired.iter().filter(|(name, _)| name.as_str() != ENSURE) {
            let have = current.get(property).cloned().unwrap_or_else(absent);
            if have == *wanted {
                self.persistence
                    .set_system_value(&reference, property, wanted.clone());
            } else {
                self.sync_property(&reference, property, have, wanted);
            }
        }
        self.finish();
    }

    fn sync_property(&mut self, reference: &ResourceRef, property: &str, have: Value, wanted: &Value) {
        let historical = self.persistence.get_system_value(reference, property);
        let name = event_name(reference, property, &have, wanted);
        let mut event = Event::for_property(name, reference.clone(), property, have.clone(), wanted.clone());
        event.historical_value = historical.clone();
        event.calculate_corrective_change(historical.as_ref());

        let persisted = if self.ctx.noop {
            event.status = EventStatus::Noop;
            event.message = format!(
                "current_value {}, should be {} (noop)",
                format_value(&have),
                format_value(wanted)
            );
            historical.unwrap_or(have)
        } else {
            match self.resource.sync(property, wanted, self.ctx) {
                Ok(()) => {
                    event.message = change_message(property, &have, wanted);
                    wanted.clone()
                }
                Err(err) => {
                    event.status = EventStatus::Failure;
                    event.message = format!(
                        "change from {} to {} failed: {err:#}",
                        format_value(&have),
                        format_value(wanted)
                    );
                    historical.unwrap_or(have)
                }
            }
        };

        if event.corrective_change && event.status != EventStatus::Failure {
            event.message.push_str(" (corrective)");
        }
        event.send_log();
        self.persistence.set_system_value(reference, property, persisted);
        self.status.add_event(event);
    }

    fn finish(&mut self) {
        if self.ctx.noop || !self.status.changed {
            return;
        }
        if let Err(err) = self.resource.flush() {
            self.status.failed_because(&err);
        }
    }
}

fn event_name(reference: &ResourceRef, property: &str, have: &Value, wanted: &Value) -> String {
    if property != ENSURE {
        return format!("{property}_changed");
    }
    let type_name = reference.type_name().replace("::", "_");
    if is_absent(have) {
        format!("{type_name}_created")
    } else if is_absent(wanted) {
        format!("{type_name}_removed")
    } else {
        format!("{type_name}_changed")
    }
}

fn change_message(property: &str, have: &Value, wanted: &Value) -> String {
    if property == ENSURE {
        if is_absent(have) {
            return "created".to_string();
        }
        if is_absent(wanted) {
            return "removed".to_string();
        }
    }
    if is_absent(have) {
        format!("defined '{property}' as {}", format_value(wanted))
    } else if is_absent(wanted) {
        format!("undefined '{property}' from {}", format_value(have))
    } else {
        format!(
            "{property} changed {} to {}",
            format_value(have),
            format_value(wanted)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::TransactionStore;
    use crate::schedule::Schedule;
    use crate::testing::{Journal, TestResource};
    use chrono::{TimeZone, Weekday};
    use serde_json::json;

    fn evaluate(resource: &mut TestResource, noop: bool, store: &mut TransactionStore) -> ResourceStatus {
        ResourceHarness::default().evaluate(resource, None, noop, store)
    }

    #[test]
    fn test_in_sync_resource_has_no_events() {
        let mut resource = TestResource::new("notify", "a")
            .wants("message", json!("hi"))
            .has("message", json!("hi"));
        let status = evaluate(&mut resource, false, &mut TransactionStore::in_memory());
        assert!(status.events.is_empty());
        assert!(!status.changed);
    }

    #[test]
    fn test_property_change() {
        let journal = Journal::default();
        let mut resource = TestResource::new("notify", "a")
            .journal(&journal)
            .wants("message", json!("new"))
            .has("message", json!("old"));
        let mut store = TransactionStore::in_memory();
        let status = evaluate(&mut resource, false, &mut store);

        assert!(status.changed);
        assert_eq!(status.events.len(), 1);
        let event = &status.events[0];
        assert_eq!(event.name.as_str(), "message_changed");
        assert_eq!(event.message, "message changed 'old' to 'new'");
        assert_eq!(resource.system_value("message"), Some(json!("new")));
        assert_eq!(journal.entries(), vec!["sync Notify[a] message", "flush Notify[a]"]);
        assert_eq!(store.pending(resource.reference(), "message"), Some(&json!("new")));
    }

    #[test]
    fn test_defined_and_undefined_messages() {
        assert_eq!(change_message("mode", &absent(), &json!("0644")), "defined 'mode' as '0644'");
        assert_eq!(change_message("mode", &json!("0644"), &absent()), "undefined 'mode' from '0644'");
    }

    #[test]
    fn test_ensure_created_skips_other_properties() {
        let journal = Journal::default();
        let mut resource = TestResource::new("file", "/tmp/x")
            .journal(&journal)
            .wants(ENSURE, json!("present"))
            .wants("mode", json!("0644"));
        let status = evaluate(&mut resource, false, &mut TransactionStore::in_memory());

        assert_eq!(status.events.len(), 1);
        assert_eq!(status.events[0].name.as_str(), "file_created");
        assert_eq!(status.events[0].message, "created");
        assert_eq!(journal.with_prefix("sync "), vec!["File[/tmp/x] ensure"]);
    }

    #[test]
    fn test_ensure_removed() {
        let mut resource = TestResource::new("file", "/tmp/x")
            .wants(ENSURE, json!("absent"))
            .has(ENSURE, json!("present"));
        let status = evaluate(&mut resource, false, &mut TransactionStore::in_memory());
        assert_eq!(status.events[0].name.as_str(), "file_removed");
        assert_eq!(status.events[0].message, "removed");
    }

    #[test]
    fn test_absent_without_ensure_is_not_managed() {
        let journal = Journal::default();
        let mut resource = TestResource::new("file", "/tmp/x")
            .journal(&journal)
            .wants("mode", json!("0644"))
            .has(ENSURE, json!("absent"));
        let status = evaluate(&mut resource, false, &mut TransactionStore::in_memory());
        assert!(status.events.is_empty());
        assert!(journal.entries().is_empty());
    }

    #[test]
    fn test_noop_does_not_sync() {
        let journal = Journal::default();
        let mut resource = TestResource::new("notify", "a")
            .journal(&journal)
            .wants("message", json!("new"))
            .has("message", json!("old"));
        let status = evaluate(&mut resource, true, &mut TransactionStore::in_memory());

        assert!(!status.changed);
        assert!(status.out_of_sync);
        assert_eq!(status.events[0].status, EventStatus::Noop);
        assert_eq!(status.events[0].message, "current_value 'old', should be 'new' (noop)");
        assert!(journal.entries().is_empty());
    }

    #[test]
    fn test_resource_noop_flag() {
        let mut resource = TestResource::new("notify", "a")
            .with_meta(|m| m.noop(true))
            .wants("message", json!("new"));
        let status = evaluate(&mut resource, false, &mut TransactionStore::in_memory());
        assert_eq!(status.events[0].status, EventStatus::Noop);
    }

    #[test]
    fn test_sync_failure() {
        let journal = Journal::default();
        let mut resource = TestResource::new("notify", "a")
            .journal(&journal)
            .wants("message", json!("new"))
            .has("message", json!("old"))
            .failing_sync("message");
        let mut store = TransactionStore::in_memory();
        let status = evaluate(&mut resource, false, &mut store);

        assert!(status.failed);
        assert!(!status.changed);
        assert_eq!(
            status.events[0].message,
            "change from 'old' to 'new' failed: sync of message refused"
        );
        assert_eq!(store.pending(resource.reference(), "message"), Some(&json!("old")));
        assert!(journal.with_prefix("flush ").is_empty());
    }

    #[test]
    fn test_retrieve_failure() {
        let mut resource = TestResource::new("notify", "a").wants("message", json!("x"));
        resource.failing_retrieve = true;
        let status = evaluate(&mut resource, false, &mut TransactionStore::in_memory());
        assert!(status.failed);
        assert_eq!(status.events[0].message, "Could not evaluate: cannot read Notify[a]");
    }

    #[test]
    fn test_prefetched_state_is_used() {
        let mut resource = TestResource::new("package", "vim").wants(ENSURE, json!("present"));
        resource.failing_retrieve = true;
        let prefetched: PropertyMap = [(ENSURE.to_string(), json!("present"))].into();
        let status = ResourceHarness::default().evaluate(
            &mut resource,
            Some(&prefetched),
            false,
            &mut TransactionStore::in_memory(),
        );
        assert!(!status.failed);
        assert!(status.events.is_empty());
    }

    #[test]
    fn test_corrective_change() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let mut first = TransactionStore::load(&path);
        let reference = ResourceRef::new("notify", "a");
        first.set_system_value(&reference, "message", json!("hi"));
        first.save().unwrap();

        let mut store = TransactionStore::load(&path);
        let mut resource = TestResource::new("notify", "a")
            .wants("message", json!("hi"))
            .has("message", json!("drifted"));
        let status = evaluate(&mut resource, false, &mut store);

        assert!(status.corrective_change);
        assert!(status.events[0].message.ends_with(" (corrective)"));
        assert_eq!(status.events[0].historical_value, Some(json!("hi")));
    }

    #[test]
    fn test_scheduled() {
        let saturday_night = Local.with_ymd_and_hms(2026, 1, 3, 3, 0, 0).single().unwrap();
        let schedule = Schedule::new("weekend")
            .on([Weekday::Sat])
            .between("02:00 - 04:00".parse().unwrap());
        let resource = TestResource::new("notify", "a").with_meta(|m| m.with_schedule(schedule));

        assert!(ResourceHarness::new(false, Some(saturday_night)).scheduled(&resource));
        let monday = Local.with_ymd_and_hms(2026, 1, 5, 3, 0, 0).single().unwrap();
        assert!(!ResourceHarness::new(false, Some(monday)).scheduled(&resource));
        assert!(ResourceHarness::new(true, Some(monday)).scheduled(&resource));
        assert!(ResourceHarness::default().scheduled(&TestResource::new("notify", "b")));
    }
}
