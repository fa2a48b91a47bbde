//! Run report: every resource status plus summary metrics

use crate::event::EventStatus;
use crate::reference::ResourceRef;
use crate::status::ResourceStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fmt::Write as _;

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// Also the state of a report that was never finalized
    #[default]
    Failed,
    Changed,
    Unchanged,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Failed => "failed",
            Self::Changed => "changed",
            Self::Unchanged => "unchanged",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceMetrics {
    pub total: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failed_to_restart: usize,
    pub restarted: usize,
    pub changed: usize,
    pub out_of_sync: usize,
    pub scheduled: usize,
    pub corrective_change: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventMetrics {
    pub total: usize,
    pub success: usize,
    pub failure: usize,
    pub noop: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub resources: ResourceMetrics,
    pub events: EventMetrics,
    /// Total number of property changes
    pub changes: usize,
    /// Seconds per resource type, per external phase, and `total`
    pub time: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub host: String,
    pub kind: String,
    pub time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration_version: Option<String>,
    pub transaction_completed: bool,
    pub status: ReportStatus,
    pub noop: bool,
    pub resources_failed_to_generate: bool,
    pub resource_statuses: Vec<ResourceStatus>,
    pub metrics: Metrics,
    /// Phases timed outside resource evaluation, e.g. `config_retrieval`
    pub external_times: BTreeMap<String, f64>,
    #[serde(skip)]
    index: HashMap<ResourceRef, usize>,
}

impl Default for Report {
    fn default() -> Self {
        Self::new("apply")
    }
}

impl Report {
    pub fn new(kind: &str) -> Self {
        Self {
            host: "localhost".to_string(),
            kind: kind.to_string(),
            time: Utc::now(),
            configuration_version: None,
            transaction_completed: false,
            status: ReportStatus::Failed,
            noop: false,
            resources_failed_to_generate: false,
            resource_statuses: Vec::new(),
            metrics: Metrics::default(),
            external_times: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Add a status, replacing any earlier one for the same resource
    pub fn add_resource_status(&mut self, status: ResourceStatus) {
        match self.index.get(&status.resource) {
            Some(&slot) => self.resource_statuses[slot] = status,
            None => {
                self.index
                    .insert(status.resource.clone(), self.resource_statuses.len());
                self.resource_statuses.push(status);
            }
        }
    }

    pub fn resource_status(&self, resource: &ResourceRef) -> Option<&ResourceStatus> {
        self.index
            .get(resource)
            .map(|&slot| &self.resource_statuses[slot])
    }

    pub fn resource_status_mut(&mut self, resource: &ResourceRef) -> Option<&mut ResourceStatus> {
        self.index
            .get(resource)
            .map(|&slot| &mut self.resource_statuses[slot])
    }

    /// Status for `resource`, built by `make` the first time it is asked for
    pub fn resource_status_or_insert_with(
        &mut self,
        resource: &ResourceRef,
        make: impl FnOnce() -> ResourceStatus,
    ) -> &mut ResourceStatus {
        let slot = match self.index.get(resource) {
            Some(&slot) => slot,
            None => {
                let slot = self.resource_statuses.len();
                self.index.insert(resource.clone(), slot);
                self.resource_statuses.push(make());
                slot
            }
        };
        &mut self.resource_statuses[slot]
    }

    pub fn add_times(&mut self, name: &str, seconds: f64) {
        self.external_times.insert(name.to_string(), seconds);
    }

    pub fn set_resources_failed_to_generate(&mut self) {
        self.resources_failed_to_generate = true;
    }

    /// Drop sentinel statuses, compute metrics and settle the status
    pub fn finalize_report(&mut self) {
        self.resource_statuses.retain(|status| !status.resource.is_whit());
        self.index = self
            .resource_statuses
            .iter()
            .enumerate()
            .map(|(slot, status)| (status.resource.clone(), slot))
            .collect();

        self.metrics = self.compute_metrics();
        self.status = self.compute_status();
    }

    fn compute_metrics(&self) -> Metrics {
        let mut metrics = Metrics::default();
        for status in &self.resource_statuses {
            let resources = &mut metrics.resources;
            resources.total += 1;
            resources.skipped += usize::from(status.skipped);
            resources.failed += usize::from(status.failed);
            resources.failed_to_restart += usize::from(status.failed_to_restart);
            resources.restarted += usize::from(status.restarted);
            resources.changed += usize::from(status.changed);
            resources.out_of_sync += usize::from(status.out_of_sync);
            resources.scheduled += usize::from(status.scheduled);
            resources.corrective_change += usize::from(status.corrective_change);

            for event in &status.events {
                metrics.events.total += 1;
                match event.status {
                    EventStatus::Success => metrics.events.success += 1,
                    EventStatus::Failure => metrics.events.failure += 1,
                    EventStatus::Noop => metrics.events.noop += 1,
                }
            }
            metrics.changes += status.change_count;

            if let Some(seconds) = status.evaluation_time {
                *metrics
                    .time
                    .entry(status.resource.type_name().to_string())
                    .or_default() += seconds;
            }
        }

        for (name, seconds) in &self.external_times {
            metrics.time.insert(name.clone(), *seconds);
        }
        let total = metrics.time.values().sum();
        metrics.time.insert("total".to_string(), total);
        metrics
    }

    fn compute_status(&self) -> ReportStatus {
        let resources = &self.metrics.resources;
        if resources.failed > 0
            || resources.failed_to_restart > 0
            || self.resources_failed_to_generate
            || !self.transaction_completed
        {
            ReportStatus::Failed
        } else if self.metrics.changes > 0 {
            ReportStatus::Changed
        } else {
            ReportStatus::Unchanged
        }
    }

    /// Detailed exit code: 2 for changes, 4 for failures, 6 for both
    pub fn exit_status(&self) -> i32 {
        let mut code = 0;
        if self.metrics.changes > 0 {
            code |= 2;
        }
        if self.status == ReportStatus::Failed {
            code |= 4;
        }
        code
    }

    /// Multi-line human readable metrics
    pub fn summary(&self) -> String {
        let m = &self.metrics;
        let r = &m.resources;
        let e = &m.events;
        let mut out = String::new();

        let _ = writeln!(out, "Changes:");
        let _ = writeln!(out, "  {:>18}: {}", "Total", m.changes);
        let _ = writeln!(out, "Events:");
        for (label, value) in [
            ("Failure", e.failure),
            ("Success", e.success),
            ("Noop", e.noop),
            ("Total", e.total),
        ] {
            let _ = writeln!(out, "  {label:>18}: {value}");
        }
        let _ = writeln!(out, "Resources:");
        for (label, value) in [
            ("Skipped", r.skipped),
            ("Failed", r.failed),
            ("Failed to restart", r.failed_to_restart),
            ("Restarted", r.restarted),
            ("Changed", r.changed),
            ("Out of sync", r.out_of_sync),
            ("Scheduled", r.scheduled),
            ("Corrective change", r.corrective_change),
            ("Total", r.total),
        ] {
            let _ = writeln!(out, "  {label:>18}: {value}");
        }
        let _ = writeln!(out, "Time:");
        for (label, seconds) in &m.time {
            let _ = writeln!(out, "  {label:>18}: {seconds:.2}");
        }
        out
    }
}
