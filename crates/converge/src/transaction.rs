//! The transaction: one run over a catalog
//!
//! A run goes through these stages:
//! 1. static generation over every catalog resource
//! 2. pre-run checks, any failure aborts
//! 3. a walk of the relationship graph in dependency order; each resource is
//!    prefetched, dynamically generated, then skipped or applied, and its
//!    events routed to whoever listens
//! 4. provider teardown, persistence, timing
//!
//! Resource failures are recorded in the report and never abort the run.
//! Structural problems (pre-run checks, cycles, a fatal provider) do.

use crate::catalog::Catalog;
use crate::context::{NoProgress, TransactionObserver};
use crate::error::{Result, TransactionError};
use crate::event::{Event, EventStatus};
use crate::event_manager::EventManager;
use crate::generator::AdditionalResourceGenerator;
use crate::harness::ResourceHarness;
use crate::persistence::{Persistence, TransactionStore};
use crate::provider::{PrefetchError, ProviderId, ProviderRegistry};
use crate::reference::ResourceRef;
use crate::report::Report;
use crate::status::ResourceStatus;
use crate::tags::split_tags;
use crate::types::{PropertyMap, TransactionOptions};
use depgraph::{RelationshipGraph, TraversalVisitor};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Instant;

type Graph = RelationshipGraph<ResourceRef>;

/// Message attached to every resource found in a dependency cycle
pub const CYCLE_MESSAGE: &str = "resource is part of a dependency cycle";

pub struct Transaction {
    graph: Graph,
    run: Run,
}

/// Everything the traversal mutates besides the graph itself
struct Run {
    catalog: Catalog,
    options: TransactionOptions,
    tags: Vec<String>,
    skip_tags: Vec<String>,
    report: Report,
    providers: ProviderRegistry,
    persistence: Box<dyn Persistence>,
    observer: Box<dyn TransactionObserver>,
    event_manager: EventManager,
    harness: ResourceHarness,
    generator: AdditionalResourceGenerator,

    // Prefetch tracking
    prefetched_providers: BTreeSet<ProviderId>,
    prefetch_failed_providers: BTreeSet<ProviderId>,
    prefetched_state: HashMap<ResourceRef, PropertyMap>,
    resource_providers: HashMap<ResourceRef, ProviderId>,
    providers_used: BTreeSet<ProviderId>,

    // Failed dependency notices already given
    dependency_notices: HashSet<(ResourceRef, ResourceRef)>,
    dependency_warnings: HashSet<ResourceRef>,

    cycles_detected: bool,
    stop_logged: bool,
    fatal: Option<TransactionError>,
}

impl Transaction {
    /// Prepare a run over `catalog`
    ///
    /// Fails if the catalog's relationships name undeclared resources or
    /// the tag filters are invalid.
    pub fn new(mut catalog: Catalog, options: TransactionOptions) -> Result<Self> {
        let graph = catalog.relationship_graph()?;
        let tags = split_tags(&options.tags)?;
        let skip_tags = split_tags(&options.skip_tags)?;
        let harness = ResourceHarness::new(options.ignore_schedules, options.now);

        let mut run = Run {
            catalog,
            options,
            tags,
            skip_tags,
            report: Report::new("apply"),
            providers: ProviderRegistry::new(),
            persistence: Box::new(TransactionStore::in_memory()),
            observer: Box::new(NoProgress),
            event_manager: EventManager::new(),
            harness,
            generator: AdditionalResourceGenerator::new(),
            prefetched_providers: BTreeSet::new(),
            prefetch_failed_providers: BTreeSet::new(),
            prefetched_state: HashMap::new(),
            resource_providers: HashMap::new(),
            providers_used: BTreeSet::new(),
            dependency_notices: HashSet::new(),
            dependency_warnings: HashSet::new(),
            cycles_detected: false,
            stop_logged: false,
            fatal: None,
        };
        run.prepare_report();

        Ok(Self { graph, run })
    }

    /// Record into an existing report instead of a fresh one
    pub fn with_report(mut self, report: Report) -> Self {
        self.run.report = report;
        self.run.prepare_report();
        self
    }

    pub fn with_providers(mut self, providers: ProviderRegistry) -> Self {
        self.run.providers = providers;
        self
    }

    pub fn with_persistence(mut self, persistence: Box<dyn Persistence>) -> Self {
        self.run.persistence = persistence;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn TransactionObserver>) -> Self {
        self.run.observer = observer;
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn catalog(&self) -> &Catalog {
        &self.run.catalog
    }

    pub fn relationship_graph(&self) -> &Graph {
        &self.graph
    }

    pub fn event_manager(&self) -> &EventManager {
        &self.run.event_manager
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.run.options
    }

    pub fn report(&self) -> &Report {
        &self.run.report
    }

    /// Finalize and hand over the report
    pub fn into_report(mut self) -> Report {
        self.run.report.finalize_report();
        self.run.report
    }

    /// Status for `resource`, created on first use
    pub fn resource_status(&mut self, resource: &ResourceRef) -> &mut ResourceStatus {
        self.run.resource_status(resource)
    }

    /// Whether any resource failed, or the graph had cycles
    pub fn any_failed(&self) -> bool {
        self.run.cycles_detected
            || self
                .run
                .report
                .resource_statuses
                .iter()
                .any(|status| status.failed || status.failed_to_restart)
    }

    /// Whether `resource` would be skipped right now
    pub fn skip(&mut self, resource: &ResourceRef) -> bool {
        self.run.skip(resource)
    }

    /// Whether a stop was requested for a host catalog
    pub fn stop_processing(&self) -> bool {
        self.run.stop_processing()
    }

    /// Prefetch the provider serving `resource` if that has not happened yet
    pub fn prefetch_if_necessary(&mut self, resource: &ResourceRef) {
        self.run.prefetch_if_necessary(resource);
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Apply the catalog
    pub fn evaluate(&mut self) -> Result<()> {
        let started = Instant::now();

        for reference in self.run.catalog.resource_refs() {
            self.run
                .generator
                .generate_additional_resources(&mut self.run.catalog, &mut self.graph, &reference);
        }
        self.run.check_providers()?;
        self.run.perform_pre_run_checks()?;

        let total = self
            .graph
            .vertices()
            .iter()
            .filter(|vertex| !vertex.is_whit())
            .count();
        self.run.observer.on_run_start(total);
        let traversal = self.graph.traverse(&mut self.run);
        self.run.observer.on_run_complete();

        if let Err(cycles) = traversal {
            return Err(TransactionError::DependencyCycles(cycles));
        }
        if let Some(err) = self.run.fatal.take() {
            return Err(err);
        }

        if self.run.generator.resources_failed_to_generate() {
            self.run.report.set_resources_failed_to_generate();
        }
        self.run.teardown();
        self.run.report.transaction_completed = true;

        if self.run.catalog.host_config {
            self.run
                .persistence
                .save()
                .map_err(TransactionError::Persistence)?;
        }

        self.run
            .report
            .add_times("transaction_evaluation", started.elapsed().as_secs_f64());
        Ok(())
    }
}

impl Run {
    fn prepare_report(&mut self) {
        self.report.noop = self.options.noop;
        self.report.configuration_version = self.catalog.version.clone();
        if let Some(duration) = self.catalog.retrieval_duration {
            self.report
                .add_times("config_retrieval", duration.as_secs_f64());
        }
    }

    fn resource_status(&mut self, reference: &ResourceRef) -> &mut ResourceStatus {
        let catalog = &self.catalog;
        self.report
            .resource_status_or_insert_with(reference, || match catalog.resource(reference) {
                Some(resource) => ResourceStatus::new(resource),
                None => ResourceStatus::for_ref(reference.clone()),
            })
    }

    fn stop_processing(&self) -> bool {
        self.options.stop.is_requested() && self.catalog.host_config
    }

    /// Every explicitly selected provider must exist
    fn check_providers(&self) -> Result<()> {
        for resource in self.catalog.resources() {
            self.providers.resolve(resource)?;
        }
        Ok(())
    }

    fn perform_pre_run_checks(&self) -> Result<()> {
        let mut count = 0;
        for resource in self.catalog.resources() {
            if let Err(err) = resource.pre_run_check() {
                log::error!("{}: {err:#}", resource.reference());
                count += 1;
            }
        }
        if count > 0 {
            return Err(TransactionError::PreRunChecksFailed { count });
        }
        Ok(())
    }

    // ========================================================================
    // Prefetch
    // ========================================================================

    fn prefetch_if_necessary(&mut self, reference: &ResourceRef) {
        let Some(resource) = self.catalog.resource(reference) else {
            return;
        };
        let id = match self.providers.resolve(resource) {
            Ok(Some(id)) => id,
            Ok(None) => return,
            Err(err) => {
                log::debug!("{reference}: {err}");
                return;
            }
        };
        self.resource_providers.insert(reference.clone(), id.clone());
        self.providers_used.insert(id.clone());

        if !self.prefetched_providers.insert(id.clone()) {
            return;
        }
        let is_default = self.providers.is_default(&id);
        let Some(provider) = self.providers.get_mut(&id) else {
            return;
        };
        if !provider.supports_prefetch() {
            return;
        }

        let managed: BTreeMap<String, ResourceRef> = self
            .catalog
            .resources()
            .filter(|candidate| candidate.type_name() == id.resource_type)
            .filter(|candidate| match &candidate.meta().provider {
                Some(name) => *name == id.name,
                None => is_default,
            })
            .map(|candidate| (candidate.name().to_string(), candidate.reference().clone()))
            .collect();

        log::debug!("Prefetching {} resources for {id}", managed.len());
        match provider.prefetch(&managed) {
            Ok(found) => {
                for (name, state) in found {
                    if let Some(reference) = managed.get(&name) {
                        self.prefetched_state.insert(reference.clone(), state);
                    }
                }
            }
            Err(PrefetchError::Unavailable(message)) => {
                log::debug!("Could not prefetch {id} provider: {message}");
            }
            Err(PrefetchError::Failed(message)) => {
                log::error!("Could not prefetch {id} provider: {message}");
                self.prefetch_failed_providers.insert(id);
            }
            Err(PrefetchError::Fatal(message)) => {
                log::error!("Could not prefetch {id} provider: {message}");
                self.fatal = Some(TransactionError::ProviderAborted { provider: id, message });
            }
        }
    }

    fn failed_prefetch_provider(&self, reference: &ResourceRef) -> Option<&ProviderId> {
        self.resource_providers
            .get(reference)
            .filter(|id| self.prefetch_failed_providers.contains(*id))
    }

    fn propagate_prefetch_failure(&mut self, reference: &ResourceRef) {
        let Some(id) = self.failed_prefetch_provider(reference) else {
            return;
        };
        let message = format!(
            "Prefetch failed for {} provider '{}'",
            id.resource_type, id.name
        );
        self.resource_status(reference).fail_with_event(message);
    }

    // ========================================================================
    // Per-resource evaluation
    // ========================================================================

    /// Failed resources upstream of `reference`, through its direct dependencies
    fn failed_roots_of(&self, graph: &Graph, reference: &ResourceRef) -> Vec<ResourceRef> {
        let mut roots: Vec<ResourceRef> = Vec::new();
        for dependency in graph.direct_dependencies(reference) {
            let Some(status) = self.report.resource_status(&dependency) else {
                continue;
            };
            for root in &status.failed_dependencies {
                if !roots.contains(root) {
                    roots.push(root.clone());
                }
            }
            if (status.failed || status.failed_to_restart) && !roots.contains(&dependency) {
                roots.push(dependency);
            }
        }
        roots
    }

    fn eval_resource(&mut self, graph: &Graph, reference: &ResourceRef) {
        let roots = self.failed_roots_of(graph, reference);
        self.resource_status(reference).add_failed_dependencies(&roots);
        self.propagate_prefetch_failure(reference);

        if self.skip(reference) {
            self.resource_status(reference).skipped = true;
            log::debug!("{reference}: Resource is being skipped, unscheduling all events");
            self.event_manager.dequeue_all_events_for_resource(reference);
            self.persistence.copy_skipped(reference);
        } else {
            self.apply(graph, reference);
        }
    }

    fn apply(&mut self, graph: &Graph, reference: &ResourceRef) {
        let Some(resource) = self.catalog.resource_mut(reference) else {
            return;
        };
        let mut status = self.harness.evaluate(
            &mut **resource,
            self.prefetched_state.get(reference),
            self.options.noop,
            self.persistence.as_mut(),
        );
        status.scheduled = true;
        if let Some(id) = self.resource_providers.get(reference) {
            status.provider_used = Some(id.name.clone());
        }

        if !(status.failed || status.failed_to_restart) {
            self.event_manager
                .queue_events(graph, &self.catalog, reference, status.events.clone());
        }
        self.event_manager
            .process_events(graph, &mut self.catalog, &mut status, self.options.noop);
        if let Some(seconds) = status.evaluation_time {
            log::debug!("{reference}: Evaluated in {seconds:.2} seconds");
        }
        self.report.add_resource_status(status);
    }

    /// Whether `reference` must not be applied this run
    pub(crate) fn skip(&mut self, reference: &ResourceRef) -> bool {
        let Some(resource) = self.catalog.resource(reference) else {
            return false;
        };
        let skip_tagged = self
            .skip_tags
            .iter()
            .any(|tag| resource.tags().contains(tag));
        let missing_tags = !self.options.ignore_tags
            && !self.tags.is_empty()
            && !self.tags.iter().any(|tag| resource.tags().contains(tag));
        let scheduled = self.harness.scheduled(resource);
        let is_virtual = resource.meta().is_virtual;
        let host_only_on_device = !resource.appliable_to_device() && self.options.for_network_device;
        let device_only_on_host = !resource.appliable_to_host() && !self.options.for_network_device;

        if skip_tagged {
            log::debug!("{reference}: Skipping with skip tags {}", self.skip_tags.join(", "));
            true
        } else if missing_tags {
            log::debug!("{reference}: Not tagged with {}", self.tags.join(", "));
            true
        } else if !scheduled {
            log::debug!("{reference}: Not scheduled");
            true
        } else if self.failed_dependencies(reference) {
            true
        } else if self.failed_prefetch_provider(reference).is_some() {
            log::warn!("{reference}: Skipping because provider prefetch failed");
            true
        } else if is_virtual {
            log::debug!("{reference}: Skipping because virtual");
            true
        } else if host_only_on_device {
            log::debug!("{reference}: Skipping host resources because running on a device");
            true
        } else if device_only_on_host {
            log::debug!("{reference}: Skipping device resources because running on a host");
            true
        } else {
            false
        }
    }

    /// Whether a dependency failed, logging the notices that go with it
    fn failed_dependencies(&mut self, reference: &ResourceRef) -> bool {
        let roots = match self.report.resource_status(reference) {
            Some(status) if status.dependency_failed() => status.failed_dependencies.clone(),
            _ => return false,
        };
        if reference.is_whit() {
            return true;
        }

        let merge = self.options.merge_dependency_warnings;
        for root in &roots {
            let key = if merge {
                (root.clone(), root.clone())
            } else {
                (root.clone(), reference.clone())
            };
            if self.dependency_notices.insert(key) {
                let failed = self
                    .report
                    .resource_status(root)
                    .is_some_and(|status| status.failed);
                log::info!("{reference}: Dependency {root} has failures: {failed}");
            }
        }

        let container = self.catalog.container_of(reference).cloned();
        match container {
            Some(container) if merge => {
                if self.dependency_warnings.insert(container) {
                    log::warn!("{reference}: Skipping because of failed dependencies");
                }
            }
            _ => log::warn!("{reference}: Skipping because of failed dependencies"),
        }
        true
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Let every provider that served a resource clean up
    ///
    /// A failing provider never keeps the others from running.
    fn teardown(&mut self) {
        let mut errors = Vec::new();
        for id in &self.providers_used {
            let Some(provider) = self.providers.get_mut(id) else {
                continue;
            };
            if let Err(err) = provider.post_resource_eval() {
                log::error!("post_resource_eval failed for {id} provider: {err:#}");
                errors.push(id.clone());
            }
        }
        if !errors.is_empty() {
            log::debug!("{} provider teardown(s) failed", errors.len());
        }
    }
}

impl TraversalVisitor<ResourceRef> for Run {
    fn should_continue(&mut self) -> bool {
        if self.fatal.is_some() {
            return false;
        }
        if self.stop_processing() {
            if !self.stop_logged {
                log::info!("Stop requested, skipping the remaining resources");
                self.stop_logged = true;
            }
            return false;
        }
        true
    }

    fn ready(&mut self, vertex: &ResourceRef) -> bool {
        self.catalog
            .resource(vertex)
            .is_none_or(|resource| resource.suitable())
    }

    fn visit(&mut self, graph: &mut Graph, vertex: &ResourceRef) {
        if !self.catalog.contains(vertex) {
            log::warn!("{vertex} is in the relationship graph but not in the catalog");
            return;
        }
        let observed = !vertex.is_whit();
        if observed {
            self.observer.on_resource_start(vertex);
        }

        self.prefetch_if_necessary(vertex);
        if let Some(err) = &self.fatal {
            let message = format!("Could not evaluate: {err}");
            self.resource_status(vertex).fail_with_event(message);
            if observed {
                let status = self.resource_status(vertex).clone();
                self.observer.on_resource_complete(vertex, &status);
            }
            return;
        }
        if self
            .generator
            .eval_generate(&mut self.catalog, graph, vertex)
        {
            graph.clear_blockers();
        }
        self.eval_resource(graph, vertex);

        if observed {
            let status = self.resource_status(vertex).clone();
            self.observer.on_resource_complete(vertex, &status);
        }
    }

    fn overly_deferred(&mut self, vertex: &ResourceRef) {
        let provider = self
            .catalog
            .resource(vertex)
            .and_then(|resource| resource.meta().provider.clone());
        let message = match provider {
            Some(name) => format!("Provider {name} is not functional on this host"),
            None => "Could not find a suitable provider".to_string(),
        };
        self.resource_status(vertex).fail_with_event(message);
    }

    fn canceled(&mut self, vertex: &ResourceRef) {
        log::debug!("{vertex}: Skipped, the run was stopped");
        self.resource_status(vertex).skipped = true;
    }

    fn cycles_found(&mut self, cycles: &[Vec<ResourceRef>]) {
        self.cycles_detected = true;
        for member in cycles.iter().flatten() {
            let status = self.resource_status(member);
            let event = Event::new(
                crate::status::RESOURCE_ERROR,
                member.clone(),
                EventStatus::Failure,
                CYCLE_MESSAGE,
            );
            status.add_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ContainerDecl, RelationshipKind};
    use crate::report::ReportStatus;
    use crate::testing::{Journal, TestProvider, TestResource};
    use crate::types::{ENSURE, StopFlag};
    use serde_json::json;

    fn notify(title: &str) -> ResourceRef {
        ResourceRef::new("notify", title)
    }

    /// A resource that changes once, recording its syncs in `journal`
    fn changing(title: &str, journal: &Journal) -> TestResource {
        TestResource::new("notify", title)
            .journal(journal)
            .wants("message", json!(title))
    }

    fn run(catalog: Catalog, options: TransactionOptions) -> Transaction {
        let mut transaction = Transaction::new(catalog, options).unwrap();
        transaction.evaluate().unwrap();
        transaction
    }

    fn synced(journal: &Journal) -> Vec<String> {
        journal
            .with_prefix("sync ")
            .into_iter()
            .map(|entry| entry.split(' ').next().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_independent_resources_follow_declaration_order() {
        for _ in 0..5 {
            let journal = Journal::default();
            let mut catalog = Catalog::new();
            for title in ["r1", "r2", "r3"] {
                catalog.add_resource(changing(title, &journal).boxed()).unwrap();
            }
            run(catalog, TransactionOptions::default());
            assert_eq!(synced(&journal), vec!["Notify[r1]", "Notify[r2]", "Notify[r3]"]);
        }
    }

    #[test]
    fn test_requires_run_after_dependency() {
        let journal = Journal::default();
        let mut catalog = Catalog::new();
        for title in ["b", "c", "a"] {
            catalog.add_resource(changing(title, &journal).boxed()).unwrap();
        }
        catalog.add_relationship(notify("b"), RelationshipKind::Require, notify("a"));
        catalog.add_relationship(notify("c"), RelationshipKind::Require, notify("a"));

        let transaction = run(catalog, TransactionOptions::default());
        assert_eq!(synced(&journal), vec!["Notify[a]", "Notify[b]", "Notify[c]"]);
        let mut dependents = transaction.relationship_graph().dependents(&notify("a"));
        dependents.sort();
        assert_eq!(dependents, vec![notify("b"), notify("c")]);
        assert_eq!(
            transaction.relationship_graph().dependencies(&notify("c")),
            vec![notify("a")]
        );
    }

    #[test]
    fn test_failure_skips_dependents_and_drops_their_events() {
        let journal = Journal::default();
        let mut catalog = Catalog::new();
        catalog
            .add_resource(changing("a", &journal).failing_sync("message").boxed())
            .unwrap();
        catalog.add_resource(changing("trigger", &journal).boxed()).unwrap();
        catalog
            .add_resource(changing("b", &journal).refreshable().boxed())
            .unwrap();
        catalog.add_resource(changing("c", &journal).boxed()).unwrap();
        catalog.add_relationship(notify("b"), RelationshipKind::Require, notify("a"));
        catalog.add_relationship(notify("trigger"), RelationshipKind::Notify, notify("b"));
        catalog.add_relationship(notify("c"), RelationshipKind::Require, notify("b"));

        let mut transaction = run(catalog, TransactionOptions::default());
        assert!(transaction.any_failed());

        let b = transaction.resource_status(&notify("b")).clone();
        assert!(b.skipped);
        assert_eq!(b.failed_dependencies, vec![notify("a")]);
        let c = transaction.resource_status(&notify("c")).clone();
        assert!(c.skipped);
        assert_eq!(c.failed_dependencies, vec![notify("a")]);

        assert!(journal.with_prefix("refresh ").is_empty());
        assert_eq!(transaction.event_manager().queued_events(&notify("b")).count(), 0);
        assert_eq!(synced(&journal), vec!["Notify[a]", "Notify[trigger]"]);
    }

    #[test]
    fn test_notify_triggers_refresh_once() {
        let journal = Journal::default();
        let mut catalog = Catalog::new();
        catalog.add_resource(changing("a", &journal).boxed()).unwrap();
        catalog.add_resource(changing("b", &journal).boxed()).unwrap();
        catalog
            .add_resource(
                TestResource::new("exec", "restart")
                    .journal(&journal)
                    .refreshable()
                    .boxed(),
            )
            .unwrap();
        let restart = ResourceRef::new("exec", "restart");
        catalog.add_relationship(notify("a"), RelationshipKind::Notify, restart.clone());
        catalog.add_relationship(restart.clone(), RelationshipKind::Subscribe, notify("b"));

        let mut transaction = run(catalog, TransactionOptions::default());
        assert_eq!(journal.with_prefix("refresh "), vec!["Exec[restart]"]);
        assert!(transaction.resource_status(&restart).restarted);
    }

    #[test]
    fn test_notify_through_container() {
        let journal = Journal::default();
        let mut catalog = Catalog::new();
        catalog.add_resource(changing("config", &journal).boxed()).unwrap();
        catalog
            .add_resource(
                TestResource::new("service", "web")
                    .journal(&journal)
                    .refreshable()
                    .boxed(),
            )
            .unwrap();
        let class = ResourceRef::new("class", "config");
        catalog.add_container(ContainerDecl::new(class.clone())).unwrap();
        catalog.contain(&class, &notify("config")).unwrap();
        catalog.add_relationship(
            class,
            RelationshipKind::Notify,
            ResourceRef::new("service", "web"),
        );

        let transaction = run(catalog, TransactionOptions::default());
        assert_eq!(journal.with_prefix("refresh "), vec!["Service[web]"]);
        let report = transaction.into_report();
        assert!(report.resource_statuses.iter().all(|s| !s.resource.is_whit()));
    }

    #[test]
    fn test_noop_run() {
        let journal = Journal::default();
        let mut catalog = Catalog::new();
        catalog.add_resource(changing("a", &journal).boxed()).unwrap();
        catalog
            .add_resource(TestResource::new("exec", "x").journal(&journal).refreshable().boxed())
            .unwrap();
        catalog.add_relationship(notify("a"), RelationshipKind::Notify, ResourceRef::new("exec", "x"));

        let transaction = run(catalog, TransactionOptions::default().noop(true));
        assert!(journal.entries().is_empty());
        let report = transaction.into_report();
        assert!(report.noop);
        assert_eq!(report.metrics.events.noop, 1);
        assert_eq!(report.status, ReportStatus::Unchanged);
    }

    #[test]
    fn test_tags_filter() {
        let journal = Journal::default();
        let mut catalog = Catalog::new();
        catalog
            .add_resource(changing("web", &journal).tagged(&["frontend"]).boxed())
            .unwrap();
        catalog.add_resource(changing("db", &journal).boxed()).unwrap();

        let mut transaction = run(
            catalog,
            TransactionOptions::default().with_tags(vec!["Frontend".into()]),
        );
        assert_eq!(synced(&journal), vec!["Notify[web]"]);
        assert!(transaction.resource_status(&notify("db")).skipped);
    }

    #[test]
    fn test_skip_tags() {
        let journal = Journal::default();
        let mut catalog = Catalog::new();
        catalog
            .add_resource(changing("web", &journal).tagged(&["frontend"]).boxed())
            .unwrap();
        catalog.add_resource(changing("db", &journal).boxed()).unwrap();

        run(
            catalog,
            TransactionOptions::default().with_skip_tags(vec!["frontend".into()]),
        );
        assert_eq!(synced(&journal), vec!["Notify[db]"]);
    }

    #[test]
    fn test_invalid_tag_rejected() {
        let options = TransactionOptions::default().with_tags(vec!["not valid".into()]);
        assert!(matches!(
            Transaction::new(Catalog::new(), options),
            Err(TransactionError::InvalidTag(_))
        ));
    }

    #[test]
    fn test_virtual_and_device_resources_skipped() {
        let journal = Journal::default();
        let mut catalog = Catalog::new();
        catalog
            .add_resource(changing("virtual", &journal).with_meta(|m| m.virtual_resource()).boxed())
            .unwrap();
        let mut device = changing("device", &journal);
        device.device_only = true;
        catalog.add_resource(device.boxed()).unwrap();
        catalog.add_resource(changing("host", &journal).boxed()).unwrap();

        let mut transaction = run(catalog, TransactionOptions::default());
        assert_eq!(synced(&journal), vec!["Notify[host]"]);
        assert!(transaction.resource_status(&notify("virtual")).skipped);
        assert!(transaction.resource_status(&notify("device")).skipped);
    }

    #[test]
    fn test_host_resources_skipped_on_device() {
        let journal = Journal::default();
        let mut catalog = Catalog::new();
        let mut device = changing("device", &journal);
        device.device_only = true;
        catalog.add_resource(device.boxed()).unwrap();
        catalog.add_resource(changing("host", &journal).boxed()).unwrap();

        let options = TransactionOptions {
            for_network_device: true,
            ..TransactionOptions::default()
        };
        run(catalog, options);
        assert_eq!(synced(&journal), vec!["Notify[device]"]);
    }

    #[test]
    fn test_pre_run_check_failure_aborts() {
        let journal = Journal::default();
        let mut catalog = Catalog::new();
        let mut bad = changing("bad", &journal);
        bad.pre_run_error = Some("not today".into());
        catalog.add_resource(bad.boxed()).unwrap();
        catalog.add_resource(changing("good", &journal).boxed()).unwrap();

        let mut transaction = Transaction::new(catalog, TransactionOptions::default()).unwrap();
        let err = transaction.evaluate().unwrap_err();
        assert!(matches!(err, TransactionError::PreRunChecksFailed { count: 1 }));
        assert!(journal.entries().is_empty());
        assert!(!transaction.report().transaction_completed);
    }

    #[test]
    fn test_cycle_fails_members() {
        let journal = Journal::default();
        let mut catalog = Catalog::new();
        for title in ["a", "b", "c"] {
            catalog.add_resource(changing(title, &journal).boxed()).unwrap();
        }
        catalog.add_relationship(notify("a"), RelationshipKind::Before, notify("b"));
        catalog.add_relationship(notify("b"), RelationshipKind::Before, notify("a"));

        let mut transaction = Transaction::new(catalog, TransactionOptions::default()).unwrap();
        let err = transaction.evaluate().unwrap_err();
        assert_eq!(err.cycles().map(|cycles| cycles.len()), Some(1));
        assert!(transaction.any_failed());
        assert!(journal.entries().is_empty());

        let a = transaction.resource_status(&notify("a")).clone();
        assert!(a.failed);
        assert_eq!(a.events[0].message, CYCLE_MESSAGE);
        assert!(!transaction.resource_status(&notify("c")).failed);
    }

    #[test]
    fn test_stop_skips_remaining() {
        let journal = Journal::default();
        let stop = StopFlag::new();
        let mut catalog = Catalog::for_host();
        catalog.add_resource(changing("a", &journal).boxed()).unwrap();
        catalog.add_resource(changing("b", &journal).boxed()).unwrap();

        stop.request_stop();
        let mut transaction = run(catalog, TransactionOptions::default().with_stop(stop));
        assert!(journal.entries().is_empty());
        assert!(transaction.resource_status(&notify("a")).skipped);
        assert!(transaction.resource_status(&notify("b")).skipped);
    }

    #[test]
    fn test_stop_ignored_for_non_host_catalog() {
        let journal = Journal::default();
        let stop = StopFlag::new();
        stop.request_stop();
        let mut catalog = Catalog::new();
        catalog.add_resource(changing("a", &journal).boxed()).unwrap();

        let transaction = run(catalog, TransactionOptions::default().with_stop(stop.clone()));
        assert!(!transaction.stop_processing());
        assert_eq!(synced(&journal), vec!["Notify[a]"]);
    }

    #[test]
    fn test_unsuitable_resource_fails_and_blocks_dependents() {
        let journal = Journal::default();
        let mut catalog = Catalog::new();
        let mut broken = changing("broken", &journal);
        broken.suitable = false;
        catalog.add_resource(broken.boxed()).unwrap();
        catalog.add_resource(changing("after", &journal).boxed()).unwrap();
        catalog.add_relationship(notify("broken"), RelationshipKind::Before, notify("after"));

        let mut transaction = run(catalog, TransactionOptions::default());
        let broken = transaction.resource_status(&notify("broken")).clone();
        assert!(broken.failed);
        assert_eq!(broken.events[0].message, "Could not find a suitable provider");
        assert!(transaction.resource_status(&notify("after")).skipped);
        assert!(journal.entries().is_empty());
    }

    #[test]
    fn test_prefetch_once_per_provider() {
        let journal = Journal::default();
        let mut provider = TestProvider::new("package", "apt", &journal);
        provider.state.insert(
            "vim".into(),
            [(ENSURE.to_string(), json!("present"))].into(),
        );
        let mut providers = ProviderRegistry::new();
        providers.register(Box::new(provider));
        providers.register(Box::new(TestProvider::new("package", "gem", &journal)));

        let mut catalog = Catalog::new();
        for name in ["vim", "git"] {
            let mut package = TestResource::new("package", name)
                .journal(&journal)
                .wants(ENSURE, json!("present"));
            package.failing_retrieve = name == "vim";
            catalog.add_resource(package.boxed()).unwrap();
        }
        catalog
            .add_resource(
                TestResource::new("package", "rake")
                    .with_meta(|m| m.with_provider("gem"))
                    .boxed(),
            )
            .unwrap();

        let mut transaction = Transaction::new(catalog, TransactionOptions::default())
            .unwrap()
            .with_providers(providers);
        transaction.evaluate().unwrap();

        assert_eq!(
            journal.with_prefix("prefetch "),
            vec!["package/apt git,vim", "package/gem rake"]
        );
        assert_eq!(journal.with_prefix("post "), vec!["package/apt", "package/gem"]);
        assert!(transaction.resource_status(&ResourceRef::new("package", "vim")).events.is_empty());
        assert_eq!(synced(&journal), vec!["Package[git]"]);
        assert_eq!(
            transaction.resource_status(&ResourceRef::new("package", "git")).provider_used.as_deref(),
            Some("apt")
        );
    }

    #[test]
    fn test_failed_prefetch_fails_its_resources() {
        let journal = Journal::default();
        let mut provider = TestProvider::new("package", "apt", &journal);
        provider.failure = Some(PrefetchError::Failed);
        let mut providers = ProviderRegistry::new();
        providers.register(Box::new(provider));

        let mut catalog = Catalog::new();
        catalog
            .add_resource(
                TestResource::new("package", "vim")
                    .journal(&journal)
                    .wants(ENSURE, json!("present"))
                    .boxed(),
            )
            .unwrap();
        catalog.add_resource(changing("other", &journal).boxed()).unwrap();

        let mut transaction = Transaction::new(catalog, TransactionOptions::default())
            .unwrap()
            .with_providers(providers);
        transaction.evaluate().unwrap();

        let vim = transaction.resource_status(&ResourceRef::new("package", "vim")).clone();
        assert!(vim.failed);
        assert!(vim.skipped);
        assert_eq!(vim.events[0].message, "Prefetch failed for package provider 'apt'");
        assert_eq!(synced(&journal), vec!["Notify[other]"]);
        assert_eq!(journal.with_prefix("post "), vec!["package/apt"]);
    }

    #[test]
    fn test_unavailable_prefetch_is_ignored() {
        let journal = Journal::default();
        let mut provider = TestProvider::new("package", "apt", &journal);
        provider.failure = Some(PrefetchError::Unavailable);
        let mut providers = ProviderRegistry::new();
        providers.register(Box::new(provider));

        let mut catalog = Catalog::new();
        catalog
            .add_resource(
                TestResource::new("package", "vim")
                    .journal(&journal)
                    .wants(ENSURE, json!("present"))
                    .boxed(),
            )
            .unwrap();

        let mut transaction = Transaction::new(catalog, TransactionOptions::default())
            .unwrap()
            .with_providers(providers);
        transaction.evaluate().unwrap();
        assert_eq!(synced(&journal), vec!["Package[vim]"]);
        assert!(!transaction.any_failed());
    }

    #[test]
    fn test_fatal_prefetch_aborts() {
        let journal = Journal::default();
        let mut provider = TestProvider::new("package", "apt", &journal);
        provider.failure = Some(PrefetchError::Fatal);
        let mut providers = ProviderRegistry::new();
        providers.register(Box::new(provider));

        let mut catalog = Catalog::new();
        catalog
            .add_resource(TestResource::new("package", "vim").journal(&journal).boxed())
            .unwrap();
        catalog.add_resource(changing("later", &journal).boxed()).unwrap();

        let mut transaction = Transaction::new(catalog, TransactionOptions::default())
            .unwrap()
            .with_providers(providers);
        let err = transaction.evaluate().unwrap_err();
        assert!(matches!(err, TransactionError::ProviderAborted { .. }));
        assert!(synced(&journal).is_empty());
        assert!(journal.with_prefix("post ").is_empty());
        assert!(transaction.resource_status(&notify("later")).skipped);

        let vim = transaction
            .report()
            .resource_status(&ResourceRef::new("package", "vim"))
            .unwrap();
        assert!(vim.failed);
        assert!(!vim.skipped);
        assert!(vim.events[0].message.contains("aborted the transaction"));

        let report = transaction.into_report();
        assert!(!report.transaction_completed);
        assert_eq!(report.status, ReportStatus::Failed);
        assert!(
            report
                .resource_statuses
                .iter()
                .any(|status| status.resource == ResourceRef::new("package", "vim") && status.failed)
        );
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut catalog = Catalog::new();
        catalog
            .add_resource(
                TestResource::new("package", "vim")
                    .with_meta(|m| m.with_provider("yum"))
                    .boxed(),
            )
            .unwrap();
        let mut transaction = Transaction::new(catalog, TransactionOptions::default()).unwrap();
        assert!(matches!(
            transaction.evaluate(),
            Err(TransactionError::UnknownProvider { .. })
        ));
    }

    #[test]
    fn test_eval_generated_children_run_before_dependents() {
        let journal = Journal::default();
        let mut parent = changing("dir", &journal);
        parent.eval_generated = vec![changing("dir/a", &journal), changing("dir/b", &journal)];
        let mut catalog = Catalog::new();
        catalog.add_resource(parent.boxed()).unwrap();
        catalog.add_resource(changing("after", &journal).boxed()).unwrap();
        catalog.add_relationship(notify("dir"), RelationshipKind::Before, notify("after"));

        let transaction = run(catalog, TransactionOptions::default());
        assert_eq!(
            synced(&journal),
            vec!["Notify[dir]", "Notify[dir/a]", "Notify[dir/b]", "Notify[after]"]
        );
        assert!(transaction.catalog().contains(&notify("dir/a")));
    }

    #[test]
    fn test_static_generation_failure_is_reported() {
        let mut parent = TestResource::new("notify", "p");
        parent.generate_error = Some("boom".into());
        let mut catalog = Catalog::new();
        catalog.add_resource(parent.boxed()).unwrap();

        let transaction = run(catalog, TransactionOptions::default());
        let report = transaction.into_report();
        assert!(report.resources_failed_to_generate);
        assert_eq!(report.status, ReportStatus::Failed);
    }

    #[test]
    fn test_skipped_resource_keeps_persisted_values() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let mut first = TransactionStore::load(&path);
        first.set_system_value(&notify("a"), "message", json!("old"));
        first.save().unwrap();

        let journal = Journal::default();
        let mut catalog = Catalog::for_host();
        catalog
            .add_resource(changing("a", &journal).tagged(&["skipme"]).boxed())
            .unwrap();
        let mut transaction = Transaction::new(
            catalog,
            TransactionOptions::default().with_skip_tags(vec!["skipme".into()]),
        )
        .unwrap()
        .with_persistence(Box::new(TransactionStore::load(&path)));
        transaction.evaluate().unwrap();

        let reloaded = TransactionStore::load(&path);
        assert_eq!(reloaded.get_system_value(&notify("a"), "message"), Some(json!("old")));
    }

    #[test]
    fn test_report_times_and_status() {
        let journal = Journal::default();
        let mut catalog = Catalog::new();
        catalog.retrieval_duration = Some(std::time::Duration::from_millis(250));
        catalog.version = Some("42".into());
        catalog.add_resource(changing("a", &journal).boxed()).unwrap();

        let report = run(catalog, TransactionOptions::default()).into_report();
        assert!(report.transaction_completed);
        assert_eq!(report.status, ReportStatus::Changed);
        assert_eq!(report.exit_status(), 2);
        assert_eq!(report.configuration_version.as_deref(), Some("42"));
        assert_eq!(report.external_times.get("config_retrieval"), Some(&0.25));
        assert!(report.external_times.contains_key("transaction_evaluation"));
        assert!(report.resource_statuses[0].scheduled);
    }

    #[test]
    fn test_merged_dependency_warnings_still_skip_every_dependent() {
        let journal = Journal::default();
        let mut catalog = Catalog::new();
        catalog
            .add_resource(changing("root", &journal).failing_sync("message").boxed())
            .unwrap();
        let class = ResourceRef::new("class", "app");
        catalog.add_container(ContainerDecl::new(class.clone())).unwrap();
        for title in ["x", "y"] {
            catalog.add_resource(changing(title, &journal).boxed()).unwrap();
            catalog.contain(&class, &notify(title)).unwrap();
        }
        catalog.add_relationship(class, RelationshipKind::Require, notify("root"));

        let options = TransactionOptions {
            merge_dependency_warnings: true,
            ..TransactionOptions::default()
        };
        let mut transaction = run(catalog, options);
        assert!(transaction.resource_status(&notify("x")).skipped);
        assert!(transaction.resource_status(&notify("y")).skipped);
        assert_eq!(
            transaction.resource_status(&notify("y")).failed_dependencies,
            vec![notify("root")]
        );
    }
}
