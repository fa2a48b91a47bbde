//! Test doubles shared by the unit tests

use crate::context::ApplyContext;
use crate::provider::{PrefetchError, Provider, ProviderId};
use crate::reference::ResourceRef;
use crate::resource::{BoxedResource, Resource, ResourceMeta};
use crate::types::{PropertyMap, Value};
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

/// Shared record of what test resources were asked to do
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: String) {
        if let Ok(mut entries) = self.0.lock() {
            entries.push(entry);
        }
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().map(|entries| entries.clone()).unwrap_or_default()
    }

    /// Entries starting with `prefix`, with the prefix removed
    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .iter()
            .filter_map(|entry| entry.strip_prefix(prefix).map(str::to_string))
            .collect()
    }
}

/// In-memory resource whose "system" is a property map
#[derive(Debug, Clone)]
pub struct TestResource {
    pub meta: ResourceMeta,
    pub desired: PropertyMap,
    pub system: Arc<Mutex<PropertyMap>>,
    pub journal: Journal,
    pub failing_sync: BTreeSet<String>,
    pub failing_retrieve: bool,
    pub refreshable: bool,
    pub failing_refresh: bool,
    pub self_refreshing: bool,
    pub suitable: bool,
    pub device_only: bool,
    pub pre_run_error: Option<String>,
    pub generated: Vec<TestResource>,
    pub eval_generated: Vec<TestResource>,
    pub generate_error: Option<String>,
}

impl TestResource {
    pub fn new(type_name: &str, title: &str) -> Self {
        Self {
            meta: ResourceMeta::new(type_name, title),
            desired: PropertyMap::new(),
            system: Arc::default(),
            journal: Journal::default(),
            failing_sync: BTreeSet::new(),
            failing_retrieve: false,
            refreshable: false,
            failing_refresh: false,
            self_refreshing: false,
            suitable: true,
            device_only: false,
            pre_run_error: None,
            generated: Vec::new(),
            eval_generated: Vec::new(),
            generate_error: None,
        }
    }

    pub fn wants(mut self, property: &str, value: Value) -> Self {
        self.desired.insert(property.to_string(), value);
        self
    }

    pub fn has(self, property: &str, value: Value) -> Self {
        if let Ok(mut system) = self.system.lock() {
            system.insert(property.to_string(), value);
        }
        self
    }

    pub fn journal(mut self, journal: &Journal) -> Self {
        self.journal = journal.clone();
        self
    }

    pub fn failing_sync(mut self, property: &str) -> Self {
        self.failing_sync.insert(property.to_string());
        self
    }

    pub fn refreshable(mut self) -> Self {
        self.refreshable = true;
        self
    }

    pub fn tagged(mut self, tags: &[&str]) -> Self {
        self.meta.tag(tags);
        self
    }

    pub fn with_meta(mut self, edit: impl FnOnce(ResourceMeta) -> ResourceMeta) -> Self {
        self.meta = edit(self.meta);
        self
    }

    pub fn system_value(&self, property: &str) -> Option<Value> {
        self.system.lock().ok()?.get(property).cloned()
    }

    pub fn boxed(self) -> BoxedResource {
        Box::new(self)
    }
}

impl Resource for TestResource {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ResourceMeta {
        &mut self.meta
    }

    fn suitable(&self) -> bool {
        self.suitable
    }

    fn appliable_to_host(&self) -> bool {
        !self.device_only
    }

    fn appliable_to_device(&self) -> bool {
        self.device_only
    }

    fn pre_run_check(&self) -> Result<()> {
        match &self.pre_run_error {
            Some(message) => anyhow::bail!("{message}"),
            None => Ok(()),
        }
    }

    fn generate(&mut self) -> Result<Vec<BoxedResource>> {
        if let Some(message) = &self.generate_error {
            anyhow::bail!("{message}");
        }
        Ok(std::mem::take(&mut self.generated)
            .into_iter()
            .map(TestResource::boxed)
            .collect())
    }

    fn can_eval_generate(&self) -> bool {
        !self.eval_generated.is_empty() || self.generate_error.is_some()
    }

    fn eval_generate(&mut self) -> Result<Vec<BoxedResource>> {
        if let Some(message) = &self.generate_error {
            anyhow::bail!("{message}");
        }
        Ok(std::mem::take(&mut self.eval_generated)
            .into_iter()
            .map(TestResource::boxed)
            .collect())
    }

    fn self_refresh(&self) -> bool {
        self.self_refreshing
    }

    fn responds_to(&self, callback: &str) -> bool {
        self.refreshable && callback == "refresh"
    }

    fn callback(&mut self, callback: &str) -> Result<()> {
        self.journal.record(format!("{callback} {}", self.meta.reference));
        if self.failing_refresh {
            anyhow::bail!("{callback} failed");
        }
        Ok(())
    }

    fn desired_state(&self) -> PropertyMap {
        self.desired.clone()
    }

    fn current_state(&self, _ctx: &ApplyContext) -> Result<PropertyMap> {
        if self.failing_retrieve {
            anyhow::bail!("cannot read {}", self.meta.reference);
        }
        let system = self
            .system
            .lock()
            .map_err(|_| anyhow::anyhow!("system state poisoned"))?;
        Ok(system.clone())
    }

    fn sync(&mut self, property: &str, desired: &Value, _ctx: &ApplyContext) -> Result<()> {
        self.journal
            .record(format!("sync {} {property}", self.meta.reference));
        if self.failing_sync.contains(property) {
            anyhow::bail!("sync of {property} refused");
        }
        let mut system = self
            .system
            .lock()
            .map_err(|_| anyhow::anyhow!("system state poisoned"))?;
        system.insert(property.to_string(), desired.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.journal.record(format!("flush {}", self.meta.reference));
        Ok(())
    }
}

/// Provider that answers prefetch from a fixed table
#[derive(Debug)]
pub struct TestProvider {
    pub id: ProviderId,
    pub state: BTreeMap<String, PropertyMap>,
    pub failure: Option<fn(String) -> PrefetchError>,
    pub journal: Journal,
}

impl TestProvider {
    pub fn new(resource_type: &str, name: &str, journal: &Journal) -> Self {
        Self {
            id: ProviderId::new(resource_type, name),
            state: BTreeMap::new(),
            failure: None,
            journal: journal.clone(),
        }
    }
}

impl Provider for TestProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn supports_prefetch(&self) -> bool {
        true
    }

    fn prefetch(
        &mut self,
        resources: &BTreeMap<String, ResourceRef>,
    ) -> Result<BTreeMap<String, PropertyMap>, PrefetchError> {
        let names: Vec<&str> = resources.keys().map(String::as_str).collect();
        self.journal
            .record(format!("prefetch {} {}", self.id, names.join(",")));
        if let Some(failure) = self.failure {
            return Err(failure(format!("{} cannot list", self.id)));
        }
        Ok(self
            .state
            .iter()
            .filter(|(name, _)| resources.contains_key(*name))
            .map(|(name, state)| (name.clone(), state.clone()))
            .collect())
    }

    fn post_resource_eval(&mut self) -> Result<()> {
        self.journal.record(format!("post {}", self.id));
        Ok(())
    }
}
