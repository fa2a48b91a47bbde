//! Resource trait for catalog entries
//!
//! A resource is one declared piece of system state: it can report what it
//! looks like now, what it should look like, and sync one property at a
//! time. Everything the transaction needs to know about ordering, tagging,
//! scheduling or refresh comes through this trait.

use crate::context::ApplyContext;
use crate::reference::ResourceRef;
use crate::schedule::Schedule;
use crate::tags::automatic_tags;
use crate::types::{ENSURE, PropertyMap, Value, is_absent};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Attributes every resource carries regardless of its type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMeta {
    pub reference: ResourceRef,
    /// Explicitly selected provider; `None` means the type's default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Declared but not realized; never applied
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
    #[serde(default)]
    pub exported: bool,
    /// Report changes for this resource without making them
    #[serde(default)]
    pub noop: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
}

impl ResourceMeta {
    /// Metadata for `Type[title]`, tagged with its type and title
    pub fn new(type_name: &str, title: impl Into<String>) -> Self {
        let reference = ResourceRef::new(type_name, title);
        let tags = automatic_tags(reference.type_name(), reference.title());
        Self {
            reference,
            provider: None,
            tags,
            is_virtual: false,
            exported: false,
            noop: false,
            schedule: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tag(tags);
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn noop(mut self, noop: bool) -> Self {
        self.noop = noop;
        self
    }

    pub fn virtual_resource(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    pub fn tag<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags
            .extend(tags.into_iter().map(|tag| tag.as_ref().to_lowercase()));
    }

    pub fn tagged(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Core trait for catalog resources
///
/// Only identity, desired state, current state and `sync` are required.
/// The remaining hooks have defaults suited to a plain resource that
/// generates nothing and ignores refreshes.
pub trait Resource: fmt::Debug + Send {
    fn meta(&self) -> &ResourceMeta;

    fn meta_mut(&mut self) -> &mut ResourceMeta;

    fn reference(&self) -> &ResourceRef {
        &self.meta().reference
    }

    fn type_name(&self) -> &str {
        self.reference().type_name()
    }

    /// The name a provider knows this resource by
    fn name(&self) -> &str {
        self.reference().title()
    }

    fn tags(&self) -> &BTreeSet<String> {
        &self.meta().tags
    }

    /// Whether the resource's provider can work on this system
    fn suitable(&self) -> bool {
        true
    }

    fn appliable_to_host(&self) -> bool {
        true
    }

    fn appliable_to_device(&self) -> bool {
        false
    }

    /// Veto the whole run before anything is applied
    fn pre_run_check(&self) -> Result<()> {
        Ok(())
    }

    /// Resources to add to the catalog before the run starts
    fn generate(&mut self) -> Result<Vec<BoxedResource>> {
        Ok(Vec::new())
    }

    /// Whether [`Resource::eval_generate`] should be called during the run
    fn can_eval_generate(&self) -> bool {
        false
    }

    /// Resources to add right before this one is applied
    fn eval_generate(&mut self) -> Result<Vec<BoxedResource>> {
        Ok(Vec::new())
    }

    /// Last chance to fix up a generated resource before it joins the catalog
    fn finish(&mut self) {}

    /// Refresh itself whenever it changes
    fn self_refresh(&self) -> bool {
        false
    }

    /// Whether the desired state removes the resource
    fn deleting(&self) -> bool {
        self.desired_state().get(ENSURE).is_some_and(is_absent)
    }

    fn responds_to(&self, _callback: &str) -> bool {
        false
    }

    fn callback(&mut self, callback: &str) -> Result<()> {
        anyhow::bail!("{} does not respond to '{callback}'", self.reference())
    }

    fn desired_state(&self) -> PropertyMap;

    fn current_state(&self, ctx: &ApplyContext) -> Result<PropertyMap>;

    /// Bring one property to its desired value
    fn sync(&mut self, property: &str, desired: &Value, ctx: &ApplyContext) -> Result<()>;

    /// Called once after all of a resource's properties were synced
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Graph-only resource standing in for a container
    fn is_sentinel(&self) -> bool {
        false
    }
}

/// A boxed resource for type-erased storage
pub type BoxedResource = Box<dyn Resource>;

/// Sentinel resource marking the start or end of a container
///
/// Manages nothing. It accepts refreshes so that notifications sent to a
/// container pass through to its contents and out to its dependents.
#[derive(Debug, Clone)]
pub struct Whit {
    meta: ResourceMeta,
}

impl Whit {
    pub fn new(reference: ResourceRef) -> Self {
        let mut meta = ResourceMeta::new(reference.type_name(), reference.title());
        meta.reference = reference;
        Self { meta }
    }
}

impl Resource for Whit {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ResourceMeta {
        &mut self.meta
    }

    fn appliable_to_device(&self) -> bool {
        true
    }

    fn responds_to(&self, callback: &str) -> bool {
        callback == depgraph::EdgeLabel::REFRESH
    }

    fn callback(&mut self, _callback: &str) -> Result<()> {
        Ok(())
    }

    fn desired_state(&self) -> PropertyMap {
        PropertyMap::new()
    }

    fn current_state(&self, _ctx: &ApplyContext) -> Result<PropertyMap> {
        Ok(PropertyMap::new())
    }

    fn sync(&mut self, _property: &str, _desired: &Value, _ctx: &ApplyContext) -> Result<()> {
        Ok(())
    }

    fn is_sentinel(&self) -> bool {
        true
    }
}
