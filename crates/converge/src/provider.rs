//! Providers: the per-type backends that can inspect many resources at once

use crate::error::{Result, TransactionError};
use crate::reference::ResourceRef;
use crate::resource::Resource;
use crate::types::PropertyMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

/// `(resource type, provider name)`, shown as `type/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProviderId {
    pub resource_type: String,
    pub name: String,
}

impl ProviderId {
    pub fn new(resource_type: &str, name: &str) -> Self {
        Self {
            resource_type: resource_type.to_lowercase(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.name)
    }
}

/// How a prefetch went wrong, and so how far the damage spreads
#[derive(Error, Debug)]
pub enum PrefetchError {
    /// The provider's tooling is missing; resources fall back to their own retrieval
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Listing failed; every resource using the provider fails
    #[error("prefetch failed: {0}")]
    Failed(String),

    /// The run cannot go on
    #[error("{0}")]
    Fatal(String),
}

/// A backend serving all resources of one type that select it
pub trait Provider: fmt::Debug + Send {
    fn id(&self) -> &ProviderId;

    fn supports_prefetch(&self) -> bool {
        false
    }

    /// Current state of many resources in one go
    ///
    /// `resources` maps each resource's name to its reference. Names
    /// missing from the result retrieve their own state.
    fn prefetch(
        &mut self,
        _resources: &BTreeMap<String, ResourceRef>,
    ) -> std::result::Result<BTreeMap<String, PropertyMap>, PrefetchError> {
        Ok(BTreeMap::new())
    }

    /// Called once after traversal if any resource used this provider
    fn post_resource_eval(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Registered providers, with one default per resource type
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderId, Box<dyn Provider>>,
    defaults: HashMap<String, String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider; the first one for a type becomes its default
    pub fn register(&mut self, provider: Box<dyn Provider>) {
        let id = provider.id().clone();
        log::debug!("Registering provider {id}");
        self.defaults
            .entry(id.resource_type.clone())
            .or_insert_with(|| id.name.clone());
        self.providers.insert(id, provider);
    }

    pub fn set_default(&mut self, resource_type: &str, name: &str) -> Result<()> {
        let id = ProviderId::new(resource_type, name);
        if !self.providers.contains_key(&id) {
            return Err(TransactionError::UnknownProvider {
                resource_type: id.resource_type,
                name: id.name,
            });
        }
        self.defaults.insert(id.resource_type, id.name);
        Ok(())
    }

    pub fn default_for(&self, resource_type: &str) -> Option<&str> {
        self.defaults.get(resource_type).map(String::as_str)
    }

    pub fn is_default(&self, id: &ProviderId) -> bool {
        self.default_for(&id.resource_type) == Some(id.name.as_str())
    }

    pub fn get_mut(&mut self, id: &ProviderId) -> Option<&mut (dyn Provider + 'static)> {
        self.providers.get_mut(id).map(|provider| &mut **provider)
    }

    pub fn contains(&self, id: &ProviderId) -> bool {
        self.providers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Provider serving `resource`
    ///
    /// An explicitly named provider must be registered. Without one the
    /// type's default is used; types with no providers resolve to `None`.
    pub fn resolve(&self, resource: &dyn Resource) -> Result<Option<ProviderId>> {
        let resource_type = resource.type_name();
        match &resource.meta().provider {
            Some(name) => {
                let id = ProviderId::new(resource_type, name);
                if self.providers.contains_key(&id) {
                    Ok(Some(id))
                } else {
                    Err(TransactionError::UnknownProvider {
                        resource_type: id.resource_type,
                        name: id.name,
                    })
                }
            }
            None => Ok(self
                .default_for(resource_type)
                .map(|name| ProviderId::new(resource_type, name))),
        }
    }
}
