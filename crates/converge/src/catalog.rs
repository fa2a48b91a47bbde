//! The catalog: declared resources, their containers and relationships

use crate::error::{Result, TransactionError};
use crate::reference::ResourceRef;
use crate::resource::{BoxedResource, Resource, Whit};
use crate::tags::automatic_tags;
use depgraph::{Container, Edge, EdgeLabel, RelationshipGraph};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

/// How two resources are related, read as `source <kind> target`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipKind {
    /// source is applied before target
    Before,
    /// source is applied after target
    Require,
    /// like `Before`, and target is refreshed when source changes
    Notify,
    /// like `Require`, and source is refreshed when target changes
    Subscribe,
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Before => "before",
            Self::Require => "require",
            Self::Notify => "notify",
            Self::Subscribe => "subscribe",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: ResourceRef,
    pub kind: RelationshipKind,
    pub target: ResourceRef,
}

impl Relationship {
    pub fn new(source: ResourceRef, kind: RelationshipKind, target: ResourceRef) -> Self {
        Self {
            source,
            kind,
            target,
        }
    }

    /// Graph edge pointing from the dependency to the dependent
    pub fn edge(&self) -> Edge<ResourceRef> {
        let (source, target) = (self.source.clone(), self.target.clone());
        match self.kind {
            RelationshipKind::Before => Edge::unlabeled(source, target),
            RelationshipKind::Require => Edge::unlabeled(target, source),
            RelationshipKind::Notify => Edge::new(source, target, EdgeLabel::refresh()),
            RelationshipKind::Subscribe => Edge::new(target, source, EdgeLabel::refresh()),
        }
    }
}

/// A grouping of resources, e.g. `Class[web]`
///
/// Containers are never applied; in the relationship graph each is replaced
/// by an admissible and a completed sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDecl {
    pub reference: ResourceRef,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl ContainerDecl {
    pub fn new(reference: ResourceRef) -> Self {
        let tags = automatic_tags(reference.type_name(), reference.title());
        Self { reference, tags }
    }
}

#[derive(Debug, Default)]
pub struct Catalog {
    resources: HashMap<ResourceRef, BoxedResource>,
    /// Resources and containers in declaration order
    order: Vec<ResourceRef>,
    containers: HashMap<ResourceRef, ContainerDecl>,
    /// `(container, child)` pairs
    containment: Vec<(ResourceRef, ResourceRef)>,
    relationships: Vec<Relationship>,
    /// Whether this catalog configures the local host (and persists state)
    pub host_config: bool,
    pub retrieval_duration: Option<Duration>,
    pub version: Option<String>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_host() -> Self {
        Self {
            host_config: true,
            ..Self::default()
        }
    }

    // ========================================================================
    // Resources
    // ========================================================================

    pub fn add_resource(&mut self, resource: BoxedResource) -> Result<()> {
        let reference = self.check_new(&*resource)?;
        self.order.push(reference.clone());
        self.resources.insert(reference, resource);
        Ok(())
    }

    /// Add a resource directly after `after` in declaration order
    pub fn add_resource_after(&mut self, after: &ResourceRef, resource: BoxedResource) -> Result<()> {
        let reference = self.check_new(&*resource)?;
        let position = self
            .order
            .iter()
            .position(|existing| existing == after)
            .map_or(self.order.len(), |index| index + 1);
        self.order.insert(position, reference.clone());
        self.resources.insert(reference, resource);
        Ok(())
    }

    fn check_new(&self, resource: &dyn Resource) -> Result<ResourceRef> {
        let reference = resource.reference().clone();
        if self.resources.contains_key(&reference) || self.containers.contains_key(&reference) {
            return Err(TransactionError::DuplicateResource(reference));
        }
        Ok(reference)
    }

    pub fn resource(&self, reference: &ResourceRef) -> Option<&dyn Resource> {
        self.resources.get(reference).map(|resource| &**resource)
    }

    pub fn resource_mut(&mut self, reference: &ResourceRef) -> Option<&mut BoxedResource> {
        self.resources.get_mut(reference)
    }

    pub fn contains(&self, reference: &ResourceRef) -> bool {
        self.resources.contains_key(reference)
    }

    /// Declared (non-sentinel) resources in declaration order
    pub fn resource_refs(&self) -> Vec<ResourceRef> {
        self.order
            .iter()
            .filter(|reference| !reference.is_whit() && self.resources.contains_key(*reference))
            .cloned()
            .collect()
    }

    pub fn resources(&self) -> impl Iterator<Item = &dyn Resource> {
        self.order
            .iter()
            .filter(|reference| !reference.is_whit())
            .filter_map(|reference| self.resource(reference))
    }

    /// Number of resources, sentinels included
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    // ========================================================================
    // Containers
    // ========================================================================

    pub fn add_container(&mut self, container: ContainerDecl) -> Result<()> {
        let reference = container.reference.clone();
        if self.resources.contains_key(&reference) || self.containers.contains_key(&reference) {
            return Err(TransactionError::DuplicateResource(reference));
        }
        self.order.push(reference.clone());
        self.containers.insert(reference, container);
        Ok(())
    }

    pub fn is_container(&self, reference: &ResourceRef) -> bool {
        self.containers.contains_key(reference)
    }

    pub fn container(&self, reference: &ResourceRef) -> Option<&ContainerDecl> {
        self.containers.get(reference)
    }

    /// Put `child` inside `container`; the child inherits the container's tags
    pub fn contain(&mut self, container: &ResourceRef, child: &ResourceRef) -> Result<()> {
        let tags = self
            .containers
            .get(container)
            .map(|decl| decl.tags.clone())
            .ok_or_else(|| TransactionError::UnknownResource(container.clone()))?;

        if let Some(resource) = self.resources.get_mut(child) {
            resource.meta_mut().tag(&tags);
        } else if let Some(nested) = self.containers.get_mut(child) {
            nested.tags.extend(tags);
        } else {
            return Err(TransactionError::UnknownResource(child.clone()));
        }

        self.containment.push((container.clone(), child.clone()));
        Ok(())
    }

    /// Container that directly holds `reference`
    pub fn container_of(&self, reference: &ResourceRef) -> Option<&ResourceRef> {
        self.containment
            .iter()
            .find(|(_, child)| child == reference)
            .map(|(container, _)| container)
    }

    // ========================================================================
    // Relationships
    // ========================================================================

    pub fn add_relationship(&mut self, source: ResourceRef, kind: RelationshipKind, target: ResourceRef) {
        self.relationships
            .push(Relationship::new(source, kind, target));
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    fn known(&self, reference: &ResourceRef) -> Result<()> {
        if self.resources.contains_key(reference) || self.containers.contains_key(reference) {
            Ok(())
        } else {
            Err(TransactionError::UnknownResource(reference.clone()))
        }
    }

    /// Build the graph the transaction walks
    ///
    /// Vertices are added in declaration order, so that order decides between
    /// resources that are not related. Containers are then spliced out, and
    /// the sentinels that replace them join the catalog as [`Whit`] resources.
    pub fn relationship_graph(&mut self) -> Result<RelationshipGraph<ResourceRef>> {
        let mut graph = RelationshipGraph::new();
        for reference in &self.order {
            if self.resources.contains_key(reference) || self.containers.contains_key(reference) {
                graph.add_vertex(reference.clone());
            }
        }

        for relationship in &self.relationships {
            self.known(&relationship.source)?;
            self.known(&relationship.target)?;
            graph.add(relationship.edge());
        }

        let mut containers = Vec::new();
        for reference in self.order.iter().filter(|r| self.containers.contains_key(*r)) {
            let contents = self
                .containment
                .iter()
                .filter(|(container, _)| container == reference)
                .map(|(_, child)| child.clone())
                .collect();
            containers.push(Container {
                vertex: reference.clone(),
                contents,
                admissible: ResourceRef::admissible(reference),
                completed: ResourceRef::completed(reference),
            });
        }

        for container in &containers {
            let tags = self
                .containers
                .get(&container.vertex)
                .map(|decl| decl.tags.clone())
                .unwrap_or_default();
            for sentinel in [&container.admissible, &container.completed] {
                if !self.resources.contains_key(sentinel) {
                    let mut whit = Whit::new(sentinel.clone());
                    whit.meta_mut().tag(&tags);
                    self.resources.insert(sentinel.clone(), Box::new(whit));
                }
            }
        }

        graph.replace_containers_with_sentinels(&containers);
        log::debug!(
            "Relationship graph has {} vertices and {} edges",
            graph.len(),
            graph.edge_count()
        );
        Ok(graph)
    }
}
