//! Adding resources that other resources generate
//!
//! Generation happens twice: once for the whole catalog before the run
//! (`generate`), and once per resource right before it is applied
//! (`eval_generate`). Generated resources inherit their parent's tags and
//! always run after the parent.

use crate::catalog::Catalog;
use crate::reference::ResourceRef;
use crate::resource::{BoxedResource, Resource, Whit};
use depgraph::{Direction, Edge, EdgeLabel, RelationshipGraph};

type Graph = RelationshipGraph<ResourceRef>;

#[derive(Debug, Default)]
pub struct AdditionalResourceGenerator {
    resources_failed_to_generate: bool,
}

impl AdditionalResourceGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any generation hook returned an error
    pub fn resources_failed_to_generate(&self) -> bool {
        self.resources_failed_to_generate
    }

    /// Call `generate` on `parent`, then on whatever it generated
    pub fn generate_additional_resources(
        &mut self,
        catalog: &mut Catalog,
        graph: &mut Graph,
        parent: &ResourceRef,
    ) {
        self.generate_after(catalog, graph, parent);
    }

    /// Returns the last resource added below `parent`, so siblings land
    /// after a child's own descendants
    fn generate_after(&mut self, catalog: &mut Catalog, graph: &mut Graph, parent: &ResourceRef) -> Option<ResourceRef> {
        let resource = catalog.resource_mut(parent)?;
        let generated = match resource.generate() {
            Ok(generated) => generated,
            Err(err) => {
                log::error!("{parent}: Failed to generate additional resources using 'generate': {err:#}");
                self.resources_failed_to_generate = true;
                return None;
            }
        };
        if generated.is_empty() {
            return None;
        }
        log::debug!("{parent}: Generated {} resource(s)", generated.len());

        let container = catalog.container_of(parent).cloned();
        let mut last = None;
        for child in generated {
            let reference = child.reference().clone();
            let after = last.clone().unwrap_or_else(|| parent.clone());
            let added = self.add_generated(catalog, graph, parent, &after, child);
            add_conditional_dependency(graph, parent, &reference, EdgeLabel::default());
            if !added {
                continue;
            }
            if let Some(container) = &container {
                self.keep_in_container(catalog, graph, container, &reference);
            }
            last = Some(
                self.generate_after(catalog, graph, &reference)
                    .unwrap_or(reference),
            );
        }
        last
    }

    /// Call `eval_generate` on `parent` while the graph is being walked
    ///
    /// Whatever depended on the parent now waits for the parent's completed
    /// sentinel, which in turn waits for the parent and every child.
    /// Returns whether anything was generated.
    pub fn eval_generate(&mut self, catalog: &mut Catalog, graph: &mut Graph, parent: &ResourceRef) -> bool {
        let Some(resource) = catalog.resource_mut(parent) else {
            return false;
        };
        if !resource.can_eval_generate() {
            return false;
        }
        let generated = match resource.eval_generate() {
            Ok(generated) => generated,
            Err(err) => {
                log::error!("{parent}: Failed to generate additional resources using 'eval_generate': {err:#}");
                self.resources_failed_to_generate = true;
                return false;
            }
        };
        if generated.is_empty() {
            return false;
        }
        log::debug!("{parent}: Generated {} resource(s) during evaluation", generated.len());

        let sentinel = ResourceRef::completed(parent);
        if !catalog.contains(&sentinel) {
            let mut whit = Whit::new(sentinel.clone());
            if let Some(resource) = catalog.resource(parent) {
                let tags = resource.tags().clone();
                whit.meta_mut().tag(&tags);
            }
            if let Err(err) = catalog.add_resource_after(parent, Box::new(whit)) {
                log::error!("{parent}: {err}");
            }
        }
        match graph.resource_priority(parent).cloned() {
            Some(priority) => graph.add_vertex_with_priority(sentinel.clone(), priority),
            None => {
                graph.add_vertex(sentinel.clone());
            }
        }

        for edge in graph.adjacent_edges(parent, Direction::Out) {
            add_conditional_dependency(graph, &sentinel, &edge.target, edge.label.clone());
            graph.remove_edge(&edge);
        }

        let mut previous = parent.clone();
        for child in generated {
            let reference = child.reference().clone();
            if self.add_generated(catalog, graph, parent, &previous, child) {
                previous = reference.clone();
            }
            add_conditional_dependency(graph, parent, &reference, EdgeLabel::default());
            add_conditional_dependency(graph, &reference, &sentinel, EdgeLabel::refresh());
        }
        add_conditional_dependency(graph, parent, &sentinel, EdgeLabel::refresh());
        true
    }

    /// Add `child` to the catalog and graph unless the catalog already has
    /// it; returns whether it was new
    fn add_generated(
        &mut self,
        catalog: &mut Catalog,
        graph: &mut Graph,
        parent: &ResourceRef,
        after: &ResourceRef,
        mut child: BoxedResource,
    ) -> bool {
        let reference = child.reference().clone();
        if catalog.contains(&reference) {
            log::debug!("{parent}: {reference} is already in the catalog, reusing it");
            return false;
        }

        let tags = catalog
            .resource(parent)
            .map(|resource| resource.tags().clone())
            .unwrap_or_default();
        child.meta_mut().tag(&tags);
        child.finish();

        if let Err(err) = catalog.add_resource_after(after, child) {
            log::error!("{parent}: {err}");
            self.resources_failed_to_generate = true;
            return false;
        }
        graph.add_vertex_contained_in(parent, reference);
        true
    }

    fn keep_in_container(
        &mut self,
        catalog: &mut Catalog,
        graph: &mut Graph,
        container: &ResourceRef,
        child: &ResourceRef,
    ) {
        if let Err(err) = catalog.contain(container, child) {
            log::error!("{child}: {err}");
            return;
        }
        let completed = ResourceRef::completed(container);
        if graph.contains_vertex(&completed) {
            graph.add_edge(child.clone(), completed, EdgeLabel::refresh());
        }
    }
}

/// Add `source -> target` unless `target -> source` already exists
fn add_conditional_dependency(graph: &mut Graph, source: &ResourceRef, target: &ResourceRef, label: EdgeLabel) {
    if source == target || graph.contains_edge(target, source) {
        return;
    }
    graph.add(Edge::new(source.clone(), target.clone(), label));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ContainerDecl, RelationshipKind};
    use crate::testing::TestResource;

    fn file(path: &str) -> ResourceRef {
        ResourceRef::new("file", path)
    }

    #[test]
    fn test_generate_adds_children_after_parent() {
        let mut parent = TestResource::new("file", "/d").tagged(&["web"]);
        let mut child = TestResource::new("file", "/d/a");
        child.generated = vec![TestResource::new("file", "/d/a/x")];
        parent.generated = vec![child, TestResource::new("file", "/d/b")];

        let mut catalog = Catalog::new();
        catalog.add_resource(parent.boxed()).unwrap();
        catalog.add_resource(TestResource::new("file", "/z").boxed()).unwrap();
        let mut graph = catalog.relationship_graph().unwrap();

        let mut generator = AdditionalResourceGenerator::new();
        generator.generate_additional_resources(&mut catalog, &mut graph, &file("/d"));

        assert_eq!(
            catalog.resource_refs(),
            vec![file("/d"), file("/d/a"), file("/d/a/x"), file("/d/b"), file("/z")]
        );
        assert!(graph.contains_edge(&file("/d"), &file("/d/a")));
        assert!(graph.contains_edge(&file("/d/a"), &file("/d/a/x")));
        assert!(catalog.resource(&file("/d/a/x")).unwrap().tags().contains("web"));
        assert!(!generator.resources_failed_to_generate());
    }

    #[test]
    fn test_generate_reuses_existing_resource() {
        let mut parent = TestResource::new("file", "/d");
        parent.generated = vec![TestResource::new("file", "/d/a")];
        let mut catalog = Catalog::new();
        catalog.add_resource(parent.boxed()).unwrap();
        catalog
            .add_resource(TestResource::new("file", "/d/a").tagged(&["mine"]).boxed())
            .unwrap();
        let mut graph = catalog.relationship_graph().unwrap();

        AdditionalResourceGenerator::new().generate_additional_resources(&mut catalog, &mut graph, &file("/d"));

        assert_eq!(catalog.resource_refs().len(), 2);
        assert!(catalog.resource(&file("/d/a")).unwrap().tags().contains("mine"));
        assert!(graph.contains_edge(&file("/d"), &file("/d/a")));
    }

    #[test]
    fn test_generate_keeps_children_in_container() {
        let mut parent = TestResource::new("file", "/d");
        parent.generated = vec![TestResource::new("file", "/d/a")];
        let mut catalog = Catalog::new();
        catalog.add_resource(parent.boxed()).unwrap();
        let web = ResourceRef::new("class", "web");
        catalog.add_container(ContainerDecl::new(web.clone())).unwrap();
        catalog.contain(&web, &file("/d")).unwrap();
        let mut graph = catalog.relationship_graph().unwrap();

        AdditionalResourceGenerator::new().generate_additional_resources(&mut catalog, &mut graph, &file("/d"));

        assert!(graph.contains_edge(&file("/d/a"), &ResourceRef::completed(&web)));
        assert_eq!(catalog.container_of(&file("/d/a")), Some(&web));
    }

    #[test]
    fn test_generate_failure_is_recorded() {
        let mut parent = TestResource::new("file", "/d");
        parent.generate_error = Some("cannot list".into());
        let mut catalog = Catalog::new();
        catalog.add_resource(parent.boxed()).unwrap();
        let mut graph = catalog.relationship_graph().unwrap();

        let mut generator = AdditionalResourceGenerator::new();
        generator.generate_additional_resources(&mut catalog, &mut graph, &file("/d"));
        assert!(generator.resources_failed_to_generate());
    }

    #[test]
    fn test_eval_generate_wires_sentinel() {
        let mut parent = TestResource::new("file", "/d");
        parent.eval_generated = vec![TestResource::new("file", "/d/a"), TestResource::new("file", "/d/b")];
        let mut catalog = Catalog::new();
        catalog.add_resource(parent.boxed()).unwrap();
        catalog.add_resource(TestResource::new("exec", "after").boxed()).unwrap();
        let after = ResourceRef::new("exec", "after");
        catalog.add_relationship(file("/d"), RelationshipKind::Notify, after.clone());
        let mut graph = catalog.relationship_graph().unwrap();

        let mut generator = AdditionalResourceGenerator::new();
        assert!(generator.eval_generate(&mut catalog, &mut graph, &file("/d")));

        let sentinel = ResourceRef::completed(&file("/d"));
        assert!(catalog.resource(&sentinel).unwrap().is_sentinel());
        assert!(!graph.contains_edge(&file("/d"), &after));
        assert_eq!(graph.edges_between(&sentinel, &after)[0].label, EdgeLabel::refresh());
        assert!(graph.contains_edge(&file("/d"), &file("/d/a")));
        assert_eq!(graph.edges_between(&file("/d/a"), &sentinel)[0].label, EdgeLabel::refresh());
        assert_eq!(graph.edges_between(&file("/d"), &sentinel)[0].label, EdgeLabel::refresh());
        assert!(graph.contains_edge(&file("/d/b"), &sentinel));
    }

    #[test]
    fn test_eval_generate_nothing() {
        let mut catalog = Catalog::new();
        catalog.add_resource(TestResource::new("file", "/d").boxed()).unwrap();
        let mut graph = catalog.relationship_graph().unwrap();
        assert!(!AdditionalResourceGenerator::new().eval_generate(&mut catalog, &mut graph, &file("/d")));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_eval_generate_does_not_invert_existing_edge() {
        let mut parent = TestResource::new("file", "/d");
        parent.eval_generated = vec![TestResource::new("file", "/first")];
        let mut catalog = Catalog::new();
        catalog.add_resource(TestResource::new("file", "/first").boxed()).unwrap();
        catalog.add_resource(parent.boxed()).unwrap();
        catalog.add_relationship(file("/first"), RelationshipKind::Before, file("/d"));
        let mut graph = catalog.relationship_graph().unwrap();

        AdditionalResourceGenerator::new().eval_generate(&mut catalog, &mut graph, &file("/d"));
        assert!(!graph.contains_edge(&file("/d"), &file("/first")));
        assert!(graph.find_cycles_in_graph().is_empty());
    }
}
