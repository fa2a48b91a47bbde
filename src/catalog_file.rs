//! Catalog documents
//!
//! A catalog document lists resources, containers and their relationships.
//! It is TOML or JSON, chosen by file extension:
//!
//! ```toml
//! version = "2024-06-01"
//!
//! [[resource]]
//! type = "file"
//! title = "/etc/app.conf"
//! notify = ["Exec[reload app]"]
//! params = { content = "port = 80\n", mode = "0644" }
//!
//! [[resource]]
//! type = "exec"
//! title = "reload app"
//! params = { command = "systemctl reload app", refreshonly = true }
//!
//! [[container]]
//! name = "Class[app]"
//! contains = ["File[/etc/app.conf]", "Exec[reload app]"]
//! ```

use anyhow::{Context, Result, bail};
use converge::{
    Catalog, ContainerDecl, PropertyMap, RelationshipKind, ResourceMeta, ResourceRef, Schedule,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Instant;

/// Add `source <kind> target` for every target named in `groups`
fn declare_relationships(
    catalog: &mut Catalog,
    source: &ResourceRef,
    groups: [(RelationshipKind, &[String]); 4],
) -> Result<()> {
    for (kind, targets) in groups {
        for target in targets {
            let target = ResourceRef::parse(target)
                .with_context(|| format!("{source}: bad {kind} target"))?;
            catalog.add_relationship(source.clone(), kind, target);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceDecl {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub noop: bool,
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub params: PropertyMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub require: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notify: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscribe: Vec<String>,
}

impl ResourceDecl {
    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(&self.kind, self.title.clone())
    }

    fn relationships(&self) -> [(RelationshipKind, &[String]); 4] {
        [
            (RelationshipKind::Before, self.before.as_slice()),
            (RelationshipKind::Require, self.require.as_slice()),
            (RelationshipKind::Notify, self.notify.as_slice()),
            (RelationshipKind::Subscribe, self.subscribe.as_slice()),
        ]
    }

    fn meta(&self) -> ResourceMeta {
        let mut meta = ResourceMeta::new(&self.kind, self.title.clone())
            .with_tags(&self.tags)
            .noop(self.noop);
        meta.provider.clone_from(&self.provider);
        meta.schedule.clone_from(&self.schedule);
        if self.is_virtual {
            meta = meta.virtual_resource();
        }
        meta
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerDoc {
    /// Reference such as `Class[web]`
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contains: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub require: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notify: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscribe: Vec<String>,
}

impl ContainerDoc {
    fn relationships(&self) -> [(RelationshipKind, &[String]); 4] {
        [
            (RelationshipKind::Before, self.before.as_slice()),
            (RelationshipKind::Require, self.require.as_slice()),
            (RelationshipKind::Notify, self.notify.as_slice()),
            (RelationshipKind::Subscribe, self.subscribe.as_slice()),
        ]
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, rename = "resource")]
    pub resources: Vec<ResourceDecl>,
    #[serde(default, rename = "container")]
    pub containers: Vec<ContainerDoc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Toml,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("toml") => Ok(Self::Toml),
            _ => bail!(
                "Cannot tell the format of {} (expected a .toml or .json file)",
                path.display()
            ),
        }
    }
}

impl CatalogDocument {
    pub fn parse(text: &str, format: DocumentFormat) -> Result<Self> {
        match format {
            DocumentFormat::Json => serde_json::from_str(text).context("Invalid JSON catalog"),
            DocumentFormat::Toml => toml::from_str(text).context("Invalid TOML catalog"),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let format = DocumentFormat::from_path(path)?;
        let text = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        log::debug!("Loading catalog from {} ({format:?})", path.display());
        Self::parse(&text, format).with_context(|| format!("Could not load {}", path.display()))
    }

    /// Build the catalog this document describes
    ///
    /// Resources are added in document order, which is also the order
    /// independent resources are applied in.
    pub fn into_catalog(self) -> Result<Catalog> {
        let mut catalog = Catalog::for_host();
        catalog.version = self.version;

        for decl in &self.resources {
            let resource = crate::resource::build(decl.meta(), &decl.params)?;
            catalog.add_resource(resource)?;
        }

        let mut containers = Vec::with_capacity(self.containers.len());
        for doc in &self.containers {
            let reference = ResourceRef::parse(&doc.name)
                .with_context(|| format!("Bad container name '{}'", doc.name))?;
            let mut decl = ContainerDecl::new(reference.clone());
            decl.tags
                .extend(doc.tags.iter().map(|tag| tag.to_lowercase()));
            catalog.add_container(decl)?;
            containers.push(reference);
        }
        for (doc, container) in self.containers.iter().zip(&containers) {
            for child in &doc.contains {
                let child = ResourceRef::parse(child)
                    .with_context(|| format!("{container}: bad contained reference"))?;
                catalog.contain(container, &child)?;
            }
            declare_relationships(&mut catalog, container, doc.relationships())?;
        }

        for decl in &self.resources {
            declare_relationships(&mut catalog, &decl.reference(), decl.relationships())?;
        }
        Ok(catalog)
    }
}

/// Load a catalog document and build its catalog, timing the whole thing
pub fn load_catalog(path: &Path) -> Result<Catalog> {
    let started = Instant::now();
    let mut catalog = CatalogDocument::load(path)?.into_catalog()?;
    catalog.retrieval_duration = Some(started.elapsed());
    log::info!(
        "Loaded {} resources from {} in {:.2}s",
        catalog.len(),
        path.display(),
        started.elapsed().as_secs_f64()
    );
    Ok(catalog)
}
