//! Values remembered between runs
//!
//! The store keeps the system value of every managed property as of the
//! last run. A change is corrective when the desired value equals what we
//! left behind last time: something drifted the system since.

use crate::reference::ResourceRef;
use crate::types::Value;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Storage for per-property system values
pub trait Persistence: fmt::Debug + Send {
    /// Value recorded by the previous run
    fn get_system_value(&self, resource: &ResourceRef, property: &str) -> Option<Value>;

    /// Value to record for the next run
    fn set_system_value(&mut self, resource: &ResourceRef, property: &str, value: Value);

    /// Carry a skipped resource's previous values forward unchanged
    fn copy_skipped(&mut self, resource: &ResourceRef);

    fn save(&mut self) -> Result<()>;
}

// ============================================================================
// Store Structures
// ============================================================================

/// On-disk layout: resource reference -> property -> system value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resources: BTreeMap<String, BTreeMap<String, Value>>,
}

/// JSON file backed store
#[derive(Debug, Clone, Default)]
pub struct TransactionStore {
    path: Option<PathBuf>,
    old: StoreData,
    new: StoreData,
}

// ============================================================================
// TransactionStore Implementation
// ============================================================================

impl TransactionStore {
    /// Store that never reads or writes a file
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load last run's values from `path`
    ///
    /// A missing file starts empty. A file that cannot be read or parsed is
    /// reported and ignored so one bad run never blocks the next.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let old = match Self::read(&path) {
            Ok(Some(data)) => {
                log::debug!("Loaded transaction store from {}", path.display());
                data
            }
            Ok(None) => {
                log::debug!("Transaction store does not exist, starting empty");
                StoreData::default()
            }
            Err(err) => {
                log::warn!("Transaction store {} was unreadable and will be replaced: {err:#}", path.display());
                StoreData::default()
            }
        };
        Self {
            path: Some(path),
            old,
            new: StoreData::default(),
        }
    }

    fn read(path: &Path) -> Result<Option<StoreData>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read transaction store: {}", path.display()))?;
        let data = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse transaction store: {}", path.display()))?;
        Ok(Some(data))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Value waiting to be saved
    pub fn pending(&self, resource: &ResourceRef, property: &str) -> Option<&Value> {
        self.new.resources.get(&resource.to_string())?.get(property)
    }
}

impl Persistence for TransactionStore {
    fn get_system_value(&self, resource: &ResourceRef, property: &str) -> Option<Value> {
        self.old
            .resources
            .get(&resource.to_string())?
            .get(property)
            .cloned()
    }

    fn set_system_value(&mut self, resource: &ResourceRef, property: &str, value: Value) {
        self.new
            .resources
            .entry(resource.to_string())
            .or_default()
            .insert(property.to_string(), value);
    }

    fn copy_skipped(&mut self, resource: &ResourceRef) {
        let key = resource.to_string();
        if let Some(values) = self.old.resources.get(&key) {
            self.new.resources.insert(key, values.clone());
        }
    }

    fn save(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        self.new.last_updated = Some(Utc::now());
        let content = serde_json::to_string_pretty(&self.new)
            .context("Failed to serialize transaction store")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write transaction store: {}", path.display()))?;

        log::debug!("Saved transaction store to {}", path.display());
        Ok(())
    }
}
