//! Built-in resource kinds
//!
//! Each kind is built from a declaration's `params` table:
//! - `notify`: `message`
//! - `file`: `path`, `ensure`, `content`, `mode`, `recurse`, `source`
//! - `exec`: `command`, `refreshonly`, `creates`, `cwd`

pub mod exec;
pub mod file;
pub mod notify;

use anyhow::{Result, bail};
use converge::{BoxedResource, PropertyMap, ResourceMeta, ResourceRef, Value};

/// Every kind a catalog document may declare
pub const KINDS: &[&str] = &[notify::TYPE, file::TYPE, exec::TYPE];

/// Build the resource described by `meta` and `params`
pub fn build(meta: ResourceMeta, params: &PropertyMap) -> Result<BoxedResource> {
    let reference = meta.reference.clone();
    let params = Params::new(&reference, params);
    let resource: BoxedResource = match reference.type_name() {
        notify::TYPE => Box::new(notify::Notify::from_params(meta, &params)?),
        file::TYPE => Box::new(file::File::from_params(meta, &params)?),
        exec::TYPE => Box::new(exec::Exec::from_params(meta, &params)?),
        other => bail!(
            "{reference}: unknown resource type '{other}' (known: {})",
            KINDS.join(", ")
        ),
    };
    Ok(resource)
}

/// Typed access to a declaration's parameters
pub struct Params<'a> {
    reference: &'a ResourceRef,
    values: &'a PropertyMap,
}

impl<'a> Params<'a> {
    pub fn new(reference: &'a ResourceRef, values: &'a PropertyMap) -> Self {
        Self { reference, values }
    }

    /// Fail on any parameter not in `known`
    pub fn only(&self, known: &[&str]) -> Result<()> {
        for key in self.values.keys() {
            if !known.contains(&key.as_str()) {
                bail!(
                    "{}: unknown parameter '{key}' (known: {})",
                    self.reference,
                    known.join(", ")
                );
            }
        }
        Ok(())
    }

    pub fn string(&self, key: &str) -> Result<Option<String>> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.clone())),
            Some(other) => bail!("{}: '{key}' must be a string, got {other}", self.reference),
        }
    }

    pub fn bool(&self, key: &str) -> Result<bool> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(other) => bail!("{}: '{key}' must be true or false, got {other}", self.reference),
        }
    }
}
