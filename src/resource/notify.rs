//! Notify resource - logs a message every run

use anyhow::Result;
use converge::{ApplyContext, PropertyMap, Resource, ResourceMeta, Value};

use super::Params;

pub const TYPE: &str = "notify";

const MESSAGE: &str = "message";

/// Always out of sync, so it changes (and notifies) on every run
#[derive(Debug, Clone)]
pub struct Notify {
    meta: ResourceMeta,
    message: String,
}

impl Notify {
    pub fn from_params(meta: ResourceMeta, params: &Params<'_>) -> Result<Self> {
        params.only(&[MESSAGE])?;
        let message = params
            .string(MESSAGE)?
            .unwrap_or_else(|| meta.reference.title().to_string());
        Ok(Self { meta, message })
    }
}

impl Resource for Notify {
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ResourceMeta {
        &mut self.meta
    }

    fn desired_state(&self) -> PropertyMap {
        PropertyMap::from([(MESSAGE.to_string(), Value::String(self.message.clone()))])
    }

    fn current_state(&self, _ctx: &ApplyContext) -> Result<PropertyMap> {
        Ok(PropertyMap::new())
    }

    fn sync(&mut self, _property: &str, _desired: &Value, _ctx: &ApplyContext) -> Result<()> {
        log::info!("{}: {}", self.meta.reference, self.message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::ResourceRef;
    use serde_json::json;

    #[test]
    fn test_message_defaults_to_title() {
        let meta = ResourceMeta::new(TYPE, "hello");
        let reference = meta.reference.clone();
        let values = PropertyMap::new();
        let notify = Notify::from_params(meta, &Params::new(&reference, &values)).unwrap();
        assert_eq!(notify.desired_state().get(MESSAGE), Some(&json!("hello")));
    }

    #[test]
    fn test_always_out_of_sync() {
        let reference = ResourceRef::new(TYPE, "x");
        let values = PropertyMap::from([(MESSAGE.to_string(), json!("deploying"))]);
        let notify =
            Notify::from_params(ResourceMeta::new(TYPE, "x"), &Params::new(&reference, &values))
                .unwrap();
        let current = notify.current_state(&ApplyContext::new(false)).unwrap();
        assert!(current.get(MESSAGE).is_none());
        assert_eq!(notify.desired_state().get(MESSAGE), Some(&json!("deploying")));
    }
}
