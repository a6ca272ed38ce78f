//! Static attributes identifying the process producing telemetry.
//!
//! A [`Resource`] is built once during pipeline initialization and
//! attached to every exported batch. It is immutable for the process
//! lifetime and cheap to clone (the attribute map is shared).

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use crate::common::{Key, KeyValue, Value};

/// Attribute key for the logical service name.
pub const SERVICE_NAME: Key = Key::from_static_str("service.name");
/// Attribute key for the service version.
pub const SERVICE_VERSION: Key = Key::from_static_str("service.version");
/// Attribute key for the deployment environment (development, production, ...).
pub const DEPLOYMENT_ENVIRONMENT: Key = Key::from_static_str("deployment.environment");
/// Attribute key for the service instance identifier.
pub const SERVICE_INSTANCE_ID: Key = Key::from_static_str("service.instance.id");

#[derive(Debug, PartialEq)]
struct ResourceInner {
    attrs: HashMap<Key, Value>,
}

/// An immutable set of process-identifying attributes.
#[derive(Clone, Debug, PartialEq)]
pub struct Resource {
    inner: Arc<ResourceInner>,
}

impl Resource {
    /// Creates a [`ResourceBuilder`] pre-populated from the environment:
    /// the service name, version and environment fall back to
    /// `SERVICE_NAME`, `SERVICE_VERSION` and `NODE_ENV`, and the instance
    /// id to the host name. Attributes set on the builder afterwards take
    /// precedence.
    pub fn builder() -> ResourceBuilder {
        ResourceBuilder {
            resource: Resource::from_env(),
        }
    }

    /// Creates a [`ResourceBuilder`] with no detected attributes.
    pub fn builder_empty() -> ResourceBuilder {
        ResourceBuilder {
            resource: Resource::empty(),
        }
    }

    pub(crate) fn empty() -> Self {
        Resource {
            inner: Arc::new(ResourceInner {
                attrs: HashMap::new(),
            }),
        }
    }

    fn from_env() -> Self {
        let mut attrs = HashMap::new();
        attrs.insert(
            SERVICE_NAME,
            Value::String(
                env::var("SERVICE_NAME")
                    .unwrap_or_else(|_| "unknown_service".to_owned())
                    .into(),
            ),
        );
        if let Ok(version) = env::var("SERVICE_VERSION") {
            attrs.insert(SERVICE_VERSION, Value::String(version.into()));
        }
        if let Ok(environment) = env::var("NODE_ENV") {
            attrs.insert(DEPLOYMENT_ENVIRONMENT, Value::String(environment.into()));
        }
        attrs.insert(
            SERVICE_INSTANCE_ID,
            Value::String(
                env::var("HOSTNAME")
                    .unwrap_or_else(|_| "unknown".to_owned())
                    .into(),
            ),
        );
        Resource {
            inner: Arc::new(ResourceInner { attrs }),
        }
    }

    /// Returns the value of the attribute with the given key, if present.
    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.inner.attrs.get(key)
    }

    /// Number of attributes in the resource.
    pub fn len(&self) -> usize {
        self.inner.attrs.len()
    }

    /// Whether the resource carries no attributes.
    pub fn is_empty(&self) -> bool {
        self.inner.attrs.is_empty()
    }

    /// Iterate over the resource attributes.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.inner.attrs.iter()
    }

    /// The resource attributes as a plain attribute list.
    pub fn to_key_values(&self) -> Vec<KeyValue> {
        self.inner
            .attrs
            .iter()
            .map(|(key, value)| KeyValue {
                key: key.clone(),
                value: value.clone(),
            })
            .collect()
    }
}

/// Builder for [`Resource`].
#[derive(Debug)]
pub struct ResourceBuilder {
    resource: Resource,
}

impl ResourceBuilder {
    /// Add or replace a single attribute.
    pub fn with_attribute(self, kv: KeyValue) -> Self {
        self.with_attributes([kv])
    }

    /// Add or replace attributes; later values win over detected ones.
    pub fn with_attributes(mut self, kvs: impl IntoIterator<Item = KeyValue>) -> Self {
        let attrs = &mut Arc::make_mut(&mut self.resource.inner).attrs;
        for kv in kvs {
            attrs.insert(kv.key, kv.value);
        }
        self
    }

    /// Convenience for the `service.name` attribute.
    pub fn with_service_name(self, name: impl Into<String>) -> Self {
        let name: String = name.into();
        self.with_attribute(KeyValue::new(SERVICE_NAME, name))
    }

    /// Build the immutable [`Resource`].
    pub fn build(self) -> Resource {
        self.resource
    }
}

impl Clone for ResourceInner {
    fn clone(&self) -> Self {
        ResourceInner {
            attrs: self.attrs.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_attributes_override_detected_values() {
        temp_env::with_vars(
            [("SERVICE_NAME", Some("from-env")), ("NODE_ENV", Some("test"))],
            || {
                let resource = Resource::builder()
                    .with_service_name("from-builder")
                    .build();
                assert_eq!(
                    resource.get(&SERVICE_NAME),
                    Some(&Value::String("from-builder".to_owned().into()))
                );
                assert_eq!(
                    resource.get(&DEPLOYMENT_ENVIRONMENT),
                    Some(&Value::String("test".to_owned().into()))
                );
            },
        );
    }

    #[test]
    fn service_name_defaults_when_unset() {
        temp_env::with_vars_unset(["SERVICE_NAME"], || {
            let resource = Resource::builder().build();
            assert_eq!(
                resource.get(&SERVICE_NAME),
                Some(&Value::String("unknown_service".to_owned().into()))
            );
        });
    }

    #[test]
    fn empty_builder_detects_nothing() {
        temp_env::with_vars([("SERVICE_NAME", Some("ignored"))], || {
            let resource = Resource::builder_empty()
                .with_attribute(KeyValue::new("only", "this"))
                .build();
            assert_eq!(resource.len(), 1);
        });
    }
}
