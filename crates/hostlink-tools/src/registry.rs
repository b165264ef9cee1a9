use std::collections::HashMap;
use std::sync::Arc;

use hostlink_core::CapabilityError;
use serde_json::Value;
use tracing::debug;

use crate::capability::{Capability, CapabilityDescriptor};

/// A source of capabilities.
///
/// Instance-bound capabilities close over the `Arc<Self>` handed to
/// [`capabilities`](Self::capabilities), so the provider lives as long as the
/// registry that holds them.
pub trait CapabilityProvider: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn capabilities(self: Arc<Self>) -> Vec<Capability>;
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("capability '{name}' registered twice")]
    Duplicate { name: String },

    #[error("capability name must not be empty")]
    EmptyName,
}

/// Collects capabilities, then checks them once in [`build`](Self::build).
#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<Capability>,
    replacements: Vec<Capability>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every capability a provider declares, tagged with its name.
    pub fn provider<P: CapabilityProvider>(mut self, provider: Arc<P>) -> Self {
        let provider_name = provider.name().to_string();
        for mut capability in provider.capabilities() {
            capability.set_provider(&provider_name);
            self.entries.push(capability);
        }
        self
    }

    /// Add a provider-less capability.
    pub fn function(mut self, capability: Capability) -> Self {
        self.entries.push(capability);
        self
    }

    /// Swap an existing capability for a new one with the same name, keeping
    /// its position. Unlike [`function`](Self::function), a name clash here is
    /// intended.
    pub fn replace(mut self, capability: Capability) -> Self {
        self.replacements.push(capability);
        self
    }

    pub fn build(self) -> Result<CapabilityRegistry, RegistryError> {
        let mut entries = Vec::with_capacity(self.entries.len());
        let mut index = HashMap::with_capacity(self.entries.len());

        for capability in self.entries {
            if capability.name().is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if index.contains_key(capability.name()) {
                return Err(RegistryError::Duplicate {
                    name: capability.name().to_string(),
                });
            }
            let _ = index.insert(capability.name().to_string(), entries.len());
            entries.push(capability);
        }

        for capability in self.replacements {
            match index.get(capability.name()) {
                Some(&slot) => entries[slot] = capability,
                None => {
                    if capability.name().is_empty() {
                        return Err(RegistryError::EmptyName);
                    }
                    let _ = index.insert(capability.name().to_string(), entries.len());
                    entries.push(capability);
                }
            }
        }

        debug!(count = entries.len(), "capability registry built");
        Ok(CapabilityRegistry { entries, index })
    }
}

/// Name to capability map. Read-only once built; changing it means building
/// a new registry.
pub struct CapabilityRegistry {
    entries: Vec<Capability>,
    index: HashMap<String, usize>,
}

impl CapabilityRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Start a builder holding everything in this registry.
    pub fn to_builder(&self) -> RegistryBuilder {
        RegistryBuilder {
            entries: self.entries.clone(),
            replacements: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.index.get(name).map(|&slot| &self.entries[slot])
    }

    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value, CapabilityError> {
        let capability = self
            .get(name)
            .ok_or_else(|| CapabilityError::NotFound(name.to_string()))?;
        capability.invoke(args).await
    }

    /// Descriptors in registration order.
    pub fn list_all(&self) -> Vec<CapabilityDescriptor> {
        self.entries.iter().map(Capability::descriptor).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(Capability::name).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::NoArgs;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn constant(name: &str, value: i64) -> Capability {
        Capability::sync(name, "constant", json!({"type": "object"}), move |_: NoArgs| {
            Ok(value)
        })
    }

    struct Counter {
        calls: AtomicUsize,
    }

    impl CapabilityProvider for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn capabilities(self: Arc<Self>) -> Vec<Capability> {
            vec![Capability::sync(
                "increment",
                "Count a call",
                json!({"type": "object"}),
                move |_: NoArgs| Ok(self.calls.fetch_add(1, Ordering::SeqCst) + 1),
            )]
        }
    }

    #[tokio::test]
    async fn instance_bound_provider_keeps_state() {
        let counter = Arc::new(Counter {
            calls: AtomicUsize::new(0),
        });
        let registry = RegistryBuilder::new()
            .provider(Arc::clone(&counter))
            .build()
            .unwrap();

        assert_eq!(registry.invoke("increment", json!({})).await.unwrap(), json!(1));
        assert_eq!(registry.invoke("increment", json!({})).await.unwrap(), json!(2));
        assert_eq!(counter.calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.get("increment").unwrap().provider(), Some("counter"));
    }

    #[tokio::test]
    async fn unknown_name_is_not_found() {
        let registry = RegistryBuilder::new()
            .function(constant("one", 1))
            .build()
            .unwrap();
        assert_eq!(
            registry.invoke("two", json!({})).await,
            Err(CapabilityError::NotFound("two".into()))
        );
    }

    #[test]
    fn duplicate_names_rejected() {
        let result = RegistryBuilder::new()
            .function(constant("one", 1))
            .function(constant("one", 2))
            .build();
        assert_eq!(
            result.err(),
            Some(RegistryError::Duplicate { name: "one".into() })
        );
    }

    #[test]
    fn empty_name_rejected() {
        let result = RegistryBuilder::new().function(constant("", 1)).build();
        assert_eq!(result.err(), Some(RegistryError::EmptyName));
    }

    #[test]
    fn lists_in_registration_order() {
        let registry = RegistryBuilder::new()
            .function(constant("zeta", 0))
            .function(constant("alpha", 1))
            .function(constant("mid", 2))
            .build()
            .unwrap();

        let names: Vec<_> = registry.list_all().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn replace_keeps_position() {
        let registry = RegistryBuilder::new()
            .function(constant("a", 1))
            .function(constant("b", 2))
            .build()
            .unwrap();

        let replaced = registry.to_builder().replace(constant("a", 10)).build().unwrap();

        assert_eq!(replaced.names(), ["a", "b"]);
        assert_eq!(replaced.invoke("a", json!({})).await.unwrap(), json!(10));
        assert_eq!(registry.invoke("a", json!({})).await.unwrap(), json!(1));
    }
}
