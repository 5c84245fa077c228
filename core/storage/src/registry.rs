//! Resolving the configured object store by name.
//!
//! A resolved store serves both domains of every scope. Vaulted
//! ciphertext and public plaintext live side by side in one backend,
//! separated by the [`Domain`](crate::Domain) argument of each call, so a
//! migration only ever needs the one store the settings name.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::ObjectStore;
use notevault_common::{Error, Result};

/// Builds a store from its JSON section of the settings file.
pub type StoreFactory = Box<dyn Fn(Value) -> Result<Arc<dyn ObjectStore>> + Send + Sync>;

/// Named object store factories.
///
/// `create_default_registry` knows `memory` (both domains in one process
/// map) and `local` (`<root>/vaulted` and `<root>/public` directories).
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a store factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: StoreFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::InvalidInput(format!(
                "Store '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a store by name and configuration.
    ///
    /// # Errors
    /// - Store not found
    /// - Configuration invalid
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn ObjectStore>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Store '{}' is not registered", name)))?;
        factory(config)
    }

    /// Get list of registered store names.
    pub fn stores(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry with the `memory` and `local` stores.
pub fn create_default_registry() -> StoreRegistry {
    let mut registry = StoreRegistry::new();

    registry.factories.insert(
        "memory".to_string(),
        Box::new(|_config| Ok(Arc::new(crate::memory::MemoryStore::new()))),
    );

    registry.factories.insert(
        "local".to_string(),
        Box::new(|config| {
            let root = config
                .get("root")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    Error::InvalidInput("Local store requires 'root' path".to_string())
                })?;
            Ok(Arc::new(crate::local::LocalStore::new(root)?))
        }),
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::{Domain, ObjectPath};
    use notevault_common::ScopeId;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = StoreRegistry::new();

        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryStore::new()))))
            .unwrap();

        let store = registry.resolve("test", Value::Null).unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = StoreRegistry::new();

        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryStore::new()))))
            .unwrap();

        let result = registry.register("test", Box::new(|_| Ok(Arc::new(MemoryStore::new()))));
        assert!(result.is_err());
    }

    #[test]
    fn test_default_registry() {
        let registry = create_default_registry();
        assert_eq!(registry.stores(), vec!["local", "memory"]);

        let temp = tempfile::TempDir::new().unwrap();
        let local = registry
            .resolve("local", serde_json::json!({ "root": temp.path() }))
            .unwrap();
        assert_eq!(local.name(), "local");

        assert!(registry.resolve("local", Value::Null).is_err());
        assert!(registry.resolve("s3", Value::Null).is_err());
    }

    #[tokio::test]
    async fn test_resolved_store_keeps_domains_apart() {
        let registry = create_default_registry();
        let store = registry.resolve("memory", Value::Null).unwrap();
        let path = ObjectPath::new(ScopeId::new(), 1, "a.txt");

        store
            .put(Domain::Vaulted, &path, vec![1, 2, 3], "text/plain")
            .await
            .unwrap();
        assert!(store.exists(Domain::Vaulted, &path).await.unwrap());
        assert!(!store.exists(Domain::Public, &path).await.unwrap());
    }
}
