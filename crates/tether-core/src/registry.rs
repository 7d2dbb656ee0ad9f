//! Adapter lookup by agent type tag.

use crate::adapter::CliAdapter;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Maps a type tag to its adapter. Built once at startup and handed to the manager.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn CliAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter under its own tag, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn CliAdapter>) -> &mut Self {
        self.adapters
            .insert(adapter.adapter_type().to_string(), adapter);
        self
    }

    pub fn with(mut self, adapter: Arc<dyn CliAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, agent_type: &str) -> Option<Arc<dyn CliAdapter>> {
        self.adapters.get(agent_type).cloned()
    }

    pub fn contains(&self, agent_type: &str) -> bool {
        self.adapters.contains_key(agent_type)
    }

    /// Registered tags, sorted.
    pub fn types(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn CliAdapter>> {
        self.adapters.values()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAdapter;

    #[test]
    fn test_register_and_lookup() {
        let registry = AdapterRegistry::new()
            .with(Arc::new(FakeAdapter::new("x")))
            .with(Arc::new(FakeAdapter::new("a")));
        assert_eq!(registry.types(), vec!["a", "x"]);
        assert!(registry.get("x").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_register_replaces_same_tag() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(FakeAdapter::new("x")));
        registry.register(Arc::new(FakeAdapter::new("x").with_ready_marker("$ ")));
        assert_eq!(registry.len(), 1);
    }
}
