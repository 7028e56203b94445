use std::collections::HashMap;
use std::sync::Arc;

use super::Agent;

/// Registry of agents (name -> agent).
///
/// Built during initialization (mutable), then shared read-only with the
/// processor, so lookups need no lock.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("agent '{0}' is already registered")]
    AlreadyRegistered(String),
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) -> Result<(), RegistryError> {
        let name = agent.name().to_string();
        if self.agents.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.agents.insert(name, agent);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry").field("agents", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentError, AgentMessage};
    use async_trait::async_trait;

    struct Echo(&'static str);

    #[async_trait]
    impl Agent for Echo {
        fn name(&self) -> &str {
            self.0
        }

        async fn process_message(&self, message: AgentMessage) -> Result<Option<AgentMessage>, AgentError> {
            Ok(Some(message))
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(Echo("Builder"))).unwrap();
        assert!(registry.get("Builder").is_some());
        assert!(registry.get("Storage").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(Echo("Builder"))).unwrap();
        let err = registry.register(Arc::new(Echo("Builder"))).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(name) if name == "Builder"));
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(Echo("Storage"))).unwrap();
        registry.register(Arc::new(Echo("Builder"))).unwrap();
        assert_eq!(registry.names(), vec!["Builder", "Storage"]);
    }
}
