//! Registry of available agents.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::agent::Agent;
use super::errors::{AgentError, AgentResult};
use super::types::{AgentType, Capability};

/// Concurrent store of agents keyed by id.
///
/// Locks are held only for the map access; agent methods are called on
/// cloned handles after the guard is released.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<dyn Agent>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent. Fails if the id is already taken.
    pub fn register(&self, agent: Arc<dyn Agent>) -> AgentResult<()> {
        let id = agent.id().to_string();
        let mut agents = self.agents.write();
        if agents.contains_key(&id) {
            return Err(AgentError::DuplicateAgent(id));
        }
        agents.insert(id.clone(), agent);
        drop(agents);

        tracing::debug!("Registered agent: {}", id);
        Ok(())
    }

    /// Unregister an agent; unknown ids are ignored.
    pub fn unregister(&self, id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.write().remove(id)
    }

    pub fn get(&self, id: &str) -> AgentResult<Arc<dyn Agent>> {
        self.agents
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| AgentError::AgentNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.read().contains_key(id)
    }

    /// All agents, sorted by id for stable iteration.
    pub fn list(&self) -> Vec<Arc<dyn Agent>> {
        let mut agents: Vec<_> = self.agents.read().values().cloned().collect();
        agents.sort_by(|a, b| a.id().cmp(b.id()));
        agents
    }

    pub fn get_by_type(&self, agent_type: AgentType) -> Vec<Arc<dyn Agent>> {
        self.list()
            .into_iter()
            .filter(|agent| agent.agent_type() == agent_type)
            .collect()
    }

    pub fn get_by_capability(&self, capability: &Capability) -> Vec<Arc<dyn Agent>> {
        self.list()
            .into_iter()
            .filter(|agent| agent.capabilities().contains(capability))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.agents.read().len()
    }
}
