//! The consumed chain-client interface.
//!
//! The library never talks to a chain directly; it reads agent records
//! through this trait. Implementations wrap whatever RPC stack the deployment
//! uses and surface failures as `not-found` or `chain-error` (marking
//! transient conditions so the resolver may retry).

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::agent::AgentMetadata;
use crate::did::AgentDid;
use crate::error::SageError;

/// Read-only registry view, implemented by the injected chain client.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetch the full metadata record for a DID.
    async fn get_agent(&self, did: &AgentDid) -> Result<AgentMetadata, SageError>;

    /// Fetch the record registered under an owner address.
    async fn get_agent_by_address(&self, address: &str) -> Result<AgentMetadata, SageError>;

    /// Current activation flag for a DID.
    async fn is_active(&self, did: &AgentDid) -> Result<bool, SageError>;
}

/// In-memory registry backed by a map; the fixture used in tests and local
/// deployments without a chain.
#[derive(Default)]
pub struct StaticRegistry {
    agents: RwLock<HashMap<AgentDid, AgentMetadata>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, metadata: AgentMetadata) {
        self.agents.write().insert(metadata.did.clone(), metadata);
    }

    pub fn remove(&self, did: &AgentDid) {
        self.agents.write().remove(did);
    }

    /// Flip an agent's activation flag in place.
    pub fn set_active(&self, did: &AgentDid, active: bool) {
        if let Some(agent) = self.agents.write().get_mut(did) {
            agent.active = active;
        }
    }
}

#[async_trait]
impl RegistryClient for StaticRegistry {
    async fn get_agent(&self, did: &AgentDid) -> Result<AgentMetadata, SageError> {
        self.agents
            .read()
            .get(did)
            .cloned()
            .ok_or_else(|| SageError::NotFound(did.to_string()))
    }

    async fn get_agent_by_address(&self, address: &str) -> Result<AgentMetadata, SageError> {
        self.agents
            .read()
            .values()
            .find(|a| a.owner.eq_ignore_ascii_case(address))
            .cloned()
            .ok_or_else(|| SageError::NotFound(address.to_owned()))
    }

    async fn is_active(&self, did: &AgentDid) -> Result<bool, SageError> {
        Ok(self.get_agent(did).await?.active)
    }
}
