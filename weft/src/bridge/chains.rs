//! Chain resolution for the bridge: look a chain definition up by id.
//!
//! Chains are declarative JSON; the bridge only needs to resolve them (and
//! hand them to the engine). The KV-backed store keeps each chain under
//! `chain:<id>`; the in-memory variant serves tests and embedded setups.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::chain::ChainDefinition;
use crate::error::WeftError;
use crate::store::SqliteStore;

/// Resolves chain definitions by id.
#[async_trait]
pub trait ChainStore: Send + Sync {
    async fn get_chain(&self, id: &str) -> Result<ChainDefinition, WeftError>;
}

/// In-memory chain registry.
#[derive(Default)]
pub struct InMemoryChains {
    chains: DashMap<String, ChainDefinition>,
}

impl InMemoryChains {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, chain: ChainDefinition) {
        self.chains.insert(chain.id.clone(), chain);
    }
}

#[async_trait]
impl ChainStore for InMemoryChains {
    async fn get_chain(&self, id: &str) -> Result<ChainDefinition, WeftError> {
        self.chains
            .get(id)
            .map(|c| c.clone())
            .ok_or_else(|| WeftError::NotFound(format!("chain {id}")))
    }
}

/// Key prefix for chains persisted in the KV store.
const CHAIN_KEY_PREFIX: &str = "chain:";

#[async_trait]
impl ChainStore for SqliteStore {
    async fn get_chain(&self, id: &str) -> Result<ChainDefinition, WeftError> {
        let raw = self
            .kv_get(&format!("{CHAIN_KEY_PREFIX}{id}"))
            .await?
            .ok_or_else(|| WeftError::NotFound(format!("chain {id}")))?;
        serde_json::from_str(&raw).map_err(|e| WeftError::Store(e.to_string()))
    }
}

impl SqliteStore {
    /// Persists a chain definition under its id.
    pub async fn put_chain(&self, chain: &ChainDefinition) -> Result<(), WeftError> {
        let raw = serde_json::to_string(chain).map_err(|e| WeftError::Store(e.to_string()))?;
        self.kv_set(&format!("{CHAIN_KEY_PREFIX}{}", chain.id), &raw).await
    }
}
