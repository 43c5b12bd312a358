//! # Service Directory
//!
//! A single well-known hash in the store maps service names to `host:port`.
//! Services write their own entry on startup; anyone may read. Entries are
//! last-writer-wins with no versioning.
//!
//! The same format is what deployment tooling writes when it pre-seeds
//! addresses, so the key name is configurable but the layout is not.

use std::collections::HashMap;
use std::sync::Arc;

use kvbus::Store;

use crate::error::Result;

#[derive(Clone)]
pub struct ServiceDirectory {
    store: Arc<dyn Store>,
    index_key: String,
    gateway_key: String,
}

impl ServiceDirectory {
    pub fn new(store: Arc<dyn Store>, index_key: impl Into<String>, gateway_key: impl Into<String>) -> Self {
        Self {
            store,
            index_key: index_key.into(),
            gateway_key: gateway_key.into(),
        }
    }

    pub fn index_key(&self) -> &str {
        &self.index_key
    }

    pub async fn register(&self, service: &str, address: &str) -> Result<()> {
        self.store.hset(&self.index_key, service, address).await?;
        tracing::info!(service, address, "registered service");
        Ok(())
    }

    /// Returns `None` for an unknown service. Callers treat that as the peer
    /// being unavailable.
    pub async fn lookup(&self, service: &str) -> Result<Option<String>> {
        Ok(self.store.hget(&self.index_key, service).await?)
    }

    pub async fn list_all(&self) -> Result<HashMap<String, String>> {
        Ok(self.store.hgetall(&self.index_key).await?)
    }

    /// Removes a service entry. Returns true if it existed.
    pub async fn deregister(&self, service: &str) -> Result<bool> {
        let removed = self.store.hdel(&self.index_key, service).await?;
        if removed {
            tracing::info!(service, "deregistered service");
        }
        Ok(removed)
    }

    /// Registers every `(service, address)` pair.
    pub async fn seed<'a, I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (service, address) in entries {
            self.register(service, address).await?;
        }
        Ok(())
    }

    /// Records `name` as a gateway service.
    pub async fn add_gateway_service(&self, name: &str) -> Result<()> {
        self.store.hset(&self.gateway_key, name, "1").await?;
        Ok(())
    }

    /// Returns every gateway service name, sorted.
    pub async fn gateway_services(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.store.hgetall(&self.gateway_key).await?.into_keys().collect();
        names.sort();
        Ok(names)
    }
}
