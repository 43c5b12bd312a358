//! # Extensions
//!
//! An extension is a named bundle of handlers. Each part of it (standalone
//! service, in-gateway part, client part) is loaded separately under a
//! `Role`, and gets its own `ExtensionHelper` for that connection.
//!
//! Extensions are found through an `ExtensionCatalog`. The catalog hands out
//! a fresh instance per load, so per-connection state can live in the
//! extension value itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use extrpc::Target;

use crate::error::Result;
use crate::helper::ExtensionHelper;

/// Name prefix of an extension's standalone service.
pub const SERVICE_PREFIX: &str = "ext_";

/// Standalone service name for an extension: `chat` -> `ext_chat`.
pub fn service_name(extension: &str) -> String {
    format!("{}{}", SERVICE_PREFIX, extension)
}

#[async_trait]
pub trait Extension: Send + Sync + 'static {
    /// Registers handlers through the helper. Runs once per connection.
    async fn initialize(&self, helper: Arc<ExtensionHelper>) -> Result<()>;

    /// Runs after every extension on the connection is initialized.
    async fn start(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait ExtensionCatalog: Send + Sync + 'static {
    async fn list_extensions(&self) -> Vec<String>;

    async fn load(&self, name: &str) -> Option<Arc<dyn Extension>>;
}

type Factory = Arc<dyn Fn() -> Arc<dyn Extension> + Send + Sync>;

/// Catalog of extensions compiled into the host.
#[derive(Clone, Default)]
pub struct StaticCatalog {
    factories: BTreeMap<String, Factory>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, E>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> E + Send + Sync + 'static,
        E: Extension,
    {
        let factory: Factory = Arc::new(move || Arc::new(factory()) as Arc<dyn Extension>);
        self.factories.insert(name.into(), factory);
    }

    pub fn with<F, E>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> E + Send + Sync + 'static,
        E: Extension,
    {
        self.register(name, factory);
        self
    }
}

#[async_trait]
impl ExtensionCatalog for StaticCatalog {
    async fn list_extensions(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    async fn load(&self, name: &str) -> Option<Arc<dyn Extension>> {
        self.factories.get(name).map(|factory| factory())
    }
}

/// Where an extension part runs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Its own service, `ext_{name}`, reachable at `address`.
    Standalone { address: String },
    /// Inside a gateway service.
    Gateway { service: String },
    /// On a player's client connection.
    Client { player: String },
}

impl Role {
    pub fn standalone(address: impl Into<String>) -> Self {
        Self::Standalone { address: address.into() }
    }

    pub fn gateway(service: impl Into<String>) -> Self {
        Self::Gateway { service: service.into() }
    }

    pub fn client(player: impl Into<String>) -> Self {
        Self::Client { player: player.into() }
    }

    /// The endpoint this role serves for `extension`.
    pub fn target(&self, extension: &str) -> Target {
        match self {
            Self::Standalone { .. } => Target::service(service_name(extension)),
            Self::Gateway { service } => Target::service(service.as_str()),
            Self::Client { player } => Target::connection(player.as_str()),
        }
    }

    /// Connection identity: the name calls from this role carry as caller.
    pub fn connection(&self, extension: &str) -> String {
        self.target(extension).name().to_string()
    }
}
