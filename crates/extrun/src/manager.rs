//! # Extension Manager
//!
//! Loads extension parts onto connections and starts them.
//!
//! ## Architecture
//!
//! - **Loaded Table**: `(extension, connection)` -> the extension instance and
//!   its helper. Loading the same pair twice is a no-op that reports success.
//! - **Shared Endpoints**: Every extension loaded into one gateway or one
//!   client connection shares that connection's endpoint. A standalone part
//!   gets its own `ext_{name}` endpoint and directory entry.
//! - **Start Once**: Each loaded pair carries a flag swapped on start, so
//!   `start` runs exactly once no matter how often it is requested.
//! - **All or Nothing**: If `initialize` fails, the extension's handlers are
//!   removed, and an endpoint created for the load is unserved and
//!   deregistered. A later retry starts from a clean slate.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use extrpc::Endpoint;
use extrpc::Router;
use extrpc::Target;
use tokio::sync::Mutex;

use crate::broadcast::Broadcaster;
use crate::datastore::DataStore;
use crate::error::Error;
use crate::error::Result;
use crate::extension::Extension;
use crate::extension::ExtensionCatalog;
use crate::extension::Role;
use crate::helper::ExtensionHelper;
use crate::helper::method_id;
use crate::sessions::SessionRegistry;

/// Everything the manager needs from its host.
pub struct ManagerDeps {
    pub router: Arc<Router>,
    pub catalog: Arc<dyn ExtensionCatalog>,
    pub sessions: Arc<dyn SessionRegistry>,
    pub data: DataStore,
    /// Allowed extension names. Empty allows everything in the catalog.
    pub active: Vec<String>,
}

struct Loaded {
    extension: Arc<dyn Extension>,
    helper: Arc<ExtensionHelper>,
    started: AtomicBool,
}

pub struct ExtensionManager {
    router: Arc<Router>,
    catalog: Arc<dyn ExtensionCatalog>,
    sessions: Arc<dyn SessionRegistry>,
    broadcaster: Broadcaster,
    data: DataStore,
    active: Vec<String>,
    loaded: DashMap<(String, String), Arc<Loaded>>,
    endpoints: DashMap<Target, (Endpoint, Role)>,
    load_lock: Mutex<()>,
}

impl ExtensionManager {
    pub fn new(deps: ManagerDeps) -> Self {
        let broadcaster = Broadcaster::new(deps.router.clone());
        Self {
            router: deps.router,
            catalog: deps.catalog,
            sessions: deps.sessions,
            broadcaster,
            data: deps.data,
            active: deps.active,
            loaded: DashMap::new(),
            endpoints: DashMap::new(),
            load_lock: Mutex::new(()),
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    fn is_active(&self, name: &str) -> bool {
        self.active.is_empty() || self.active.iter().any(|a| a == name)
    }

    /// Extensions the catalog offers that are allowed to load.
    pub async fn list_extensions(&self) -> Vec<String> {
        self.catalog
            .list_extensions()
            .await
            .into_iter()
            .filter(|name| self.is_active(name))
            .collect()
    }

    /// Loads `name` under `role` and runs its `initialize`.
    ///
    /// Returns false if the extension is unknown or not active.
    pub async fn load_extension(&self, name: &str, role: &Role) -> Result<bool> {
        if !self.is_active(name) {
            tracing::debug!(extension = name, "skipping inactive extension");
            return Ok(false);
        }

        let connection = role.connection(name);
        let key = (name.to_string(), connection.clone());

        let _guard = self.load_lock.lock().await;
        if self.loaded.contains_key(&key) {
            return Ok(true);
        }

        let Some(extension) = self.catalog.load(name).await else {
            tracing::debug!(extension = name, "extension not in catalog");
            return Ok(false);
        };

        let (endpoint, created) = self.endpoint_for(name, role).await?;
        let helper = Arc::new(ExtensionHelper::new(
            name,
            role.clone(),
            endpoint.clone(),
            self.sessions.clone(),
            self.broadcaster.clone(),
            self.data.clone(),
        ));

        if let Err(e) = extension.initialize(helper.clone()).await {
            tracing::error!(extension = name, %connection, error = %e, "initialize failed");
            self.roll_back(name, role, &endpoint, created).await;
            return Err(e);
        }

        self.loaded.insert(
            key,
            Arc::new(Loaded {
                extension,
                helper,
                started: AtomicBool::new(false),
            }),
        );
        tracing::info!(extension = name, %connection, "extension loaded");
        Ok(true)
    }

    /// Undoes a failed load: drops the extension's handlers and, if the load
    /// created the endpoint, stops serving it and removes its directory entry.
    async fn roll_back(&self, name: &str, role: &Role, endpoint: &Endpoint, created: bool) {
        let removed = endpoint.handlers().unregister_prefix(&method_id(name, ""));
        tracing::debug!(extension = name, removed, "dropped handlers of failed load");
        if !created {
            return;
        }

        let target = endpoint.target().clone();
        self.endpoints.remove(&target);
        if let Err(e) = self.router.unserve(&target).await {
            tracing::warn!(endpoint = %target, error = %e, "unserve failed during roll back");
        }
        if let Role::Standalone { .. } = role {
            if let Err(e) = self.router.directory().deregister(target.name()).await {
                tracing::warn!(endpoint = %target, error = %e, "deregister failed during roll back");
            }
        }
    }

    /// Returns the role's endpoint, and whether this call created it.
    async fn endpoint_for(&self, name: &str, role: &Role) -> Result<(Endpoint, bool)> {
        let target = role.target(name);
        if let Some(entry) = self.endpoints.get(&target) {
            return Ok((entry.value().0.clone(), false));
        }

        let endpoint = match role {
            Role::Standalone { address } => self.router.register_service(target.name(), address).await?,
            Role::Gateway { service } => {
                let endpoint = self.router.serve(target.clone()).await?;
                self.router.directory().add_gateway_service(service).await?;
                endpoint
            }
            Role::Client { .. } => self.router.serve(target.clone()).await?,
        };

        self.endpoints.insert(target, (endpoint.clone(), role.clone()));
        Ok((endpoint, true))
    }

    /// Loads every listed extension under `role`. Returns the ones loaded.
    pub async fn load_all(&self, role: &Role) -> Result<Vec<String>> {
        let mut loaded = Vec::new();
        for name in self.list_extensions().await {
            if self.load_extension(&name, role).await? {
                loaded.push(name);
            }
        }
        Ok(loaded)
    }

    /// Runs the extension's `start`. Returns false if it already ran.
    pub async fn start_extension(&self, name: &str, role: &Role) -> Result<bool> {
        let connection = role.connection(name);
        let Some(loaded) = self
            .loaded
            .get(&(name.to_string(), connection.clone()))
            .map(|e| e.value().clone())
        else {
            return Err(Error::NotLoaded {
                extension: name.to_string(),
                connection,
            });
        };

        if loaded.started.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }

        loaded.extension.start().await?;
        tracing::info!(extension = name, %connection, "extension started");
        Ok(true)
    }

    /// Starts every extension loaded under `role`, in name order.
    pub async fn start_all(&self, role: &Role) -> Result<()> {
        let mut names: Vec<String> = self
            .loaded
            .iter()
            .filter(|e| e.key().1 == role.connection(&e.key().0))
            .map(|e| e.key().0.clone())
            .collect();
        names.sort();

        for name in names {
            self.start_extension(&name, role).await?;
        }
        Ok(())
    }

    pub fn helper(&self, name: &str, role: &Role) -> Option<Arc<ExtensionHelper>> {
        self.loaded
            .get(&(name.to_string(), role.connection(name)))
            .map(|e| e.value().helper.clone())
    }

    /// Stops serving every endpoint and removes standalone directory entries.
    pub async fn shutdown(&self) -> Result<()> {
        let endpoints: Vec<(Target, Role)> = self
            .endpoints
            .iter()
            .map(|e| (e.key().clone(), e.value().1.clone()))
            .collect();

        for (target, role) in endpoints {
            self.router.unserve(&target).await?;
            if let Role::Standalone { .. } = role {
                self.router.directory().deregister(target.name()).await?;
            }
            self.endpoints.remove(&target);
        }
        self.loaded.clear();
        Ok(())
    }
}
