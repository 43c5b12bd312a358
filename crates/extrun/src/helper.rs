//! # Extension Helper
//!
//! The API an extension part uses to expose and call methods. One helper
//! exists per (extension, connection).
//!
//! ## Method identity
//!
//! Every method an extension registers is namespaced as `"{ext}/{method}"`.
//! The helper adds the prefix itself, so an extension can only register into
//! its own namespace, and callers name the extension they are calling:
//!
//! - **c2s**: served by `ext_{ext}`, called by clients (caller is the player).
//! - **s2s**: served by `ext_{ext}`, called by other services.
//! - **s2c**: served by a player's connection, called by services after the
//!   player's gateway is resolved through the session registry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use extrpc::CallContext;
use extrpc::Endpoint;
use extrpc::HandlerResult;
use extrpc::Scope;
use extrpc::Target;
use serde_json::Value;

use crate::broadcast::Broadcaster;
use crate::datastore::DataStore;
use crate::error::Error;
use crate::error::Result;
use crate::extension::Role;
use crate::extension::service_name;
use crate::sessions::SessionRegistry;

/// Namespaced method identity: `chat/sendMessage`.
pub fn method_id(extension: &str, method: &str) -> String {
    format!("{}/{}", extension, method)
}

pub struct ExtensionHelper {
    name: String,
    role: Role,
    endpoint: Endpoint,
    sessions: Arc<dyn SessionRegistry>,
    broadcaster: Broadcaster,
    data: DataStore,
}

impl ExtensionHelper {
    pub(crate) fn new(
        name: &str,
        role: Role,
        endpoint: Endpoint,
        sessions: Arc<dyn SessionRegistry>,
        broadcaster: Broadcaster,
        data: DataStore,
    ) -> Self {
        Self {
            name: name.to_string(),
            role,
            endpoint,
            sessions,
            broadcaster,
            data,
        }
    }

    /// The extension's name, without the `ext_` prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    /// The identity calls from this helper carry.
    pub fn connection(&self) -> &str {
        self.endpoint.name()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn register<F, Fut>(&self, scope: Scope, method: &str, f: F) -> Result<()>
    where
        F: Fn(CallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.endpoint
            .register(scope, &method_id(&self.name, method), extrpc::handler(f))?;
        Ok(())
    }

    /// Exposes a method to clients.
    pub fn register_c2s_api<F, Fut>(&self, method: &str, f: F) -> Result<()>
    where
        F: Fn(CallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(Scope::C2s, method, f)
    }

    /// Exposes a method to other services.
    pub fn register_s2s_api<F, Fut>(&self, method: &str, f: F) -> Result<()>
    where
        F: Fn(CallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(Scope::S2s, method, f)
    }

    /// Exposes a method on a client connection for services to call.
    pub fn register_s2c_api<F, Fut>(&self, method: &str, f: F) -> Result<()>
    where
        F: Fn(CallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(Scope::S2c, method, f)
    }

    /// Exposes a plain service method, typically on a gateway.
    pub fn register_service_api<F, Fut>(&self, method: &str, f: F) -> Result<()>
    where
        F: Fn(CallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(Scope::Service, method, f)
    }

    /// Calls a client-facing method of extension `ext`.
    pub async fn call_c2s_api(
        &self,
        ext: &str,
        method: &str,
        timeout: Option<Duration>,
        args: Vec<Value>,
    ) -> Result<Value> {
        let target = Target::service(service_name(ext));
        Ok(self
            .endpoint
            .call(&target, Scope::C2s, &method_id(ext, method), args, timeout)
            .await?)
    }

    /// Calls a client-facing method of this extension's standalone service.
    pub async fn call_standalone_api(&self, method: &str, timeout: Option<Duration>, args: Vec<Value>) -> Result<Value> {
        self.call_c2s_api(&self.name, method, timeout, args).await
    }

    /// Calls a method on `player`'s client. An offline player is `NotFound`.
    pub async fn call_s2c_api(
        &self,
        player: &str,
        ext: &str,
        method: &str,
        timeout: Option<Duration>,
        args: Vec<Value>,
    ) -> Result<Value> {
        let Some(gateway) = self.sessions.gateway_of(player).await? else {
            return Err(Error::Rpc(extrpc::Error::NotFound(format!("player '{}' is offline", player))));
        };
        tracing::trace!(player, %gateway, ext, method, "calling client");

        let target = Target::connection(player);
        Ok(self
            .endpoint
            .call(&target, Scope::S2c, &method_id(ext, method), args, timeout)
            .await?)
    }

    /// Calls a server-to-server method of extension `ext` with the default timeout.
    pub async fn call_s2s_api(&self, ext: &str, method: &str, args: Vec<Value>) -> Result<Value> {
        let target = Target::service(service_name(ext));
        Ok(self
            .endpoint
            .call(&target, Scope::S2s, &method_id(ext, method), args, None)
            .await?)
    }

    /// Sends `msg` to every connected user, tagged with this extension's name.
    pub async fn broadcast_to_all_users(&self, msg: Value) -> Result<usize> {
        self.broadcaster.broadcast(&self.name, msg).await
    }

    pub async fn store_data(&self, data: &Value) -> Result<()> {
        Ok(self.data.save(&self.name, data).await?)
    }

    /// This extension's persisted data, `{}` if nothing was stored yet.
    pub async fn load_data(&self) -> Result<Value> {
        Ok(self.data.load(&self.name).await?)
    }
}
