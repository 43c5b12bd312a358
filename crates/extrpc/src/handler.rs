//! # Registered handlers
//!
//! Handlers are keyed by `(Scope, method)` and validated at registration:
//! a second registration of the same key is rejected rather than shadowing
//! the first.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::envelope::CorrelationKey;
use crate::error::Error;
use crate::error::Result;

/// Which direction a handler is exposed to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Plain service RPC (gateway plumbing, directory-level methods).
    Service,
    /// Client to server: called from a browser client.
    C2s,
    /// Server to client: lives on a client connection.
    S2c,
    /// Server to server: called by another service.
    S2s,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Scope::Service => "service",
            Scope::C2s => "c2s",
            Scope::S2c => "s2c",
            Scope::S2s => "s2s",
        };
        f.write_str(name)
    }
}

/// What a handler learns about the call it is serving.
#[derive(Clone, Debug)]
pub struct CallContext {
    /// Identity of the caller: a service name or a player id.
    pub caller: String,
    pub scope: Scope,
    pub method: String,
    pub key: CorrelationKey,
}

/// `Ok` is the result value, `Err` is a failure payload forwarded to the caller.
pub type HandlerResult = std::result::Result<Value, Value>;

pub type Handler = Arc<dyn Fn(CallContext, Vec<Value>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Boxes an async closure into a `Handler`.
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(CallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |ctx, args| Box::pin(f(ctx, args)))
}

/// The handlers served by one endpoint.
#[derive(Default)]
pub struct HandlerTable {
    handlers: DashMap<(Scope, String), Handler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, scope: Scope, method: &str, handler: Handler) -> Result<()> {
        match self.handlers.entry((scope, method.to_string())) {
            Entry::Occupied(_) => Err(Error::DuplicateHandler {
                scope,
                method: method.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(())
            }
        }
    }

    pub fn unregister(&self, scope: Scope, method: &str) -> bool {
        self.handlers.remove(&(scope, method.to_string())).is_some()
    }

    /// Removes every handler whose method starts with `prefix`, in any scope.
    /// Returns how many were removed.
    pub fn unregister_prefix(&self, prefix: &str) -> usize {
        let mut removed = 0;
        self.handlers.retain(|(_, method), _| {
            let keep = !method.starts_with(prefix);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn get(&self, scope: Scope, method: &str) -> Option<Handler> {
        self.handlers
            .get(&(scope, method.to_string()))
            .map(|h| h.value().clone())
    }

    /// Lists the registered method names for a scope, sorted.
    pub fn methods(&self, scope: Scope) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .iter()
            .filter(|e| e.key().0 == scope)
            .map(|e| e.key().1.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
