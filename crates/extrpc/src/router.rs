//! # Call Router
//!
//! Turns a logical call into a request envelope on the target's channel and
//! waits for the correlated response on this router's own reply channel.
//! The same router serves incoming requests for every endpoint it hosts.
//!
//! ## Architecture
//!
//! - **One Pump**: A single background task reads the store connection and
//!   demultiplexes by envelope: responses settle pending calls, requests are
//!   dispatched to handlers, raw channels go to listeners. No listener is
//!   added per call.
//! - **Settle Once**: Removing the key from the pending table is the only way
//!   to settle a call. Whichever of {response, timeout} removes it first wins;
//!   the other finds nothing and is dropped.
//! - **No Head-of-Line Blocking**: Handlers run in their own tasks, so a slow
//!   handler never delays unrelated requests or responses.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use dashmap::DashMap;
use futures::FutureExt;
use kvbus::Message;
use kvbus::Store;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::RouterConfig;
use crate::directory::ServiceDirectory;
use crate::envelope::CorrelationKey;
use crate::envelope::Envelope;
use crate::envelope::Failure;
use crate::envelope::Outcome;
use crate::envelope::Request;
use crate::envelope::Response;
use crate::envelope::Target;
use crate::error::Error;
use crate::error::Result;
use crate::handler::CallContext;
use crate::handler::Handler;
use crate::handler::HandlerTable;
use crate::handler::Scope;

/// Bookkeeping for one outstanding call.
struct PendingCall {
    method: String,
    created_at: Instant,
    timeout: Duration,
    tx: oneshot::Sender<Result<Value>>,
}

impl PendingCall {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.timeout
    }
}

/// Per-process router. Construct with `Router::start`.
pub struct Router {
    config: RouterConfig,
    node_id: String,
    reply_channel: String,
    store: Arc<dyn Store>,
    directory: ServiceDirectory,
    pending: DashMap<CorrelationKey, PendingCall>,
    endpoints: DashMap<Target, Arc<HandlerTable>>,
    listeners: DashMap<String, mpsc::UnboundedSender<String>>,
    seq_gen: AtomicU64,
    pump: OnceLock<JoinHandle<()>>,
}

impl Router {
    /// Subscribes to this router's reply channel and spawns the pump.
    ///
    /// `store` must be a connection dedicated to this router: the pump
    /// consumes every message delivered to it.
    pub async fn start(config: RouterConfig, store: Arc<dyn Store>) -> Result<Arc<Self>> {
        let node_id = format!("{:016x}", rand::random::<u64>());
        let reply_channel = config.node_channel(&node_id);
        store.subscribe(&reply_channel).await?;

        let directory = ServiceDirectory::new(store.clone(), &config.index_key, &config.gateway_key);
        let router = Arc::new(Self {
            config,
            node_id,
            reply_channel,
            store: store.clone(),
            directory,
            pending: DashMap::new(),
            endpoints: DashMap::new(),
            listeners: DashMap::new(),
            seq_gen: AtomicU64::new(1),
            pump: OnceLock::new(),
        });

        let handle = Self::spawn_pump(store, Arc::downgrade(&router));
        let _ = router.pump.set(handle);
        tracing::debug!(node = %router.node_id, "router started");
        Ok(router)
    }

    fn spawn_pump(store: Arc<dyn Store>, router: Weak<Router>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let msg = match store.recv().await {
                    Ok(Some(msg)) => msg,
                    Ok(None) => {
                        tracing::debug!("store connection closed, pump exiting");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "store receive failed, pump exiting");
                        break;
                    }
                };
                let Some(strong) = router.upgrade() else { break };
                strong.handle_message(msg);
            }

            if let Some(strong) = router.upgrade() {
                strong.fail_all_pending(Error::ChannelClosed);
            }
        })
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn directory(&self) -> &ServiceDirectory {
        &self.directory
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Number of calls still awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Starts serving requests addressed to `target`.
    pub async fn serve(self: &Arc<Self>, target: Target) -> Result<Endpoint> {
        if self.endpoints.contains_key(&target) {
            return Err(Error::DuplicateEndpoint(target.to_string()));
        }
        self.store.subscribe(&self.config.target_channel(&target)).await?;

        let handlers = self
            .endpoints
            .entry(target.clone())
            .or_insert_with(|| Arc::new(HandlerTable::new()))
            .value()
            .clone();

        tracing::debug!(node = %self.node_id, endpoint = %target, "serving endpoint");
        Ok(Endpoint {
            router: self.clone(),
            target,
            handlers,
        })
    }

    /// Serves a named service and publishes its address in the directory.
    pub async fn register_service(self: &Arc<Self>, name: &str, address: &str) -> Result<Endpoint> {
        let endpoint = self.serve(Target::service(name)).await?;
        self.directory.register(name, address).await?;
        Ok(endpoint)
    }

    /// Stops serving `target`. Requests already dispatched still complete.
    pub async fn unserve(&self, target: &Target) -> Result<bool> {
        if self.endpoints.remove(target).is_none() {
            return Ok(false);
        }
        self.store.unsubscribe(&self.config.target_channel(target)).await?;
        Ok(true)
    }

    /// Subscribes to a raw (non-RPC) channel. Payloads arrive on the receiver.
    pub async fn listen(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<String>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.store.subscribe(channel).await?;
        self.listeners.insert(channel.to_string(), tx);
        Ok(rx)
    }

    /// Publishes a raw payload. Returns the number of receivers.
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        Ok(self.store.publish(channel, payload).await?)
    }

    /// Issues a call and waits for its result, failure, or timeout.
    pub async fn call(
        &self,
        caller: &str,
        target: &Target,
        scope: Scope,
        method: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let timeout = self.config.resolve_timeout(timeout);

        if let Target::Service(name) = target {
            if self.directory.lookup(name).await?.is_none() {
                return Err(Error::NotFound(format!("service '{}'", name)));
            }
        }

        let (key, rx) = self.prepare_call(method, timeout);
        let request = Envelope::Request(Request {
            key: key.clone(),
            reply_to: self.reply_channel.clone(),
            caller: caller.to_string(),
            target: target.clone(),
            scope,
            method: method.to_string(),
            args,
        });

        let payload = match request.encode() {
            Ok(payload) => payload,
            Err(e) => {
                self.pending.remove(&key);
                return Err(e);
            }
        };

        let channel = self.config.target_channel(target);
        match self.store.publish(&channel, &payload).await {
            Ok(0) => {
                self.pending.remove(&key);
                return Err(Error::NotFound(format!("nobody serves {}", target)));
            }
            Ok(_) => {}
            Err(e) => {
                self.pending.remove(&key);
                return Err(e.into());
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                self.pending.remove(&key);
                Err(Error::ChannelClosed)
            }
            Err(_) => {
                self.pending.remove(&key);
                tracing::warn!(%key, method, endpoint = %target, timeout_ms = timeout.as_millis() as u64, "call timed out");
                Err(Error::Timeout {
                    method: method.to_string(),
                    after: timeout,
                })
            }
        }
    }

    /// Fails every outstanding call, stops the pump and drops every
    /// subscription, so publishers to this router see zero receivers.
    pub async fn shutdown(&self) {
        if let Some(pump) = self.pump.get() {
            pump.abort();
        }
        self.fail_all_pending(Error::ChannelClosed);

        let mut channels: Vec<String> = self
            .endpoints
            .iter()
            .map(|e| self.config.target_channel(e.key()))
            .collect();
        channels.extend(self.listeners.iter().map(|e| e.key().clone()));
        channels.push(self.reply_channel.clone());
        self.endpoints.clear();
        self.listeners.clear();

        for channel in channels {
            if let Err(e) = self.store.unsubscribe(&channel).await {
                tracing::warn!(%channel, error = %e, "unsubscribe failed during shutdown");
            }
        }
        tracing::debug!(node = %self.node_id, "router shut down");
    }

    fn prepare_call(&self, method: &str, timeout: Duration) -> (CorrelationKey, oneshot::Receiver<Result<Value>>) {
        let seq = self.seq_gen.fetch_add(1, Ordering::Relaxed);
        let key = CorrelationKey::new(&self.node_id, seq);
        let (tx, rx) = oneshot::channel();

        self.pending.insert(key.clone(), PendingCall {
            method: method.to_string(),
            created_at: Instant::now(),
            timeout,
            tx,
        });

        (key, rx)
    }

    fn fail_all_pending(&self, error: Error) {
        let keys: Vec<CorrelationKey> = self.pending.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, call)) = self.pending.remove(&key) {
                let _ = call.tx.send(Err(error.clone()));
            }
        }
    }

    fn handle_message(&self, msg: Message) {
        if let Some(listener) = self.listeners.get(&msg.channel) {
            if listener.send(msg.payload).is_err() {
                drop(listener);
                self.listeners.remove(&msg.channel);
            }
            return;
        }

        match Envelope::decode(&msg.payload) {
            Ok(Envelope::Response(response)) => self.settle(response),
            Ok(Envelope::Request(request)) => self.dispatch(request),
            Err(e) => {
                tracing::warn!(channel = %msg.channel, error = %e, "dropping malformed envelope");
            }
        }
    }

    fn settle(&self, response: Response) {
        let Some((key, call)) = self.pending.remove(&response.key) else {
            tracing::debug!(key = %response.key, "discarding response with no pending call");
            return;
        };

        if call.is_expired() {
            tracing::debug!(%key, method = %call.method, "response arrived past its deadline");
        }
        tracing::trace!(%key, method = %call.method, elapsed_us = call.created_at.elapsed().as_micros() as u64, "call settled");

        // The caller may have stopped waiting.
        let _ = call.tx.send(response.outcome.into_result());
    }

    fn dispatch(&self, request: Request) {
        let handler = self
            .endpoints
            .get(&request.target)
            .map(|e| e.value().clone())
            .and_then(|table| table.get(request.scope, &request.method));

        let store = self.store.clone();
        let Some(handler) = handler else {
            let message = format!("no {} method '{}' on {}", request.scope, request.method, request.target);
            tracing::debug!(key = %request.key, %message, "answering with not found");
            let response = Response {
                key: request.key,
                outcome: Outcome::Error(Failure::not_found(message)),
            };
            tokio::spawn(respond(store, request.reply_to, response));
            return;
        };

        tokio::spawn(run_handler(store, handler, request));
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get() {
            pump.abort();
        }
    }
}

async fn run_handler(store: Arc<dyn Store>, handler: Handler, request: Request) {
    let ctx = CallContext {
        caller: request.caller,
        scope: request.scope,
        method: request.method,
        key: request.key.clone(),
    };
    let method = ctx.method.clone();

    let outcome = match AssertUnwindSafe(handler(ctx, request.args)).catch_unwind().await {
        Ok(Ok(value)) => Outcome::Result(value),
        Ok(Err(payload)) => {
            tracing::debug!(key = %request.key, %method, %payload, "handler reported failure");
            Outcome::Error(Failure::handler(payload))
        }
        Err(_) => {
            tracing::error!(key = %request.key, %method, "handler panicked");
            Outcome::Error(Failure::handler(Value::String("handler panicked".into())))
        }
    };

    let response = Response {
        key: request.key,
        outcome,
    };
    respond(store, request.reply_to, response).await;
}

async fn respond(store: Arc<dyn Store>, reply_to: String, response: Response) {
    let key = response.key.clone();
    let payload = match Envelope::Response(response).encode() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(%key, error = %e, "failed to encode response");
            return;
        }
    };
    match store.publish(&reply_to, &payload).await {
        Ok(0) => tracing::debug!(%key, %reply_to, "caller no longer listening"),
        Ok(_) => {}
        Err(e) => tracing::warn!(%key, %reply_to, error = %e, "failed to publish response"),
    }
}

/// A target served by a router, with its handler table.
///
/// Calls made through an endpoint carry the endpoint's name as the caller.
#[derive(Clone)]
pub struct Endpoint {
    router: Arc<Router>,
    target: Target,
    handlers: Arc<HandlerTable>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn name(&self) -> &str {
        self.target.name()
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    pub fn register(&self, scope: Scope, method: &str, handler: Handler) -> Result<()> {
        self.handlers.register(scope, method, handler)?;
        tracing::debug!(endpoint = %self.target, %scope, method, "registered handler");
        Ok(())
    }

    pub fn unregister(&self, scope: Scope, method: &str) -> bool {
        self.handlers.unregister(scope, method)
    }

    pub async fn call(
        &self,
        target: &Target,
        scope: Scope,
        method: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.router.call(self.target.name(), target, scope, method, args, timeout).await
    }
}
