//! # In-memory store
//!
//! An emulation of the `Store` contract for single-process deployments and
//! tests. `MemoryStore` plays the broker; each `MemoryClient` is one
//! connection to it. All clients share the key table and the channel table.
//!
//! Delivery is synchronous: `publish` pushes the message into every
//! subscribed connection's inbox before it returns.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::DashSet;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::Message;
use crate::SetMode;
use crate::SetReply;
use crate::Store;
use crate::error::Error;
use crate::error::Result;
use crate::record::HashRecord;
use crate::record::Record;
use crate::record::parse_integer;

type Inbox = mpsc::UnboundedSender<Message>;

struct Shared {
    data: Mutex<HashMap<String, Record>>,
    channels: DashMap<String, HashMap<u64, Inbox>>,
    available: AtomicBool,
    next_conn: AtomicU64,
}

/// The shared state behind every `MemoryClient`.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                data: Mutex::new(HashMap::new()),
                channels: DashMap::new(),
                available: AtomicBool::new(true),
                next_conn: AtomicU64::new(1),
            }),
        }
    }

    /// Opens a new connection.
    pub fn connect(&self) -> MemoryClient {
        let id = self.shared.next_conn.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        MemoryClient {
            id,
            shared: self.shared.clone(),
            inbox: std::sync::Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
            subscriptions: DashSet::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Simulates the broker going away (`false`) or coming back (`true`).
    ///
    /// While unavailable, every command on every connection fails with
    /// `Error::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    /// Returns how many connections are subscribed to `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.shared.channels.get(channel).map_or(0, |subs| subs.len())
    }

    /// Returns how many channel entries the broker holds, including empty ones.
    pub fn channel_entries(&self) -> usize {
        self.shared.channels.len()
    }

    /// Returns a snapshot of every stored record.
    pub async fn snapshot(&self) -> HashMap<String, Record> {
        self.shared.data.lock().await.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// One connection to a `MemoryStore`.
pub struct MemoryClient {
    id: u64,
    shared: Arc<Shared>,
    // Own sender, cloned into each subscribed channel. Dropped on close so
    // `recv` can observe the end of the stream.
    inbox: std::sync::Mutex<Option<Inbox>>,
    rx: Mutex<mpsc::UnboundedReceiver<Message>>,
    subscriptions: DashSet<String>,
    closed: AtomicBool,
}

impl MemoryClient {
    /// Returns the connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Closes this connection.
    ///
    /// Drops every subscription. Pending and future `recv` calls return
    /// `Ok(None)` once the inbox is drained, and commands fail with `Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for channel in self.subscriptions.iter() {
            if let Some(mut subs) = self.shared.channels.get_mut(channel.key()) {
                subs.remove(&self.id);
            }
        }
        self.subscriptions.clear();
        self.shared.channels.retain(|_, subs| !subs.is_empty());
        if let Ok(mut inbox) = self.inbox.lock() {
            inbox.take();
        }
    }

    fn check(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        if !self.shared.available.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }

    fn inbox(&self) -> Result<Inbox> {
        let guard = self.inbox.lock().map_err(|_| Error::Closed)?;
        guard.clone().ok_or(Error::Closed)
    }
}

#[async_trait::async_trait]
impl Store for MemoryClient {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        let data = self.shared.data.lock().await;
        match data.get(key) {
            None => Ok(None),
            Some(Record::Scalar(s)) => Ok(Some(s.clone())),
            Some(Record::Hash(_)) => Err(Error::WrongType),
        }
    }

    async fn set(&self, key: &str, value: &str, mode: SetMode) -> Result<SetReply> {
        self.check()?;
        let mut data = self.shared.data.lock().await;
        let exists = data.contains_key(key);
        let skip = match mode {
            SetMode::Always => false,
            SetMode::IfAbsent => exists,
            SetMode::IfPresent => !exists,
        };
        if skip {
            return Ok(SetReply::Nil);
        }
        data.insert(key.to_string(), Record::Scalar(value.to_string()));
        Ok(SetReply::Ok)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.check()?;
        let mut data = self.shared.data.lock().await;
        let current = match data.get(key) {
            None => 0,
            Some(Record::Scalar(s)) => parse_integer(s)?,
            Some(Record::Hash(_)) => return Err(Error::WrongType),
        };
        let next = current.checked_add(delta).ok_or(Error::NotAnInteger)?;
        data.insert(key.to_string(), Record::Scalar(next.to_string()));
        Ok(next)
    }

    async fn del(&self, keys: &[&str]) -> Result<u64> {
        self.check()?;
        let mut data = self.shared.data.lock().await;
        let removed = keys.iter().filter(|k| data.remove(**k).is_some()).count();
        Ok(removed as u64)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.check()?;
        let data = self.shared.data.lock().await;
        let value = data
            .get(key)
            .and_then(Record::as_hash)
            .and_then(|h| h.get(field))
            .map(str::to_string);
        Ok(value)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        self.check()?;
        let mut data = self.shared.data.lock().await;
        let record = data
            .entry(key.to_string())
            .or_insert_with(|| Record::Hash(HashRecord::new()));
        if matches!(record, Record::Scalar(_)) {
            tracing::debug!(key, "hset replaced a scalar with a hash");
            *record = Record::Hash(HashRecord::new());
        }
        match record {
            Record::Hash(h) => Ok(h.set(field, value)),
            Record::Scalar(_) => Err(Error::WrongType),
        }
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        self.check()?;
        let mut data = self.shared.data.lock().await;
        let Some(Record::Hash(h)) = data.get_mut(key) else { return Ok(false) };
        let removed = h.remove(field);
        if h.is_empty() {
            data.remove(key);
        }
        Ok(removed)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.check()?;
        let data = self.shared.data.lock().await;
        Ok(data
            .get(key)
            .and_then(Record::as_hash)
            .map(HashRecord::to_map)
            .unwrap_or_default())
    }

    async fn scan(&self) -> Result<Vec<String>> {
        self.check()?;
        let data = self.shared.data.lock().await;
        Ok(data.keys().cloned().collect())
    }

    async fn flushall(&self) -> Result<()> {
        self.check()?;
        self.shared.data.lock().await.clear();
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.check()?;
        let inbox = self.inbox()?;
        self.shared
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(self.id, inbox);
        self.subscriptions.insert(channel.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.check()?;
        if let Some(mut subs) = self.shared.channels.get_mut(channel) {
            subs.remove(&self.id);
        }
        self.shared.channels.remove_if(channel, |_, subs| subs.is_empty());
        self.subscriptions.remove(channel);
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<usize> {
        self.check()?;
        let Some(subs) = self.shared.channels.get(channel) else {
            tracing::trace!(channel, "publish with no subscribers");
            return Ok(0);
        };
        let msg = Message {
            channel: channel.to_string(),
            payload: message.to_string(),
        };
        let delivered = subs
            .values()
            .filter(|inbox| inbox.send(msg.clone()).is_ok())
            .count();
        tracing::trace!(channel, delivered, "published");
        Ok(delivered)
    }

    async fn recv(&self) -> Result<Option<Message>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        for channel in self.subscriptions.iter() {
            if let Some(mut subs) = self.shared.channels.get_mut(channel.key()) {
                subs.remove(&self.id);
            }
            self.shared.channels.remove_if(channel.key(), |_, subs| subs.is_empty());
        }
    }
}
