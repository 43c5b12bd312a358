//! # kvbus
//!
//! A narrow key-value plus publish/subscribe contract, and an in-memory
//! emulation of it.
//!
//! ## Philosophy
//!
//! - **Lowest Common Denominator**: Only the commands a service directory and a
//!   call bus need. Any pub/sub-capable KV broker can satisfy the trait.
//! - **Connection-Oriented**: A `Store` value is one connection. Subscriptions
//!   and the message inbox belong to that connection, like a broker client.
//! - **Explicit Types**: Stored values are a tagged `Record`, so type mismatches
//!   fail deterministically instead of being reinterpreted.

use std::collections::HashMap;

pub mod error;
pub mod memory;
pub mod record;

pub use error::Error;
pub use error::Result;
pub use memory::MemoryClient;
pub use memory::MemoryStore;
pub use record::HashRecord;
pub use record::Record;
pub use record::parse_integer;


/// Write condition for `Store::set`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SetMode {
    /// Unconditional write.
    #[default]
    Always,
    /// Only write if the key does not exist (`NX`).
    IfAbsent,
    /// Only write if the key already exists (`XX`).
    IfPresent,
}

/// Outcome of `Store::set`.
///
/// `Nil` is the null reply of a conditional write that was skipped. It is not
/// an error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SetReply {
    Ok,
    Nil,
}

impl SetReply {
    pub fn is_ok(self) -> bool {
        matches!(self, SetReply::Ok)
    }
}

/// A message delivered to a subscribed connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    pub payload: String,
}

/// One connection to a key-value store with pub/sub.
///
/// This trait is designed to be object-safe (`Arc<dyn Store>`).
///
/// # invariants
/// - A key holds exactly one of {absent, scalar, hash}.
/// - Absence is never an error: reads of missing keys return `None`/empty.
/// - Counters treat a missing key as `0`.
#[async_trait::async_trait]
pub trait Store: Send + Sync + 'static {
    /// Reads a scalar. Fails with `WrongType` on a hash key.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a scalar, replacing whatever the key held.
    async fn set(&self, key: &str, value: &str, mode: SetMode) -> Result<SetReply>;

    /// Adds `delta` to an integer counter and returns the new value.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    async fn incr(&self, key: &str) -> Result<i64> {
        self.incr_by(key, 1).await
    }

    async fn decr(&self, key: &str) -> Result<i64> {
        self.incr_by(key, -1).await
    }

    /// Removes each key that exists and returns how many were removed.
    async fn del(&self, keys: &[&str]) -> Result<u64>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Sets a hash field. Returns true if the field was newly created.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool>;

    /// Removes a hash field. Returns true if it existed.
    async fn hdel(&self, key: &str, field: &str) -> Result<bool>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Returns every key in one snapshot.
    async fn scan(&self) -> Result<Vec<String>>;

    /// Removes every key. Subscriptions are not affected.
    async fn flushall(&self) -> Result<()>;

    /// Subscribes this connection to a channel. Idempotent.
    async fn subscribe(&self, channel: &str) -> Result<()>;

    async fn unsubscribe(&self, channel: &str) -> Result<()>;

    /// Delivers `message` to every connection subscribed to `channel` and
    /// returns how many received it.
    async fn publish(&self, channel: &str, message: &str) -> Result<usize>;

    /// Waits for the next message delivered to this connection.
    ///
    /// Returns `Ok(None)` once the connection is closed.
    async fn recv(&self) -> Result<Option<Message>>;
}
