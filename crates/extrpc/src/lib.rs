//! # extrpc
//!
//! Remote calls between extension parts over a KV+PubSub store.
//!
//! A service announces itself in the `ServiceDirectory`, serves a channel
//! derived from its name, and registers handlers by `(Scope, method)`. A
//! caller publishes a request envelope on that channel and the `Router`
//! correlates the response that comes back on its own reply channel.
//!
//! Neither side needs the other's network location up front: the store is
//! the only thing both must reach.

pub mod config;
pub mod directory;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod router;

pub use config::RouterConfig;
pub use directory::ServiceDirectory;
pub use envelope::CorrelationKey;
pub use envelope::Envelope;
pub use envelope::Target;
pub use error::Error;
pub use error::Result;
pub use handler::CallContext;
pub use handler::Handler;
pub use handler::HandlerResult;
pub use handler::Scope;
pub use handler::handler;
pub use router::Endpoint;
pub use router::Router;
