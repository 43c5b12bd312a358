//! # extrun
//!
//! Hosts extension parts on the RPC bus. An extension registers its
//! client-facing, server-to-server and client-side methods through an
//! `ExtensionHelper`; the `ExtensionManager` decides which extensions load
//! on which connection and starts them once.

pub mod broadcast;
pub mod builtin;
pub mod config;
pub mod datastore;
pub mod error;
pub mod extension;
pub mod helper;
pub mod logging;
pub mod manager;
pub mod sessions;

pub use broadcast::BroadcastMessage;
pub use broadcast::Broadcaster;
pub use config::Config;
pub use datastore::DataStore;
pub use error::Error;
pub use error::Result;
pub use extension::Extension;
pub use extension::ExtensionCatalog;
pub use extension::Role;
pub use extension::StaticCatalog;
pub use helper::ExtensionHelper;
pub use manager::ExtensionManager;
pub use manager::ManagerDeps;
pub use sessions::SessionRegistry;
pub use sessions::StoreSessions;
