//! # Host Configuration
//!
//! One TOML file drives a host process. Every field has a default, so an
//! empty file (or no file at all) is a valid configuration.
//!
//! ```toml
//! [log]
//! filter = "info,extrpc=debug"
//!
//! [rpc]
//! default_timeout_ms = 5000
//!
//! [extensions]
//! active = ["chat"]
//!
//! [services]
//! gatewayServer = "127.0.0.1:5001"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use extrpc::RouterConfig;
use extrpc::config::DEFAULT_CHANNEL_PREFIX;
use extrpc::config::DEFAULT_GATEWAY_KEY;
use extrpc::config::DEFAULT_INDEX_KEY;
use extrpc::config::DEFAULT_TIMEOUT;
use serde::Deserialize;

#[derive(Debug)]
pub enum Error {
    Io(PathBuf, std::io::Error),
    Parse(toml::de::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(path, e) => write!(f, "Cannot read config {}: {}", path.display(), e),
            Self::Parse(e) => write!(f, "Invalid config: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::Parse(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub log: LogConfig,
    pub rpc: RpcConfig,
    pub directory: DirectoryConfig,
    pub extensions: ExtensionsConfig,
    /// Service name -> `host:port`, written to the directory at startup.
    pub services: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { filter: "info".to_string() }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RpcConfig {
    pub default_timeout_ms: u64,
    pub channel_prefix: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DirectoryConfig {
    pub index_key: String,
    pub gateway_key: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            index_key: DEFAULT_INDEX_KEY.to_string(),
            gateway_key: DEFAULT_GATEWAY_KEY.to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ExtensionsConfig {
    /// Extensions allowed to load. Empty means every extension the catalog knows.
    pub active: Vec<String>,
    /// Directory holding each extension's persisted JSON.
    pub data_dir: PathBuf,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            active: Vec::new(),
            data_dir: PathBuf::from("run/small_data"),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&text)
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            default_timeout: Duration::from_millis(self.rpc.default_timeout_ms),
            channel_prefix: self.rpc.channel_prefix.clone(),
            index_key: self.directory.index_key.clone(),
            gateway_key: self.directory.gateway_key.clone(),
        }
    }
}
