//! Router settings and channel naming.

use std::time::Duration;

use crate::envelope::Target;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_CHANNEL_PREFIX: &str = "rpc";
pub const DEFAULT_INDEX_KEY: &str = "ServiceIndex";
pub const DEFAULT_GATEWAY_KEY: &str = "GatewayServices";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterConfig {
    /// Used when a call is issued without a timeout, or with zero.
    pub default_timeout: Duration,
    pub channel_prefix: String,
    /// Hash key holding service name -> `host:port`.
    pub index_key: String,
    /// Hash key holding the names of gateway services.
    pub gateway_key: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
            index_key: DEFAULT_INDEX_KEY.to_string(),
            gateway_key: DEFAULT_GATEWAY_KEY.to_string(),
        }
    }
}

impl RouterConfig {
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Calls never wait forever: a missing or zero timeout means the default.
    pub fn resolve_timeout(&self, timeout: Option<Duration>) -> Duration {
        match timeout {
            Some(t) if !t.is_zero() => t,
            _ => self.default_timeout,
        }
    }

    pub fn target_channel(&self, target: &Target) -> String {
        match target {
            Target::Service(name) => format!("{}:svc:{}", self.channel_prefix, name),
            Target::Connection(player) => format!("{}:conn:{}", self.channel_prefix, player),
        }
    }

    pub fn node_channel(&self, node_id: &str) -> String {
        format!("{}:node:{}", self.channel_prefix, node_id)
    }
}
