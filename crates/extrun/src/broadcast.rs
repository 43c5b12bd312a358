//! # Broadcast
//!
//! Fire-and-forget messages from an extension to every connected user. The
//! message is tagged with the sending extension's name and published on one
//! shared channel; gateways subscribe and fan out to their clients.

use std::sync::Arc;

use extrpc::Router;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    #[serde(rename = "extName")]
    pub ext_name: String,
    pub msg: Value,
}

#[derive(Clone)]
pub struct Broadcaster {
    router: Arc<Router>,
    channel: String,
}

impl Broadcaster {
    pub fn new(router: Arc<Router>) -> Self {
        let channel = format!("{}:broadcast", router.config().channel_prefix);
        Self { router, channel }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Publishes `msg` on behalf of `ext_name`. Returns how many subscribers got it.
    pub async fn broadcast(&self, ext_name: &str, msg: Value) -> Result<usize> {
        let message = BroadcastMessage {
            ext_name: ext_name.to_string(),
            msg,
        };
        let payload = serde_json::to_string(&message).map_err(extrpc::Error::from)?;
        let delivered = self.router.publish(&self.channel, &payload).await?;
        tracing::debug!(extension = ext_name, delivered, "broadcast sent");
        Ok(delivered)
    }

    /// Starts receiving broadcasts on this router. A router holds one
    /// subscription; subscribing again replaces it.
    pub async fn subscribe(&self) -> Result<Subscription> {
        let rx = self.router.listen(&self.channel).await?;
        Ok(Subscription { rx })
    }
}

pub struct Subscription {
    rx: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
    /// Next well-formed broadcast, or `None` once the router stops.
    pub async fn recv(&mut self) -> Option<BroadcastMessage> {
        while let Some(payload) = self.rx.recv().await {
            match serde_json::from_str(&payload) {
                Ok(message) => return Some(message),
                Err(e) => tracing::warn!(error = %e, "dropping malformed broadcast"),
            }
        }
        None
    }
}
