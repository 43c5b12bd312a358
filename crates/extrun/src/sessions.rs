//! # Player Sessions
//!
//! Which gateway holds each online player. A gateway claims a player with a
//! set-if-absent write, so a second login for the same player is refused
//! rather than silently moving the session.

use std::sync::Arc;

use async_trait::async_trait;
use kvbus::SetMode;
use kvbus::Store;

use crate::error::Result;

pub const PLAYER_GATEWAY_PREFIX: &str = "PlayerGateway:";
pub const PLAYER_COUNT_KEY: &str = "PlayerCount";

/// Resolves a player to the gateway service holding their connection.
#[async_trait]
pub trait SessionRegistry: Send + Sync + 'static {
    /// `None` means the player is offline.
    async fn gateway_of(&self, player: &str) -> Result<Option<String>>;
}

/// Session registry kept in the shared store.
#[derive(Clone)]
pub struct StoreSessions {
    store: Arc<dyn Store>,
}

impl StoreSessions {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    fn key(player: &str) -> String {
        format!("{}{}", PLAYER_GATEWAY_PREFIX, player)
    }

    /// Claims `player` for `gateway`. Returns false if the player is already
    /// online somewhere.
    pub async fn register_player(&self, player: &str, gateway: &str) -> Result<bool> {
        let claimed = self.store.set(&Self::key(player), gateway, SetMode::IfAbsent).await?.is_ok();
        if !claimed {
            tracing::warn!(player, gateway, "duplicate login refused");
            return Ok(false);
        }
        let online = self.store.incr(PLAYER_COUNT_KEY).await?;
        tracing::info!(player, gateway, online, "player online");
        Ok(true)
    }

    /// Releases the player's session. Returns false if they were not online.
    pub async fn unregister_player(&self, player: &str) -> Result<bool> {
        let key = Self::key(player);
        let removed = self.store.del(&[key.as_str()]).await?;
        if removed == 0 {
            return Ok(false);
        }
        let online = self.store.decr(PLAYER_COUNT_KEY).await?;
        tracing::info!(player, online, "player offline");
        Ok(true)
    }

    pub async fn online_count(&self) -> Result<i64> {
        match self.store.get(PLAYER_COUNT_KEY).await? {
            Some(value) => Ok(kvbus::parse_integer(&value)?),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl SessionRegistry for StoreSessions {
    async fn gateway_of(&self, player: &str) -> Result<Option<String>> {
        Ok(self.store.get(&Self::key(player)).await?)
    }
}
