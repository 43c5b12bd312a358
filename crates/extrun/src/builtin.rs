//! Extensions compiled into the host binary.

use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;

use crate::error::Result;
use crate::extension::Extension;
use crate::extension::StaticCatalog;
use crate::helper::ExtensionHelper;

pub const PING: &str = "ping";

/// Liveness probe: `s2s ping` answers `"pong"`, `c2s echo` returns its
/// arguments, and `s2s greet` answers with the caller's name.
#[derive(Default)]
pub struct PingExtension {
    helper: OnceLock<Arc<ExtensionHelper>>,
}

#[async_trait]
impl Extension for PingExtension {
    async fn initialize(&self, helper: Arc<ExtensionHelper>) -> Result<()> {
        helper.register_s2s_api("ping", |_, _| async { Ok(json!("pong")) })?;
        helper.register_s2s_api("greet", |ctx, _| async move { Ok(json!(format!("hello, {}", ctx.caller))) })?;
        helper.register_c2s_api("echo", |_, args| async move { Ok(Value::Array(args)) })?;
        let _ = self.helper.set(helper);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        if let Some(helper) = self.helper.get() {
            tracing::info!(extension = helper.name(), connection = helper.connection(), "ping ready");
        }
        Ok(())
    }
}

/// Catalog holding every built-in extension.
pub fn catalog() -> StaticCatalog {
    StaticCatalog::new().with(PING, PingExtension::default)
}
