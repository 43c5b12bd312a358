//! Single-process extension host.
//!
//! Runs every selected built-in extension as a standalone service on an
//! in-memory bus, seeded with the configured service addresses.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use kvbus::MemoryStore;
use kvbus::Store;

use extrpc::Router;
use extrun::Config;
use extrun::DataStore;
use extrun::ExtensionManager;
use extrun::ManagerDeps;
use extrun::Role;
use extrun::StoreSessions;
use extrun::builtin;

#[derive(Parser, Debug)]
#[command(name = "extrun", about = "Run extensions as standalone services")]
struct Args {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Extension to run. Repeat for several; default is every active one.
    #[arg(long = "ext")]
    ext: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    extrun::logging::init(&config.log.filter);

    let bus = MemoryStore::new();
    let admin: Arc<dyn Store> = Arc::new(bus.connect());
    admin.flushall().await.context("flushing store")?;

    let router = Router::start(config.router_config(), Arc::new(bus.connect())).await?;
    router
        .directory()
        .seed(config.services.iter().map(|(name, addr)| (name.as_str(), addr.as_str())))
        .await?;

    let manager = ExtensionManager::new(ManagerDeps {
        router: router.clone(),
        catalog: Arc::new(builtin::catalog()),
        sessions: Arc::new(StoreSessions::new(admin.clone())),
        data: DataStore::new(&config.extensions.data_dir),
        active: config.extensions.active.clone(),
    });

    let names = if args.ext.is_empty() { manager.list_extensions().await } else { args.ext.clone() };

    let mut roles = Vec::new();
    for name in &names {
        let address = config
            .services
            .get(&extrun::extension::service_name(name))
            .cloned()
            .unwrap_or_else(|| "127.0.0.1:0".to_string());
        let role = Role::standalone(address);
        if manager.load_extension(name, &role).await? {
            roles.push((name.clone(), role));
        } else {
            tracing::warn!(extension = %name, "not loaded");
        }
    }
    for (name, role) in &roles {
        manager.start_extension(name, role).await?;
    }

    tracing::info!(count = roles.len(), "extensions running, ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;

    manager.shutdown().await?;
    router.shutdown().await;
    tracing::info!("stopped");
    Ok(())
}
