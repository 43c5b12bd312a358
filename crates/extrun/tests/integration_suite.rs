//! Integration tests: several hosts sharing one in-memory bus.

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use kvbus::MemoryStore;
use serde_json::Value;
use serde_json::json;

use extrpc::Router;
use extrpc::RouterConfig;
use extrun::Broadcaster;
use extrun::DataStore;
use extrun::Extension;
use extrun::ExtensionHelper;
use extrun::ExtensionManager;
use extrun::ManagerDeps;
use extrun::Role;
use extrun::StaticCatalog;
use extrun::StoreSessions;
use extrun::builtin::PingExtension;

// --- Fixtures ---

#[derive(Clone, Default)]
struct Probe {
    inits: Arc<AtomicUsize>,
    starts: Arc<AtomicUsize>,
    inbox: Arc<Mutex<Vec<Value>>>,
}

/// A small chat extension with a standalone part and a client part.
struct ChatExtension {
    probe: Probe,
}

#[async_trait]
impl Extension for ChatExtension {
    async fn initialize(&self, helper: Arc<ExtensionHelper>) -> extrun::Result<()> {
        self.probe.inits.fetch_add(1, Ordering::SeqCst);

        if let Role::Client { .. } = helper.role() {
            let inbox = self.probe.inbox.clone();
            helper.register_s2c_api("onMessage", move |ctx, args| {
                let inbox = inbox.clone();
                async move {
                    inbox.lock().unwrap().push(json!({ "from": ctx.caller, "args": args }));
                    Ok(json!("ack"))
                }
            })?;
            return Ok(());
        }

        helper.register_c2s_api("sendMessage", |ctx, args| async move {
            let text = args.first().and_then(Value::as_str).unwrap_or_default().to_string();
            Ok(json!(format!("{}: {}", ctx.caller, text)))
        })?;
        helper.register_s2s_api("fail", |_, _| async { Err(json!({ "error": "Invalid extName" })) })?;
        Ok(())
    }

    async fn start(&self) -> extrun::Result<()> {
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn catalog(probe: &Probe) -> StaticCatalog {
    let probe = probe.clone();
    StaticCatalog::new()
        .with("chat", move || ChatExtension { probe: probe.clone() })
        .with("ping", PingExtension::default)
}

struct Host {
    router: Arc<Router>,
    manager: ExtensionManager,
    sessions: StoreSessions,
}

async fn host(store: &MemoryStore, catalog: StaticCatalog, data_dir: &Path, active: &[&str]) -> Host {
    let config = RouterConfig::default().with_default_timeout(Duration::from_millis(500));
    let router = Router::start(config, Arc::new(store.connect())).await.unwrap();
    let sessions = StoreSessions::new(Arc::new(store.connect()));
    let manager = ExtensionManager::new(ManagerDeps {
        router: router.clone(),
        catalog: Arc::new(catalog),
        sessions: Arc::new(sessions.clone()),
        data: DataStore::new(data_dir),
        active: active.iter().map(|s| s.to_string()).collect(),
    });
    Host { router, manager, sessions }
}

fn ms(n: u64) -> Option<Duration> {
    Some(Duration::from_millis(n))
}

// --- Loading and starting ---

#[tokio::test]
async fn test_list_respects_active() {
    let store = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let probe = Probe::default();

    let all = host(&store, catalog(&probe), dir.path(), &[]).await;
    assert_eq!(all.manager.list_extensions().await, vec!["chat", "ping"]);

    let only_ping = host(&store, catalog(&probe), dir.path(), &["ping"]).await;
    assert_eq!(only_ping.manager.list_extensions().await, vec!["ping"]);

    let role = Role::standalone("127.0.0.1:5005");
    assert!(!only_ping.manager.load_extension("chat", &role).await.unwrap());
    assert!(!only_ping.manager.load_extension("missing", &role).await.unwrap());
    assert_eq!(probe.inits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_standalone_load_registers_service() {
    let store = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let probe = Probe::default();
    let h = host(&store, catalog(&probe), dir.path(), &[]).await;

    let role = Role::standalone("127.0.0.1:5005");
    assert!(h.manager.load_extension("chat", &role).await.unwrap());
    assert!(h.manager.load_extension("chat", &role).await.unwrap());
    assert_eq!(probe.inits.load(Ordering::SeqCst), 1);

    let address = h.router.directory().lookup("ext_chat").await.unwrap();
    assert_eq!(address.as_deref(), Some("127.0.0.1:5005"));

    let helper = h.manager.helper("chat", &role).unwrap();
    assert_eq!(helper.connection(), "ext_chat");
    assert_eq!(helper.endpoint().handlers().methods(extrpc::Scope::C2s), vec!["chat/sendMessage"]);
}

#[tokio::test]
async fn test_start_runs_once_per_connection() {
    let store = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let probe = Probe::default();
    let h = host(&store, catalog(&probe), dir.path(), &[]).await;

    let p1 = Role::client("p1");
    let p2 = Role::client("p2");
    assert_eq!(h.manager.load_all(&p1).await.unwrap(), vec!["chat", "ping"]);
    h.manager.load_all(&p2).await.unwrap();

    h.manager.start_all(&p1).await.unwrap();
    h.manager.start_all(&p1).await.unwrap();
    assert!(!h.manager.start_extension("chat", &p1).await.unwrap());
    assert_eq!(probe.starts.load(Ordering::SeqCst), 1);

    assert!(h.manager.start_extension("chat", &p2).await.unwrap());
    assert_eq!(probe.starts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_start_before_load_is_an_error() {
    let store = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let h = host(&store, catalog(&Probe::default()), dir.path(), &[]).await;

    let err = h.manager.start_extension("chat", &Role::client("p1")).await.unwrap_err();
    assert!(matches!(err, extrun::Error::NotLoaded { .. }));
}

#[tokio::test]
async fn test_gateway_parts_share_one_endpoint() {
    let store = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let h = host(&store, catalog(&Probe::default()), dir.path(), &[]).await;

    let role = Role::gateway("gateway01");
    assert_eq!(h.manager.load_all(&role).await.unwrap().len(), 2);

    let chat = h.manager.helper("chat", &role).unwrap();
    let ping = h.manager.helper("ping", &role).unwrap();
    assert_eq!(chat.connection(), "gateway01");
    assert_eq!(ping.connection(), "gateway01");
    assert_eq!(
        chat.endpoint().handlers().methods(extrpc::Scope::S2s),
        vec!["chat/fail", "ping/greet", "ping/ping"]
    );

    let gateways = h.router.directory().gateway_services().await.unwrap();
    assert_eq!(gateways, vec!["gateway01"]);
}

/// Registers one method, then fails.
struct Flaky;

#[async_trait]
impl Extension for Flaky {
    async fn initialize(&self, helper: Arc<ExtensionHelper>) -> extrun::Result<()> {
        helper.register_s2s_api("a", |_, _| async { Ok(json!(1)) })?;
        Err(extrun::Error::Extension {
            extension: helper.name().to_string(),
            message: "boom".to_string(),
        })
    }
}

#[tokio::test]
async fn test_failed_standalone_load_leaves_nothing_behind() {
    let store = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let a = host(&store, StaticCatalog::new().with("flaky", || Flaky), dir.path(), &[]).await;
    let b = host(&store, catalog(&Probe::default()), dir.path(), &[]).await;

    let role = Role::standalone("127.0.0.1:1");
    let err = a.manager.load_extension("flaky", &role).await.unwrap_err();
    assert!(matches!(err, extrun::Error::Extension { .. }), "{err}");

    assert_eq!(a.router.directory().lookup("ext_flaky").await.unwrap(), None);
    assert!(a.manager.helper("flaky", &role).is_none());
    assert_eq!(store.subscriber_count("rpc:svc:ext_flaky"), 0);

    let ping_role = Role::standalone("127.0.0.1:5006");
    b.manager.load_extension("ping", &ping_role).await.unwrap();
    let ping = b.manager.helper("ping", &ping_role).unwrap();
    let err = ping.call_s2s_api("flaky", "a", vec![]).await.unwrap_err();
    assert!(err.is_not_found(), "{err}");

    // A retry fails the same way instead of tripping over leftovers.
    let err = a.manager.load_extension("flaky", &role).await.unwrap_err();
    assert!(matches!(err, extrun::Error::Extension { .. }), "{err}");
}

#[tokio::test]
async fn test_failed_load_on_shared_endpoint_keeps_others() {
    let store = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let probe = Probe::default();
    let catalog = catalog(&probe).with("flaky", || Flaky);
    let h = host(&store, catalog, dir.path(), &[]).await;

    let role = Role::gateway("gateway01");
    assert!(h.manager.load_extension("ping", &role).await.unwrap());
    assert!(h.manager.load_extension("flaky", &role).await.is_err());

    let ping = h.manager.helper("ping", &role).unwrap();
    assert_eq!(
        ping.endpoint().handlers().methods(extrpc::Scope::S2s),
        vec!["ping/greet", "ping/ping"]
    );
    assert_eq!(store.subscriber_count("rpc:svc:gateway01"), 1);
    assert!(h.manager.helper("flaky", &role).is_none());
}

// --- Calls between parts ---

#[tokio::test]
async fn test_c2s_call_carries_player_identity() {
    let store = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let server = host(&store, catalog(&Probe::default()), dir.path(), &[]).await;
    let client = host(&store, catalog(&Probe::default()), dir.path(), &[]).await;

    server.manager.load_extension("chat", &Role::standalone("127.0.0.1:5005")).await.unwrap();
    let player = Role::client("alice");
    client.manager.load_extension("chat", &player).await.unwrap();
    let helper = client.manager.helper("chat", &player).unwrap();

    let reply = helper.call_c2s_api("chat", "sendMessage", ms(500), vec![json!("hi")]).await.unwrap();
    assert_eq!(reply, json!("alice: hi"));

    let reply = helper.call_standalone_api("sendMessage", ms(500), vec![json!("again")]).await.unwrap();
    assert_eq!(reply, json!("alice: again"));

    let err = helper.call_c2s_api("chat", "nope", ms(100), vec![]).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_s2s_between_extensions() {
    let store = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let a = host(&store, catalog(&Probe::default()), dir.path(), &[]).await;
    let b = host(&store, catalog(&Probe::default()), dir.path(), &[]).await;

    a.manager.load_extension("ping", &Role::standalone("127.0.0.1:5006")).await.unwrap();
    let chat_role = Role::standalone("127.0.0.1:5005");
    b.manager.load_extension("chat", &chat_role).await.unwrap();
    let chat = b.manager.helper("chat", &chat_role).unwrap();

    assert_eq!(chat.call_s2s_api("ping", "ping", vec![]).await.unwrap(), json!("pong"));
    assert_eq!(chat.call_s2s_api("ping", "greet", vec![]).await.unwrap(), json!("hello, ext_chat"));

    let err = chat.call_s2s_api("chat", "fail", vec![]).await.unwrap_err();
    match err.rpc() {
        Some(extrpc::Error::Handler(payload)) => assert_eq!(payload, &json!({ "error": "Invalid extName" })),
        other => panic!("expected handler error, got {:?}", other),
    }

    let err = chat.call_s2s_api("weather", "forecast", vec![]).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_s2c_reaches_online_player_only() {
    let store = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let probe = Probe::default();
    let server = host(&store, catalog(&probe), dir.path(), &[]).await;
    let browser = host(&store, catalog(&probe), dir.path(), &[]).await;

    let standalone = Role::standalone("127.0.0.1:5005");
    server.manager.load_extension("chat", &standalone).await.unwrap();
    browser.manager.load_extension("chat", &Role::client("alice")).await.unwrap();
    assert!(server.sessions.register_player("alice", "gateway01").await.unwrap());

    let chat = server.manager.helper("chat", &standalone).unwrap();
    let ack = chat
        .call_s2c_api("alice", "chat", "onMessage", ms(500), vec![json!("welcome")])
        .await
        .unwrap();
    assert_eq!(ack, json!("ack"));
    assert_eq!(
        probe.inbox.lock().unwrap().clone(),
        vec![json!({ "from": "ext_chat", "args": ["welcome"] })]
    );

    let err = chat.call_s2c_api("bob", "chat", "onMessage", ms(100), vec![]).await.unwrap_err();
    assert!(err.is_not_found());

    server.sessions.unregister_player("alice").await.unwrap();
    let err = chat.call_s2c_api("alice", "chat", "onMessage", ms(100), vec![]).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_call_times_out_when_service_is_stuck() {
    struct Stuck;

    #[async_trait]
    impl Extension for Stuck {
        async fn initialize(&self, helper: Arc<ExtensionHelper>) -> extrun::Result<()> {
            helper.register_s2s_api("wait", |_, _| async {
                tokio::time::sleep(Duration::from_millis(2000)).await;
                Ok(Value::Null)
            })?;
            Ok(())
        }
    }

    let store = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let stuck = StaticCatalog::new().with("stuck", || Stuck);
    let a = host(&store, stuck, dir.path(), &[]).await;
    let b = host(&store, catalog(&Probe::default()), dir.path(), &[]).await;

    a.manager.load_extension("stuck", &Role::standalone("127.0.0.1:5010")).await.unwrap();
    let role = Role::standalone("127.0.0.1:5006");
    b.manager.load_extension("ping", &role).await.unwrap();
    let ping = b.manager.helper("ping", &role).unwrap();

    // Default timeout for this host is 500ms.
    let err = ping.call_s2s_api("stuck", "wait", vec![]).await.unwrap_err();
    assert!(err.is_timeout(), "{err}");
    assert_eq!(b.router.pending_calls(), 0);
}

// --- Broadcast and data ---

#[tokio::test]
async fn test_broadcast_tags_extension_name() {
    let store = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let server = host(&store, catalog(&Probe::default()), dir.path(), &[]).await;
    let gateway = host(&store, catalog(&Probe::default()), dir.path(), &[]).await;

    let mut subscription = Broadcaster::new(gateway.router.clone()).subscribe().await.unwrap();

    let role = Role::standalone("127.0.0.1:5005");
    server.manager.load_extension("chat", &role).await.unwrap();
    let chat = server.manager.helper("chat", &role).unwrap();
    assert_eq!(chat.broadcast_to_all_users(json!({ "text": "server restarting" })).await.unwrap(), 1);

    let got = tokio::time::timeout(Duration::from_millis(200), subscription.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.ext_name, "chat");
    assert_eq!(got.msg, json!({ "text": "server restarting" }));
}

#[tokio::test]
async fn test_extension_data_persists() {
    let store = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let role = Role::standalone("127.0.0.1:5005");

    let first = host(&store, catalog(&Probe::default()), dir.path(), &[]).await;
    first.manager.load_extension("chat", &role).await.unwrap();
    let chat = first.manager.helper("chat", &role).unwrap();
    assert_eq!(chat.load_data().await.unwrap(), json!({}));
    chat.store_data(&json!({ "motd": "hello" })).await.unwrap();
    first.manager.shutdown().await.unwrap();

    let second = host(&store, catalog(&Probe::default()), dir.path(), &[]).await;
    second.manager.load_extension("chat", &role).await.unwrap();
    let chat = second.manager.helper("chat", &role).unwrap();
    assert_eq!(chat.load_data().await.unwrap(), json!({ "motd": "hello" }));
}

#[tokio::test]
async fn test_shutdown_deregisters_standalone() {
    let store = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let h = host(&store, catalog(&Probe::default()), dir.path(), &[]).await;

    let role = Role::standalone("127.0.0.1:5005");
    h.manager.load_extension("chat", &role).await.unwrap();
    h.manager.shutdown().await.unwrap();

    assert_eq!(h.router.directory().lookup("ext_chat").await.unwrap(), None);
    assert!(h.manager.helper("chat", &role).is_none());
    assert_eq!(store.subscriber_count("rpc:svc:ext_chat"), 0);
}
