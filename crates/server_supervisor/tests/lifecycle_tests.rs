//! Lifecycle tests with shell scripts standing in for SteamCMD and the
//! dedicated server.
#![cfg(unix)]

use async_trait::async_trait;
use plugin_system::{MemoryArchiveSource, MemoryManifestStore, PluginError, PluginKind, PluginManifest};
use server_supervisor::rcon::packet::{
    Packet, SERVERDATA_AUTH, SERVERDATA_AUTH_RESPONSE, SERVERDATA_EXECCOMMAND,
    SERVERDATA_RESPONSE_VALUE,
};
use server_supervisor::rcon::{CredentialSource, RconCredentials};
use server_supervisor::{
    ConsoleSettings, DirConfigStore, FetchedPackage, Operation, OperatorApi, Orchestrator,
    OrchestratorParts, PackageFetcher, ServerError, ServerStatus, SupervisorSettings,
};
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

const EXECUTABLE: &str = "game/bin/linuxsteamrt64/cs2";

const STEAMCMD_SCRIPT: &str = r#"#!/bin/sh
# $2 is the +force_install_dir argument
bin="$2/game/bin/linuxsteamrt64"
mkdir -p "$bin"
printf '#!/bin/sh\necho server up\nexec sleep 30\n' > "$bin/cs2"
chmod +x "$bin/cs2"
echo "Success! App '730' fully installed."
"#;

fn write_script(path: &Path, contents: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Hands out a fake SteamCMD; can be told to hold inside `fetch`.
#[derive(Default)]
struct ScriptFetcher {
    hold: AtomicBool,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl PackageFetcher for ScriptFetcher {
    async fn fetch(&self, _url: &str, dest_dir: &Path) -> server_supervisor::Result<FetchedPackage> {
        if self.hold.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        let executable = dest_dir.join("steamcmd.sh");
        write_script(&executable, STEAMCMD_SCRIPT);
        Ok(FetchedPackage { executable })
    }
}

const RCON_PASSWORD: &str = "rcon";

/// Console server that accepts any command and never answers `stall`.
async fn console_server() -> SocketAddr {
    async fn serve(mut stream: TcpStream) {
        while let Ok(packet) = Packet::read_from(&mut stream).await {
            let reply = match packet.kind {
                SERVERDATA_AUTH => Packet::new(packet.id, SERVERDATA_AUTH_RESPONSE, ""),
                SERVERDATA_EXECCOMMAND if packet.body == "stall" => {
                    std::future::pending::<()>().await;
                    continue;
                }
                SERVERDATA_EXECCOMMAND => {
                    Packet::new(packet.id, SERVERDATA_RESPONSE_VALUE, packet.body.clone())
                }
                _ => Packet::new(packet.id, SERVERDATA_RESPONSE_VALUE, ""),
            };
            if reply.write_to(&mut stream).await.is_err() {
                return;
            }
        }
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream));
        }
    });
    addr
}

struct ConsoleAt(SocketAddr);

#[async_trait]
impl CredentialSource for ConsoleAt {
    async fn credentials(&self) -> server_supervisor::Result<RconCredentials> {
        Ok(RconCredentials {
            address: self.0.to_string(),
            password: RCON_PASSWORD.to_string(),
        })
    }
}

struct Harness {
    _dir: TempDir,
    server_dir: PathBuf,
    fetcher: Arc<ScriptFetcher>,
    orchestrator: Arc<Orchestrator>,
}

impl Harness {
    async fn new() -> Self {
        Self::with_manifests(Vec::new()).await
    }

    async fn with_manifests(records: Vec<serde_json::Value>) -> Self {
        Self::build(records, None, Duration::from_millis(10)).await
    }

    /// Console sessions go to `console` and take `settle_delay` to close.
    async fn with_console(console: SocketAddr, settle_delay: Duration) -> Self {
        Self::build(Vec::new(), Some(console), settle_delay).await
    }

    async fn build(
        records: Vec<serde_json::Value>,
        console: Option<SocketAddr>,
        settle_delay: Duration,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let settings = SupervisorSettings {
            server_dir: dir.path().join("cs2"),
            steamcmd_dir: dir.path().join("steamcmd"),
            config_dir: dir.path().join("config"),
            plugin_manifest: dir.path().join("plugins.json"),
            executable: PathBuf::from(EXECUTABLE),
            patch_console_subsystem: false,
            console: ConsoleSettings {
                settle_delay,
                io_timeout: Duration::from_secs(5),
                ..Default::default()
            },
            ..Default::default()
        };
        let fetcher = Arc::new(ScriptFetcher::default());
        let parts = OrchestratorParts {
            archive_source: Arc::new(MemoryArchiveSource::new()),
            fetcher: fetcher.clone(),
            manifest_store: Arc::new(MemoryManifestStore::new(records)),
            configs: Arc::new(DirConfigStore::new(&settings.config_dir)),
            credentials: console
                .map(|addr| Arc::new(ConsoleAt(addr)) as Arc<dyn CredentialSource>),
            settings: settings.clone(),
        };
        let orchestrator = Arc::new(Orchestrator::new(parts).await.unwrap());

        Self {
            server_dir: settings.server_dir,
            _dir: dir,
            fetcher,
            orchestrator,
        }
    }

    fn api(&self) -> OperatorApi {
        OperatorApi::new(self.orchestrator.clone())
    }
}

fn pid_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..150 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition never became true");
}

// ============================================================================
// Install / Update
// ============================================================================

#[tokio::test]
async fn test_update_or_install_installs_into_missing_dir() {
    let harness = Harness::new().await;
    let lifecycle = harness.orchestrator.lifecycle();

    lifecycle.update_or_install().await.unwrap();

    assert!(harness.server_dir.join(EXECUTABLE).exists());
    assert_eq!(lifecycle.status(), ServerStatus::Stopped);
    assert!(lifecycle
        .logs()
        .since(0)
        .iter()
        .any(|log| log.message.contains("fully installed")));
}

#[tokio::test]
async fn test_dirty_install_directory_is_refused() {
    let harness = Harness::new().await;
    std::fs::create_dir_all(harness.server_dir.join("game")).unwrap();

    let result = harness.orchestrator.lifecycle().update_or_install().await;
    assert!(matches!(result, Err(ServerError::DirtyInstallDirectory(_))));
}

#[tokio::test]
async fn test_status_is_updating_while_update_runs() {
    let harness = Harness::new().await;
    let lifecycle = harness.orchestrator.lifecycle();
    lifecycle.install().await.unwrap();
    lifecycle.start().await.unwrap();
    assert_eq!(lifecycle.status(), ServerStatus::Running);

    harness.fetcher.hold.store(true, Ordering::SeqCst);
    let orchestrator = harness.orchestrator.clone();
    let update = tokio::spawn(async move { orchestrator.lifecycle().update().await });
    harness.fetcher.entered.notified().await;

    assert_eq!(lifecycle.status(), ServerStatus::Updating);
    assert!(matches!(
        lifecycle.update().await,
        Err(ServerError::OperationInProgress(Operation::Update))
    ));

    harness.fetcher.hold.store(false, Ordering::SeqCst);
    harness.fetcher.release.notify_one();
    update.await.unwrap().unwrap();

    assert_eq!(lifecycle.status(), ServerStatus::Running);
    lifecycle.stop().await.unwrap();
}

#[tokio::test]
async fn test_second_install_is_refused_while_installing() {
    let harness = Harness::new().await;
    let lifecycle = harness.orchestrator.lifecycle();

    harness.fetcher.hold.store(true, Ordering::SeqCst);
    let orchestrator = harness.orchestrator.clone();
    let install = tokio::spawn(async move { orchestrator.lifecycle().install().await });
    harness.fetcher.entered.notified().await;

    assert_eq!(lifecycle.status(), ServerStatus::Installing);
    assert!(matches!(
        lifecycle.install().await,
        Err(ServerError::OperationInProgress(Operation::Install))
    ));
    assert!(matches!(
        lifecycle.orchestrate_plugins().await,
        Err(ServerError::OperationInProgress(Operation::Install))
    ));

    harness.fetcher.hold.store(false, Ordering::SeqCst);
    harness.fetcher.release.notify_one();
    install.await.unwrap().unwrap();
    assert_eq!(lifecycle.status(), ServerStatus::Stopped);
}

#[tokio::test]
async fn test_start_and_plugins_wait_for_update() {
    let harness = Harness::new().await;
    let lifecycle = harness.orchestrator.lifecycle();
    lifecycle.install().await.unwrap();

    harness.fetcher.hold.store(true, Ordering::SeqCst);
    let orchestrator = harness.orchestrator.clone();
    let update = tokio::spawn(async move { orchestrator.lifecycle().update().await });
    harness.fetcher.entered.notified().await;

    assert!(matches!(
        lifecycle.start().await,
        Err(ServerError::OperationInProgress(Operation::Update))
    ));
    assert!(matches!(
        lifecycle.orchestrate_plugins().await,
        Err(ServerError::OperationInProgress(Operation::Update))
    ));
    assert!(!lifecycle.is_alive());

    harness.fetcher.hold.store(false, Ordering::SeqCst);
    harness.fetcher.release.notify_one();
    update.await.unwrap().unwrap();

    lifecycle.start().await.unwrap();
    lifecycle.stop().await.unwrap();
}

// ============================================================================
// Start / Stop
// ============================================================================

#[tokio::test]
async fn test_start_requires_executable() {
    let harness = Harness::new().await;
    let result = harness.orchestrator.lifecycle().start().await;
    assert!(matches!(result, Err(ServerError::ExecutableMissing(_))));
}

#[tokio::test]
async fn test_second_start_supersedes_first() {
    let harness = Harness::new().await;
    let lifecycle = harness.orchestrator.lifecycle();
    lifecycle.install().await.unwrap();

    let first = lifecycle.start().await.unwrap();
    let second = lifecycle.start().await.unwrap();

    assert_ne!(first.generation, second.generation);
    assert!(!pid_alive(first.pid.unwrap()));
    assert!(pid_alive(second.pid.unwrap()));
    assert_eq!(lifecycle.status(), ServerStatus::Running);

    lifecycle.stop().await.unwrap();
    assert_eq!(lifecycle.status(), ServerStatus::Stopped);
    assert!(!pid_alive(second.pid.unwrap()));
}

#[tokio::test]
async fn test_second_start_is_refused_while_starting() {
    let console = console_server().await;
    let harness = Harness::with_console(console, Duration::from_millis(500)).await;
    let lifecycle = harness.orchestrator.lifecycle();
    lifecycle.install().await.unwrap();
    lifecycle.start().await.unwrap();
    harness.orchestrator.sessions().open().await.unwrap();

    // Restarting closes the open session first, which takes the settle delay
    let orchestrator = harness.orchestrator.clone();
    let restart = tokio::spawn(async move { orchestrator.lifecycle().start().await });
    wait_until(|| lifecycle.status() == ServerStatus::Starting).await;

    assert!(matches!(
        lifecycle.start().await,
        Err(ServerError::OperationInProgress(Operation::Start))
    ));
    assert!(matches!(
        lifecycle.update().await,
        Err(ServerError::OperationInProgress(Operation::Start))
    ));

    restart.await.unwrap().unwrap();
    assert_eq!(lifecycle.status(), ServerStatus::Running);
    lifecycle.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_closes_console_sessions() {
    let console = console_server().await;
    let harness = Harness::with_console(console, Duration::from_millis(10)).await;
    let lifecycle = harness.orchestrator.lifecycle();
    lifecycle.install().await.unwrap();
    let ticket = lifecycle.start().await.unwrap();

    let sessions = harness.orchestrator.sessions();
    let id = sessions.open().await.unwrap();
    assert_eq!(sessions.execute(id, "say hi").await.unwrap(), "say hi");
    sessions.open().await.unwrap();
    assert_eq!(sessions.len(), 2);

    lifecycle.stop().await.unwrap();
    assert!(sessions.is_empty());
    assert!(!pid_alive(ticket.pid.unwrap()));
    assert_eq!(lifecycle.status(), ServerStatus::Stopped);
}

#[tokio::test]
async fn test_stop_is_not_blocked_by_unanswered_command() {
    let console = console_server().await;
    let harness = Harness::with_console(console, Duration::from_millis(10)).await;
    let lifecycle = harness.orchestrator.lifecycle();
    lifecycle.install().await.unwrap();
    let ticket = lifecycle.start().await.unwrap();

    let id = harness.orchestrator.sessions().open().await.unwrap();
    let orchestrator = harness.orchestrator.clone();
    let pending = tokio::spawn(async move { orchestrator.sessions().execute(id, "stall").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(3), lifecycle.stop())
        .await
        .expect("stop must not wait for the console")
        .unwrap();
    assert!(!pid_alive(ticket.pid.unwrap()));
    assert!(matches!(
        pending.await.unwrap(),
        Err(ServerError::SessionClosed(_))
    ));
}

#[tokio::test]
async fn test_stop_without_process_is_a_no_op() {
    let harness = Harness::new().await;
    harness.orchestrator.lifecycle().stop().await.unwrap();
    assert_eq!(harness.orchestrator.lifecycle().status(), ServerStatus::Stopped);
}

#[tokio::test]
async fn test_bootstrap_runs_server_and_captures_output() {
    let harness = Harness::new().await;
    harness.orchestrator.bootstrap().await.unwrap();

    let api = harness.api();
    assert_eq!(api.status(), ServerStatus::Running);
    wait_until(|| api.server_logs(0).iter().any(|log| log.message == "server up")).await;

    // First start writes the default server config
    assert!(api.list_configs().await.unwrap().contains(&"server.json".to_string()));

    api.clear_server_logs();
    assert!(api.server_logs(0).is_empty());
    harness.orchestrator.shutdown().await.unwrap();
}

// ============================================================================
// Plugins
// ============================================================================

#[tokio::test]
async fn test_plugin_edits_require_stopped_server() {
    let harness = Harness::new().await;
    let lifecycle = harness.orchestrator.lifecycle();
    lifecycle.install().await.unwrap();
    lifecycle.start().await.unwrap();

    let api = harness.api();
    let manifest = PluginManifest::new("gokz-configs", PluginKind::ConfigOnly);
    assert!(matches!(
        api.upsert_plugin(manifest.clone()).await,
        Err(ServerError::Plugin(PluginError::PreconditionFailed { .. }))
    ));
    assert!(matches!(
        lifecycle.orchestrate_plugins().await,
        Err(ServerError::Plugin(PluginError::PreconditionFailed { .. }))
    ));

    api.stop_server().await.unwrap();
    assert!(api.upsert_plugin(manifest).await.unwrap());
    assert_eq!(api.plugins().await.len(), 1);
    api.remove_plugin("gokz-configs").await.unwrap();
    assert!(api.plugins().await.is_empty());
}

#[tokio::test]
async fn test_second_orchestration_is_refused_while_running() {
    let harness = Harness::new().await;
    let lifecycle = harness.orchestrator.lifecycle();
    lifecycle.install().await.unwrap();

    // Holding the manager parks the orchestration right after it claims its flag
    let held = harness.orchestrator.plugins().lock().await;
    let orchestrator = harness.orchestrator.clone();
    let sync = tokio::spawn(async move { orchestrator.lifecycle().orchestrate_plugins().await });
    wait_until(|| lifecycle.status() == ServerStatus::UpdatingPlugins).await;

    assert!(matches!(
        lifecycle.orchestrate_plugins().await,
        Err(ServerError::OperationInProgress(Operation::PluginOrchestration))
    ));
    assert!(matches!(
        lifecycle.start().await,
        Err(ServerError::OperationInProgress(Operation::PluginOrchestration))
    ));
    assert!(matches!(
        lifecycle.install().await,
        Err(ServerError::OperationInProgress(Operation::PluginOrchestration))
    ));

    drop(held);
    sync.await.unwrap().unwrap();
    assert_eq!(lifecycle.status(), ServerStatus::Stopped);
}

#[tokio::test]
async fn test_orchestrate_plugins_with_config_only_plugin() {
    let record = serde_json::json!({
        "name": "kz-settings",
        "displayName": "KZ settings",
        "kind": "config-only",
        "enabled": true
    });
    let harness = Harness::with_manifests(vec![record]).await;

    let report = harness
        .orchestrator
        .lifecycle()
        .orchestrate_plugins()
        .await
        .unwrap();
    assert!(report.installed.is_empty());

    let views = harness.api().plugins().await;
    assert!(views[0].installed);
    assert!(views[0].active);
}

// ============================================================================
// Maps
// ============================================================================

#[tokio::test]
async fn test_maps_are_stored_in_server_config() {
    let harness = Harness::new().await;
    let api = harness.api();

    assert!(matches!(
        api.set_active_map("kz_nowhere").await,
        Err(ServerError::MapNotFound(_))
    ));

    let map = api.add_workshop_map("kz_grotto", "3121168339").await.unwrap();
    assert_eq!(map.change_command(), "host_workshop_map 3121168339");
    api.add_workshop_map("kz_grotto", "3121168339").await.unwrap();

    api.set_active_map("kz_grotto").await.unwrap();
    let config = api.server_config().await.unwrap();
    assert_eq!(config.maps.len(), 2);
    assert_eq!(config.maps[0].name, "kz_grotto");
    assert_eq!(api.active_map().await.unwrap(), None);

    let dashboard = api.dashboard().await.unwrap();
    assert_eq!(dashboard.status, ServerStatus::Stopped);
    assert_eq!(dashboard.server_config, config);
    assert_eq!(dashboard.connected_players, 0);
}
