//! Install, update, plugin orchestration, start and stop of the game
//! server.
//!
//! Every long-running operation claims its own flag for its duration;
//! calling it again while the flag is held fails with
//! [`ServerError::OperationInProgress`]. Operations that touch the same
//! files also refuse to overlap: `start` and `orchestrate_plugins` fail
//! while an install or update is rewriting the server tree, and the other
//! way round. The reported status is derived from those flags and process
//! liveness, never stored.

use crate::config::{ServerConfig, SupervisorSettings, SERVER_CONFIG_NAME};
use crate::config_store::{read_json, write_json, ConfigStore};
use crate::error::{Operation, Result, ServerError};
use crate::exe::{self, Subsystem};
use crate::fetcher::PackageFetcher;
use crate::logs::ServerLogBuffer;
use crate::process::{self, ProcessSupervisor, ProcessTicket};
use crate::rcon::RconSessions;
use plugin_system::{PluginError, PluginManager, SyncReport};
use server_types::ServerStatus;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    fn claim(flag: &'a AtomicBool, operation: Operation) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| ServerError::OperationInProgress(operation))
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct Flags {
    installing: AtomicBool,
    updating: AtomicBool,
    updating_plugins: AtomicBool,
    starting: AtomicBool,
}

/// Drives the dedicated server through install, update, plugin
/// orchestration, start and stop.
pub struct ServerLifecycle {
    settings: SupervisorSettings,
    process: Arc<ProcessSupervisor>,
    fetcher: Arc<dyn PackageFetcher>,
    configs: Arc<dyn ConfigStore>,
    sessions: Arc<RconSessions>,
    plugins: Arc<Mutex<PluginManager>>,
    flags: Flags,
}

impl ServerLifecycle {
    /// Creates a lifecycle over the given collaborators.
    ///
    /// # Arguments
    ///
    /// * `settings` - Where the server, SteamCMD and configs live
    /// * `process` - Tracks the running server process
    /// * `fetcher` - Provides the SteamCMD executable
    /// * `configs` - Holds `server.json`
    /// * `sessions` - Remote-console sessions closed before the process is killed
    /// * `plugins` - Plugin manager used by [`ServerLifecycle::orchestrate_plugins`]
    pub fn new(
        settings: SupervisorSettings,
        process: Arc<ProcessSupervisor>,
        fetcher: Arc<dyn PackageFetcher>,
        configs: Arc<dyn ConfigStore>,
        sessions: Arc<RconSessions>,
        plugins: Arc<Mutex<PluginManager>>,
    ) -> Self {
        Self {
            settings,
            process,
            fetcher,
            configs,
            sessions,
            plugins,
            flags: Flags::default(),
        }
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn logs(&self) -> &Arc<ServerLogBuffer> {
        self.process.logs()
    }

    pub fn is_alive(&self) -> bool {
        self.process.is_alive()
    }

    /// Resolves once the running server process, if any, has exited.
    pub async fn wait_for_exit(&self) {
        self.process.wait_for_exit().await
    }

    /// Current status: the first running guarded operation, in the order
    /// install, update, plugin orchestration, start; otherwise `RUNNING`
    /// or `STOPPED` from process liveness.
    pub fn status(&self) -> ServerStatus {
        let flags = &self.flags;
        if flags.installing.load(Ordering::Acquire) {
            ServerStatus::Installing
        } else if flags.updating.load(Ordering::Acquire) {
            ServerStatus::Updating
        } else if flags.updating_plugins.load(Ordering::Acquire) {
            ServerStatus::UpdatingPlugins
        } else if flags.starting.load(Ordering::Acquire) {
            ServerStatus::Starting
        } else if self.process.is_alive() {
            ServerStatus::Running
        } else {
            ServerStatus::Stopped
        }
    }

    /// Fails with the first guarded operation other than `own` that is
    /// still running.
    fn ensure_idle(&self, own: &[Operation]) -> Result<()> {
        let flags = &self.flags;
        let guarded = [
            (Operation::Install, &flags.installing),
            (Operation::Update, &flags.updating),
            (Operation::PluginOrchestration, &flags.updating_plugins),
            (Operation::Start, &flags.starting),
        ];
        match guarded
            .iter()
            .find(|(operation, flag)| !own.contains(operation) && flag.load(Ordering::Acquire))
        {
            Some((operation, _)) => Err(ServerError::OperationInProgress(*operation)),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Install / Update
    // ========================================================================

    /// Fresh install: wipes the configured directories, then runs the
    /// update.
    ///
    /// # Errors
    ///
    /// * `OperationInProgress` if an install, plugin orchestration or start
    ///   is already running
    /// * Any error of [`ServerLifecycle::update`]
    pub async fn install(&self) -> Result<()> {
        let _guard = FlagGuard::claim(&self.flags.installing, Operation::Install)?;
        self.ensure_idle(&[Operation::Install])?;
        info!("Installing server into {}", self.settings.server_dir.display());

        for dir in &self.settings.clean_on_install {
            match tokio::fs::remove_dir_all(dir).await {
                Ok(()) => info!("Removed {}", dir.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ServerError::io(dir, e)),
            }
        }

        self.update().await?;
        info!("Server installed");
        Ok(())
    }

    /// Downloads or validates the server through SteamCMD.
    ///
    /// SteamCMD's exit code is only logged; the update counts as successful
    /// when the server executable exists afterwards.
    ///
    /// # Errors
    ///
    /// * `OperationInProgress` if an update, plugin orchestration or start
    ///   is already running
    /// * `ExecutableMissing` if SteamCMD left no executable behind
    pub async fn update(&self) -> Result<()> {
        let _guard = FlagGuard::claim(&self.flags.updating, Operation::Update)?;
        self.ensure_idle(&[Operation::Install, Operation::Update])?;
        let settings = &self.settings;
        info!("Updating server in {}", settings.server_dir.display());

        tokio::fs::create_dir_all(&settings.steamcmd_dir)
            .await
            .map_err(|e| ServerError::io(&settings.steamcmd_dir, e))?;
        let package = self
            .fetcher
            .fetch(&settings.steamcmd_url, &settings.steamcmd_dir)
            .await?;

        let args = vec![
            "+force_install_dir".to_string(),
            settings.server_dir.display().to_string(),
            "+login".to_string(),
            "anonymous".to_string(),
            "+app_update".to_string(),
            settings.app_id.to_string(),
            "+validate".to_string(),
            "+quit".to_string(),
        ];
        let status =
            process::run_to_completion(&package.executable, &args, &settings.steamcmd_dir, self.logs())
                .await?;
        if !status.success() {
            warn!("SteamCMD exited with {}", status);
        }

        let executable = settings.executable_path();
        if !path_exists(&executable).await {
            return Err(ServerError::ExecutableMissing(executable));
        }
        if settings.patch_console_subsystem {
            exe::patch_subsystem(&executable, Subsystem::Console).await?;
        }

        info!("Server up to date");
        Ok(())
    }

    /// Updates an existing install, or installs into an absent directory.
    ///
    /// # Errors
    ///
    /// * `DirtyInstallDirectory` if the server directory exists but holds
    ///   no executable
    pub async fn update_or_install(&self) -> Result<()> {
        if path_exists(&self.settings.executable_path()).await {
            self.update().await
        } else if path_exists(&self.settings.server_dir).await {
            Err(ServerError::DirtyInstallDirectory(
                self.settings.server_dir.clone(),
            ))
        } else {
            self.install().await
        }
    }

    // ========================================================================
    // Plugins
    // ========================================================================

    /// Installs the loader framework and brings every plugin in line with
    /// its manifest.
    ///
    /// # Returns
    ///
    /// What the pass installed, reinstalled, activated and deactivated.
    ///
    /// # Errors
    ///
    /// * `PreconditionFailed` while the server process is alive
    /// * `OperationInProgress` while any other guarded operation runs
    pub async fn orchestrate_plugins(&self) -> Result<SyncReport> {
        if self.process.is_alive() {
            return Err(PluginError::PreconditionFailed {
                operation: "update plugins",
                status: ServerStatus::Running,
            }
            .into());
        }
        let _guard = FlagGuard::claim(&self.flags.updating_plugins, Operation::PluginOrchestration)?;
        self.ensure_idle(&[Operation::PluginOrchestration])?;

        let mut manager = self.plugins.lock().await;
        if let Some(url) = &self.settings.loader_url {
            manager.installer().install_loader_framework(url).await?;
        }
        Ok(manager.sync_all().await?)
    }

    // ========================================================================
    // Process
    // ========================================================================

    /// Starts the server, stopping any process that is already running.
    ///
    /// # Returns
    ///
    /// The ticket of the new process.
    ///
    /// # Errors
    ///
    /// * `ExecutableMissing` if the server is not installed
    /// * `OperationInProgress` while any other guarded operation runs
    pub async fn start(&self) -> Result<ProcessTicket> {
        let executable = self.settings.executable_path();
        if !path_exists(&executable).await {
            return Err(ServerError::ExecutableMissing(executable));
        }
        let _guard = FlagGuard::claim(&self.flags.starting, Operation::Start)?;
        self.ensure_idle(&[Operation::Start])?;

        if self.process.is_alive() {
            info!("Stopping the running server before starting a new one");
            self.sessions.close_all().await;
            self.process.kill().await;
        }

        let config = self.server_config().await?;
        let cwd = executable
            .parent()
            .unwrap_or(self.settings.server_dir.as_path())
            .to_path_buf();
        info!("Starting server {} on port {}", config.server_name, config.server_port);
        self.process.spawn(&executable, &config.launch_args(), &cwd)
    }

    /// Closes every console session, then kills the server process and
    /// waits for it to exit. A no-op when nothing runs.
    pub async fn stop(&self) -> Result<()> {
        if !self.process.is_alive() {
            info!("Server is not running");
            return Ok(());
        }
        self.sessions.close_all().await;
        self.process.kill().await;
        Ok(())
    }

    /// Reads `server.json`, writing the defaults first if it is missing.
    pub async fn server_config(&self) -> Result<ServerConfig> {
        match read_json(self.configs.as_ref(), SERVER_CONFIG_NAME).await {
            Err(ServerError::ConfigNotFound(_)) => {
                let config = ServerConfig::default();
                write_json(self.configs.as_ref(), SERVER_CONFIG_NAME, &config).await?;
                info!("Wrote default {}", SERVER_CONFIG_NAME);
                Ok(config)
            }
            other => other,
        }
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
