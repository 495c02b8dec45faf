//! kzhost: keeps a Counter-Strike 2 dedicated server installed, updated,
//! modded and running.

mod cli;
mod config;
mod logging;
mod signals;

use anyhow::Context;
use clap::Parser;
use cli::{CliArgs, Commands};
use config::AppConfig;
use plugin_system::{JsonFileManifestStore, PluginRegistry};
use server_supervisor::{OperatorApi, Orchestrator, SupervisorSettings};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let mut config = AppConfig::load_from_file(&args.config)
        .await
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    if let Some(log_level) = args.log_level {
        config.logging.level = log_level;
    }
    if args.json_logs {
        config.logging.json_format = true;
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;
    logging::setup_logging(&config.logging)?;

    let base = match args.config.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let settings = config.to_supervisor_settings(&base);

    match args.command.unwrap_or(Commands::Run) {
        Commands::Run => run(settings).await,
        Commands::Plugins => sync_plugins(settings).await,
        Commands::Order => print_order(&settings.plugin_manifest, &settings.scripting_framework).await,
    }
}

async fn run(settings: SupervisorSettings) -> anyhow::Result<()> {
    info!("Server directory: {}", settings.server_dir.display());
    let orchestrator = Orchestrator::from_settings(settings).await?;

    if let Err(e) = orchestrator.bootstrap().await {
        error!("Startup failed: {}", e);
        return Err(e.into());
    }
    info!("Server is running, press Ctrl+C to stop");

    tokio::select! {
        received = signals::wait_for_shutdown() => {
            info!("Received {}, stopping the server", received?);
        }
        _ = orchestrator.lifecycle().wait_for_exit() => {
            warn!("Server process exited on its own");
        }
    }

    orchestrator.shutdown().await?;
    Ok(())
}

async fn sync_plugins(settings: SupervisorSettings) -> anyhow::Result<()> {
    let orchestrator = Arc::new(Orchestrator::from_settings(settings).await?);
    let report = orchestrator.lifecycle().orchestrate_plugins().await?;
    info!(
        "Installed {} plugins, reinstalled {}, activated {}, deactivated {}",
        report.installed.len(),
        report.reinstalled.len(),
        report.activated.len(),
        report.deactivated.len()
    );

    for view in OperatorApi::new(orchestrator).plugins().await {
        let state = match (view.installed, view.active) {
            (true, true) => "active",
            (true, false) => "disabled",
            _ => "missing",
        };
        println!("{:<32} {}", view.manifest.name, state);
    }
    Ok(())
}

async fn print_order(manifest: &Path, framework: &str) -> anyhow::Result<()> {
    let store = Arc::new(JsonFileManifestStore::new(manifest));
    let registry = PluginRegistry::load(store, framework).await?;
    for (index, name) in registry.ordered_names()?.iter().enumerate() {
        println!("{:>3}. {}", index + 1, name);
    }
    Ok(())
}
