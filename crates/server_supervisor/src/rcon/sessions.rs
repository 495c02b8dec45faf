use super::client::{RconClient, DEFAULT_IO_TIMEOUT};
use crate::config::{ServerConfig, SERVER_CONFIG_NAME};
use crate::config_store::{read_json, ConfigStore};
use crate::error::{Result, ServerError};
use crate::process::ProcessSupervisor;
use async_trait::async_trait;
use dashmap::DashMap;
use server_types::SessionId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Reports whether the game server process is up.
pub trait LivenessProbe: Send + Sync {
    fn is_alive(&self) -> bool;
}

impl LivenessProbe for ProcessSupervisor {
    fn is_alive(&self) -> bool {
        ProcessSupervisor::is_alive(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconCredentials {
    pub address: String,
    pub password: String,
}

#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credentials(&self) -> Result<RconCredentials>;
}

/// Takes the port and password from `server.json`.
pub struct ServerConfigCredentials {
    store: Arc<dyn ConfigStore>,
    host: String,
}

impl ServerConfigCredentials {
    pub fn new(store: Arc<dyn ConfigStore>, host: impl Into<String>) -> Self {
        Self {
            store,
            host: host.into(),
        }
    }
}

#[async_trait]
impl CredentialSource for ServerConfigCredentials {
    async fn credentials(&self) -> Result<RconCredentials> {
        let config = match read_json::<ServerConfig>(self.store.as_ref(), SERVER_CONFIG_NAME).await {
            Ok(config) => config,
            Err(ServerError::ConfigNotFound(_)) => ServerConfig::default(),
            Err(e) => return Err(e),
        };
        Ok(RconCredentials {
            address: format!("{}:{}", self.host, config.server_port),
            password: config.server_rcon_password,
        })
    }
}

/// One open console connection. `closed` flips once `close` starts, which
/// cancels any command still waiting on the server.
struct Session {
    client: Mutex<RconClient>,
    closed: watch::Sender<bool>,
}

/// Open remote-console sessions keyed by id. Each connection has its own
/// lock so different sessions run commands concurrently.
pub struct RconSessions {
    sessions: DashMap<SessionId, Arc<Session>>,
    probe: Arc<dyn LivenessProbe>,
    credentials: Arc<dyn CredentialSource>,
    settle_delay: Duration,
    io_timeout: Duration,
}

impl RconSessions {
    pub fn new(
        probe: Arc<dyn LivenessProbe>,
        credentials: Arc<dyn CredentialSource>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            probe,
            credentials,
            settle_delay,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Bounds every connect, read and write on new connections.
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Connects and authenticates a new session.
    ///
    /// # Returns
    ///
    /// The new session's id, or `ServerNotRunning` when the game server
    /// process is down.
    pub async fn open(&self) -> Result<SessionId> {
        if !self.probe.is_alive() {
            return Err(ServerError::ServerNotRunning);
        }

        let credentials = self.credentials.credentials().await?;
        let client = RconClient::connect_with_timeout(
            &credentials.address,
            &credentials.password,
            self.io_timeout,
        )
        .await?;

        let id = SessionId::new();
        let (closed, _) = watch::channel(false);
        self.sessions.insert(
            id,
            Arc::new(Session {
                client: Mutex::new(client),
                closed,
            }),
        );
        info!("RCON session {} opened", id);
        Ok(id)
    }

    fn session(&self, id: SessionId) -> Result<Arc<Session>> {
        self.sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(ServerError::UnknownSession(id))
    }

    /// Runs `command` on an open session. Transport failures leave the
    /// session in place; the caller decides whether to close it.
    ///
    /// A command still waiting for its reply when the session is closed
    /// fails with `SessionClosed`.
    pub async fn execute(&self, id: SessionId, command: &str) -> Result<String> {
        let session = self.session(id)?;
        let mut closed = session.closed.subscribe();
        if *closed.borrow() {
            return Err(ServerError::SessionClosed(id));
        }

        debug!("RCON {} > {}", id, command);
        tokio::select! {
            reply = async { session.client.lock().await.execute(command).await } => Ok(reply?),
            _ = closed.wait_for(|closed| *closed) => Err(ServerError::SessionClosed(id)),
        }
    }

    /// Closes the connection, waits the settle delay and forgets the
    /// session. Never waits for a command in flight: that command is
    /// cancelled instead.
    pub async fn close(&self, id: SessionId) -> Result<()> {
        let session = self.session(id)?;
        session.closed.send_replace(true);

        match tokio::time::timeout(self.io_timeout, session.client.lock()).await {
            Ok(mut client) => {
                if let Err(e) = client.shutdown().await {
                    warn!("Failed to shut down RCON session {}: {}", id, e);
                }
            }
            Err(_) => warn!("RCON session {} is still busy, dropping its connection", id),
        }

        tokio::time::sleep(self.settle_delay).await;
        self.sessions.remove(&id);
        info!("RCON session {} closed", id);
        Ok(())
    }

    pub async fn close_all(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        if ids.is_empty() {
            return;
        }
        debug!("Closing {} RCON sessions", ids.len());

        let results = futures::future::join_all(ids.into_iter().map(|id| self.close(id))).await;
        for result in results {
            if let Err(e) = result {
                warn!("Failed to close RCON session: {}", e);
            }
        }
    }

    /// Opens a session, runs one command and closes it again.
    pub async fn run_once(&self, command: &str) -> Result<String> {
        let id = self.open().await?;
        let reply = self.execute(id, command).await;
        if let Err(e) = self.close(id).await {
            warn!("Failed to close RCON session {}: {}", id, e);
        }
        reply
    }
}
