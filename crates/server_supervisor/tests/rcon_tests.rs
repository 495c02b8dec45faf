use async_trait::async_trait;
use server_supervisor::config_store::{write_json, DirConfigStore};
use server_supervisor::rcon::packet::{
    Packet, SERVERDATA_AUTH, SERVERDATA_AUTH_RESPONSE, SERVERDATA_EXECCOMMAND,
    SERVERDATA_RESPONSE_VALUE,
};
use server_supervisor::rcon::{
    poll_status, CredentialSource, LivenessProbe, RconClient, RconCredentials, RconError,
    RconSessions, ServerConfigCredentials,
};
use server_supervisor::{ServerConfig, ServerError, SessionId, SERVER_CONFIG_NAME};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

const PASSWORD: &str = "hunter2";

const STATUS_REPLY: &str = "\
hostname  : kzhost
udp/ip    : 0.0.0.0:27015 (local: 10.0.0.2:27015) (public: 198.51.100.4:27015)
players   : 2 humans, 0 bots (64 max) (not hibernating) (unreserved)
loaded spawngroup(  1)  : SV:  [1: kz_checkmate | main lump | mapload]
";

// ============================================================================
// Mock RCON server
// ============================================================================

async fn serve_connection(mut stream: TcpStream) {
    while let Ok(packet) = Packet::read_from(&mut stream).await {
        let result = match packet.kind {
            SERVERDATA_AUTH => {
                let verdict = if packet.body == PASSWORD { packet.id } else { -1 };
                let _ = Packet::new(packet.id, SERVERDATA_RESPONSE_VALUE, "")
                    .write_to(&mut stream)
                    .await;
                Packet::new(verdict, SERVERDATA_AUTH_RESPONSE, "")
                    .write_to(&mut stream)
                    .await
            }
            SERVERDATA_EXECCOMMAND => {
                if packet.body == "hangup" {
                    return;
                }
                if packet.body == "stall" {
                    // Keep the connection open without ever answering
                    std::future::pending::<()>().await;
                }
                let reply = match packet.body.as_str() {
                    "status" => STATUS_REPLY.to_string(),
                    other => format!("echo: {other}"),
                };
                // Two fragments, like a reply split across packets
                let (head, tail) = reply.split_at(reply.len() / 2);
                let _ = Packet::new(packet.id, SERVERDATA_RESPONSE_VALUE, head)
                    .write_to(&mut stream)
                    .await;
                Packet::new(packet.id, SERVERDATA_RESPONSE_VALUE, tail)
                    .write_to(&mut stream)
                    .await
            }
            SERVERDATA_RESPONSE_VALUE => {
                let _ = Packet::new(packet.id, SERVERDATA_RESPONSE_VALUE, "")
                    .write_to(&mut stream)
                    .await;
                // srcds follows the mirrored marker with a stray packet
                Packet::new(packet.id, SERVERDATA_RESPONSE_VALUE, "\u{1}")
                    .write_to(&mut stream)
                    .await
            }
            _ => Ok(()),
        };
        if result.is_err() {
            return;
        }
    }
}

async fn mock_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_connection(stream));
        }
    });
    addr
}

struct Probe(AtomicBool);

impl LivenessProbe for Probe {
    fn is_alive(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Fixed(RconCredentials);

#[async_trait]
impl CredentialSource for Fixed {
    async fn credentials(&self) -> server_supervisor::Result<RconCredentials> {
        Ok(self.0.clone())
    }
}

fn sessions(addr: SocketAddr, alive: bool) -> (RconSessions, Arc<Probe>) {
    let probe = Arc::new(Probe(AtomicBool::new(alive)));
    let credentials = Arc::new(Fixed(RconCredentials {
        address: addr.to_string(),
        password: PASSWORD.to_string(),
    }));
    let sessions = RconSessions::new(probe.clone(), credentials, Duration::from_millis(10));
    (sessions, probe)
}

// ============================================================================
// Client
// ============================================================================

#[tokio::test]
async fn test_client_reassembles_fragmented_replies() {
    let addr = mock_server().await;
    let mut client = RconClient::connect(&addr.to_string(), PASSWORD).await.unwrap();

    assert_eq!(client.execute("sv_cheats").await.unwrap(), "echo: sv_cheats");
    // The stray packet from the first exchange must not leak into this one
    assert_eq!(client.execute("mp_restartgame 1").await.unwrap(), "echo: mp_restartgame 1");
    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_client_times_out_on_silent_server() {
    let addr = mock_server().await;
    let mut client =
        RconClient::connect_with_timeout(&addr.to_string(), PASSWORD, Duration::from_millis(200))
            .await
            .unwrap();

    let result = client.execute("stall").await;
    assert!(matches!(result, Err(RconError::Timeout(_))));
}

#[tokio::test]
async fn test_client_rejects_wrong_password() {
    let addr = mock_server().await;
    let result = RconClient::connect(&addr.to_string(), "wrong").await;
    assert!(matches!(result, Err(RconError::AuthenticationFailed)));
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn test_session_lifecycle() {
    let addr = mock_server().await;
    let (sessions, _probe) = sessions(addr, true);

    let id = sessions.open().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions.execute(id, "say hi").await.unwrap(), "echo: say hi");

    sessions.close(id).await.unwrap();
    assert!(sessions.is_empty());
    assert!(matches!(
        sessions.execute(id, "say hi").await,
        Err(ServerError::UnknownSession(_))
    ));
    assert!(matches!(
        sessions.close(id).await,
        Err(ServerError::UnknownSession(_))
    ));
}

#[tokio::test]
async fn test_open_requires_running_server() {
    let addr = mock_server().await;
    let (sessions, probe) = sessions(addr, false);

    assert!(matches!(sessions.open().await, Err(ServerError::ServerNotRunning)));

    probe.0.store(true, Ordering::SeqCst);
    assert!(sessions.open().await.is_ok());
}

#[tokio::test]
async fn test_transport_failure_keeps_session() {
    let addr = mock_server().await;
    let (sessions, _probe) = sessions(addr, true);

    let id = sessions.open().await.unwrap();
    let result = sessions.execute(id, "hangup").await;
    assert!(matches!(result, Err(ServerError::RconTransport(_))));
    assert_eq!(sessions.len(), 1);

    sessions.close_all().await;
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn test_close_cancels_command_waiting_for_reply() {
    let addr = mock_server().await;
    let (sessions, _probe) = sessions(addr, true);
    let sessions = Arc::new(sessions);

    let id = sessions.open().await.unwrap();
    let pending = {
        let sessions = Arc::clone(&sessions);
        tokio::spawn(async move { sessions.execute(id, "stall").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(3), sessions.close_all())
        .await
        .expect("close_all must not wait for the stalled command");
    assert!(sessions.is_empty());

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(ServerError::SessionClosed(_))));
}

#[tokio::test]
async fn test_unknown_session_id() {
    let addr = mock_server().await;
    let (sessions, _probe) = sessions(addr, true);
    let result = sessions.execute(SessionId::new(), "status").await;
    assert!(matches!(result, Err(ServerError::UnknownSession(_))));
}

#[tokio::test]
async fn test_poll_status_uses_short_lived_session() {
    let addr = mock_server().await;
    let (sessions, _probe) = sessions(addr, true);

    let report = poll_status(&sessions).await.unwrap();
    assert_eq!(report.active_map.as_deref(), Some("kz_checkmate"));
    assert_eq!(report.connected_players, 2);
    assert_eq!(report.local_address.as_deref(), Some("10.0.0.2:27015"));
    assert_eq!(report.public_address.as_deref(), Some("198.51.100.4:27015"));
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn test_credentials_come_from_server_config() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DirConfigStore::new(dir.path()));
    let credentials = ServerConfigCredentials::new(store.clone(), "127.0.0.1");

    let defaults = credentials.credentials().await.unwrap();
    assert_eq!(defaults.address, "127.0.0.1:27015");

    let config = ServerConfig {
        server_port: 27020,
        server_rcon_password: PASSWORD.to_string(),
        ..Default::default()
    };
    write_json(store.as_ref(), SERVER_CONFIG_NAME, &config)
        .await
        .unwrap();

    let configured = credentials.credentials().await.unwrap();
    assert_eq!(configured.address, "127.0.0.1:27020");
    assert_eq!(configured.password, PASSWORD);
}
