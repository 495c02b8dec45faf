use super::packet::{
    Packet, SERVERDATA_AUTH, SERVERDATA_AUTH_RESPONSE, SERVERDATA_EXECCOMMAND,
    SERVERDATA_RESPONSE_VALUE,
};
use crate::error::RconError;
use std::future::Future;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// One authenticated remote-console connection.
#[derive(Debug)]
pub struct RconClient {
    stream: TcpStream,
    next_id: i32,
    io_timeout: Duration,
}

impl RconClient {
    /// Connects to `address` and authenticates with `password`.
    pub async fn connect(address: &str, password: &str) -> Result<Self, RconError> {
        Self::connect_with_timeout(address, password, DEFAULT_IO_TIMEOUT).await
    }

    /// Like [`RconClient::connect`], failing any single connect, read or
    /// write that takes longer than `io_timeout`.
    pub async fn connect_with_timeout(
        address: &str,
        password: &str,
        io_timeout: Duration,
    ) -> Result<Self, RconError> {
        let stream = within(io_timeout, async { Ok(TcpStream::connect(address).await?) }).await?;
        stream.set_nodelay(true)?;
        let mut client = Self {
            stream,
            next_id: 1,
            io_timeout,
        };
        client.authenticate(password).await?;
        debug!("RCON authenticated with {}", address);
        Ok(client)
    }

    fn allocate_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = if self.next_id == i32::MAX { 1 } else { self.next_id + 1 };
        id
    }

    async fn send(&mut self, packet: Packet) -> Result<(), RconError> {
        within(self.io_timeout, packet.write_to(&mut self.stream)).await
    }

    async fn receive(&mut self) -> Result<Packet, RconError> {
        within(self.io_timeout, Packet::read_from(&mut self.stream)).await
    }

    async fn authenticate(&mut self, password: &str) -> Result<(), RconError> {
        let id = self.allocate_id();
        self.send(Packet::new(id, SERVERDATA_AUTH, password)).await?;

        // Some servers send an empty RESPONSE_VALUE ahead of the verdict
        loop {
            let packet = self.receive().await?;
            if packet.kind != SERVERDATA_AUTH_RESPONSE {
                continue;
            }
            return match packet.id {
                -1 => Err(RconError::AuthenticationFailed),
                reply if reply == id => Ok(()),
                other => Err(RconError::Protocol(format!(
                    "auth response for unexpected id {other}"
                ))),
            };
        }
    }

    /// Runs `command` and returns the concatenated reply.
    ///
    /// An empty RESPONSE_VALUE packet follows the command; the server
    /// mirrors it once every fragment of the reply has been sent.
    pub async fn execute(&mut self, command: &str) -> Result<String, RconError> {
        let id = self.allocate_id();
        let marker = self.allocate_id();

        self.send(Packet::new(id, SERVERDATA_EXECCOMMAND, command))
            .await?;
        self.send(Packet::new(marker, SERVERDATA_RESPONSE_VALUE, ""))
            .await?;

        let mut reply = String::new();
        loop {
            let packet = self.receive().await?;
            if packet.id == marker {
                break;
            }
            if packet.id == id && packet.kind == SERVERDATA_RESPONSE_VALUE {
                reply.push_str(&packet.body);
            }
        }
        Ok(reply)
    }

    pub async fn shutdown(&mut self) -> Result<(), RconError> {
        within(self.io_timeout, async { Ok(self.stream.shutdown().await?) }).await
    }
}

async fn within<T>(
    limit: Duration,
    operation: impl Future<Output = Result<T, RconError>>,
) -> Result<T, RconError> {
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| RconError::Timeout(limit))?
}
