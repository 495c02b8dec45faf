//! Source RCON packet framing.
//!
//! ```text
//! size: i32 LE | id: i32 LE | type: i32 LE | body | 0x00 | 0x00
//! ```
//!
//! `size` counts everything after itself.

use crate::error::RconError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const SERVERDATA_AUTH: i32 = 3;
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// id + type + two terminators
const HEADER_SIZE: i32 = 10;
const MAX_PACKET_SIZE: i32 = 4096 + HEADER_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub kind: i32,
    pub body: String,
}

impl Packet {
    pub fn new(id: i32, kind: i32, body: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            body: body.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let body = self.body.as_bytes();
        let size = body.len() as i32 + HEADER_SIZE;
        let mut buf = Vec::with_capacity(size as usize + 4);
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.kind.to_le_bytes());
        buf.extend_from_slice(body);
        buf.extend_from_slice(&[0, 0]);
        buf
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<(), RconError> {
        writer.write_all(&self.encode()).await?;
        writer.flush().await?;
        Ok(())
    }

    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, RconError> {
        let mut size = [0u8; 4];
        match reader.read_exact(&mut size).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(RconError::Closed),
            Err(e) => return Err(e.into()),
        }

        let size = i32::from_le_bytes(size);
        if !(HEADER_SIZE..=MAX_PACKET_SIZE).contains(&size) {
            return Err(RconError::Protocol(format!("invalid packet size {size}")));
        }

        let mut rest = vec![0u8; size as usize];
        reader.read_exact(&mut rest).await?;

        let id = i32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
        let kind = i32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]);
        let body = &rest[8..rest.len() - 2];
        let body = body.split(|byte| *byte == 0).next().unwrap_or_default();

        Ok(Self {
            id,
            kind,
            body: String::from_utf8_lossy(body).into_owned(),
        })
    }
}
