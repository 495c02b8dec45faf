//! Source RCON remote console: wire codec, client, session table and
//! `status` parsing.

pub mod client;
pub mod packet;
pub mod sessions;
pub mod status;

pub use crate::error::RconError;
pub use client::RconClient;
pub use packet::Packet;
pub use sessions::{
    CredentialSource, LivenessProbe, RconCredentials, RconSessions, ServerConfigCredentials,
};
pub use status::{parse_status, poll_status, StatusReport};
