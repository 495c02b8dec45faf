//! Parsing of the console `status` command.

use super::sessions::RconSessions;
use crate::error::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static PLAYERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^players\s*:\s*(\d+)\s+humans").expect("valid regex"));
static SPAWNGROUP_MAP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^loaded spawngroup\(\s*1\)\s*:\s*SV:\s*\[1:\s*([^\s|\]]+)").expect("valid regex")
});
static MAP_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^map\s*:\s*(\S+)").expect("valid regex"));
static UDP_IP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^udp/ip\s*:\s*(\d{1,3}(?:\.\d{1,3}){3}:\d+)").expect("valid regex")
});
static LOCAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"local\s*:?\s*(\d{1,3}(?:\.\d{1,3}){3}(?::\d+)?)").expect("valid regex")
});
static PUBLIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"public(?:\s+ip)?\s*:?\s*(\d{1,3}(?:\.\d{1,3}){3}(?::\d+)?)").expect("valid regex")
});

/// What the dashboard shows about a running server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub active_map: Option<String>,
    pub connected_players: u32,
    pub local_address: Option<String>,
    pub public_address: Option<String>,
}

pub fn parse_status(output: &str) -> StatusReport {
    let capture = |regex: &Regex| {
        regex
            .captures(output)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    };

    StatusReport {
        active_map: capture(&SPAWNGROUP_MAP).or_else(|| capture(&MAP_LINE)),
        connected_players: capture(&PLAYERS)
            .and_then(|count| count.parse().ok())
            .unwrap_or(0),
        local_address: capture(&LOCAL).or_else(|| capture(&UDP_IP)),
        public_address: capture(&PUBLIC),
    }
}

/// Polls `status` through a short-lived session.
pub async fn poll_status(sessions: &RconSessions) -> Result<StatusReport> {
    let output = sessions.run_once("status").await?;
    Ok(parse_status(&output))
}
