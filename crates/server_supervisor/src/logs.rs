//! Bounded buffer of the game server's console output.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Log,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerLog {
    /// Monotonic position; pass the last seen cursor + 1 to page forward
    pub cursor: u64,
    pub timestamp: u64,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: LogKind,
}

#[derive(Debug, Default)]
struct LogRing {
    entries: VecDeque<ServerLog>,
    next_cursor: u64,
}

/// Keeps the most recent `capacity` lines. Cursors keep increasing across
/// evictions and clears.
#[derive(Debug)]
pub struct ServerLogBuffer {
    ring: Mutex<LogRing>,
    capacity: usize,
}

impl ServerLogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(LogRing::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, kind: LogKind, message: impl Into<String>) {
        let Ok(mut ring) = self.ring.lock() else {
            return;
        };
        let cursor = ring.next_cursor;
        ring.next_cursor += 1;
        if ring.entries.len() == self.capacity {
            ring.entries.pop_front();
        }
        ring.entries.push_back(ServerLog {
            cursor,
            timestamp: server_types::current_timestamp(),
            message: message.into(),
            kind,
        });
    }

    /// Every retained line with a cursor at or after `cursor`.
    pub fn since(&self, cursor: u64) -> Vec<ServerLog> {
        self.ring
            .lock()
            .map(|ring| {
                ring.entries
                    .iter()
                    .filter(|log| log.cursor >= cursor)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The last `count` lines.
    pub fn recent(&self, count: usize) -> Vec<ServerLog> {
        self.ring
            .lock()
            .map(|ring| {
                let skip = ring.entries.len().saturating_sub(count);
                ring.entries.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut ring) = self.ring.lock() {
            ring.entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.ring.lock().map(|ring| ring.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
