//! Event-socket frames, dispatched by opcode.

use crate::player::PlayerState;
use crate::stats::Stats;
use crate::track::Track;
use serde::{Deserialize, Serialize};

/// One frame received on a node's event socket.
///
/// Unknown opcodes fail deserialization and are logged and dropped by the
/// socket reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Message {
    Ready(Ready),
    PlayerUpdate(PlayerUpdateFrame),
    Stats(Stats),
    Event(Event),
}

/// Sent once per socket after the handshake completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ready {
    /// Whether the node accepted the replayed session id and kept its
    /// players alive.
    pub resumed: bool,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdateFrame {
    #[serde(with = "crate::guild_id")]
    pub guild_id: u64,
    pub state: PlayerState,
}

/// Sub-kinds of the `event` opcode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "TrackStartEvent", rename_all = "camelCase")]
    TrackStart {
        #[serde(with = "crate::guild_id")]
        guild_id: u64,
        track: Track,
    },
    #[serde(rename = "TrackEndEvent", rename_all = "camelCase")]
    TrackEnd {
        #[serde(with = "crate::guild_id")]
        guild_id: u64,
        track: Track,
        reason: TrackEndReason,
    },
    #[serde(rename = "TrackExceptionEvent", rename_all = "camelCase")]
    TrackException {
        #[serde(with = "crate::guild_id")]
        guild_id: u64,
        track: Track,
        exception: TrackException,
    },
    #[serde(rename = "TrackStuckEvent", rename_all = "camelCase")]
    TrackStuck {
        #[serde(with = "crate::guild_id")]
        guild_id: u64,
        track: Track,
        threshold_ms: u64,
    },
    #[serde(rename = "WebSocketClosedEvent", rename_all = "camelCase")]
    WebSocketClosed {
        #[serde(with = "crate::guild_id")]
        guild_id: u64,
        code: u16,
        reason: String,
        by_remote: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackException {
    #[serde(default)]
    pub message: Option<String>,
    pub severity: Severity,
    pub cause: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Common,
    Suspicious,
    Fault,
}
