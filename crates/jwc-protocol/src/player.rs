//! Player state as held by the remote node.

use crate::track::Track;
use serde::{Deserialize, Serialize};

/// The remote-side object representing one guild's playback.
///
/// Replaced wholesale in the client's cache on every update response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    #[serde(with = "crate::guild_id")]
    pub guild_id: u64,
    #[serde(default)]
    pub track: Option<Track>,
    pub volume: u16,
    pub paused: bool,
    #[serde(default)]
    pub state: PlayerState,
    #[serde(default)]
    pub voice: VoiceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<serde_json::Value>,
}

impl Player {
    /// Whether this player counts as actively playing for penalty purposes.
    pub fn is_playing(&self) -> bool {
        self.track.is_some() && !self.paused
    }
}

/// Positional state pushed by the node on `playerUpdate` frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    /// Unix timestamp of the sample, milliseconds.
    pub time: i64,
    pub position: u64,
    pub connected: bool,
    /// Round-trip to the voice server, `-1` when not connected.
    pub ping: i64,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            time: 0,
            position: 0,
            connected: false,
            ping: -1,
        }
    }
}

/// The voice credentials a player needs to join a voice server.
///
/// Assembled from two separate gateway pushes (voice-server update and the
/// bot's own voice-state update); a player can only be (re)bound once all
/// three fields are present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceState {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub session_id: String,
}

impl VoiceState {
    pub fn is_complete(&self) -> bool {
        !self.token.is_empty() && !self.endpoint.is_empty() && !self.session_id.is_empty()
    }
}
