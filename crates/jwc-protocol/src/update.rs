//! Player update requests.

use crate::player::VoiceState;
use serde::{Deserialize, Serialize};

/// Body of a `PATCH /v4/sessions/{sid}/players/{guild}` request.
///
/// This is a plain record; submitting it is a separate operation on the
/// node session. Absent fields are omitted from the JSON body and leave the
/// remote value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<PlayerUpdateTrack>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceState>,
}

impl PlayerUpdate {
    pub fn with_track(mut self, track: PlayerUpdateTrack) -> Self {
        self.track = Some(track);
        self
    }

    pub fn with_position(mut self, position: u64) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_volume(mut self, volume: u16) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_paused(mut self, paused: bool) -> Self {
        self.paused = Some(paused);
        self
    }

    pub fn with_filters(mut self, filters: serde_json::Value) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn with_voice(mut self, voice: VoiceState) -> Self {
        self.voice = Some(voice);
        self
    }
}

impl From<&crate::player::Player> for PlayerUpdate {
    /// Rebuilds an update that reproduces a player's current state on
    /// another node (or on the same node after a fresh session).
    fn from(player: &crate::player::Player) -> Self {
        Self {
            track: player
                .track
                .as_ref()
                .map(|t| PlayerUpdateTrack::encoded(&t.encoded)),
            position: Some(player.state.position),
            end_time: None,
            volume: Some(player.volume),
            paused: Some(player.paused),
            filters: player.filters.clone(),
            voice: Some(player.voice.clone()),
        }
    }
}

/// Track portion of a player update: either an encoded track to play or an
/// identifier for the node to resolve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdateTrack {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<serde_json::Value>,
}

impl PlayerUpdateTrack {
    pub fn encoded(encoded: impl Into<String>) -> Self {
        Self {
            encoded: Some(encoded.into()),
            ..Self::default()
        }
    }

    pub fn identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: Some(identifier.into()),
            ..Self::default()
        }
    }
}
