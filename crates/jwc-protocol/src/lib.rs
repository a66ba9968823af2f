//! jwc wire protocol
//!
//! Typed message definitions for the v4 audio-node protocol, shared by the
//! client core and by test fixtures.
//!
//! # Overview
//!
//! A remote audio node exposes two surfaces:
//!
//! - **REST control plane**: player CRUD, track loading, node info. The
//!   request/response bodies live in [`player`], [`update`], [`load`] and
//!   [`info`].
//! - **Event socket**: a push-oriented WebSocket delivering `ready`,
//!   `stats`, `playerUpdate` and `event` frames. These live in [`messages`].
//!
//! All types serialize with the wire's camelCase field names. Guild
//! identifiers are strings on the wire and `u64` in memory; the [`guild_id`]
//! serde adapter performs the conversion.

pub mod error;
pub mod info;
pub mod load;
pub mod messages;
pub mod player;
pub mod stats;
pub mod track;
pub mod update;

pub use error::ErrorResponse;
pub use info::Info;
pub use load::{LoadResult, Playlist, PlaylistInfo};
pub use messages::{
    Event, Message, PlayerUpdateFrame, Ready, Severity, TrackEndReason, TrackException,
};
pub use player::{Player, PlayerState, VoiceState};
pub use stats::{CpuStats, FrameStats, MemoryStats, Stats};
pub use track::{Track, TrackInfo};
pub use update::{PlayerUpdate, PlayerUpdateTrack};

/// Serde adapter for guild ids: stringly on the wire, `u64` in memory.
pub mod guild_id {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(id)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}
