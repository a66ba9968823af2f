//! jwc client core
//!
//! This crate multiplexes voice-playback sessions across a fleet of remote
//! audio-streaming nodes on behalf of a chat-bot process. Each node exposes
//! a REST control plane and a push-oriented event socket; the client keeps
//! live sessions with many nodes at once, groups them into named pools,
//! binds each guild's playback to one node through a [`link::Link`], and
//! fans node events out to application listeners.
//!
//! # Architecture
//!
//! The [`client::Client`] orchestrator owns everything:
//!
//! 1. **Node sessions** ([`node`]): one per configured server — REST calls,
//!    event socket, reconnect state, cached player map.
//! 2. **Load balancing** ([`balancer`], [`penalty`]): each node carries a
//!    rolling penalty score; selection picks the lowest score within the
//!    guild's pool, region-aware.
//! 3. **Links** ([`link`]): per-guild bindings with an ordered handover
//!    protocol for node failure and operator-driven pool moves.
//! 4. **Event fan-out** ([`events`]): bounded multicast; a slow listener
//!    lags, it never blocks a socket reader.
//!
//! The chat-platform gateway stays outside: the embedding application
//! implements [`client::VoiceGateway`] and feeds voice-server/voice-state
//! updates into the client.
//!
//! # Example
//!
//! ```no_run
//! use jwc_client::client::{Client, Member, VoiceGateway};
//! use jwc_client::config::NodeConfig;
//! use jwc_client::region::RegionGroup;
//! use std::sync::Arc;
//!
//! struct Gateway;
//!
//! impl VoiceGateway for Gateway {
//!     fn in_audio_channel(&self, _member: &Member) -> bool { false }
//!     fn connect(&self, _guild_id: u64, _channel_id: u64) {}
//!     fn disconnect(&self, _guild_id: u64) {}
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new(&std::env::var("BOT_TOKEN")?, Arc::new(Gateway))?;
//!
//! client.add_node(
//!     NodeConfig::builder()
//!         .name("eu-1")
//!         .host("10.0.0.7")
//!         .password("youshallnotpass")
//!         .pool("main")
//!         .region_group(RegionGroup::Europe)
//!         .build()?,
//! )?;
//!
//! client.set_pool(820011279525134356, "main");
//! let mut events = client.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod balancer;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod link;
pub mod node;
pub mod penalty;
pub mod region;

mod rest;
mod socket;

pub use balancer::LoadBalancer;
pub use client::{Client, ClientConfig, Member, VoiceGateway};
pub use config::NodeConfig;
pub use error::{Error, Result};
pub use events::{EventPublisher, NodeEvent};
pub use link::{Link, LinkState};
pub use node::Node;
pub use penalty::{PenaltyProvider, RegionPenaltyProvider};
pub use region::{RegionGroup, VoiceRegion};

pub use jwc_protocol as protocol;
