//! Event publishing.
//!
//! Every node owns a publisher; the client subscribes to each node and
//! refiles events through its own publisher so applications only need one
//! subscription. The channel is a bounded multicast: each subscriber has a
//! ring buffer of [`DEFAULT_EVENT_BUFFER`] events and observes a `Lagged`
//! error if it falls behind, so a slow listener can never block the socket
//! reader.

use jwc_protocol::{PlayerState, Stats, Track, TrackEndReason, TrackException};
use tokio::sync::broadcast;

/// Per-subscriber buffer capacity.
pub const DEFAULT_EVENT_BUFFER: usize = 128;

/// A typed client event, tagged with the originating node's name.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    Ready {
        node: String,
        resumed: bool,
        session_id: String,
    },
    Disconnected {
        node: String,
    },
    Stats {
        node: String,
        stats: Stats,
    },
    PlayerUpdate {
        node: String,
        guild_id: u64,
        state: PlayerState,
    },
    TrackStart {
        node: String,
        guild_id: u64,
        track: Track,
    },
    TrackEnd {
        node: String,
        guild_id: u64,
        track: Track,
        reason: TrackEndReason,
    },
    TrackException {
        node: String,
        guild_id: u64,
        track: Track,
        exception: TrackException,
    },
    TrackStuck {
        node: String,
        guild_id: u64,
        track: Track,
        threshold_ms: u64,
    },
    WebSocketClosed {
        node: String,
        guild_id: u64,
        code: u16,
        reason: String,
        by_remote: bool,
    },
}

/// Bounded multicast publisher.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<NodeEvent>,
}

impl EventPublisher {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.tx.subscribe()
    }

    /// Emits an event, returning how many subscribers it reached. With no
    /// subscribers the event is dropped and 0 is returned; the caller
    /// learns the outcome synchronously either way.
    pub fn publish(&self, event: NodeEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}
