//! One remote audio node: REST calls, event socket, cached players.

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::events::{EventPublisher, NodeEvent};
use crate::link::{Link, LinkState};
use crate::penalty::{self, PenaltyTracker, TrackEvent};
use crate::rest::RestClient;
use crate::socket::{self, SocketState};
use dashmap::DashMap;
use jwc_protocol::{
    Event, Info, LoadResult, Message, Player, PlayerUpdate, PlayerUpdateFrame, Ready, Stats,
    TrackEndReason,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// The orchestrator as seen from a node.
///
/// Nodes hold a non-owning handle; the orchestrator owns the nodes. The
/// surface is deliberately narrow so the back edge stays auditable.
pub(crate) trait NodeHost: Send + Sync + 'static {
    fn on_node_disconnected(&self, node: &Arc<Node>);
    fn transfer_orphans_to(&self, node: &Arc<Node>);
    fn link_for(&self, guild_id: u64) -> Option<Arc<Link>>;
    fn remove_link(&self, guild_id: u64);
}

/// Session with one remote audio node.
///
/// Holds the node's cached player map, availability, latest stats snapshot
/// and penalty record. Created by `Client::add_node`, torn down at client
/// close. `available` flips to true only after the socket's `ready` frame
/// arrives, so an available node always has a session id.
pub struct Node {
    config: NodeConfig,
    user_id: u64,
    instance_name: String,
    rest: RestClient,
    host: Weak<dyn NodeHost>,
    players: DashMap<u64, Player>,
    session_id: RwLock<Option<String>>,
    available: AtomicBool,
    stats: RwLock<Option<Stats>>,
    penalties: Mutex<PenaltyTracker>,
    publisher: EventPublisher,
    pub(crate) socket: Mutex<SocketState>,
}

impl Node {
    pub(crate) fn new(
        config: NodeConfig,
        user_id: u64,
        instance_name: String,
        host: Weak<dyn NodeHost>,
        event_buffer: usize,
    ) -> Result<Arc<Self>> {
        let rest = RestClient::new(&config)?;
        Ok(Arc::new(Self {
            config,
            user_id,
            instance_name,
            rest,
            host,
            players: DashMap::new(),
            session_id: RwLock::new(None),
            available: AtomicBool::new(false),
            stats: RwLock::new(None),
            penalties: Mutex::new(PenaltyTracker::new()),
            publisher: EventPublisher::new(event_buffer),
            socket: Mutex::new(SocketState::default()),
        }))
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn pool(&self) -> &str {
        self.config.pool()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub(crate) fn user_id(&self) -> u64 {
        self.user_id
    }

    pub(crate) fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().unwrap().clone()
    }

    pub fn stats(&self) -> Option<Stats> {
        self.stats.read().unwrap().clone()
    }

    /// Subscribes to this node's own event stream. Most applications
    /// subscribe once on the client instead.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<NodeEvent> {
        self.publisher.subscribe()
    }

    pub fn get_cached_player(&self, guild_id: u64) -> Option<Player> {
        self.players.get(&guild_id).map(|p| p.value().clone())
    }

    pub(crate) fn cached_players(&self) -> Vec<Player> {
        self.players.iter().map(|p| p.value().clone()).collect()
    }

    pub(crate) fn evict_player(&self, guild_id: u64) {
        self.players.remove(&guild_id);
    }

    fn playing_count(&self) -> u32 {
        self.players.iter().filter(|p| p.is_playing()).count() as u32
    }

    /// The node's intrinsic penalty score; lower is better, `BLOCK` when
    /// the node must not be selected.
    pub fn penalty_total(&self) -> i64 {
        let stats = self.stats.read().unwrap();
        let counts = self.penalties.lock().unwrap().counts();
        penalty::score(self.is_available(), stats.as_ref(), self.playing_count(), counts)
    }

    // ------------------------------------------------------------------
    // REST operations
    // ------------------------------------------------------------------

    fn require_session(&self) -> Result<String> {
        if !self.is_available() {
            return Err(Error::NodeUnavailable);
        }
        self.session_id().ok_or(Error::NodeUnavailable)
    }

    /// Returns the cached player, fetching it from the node on a miss. A
    /// remote 404 creates a fresh player through an empty update.
    pub async fn get_player(&self, guild_id: u64) -> Result<Player> {
        let session_id = self.require_session()?;
        if let Some(player) = self.players.get(&guild_id) {
            return Ok(player.value().clone());
        }
        match self.rest.get_player(&session_id, guild_id).await {
            Ok(player) => {
                self.players.insert(guild_id, player.clone());
                Ok(player)
            }
            Err(error) if error.is_not_found() => {
                let player = self
                    .rest
                    .update_player(&session_id, guild_id, &PlayerUpdate::default(), false)
                    .await?;
                self.players.insert(guild_id, player.clone());
                Ok(player)
            }
            Err(error) => Err(error),
        }
    }

    /// Applies an update; the cache entry is replaced wholesale with the
    /// node's response.
    pub async fn update_player(
        &self,
        guild_id: u64,
        update: PlayerUpdate,
        no_replace: bool,
    ) -> Result<Player> {
        let session_id = self.require_session()?;
        let player = self
            .rest
            .update_player(&session_id, guild_id, &update, no_replace)
            .await?;
        self.players.insert(guild_id, player.clone());
        Ok(player)
    }

    pub async fn destroy_player(&self, guild_id: u64) -> Result<()> {
        let session_id = self.require_session()?;
        self.rest.destroy_player(&session_id, guild_id).await?;
        self.players.remove(&guild_id);
        Ok(())
    }

    /// Destroys the remote player and drops the guild's link from the
    /// orchestrator.
    pub async fn destroy_player_and_link(&self, guild_id: u64) -> Result<()> {
        self.destroy_player(guild_id).await?;
        if let Some(host) = self.host.upgrade() {
            host.remove_link(guild_id);
        }
        Ok(())
    }

    pub async fn load_item(&self, identifier: &str) -> Result<LoadResult> {
        if !self.is_available() {
            return Err(Error::NodeUnavailable);
        }
        self.rest.load_item(identifier).await
    }

    pub async fn get_info(&self) -> Result<Info> {
        if !self.is_available() {
            return Err(Error::NodeUnavailable);
        }
        self.rest.info().await
    }

    // ------------------------------------------------------------------
    // Socket lifecycle
    // ------------------------------------------------------------------

    pub(crate) fn start(self: &Arc<Self>) {
        socket::spawn_connect(self.clone());
    }

    /// Periodic probe from the orchestrator's scheduler: dials again once
    /// the backoff for the current attempt count has elapsed.
    pub(crate) fn reconnect(self: &Arc<Self>) {
        let attempt = {
            let mut state = self.socket.lock().unwrap();
            if !state.started || state.open || !state.may_reconnect {
                return;
            }
            let waited = state
                .last_attempt
                .map(|at| at.elapsed())
                .unwrap_or(Duration::MAX);
            if waited <= socket::backoff(state.reconnect_attempts) {
                return;
            }
            state.reconnect_attempts += 1;
            state.reconnect_attempts
        };
        debug!(node = %self.name(), attempt, "reconnecting event socket");
        socket::spawn_connect(self.clone());
    }

    /// Stops the socket for good and hands back the reader task so the
    /// caller can await its termination.
    pub(crate) fn begin_close(&self) -> Option<JoinHandle<()>> {
        self.available.store(false, Ordering::SeqCst);
        self.socket.lock().unwrap().shutdown()
    }

    pub(crate) fn on_socket_open(&self) {
        let mut state = self.socket.lock().unwrap();
        state.open = true;
        state.reconnect_attempts = 0;
        info!(node = %self.name(), "event socket open");
    }

    fn mark_disconnected(&self) {
        self.available.store(false, Ordering::SeqCst);
        self.socket.lock().unwrap().open = false;
    }

    pub(crate) fn on_socket_failure(self: &Arc<Self>) {
        self.mark_disconnected();
        warn!(node = %self.name(), "node disconnected");
        self.publish(NodeEvent::Disconnected {
            node: self.name().to_string(),
        });
        if let Some(host) = self.host.upgrade() {
            host.on_node_disconnected(self);
        }
    }

    pub(crate) fn on_remote_close(self: &Arc<Self>, code: Option<u16>) {
        if code == Some(1000) {
            self.socket.lock().unwrap().may_reconnect = false;
        }
        self.mark_disconnected();
        warn!(node = %self.name(), ?code, "server closed event socket");
        self.publish(NodeEvent::Disconnected {
            node: self.name().to_string(),
        });
        if let Some(host) = self.host.upgrade() {
            host.on_node_disconnected(self);
        }
    }

    // ------------------------------------------------------------------
    // Frame dispatch
    // ------------------------------------------------------------------

    pub(crate) fn handle_frame(self: &Arc<Self>, text: &str) {
        let message: Message = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(error) => {
                debug!(node = %self.name(), %error, "dropping unrecognized frame");
                return;
            }
        };

        match message {
            Message::Ready(ready) => self.handle_ready(ready),
            Message::Stats(stats) => {
                *self.stats.write().unwrap() = Some(stats.clone());
                self.publish(NodeEvent::Stats {
                    node: self.name().to_string(),
                    stats,
                });
            }
            Message::PlayerUpdate(frame) => self.handle_player_update(frame),
            Message::Event(event) => self.handle_event(event),
        }
    }

    fn handle_ready(self: &Arc<Self>, ready: Ready) {
        if !ready.resumed {
            self.penalties.lock().unwrap().reset();
        }
        *self.session_id.write().unwrap() = Some(ready.session_id.clone());
        self.available.store(true, Ordering::SeqCst);
        info!(node = %self.name(), resumed = ready.resumed, "node ready");

        // Re-bind every cached player whose voice credentials survived the
        // reconnect; the node lost them unless it resumed the session.
        for entry in self.players.iter() {
            let guild_id = *entry.key();
            let player = entry.value().clone();
            if !player.voice.is_complete() {
                continue;
            }
            let update = PlayerUpdate::from(&player);
            let node = self.clone();
            tokio::spawn(async move {
                if let Err(error) = node.update_player(guild_id, update, false).await {
                    warn!(
                        node = %node.name(),
                        guild_id,
                        %error,
                        "failed to re-bind player after ready"
                    );
                }
            });
        }

        if let Some(host) = self.host.upgrade() {
            host.transfer_orphans_to(self);
        }

        self.publish(NodeEvent::Ready {
            node: self.name().to_string(),
            resumed: ready.resumed,
            session_id: ready.session_id,
        });
    }

    fn handle_player_update(&self, frame: PlayerUpdateFrame) {
        if let Some(mut player) = self.players.get_mut(&frame.guild_id) {
            player.state = frame.state;
        }
        if let Some(host) = self.host.upgrade() {
            if let Some(link) = host.link_for(frame.guild_id) {
                link.set_state(if frame.state.connected {
                    LinkState::Connected
                } else {
                    LinkState::Disconnected
                });
            }
        }
        self.publish(NodeEvent::PlayerUpdate {
            node: self.name().to_string(),
            guild_id: frame.guild_id,
            state: frame.state,
        });
    }

    fn handle_event(self: &Arc<Self>, event: Event) {
        let node_name = self.name().to_string();
        match event {
            Event::TrackStart { guild_id, track } => {
                if let Some(mut player) = self.players.get_mut(&guild_id) {
                    player.track = Some(track.clone());
                }
                self.record(TrackEvent::LoadAttempt);
                self.publish(NodeEvent::TrackStart {
                    node: node_name,
                    guild_id,
                    track,
                });
            }
            Event::TrackEnd {
                guild_id,
                track,
                reason,
            } => {
                if let Some(mut player) = self.players.get_mut(&guild_id) {
                    player.track = None;
                }
                if reason == TrackEndReason::LoadFailed {
                    self.record(TrackEvent::LoadFailed);
                }
                self.publish(NodeEvent::TrackEnd {
                    node: node_name,
                    guild_id,
                    track,
                    reason,
                });
            }
            Event::TrackException {
                guild_id,
                track,
                exception,
            } => {
                self.record(TrackEvent::TrackException);
                self.publish(NodeEvent::TrackException {
                    node: node_name,
                    guild_id,
                    track,
                    exception,
                });
            }
            Event::TrackStuck {
                guild_id,
                track,
                threshold_ms,
            } => {
                self.record(TrackEvent::TrackStuck);
                self.publish(NodeEvent::TrackStuck {
                    node: node_name,
                    guild_id,
                    track,
                    threshold_ms,
                });
            }
            Event::WebSocketClosed {
                guild_id,
                code,
                reason,
                by_remote,
            } => {
                // 4004: authentication failed, 4009: session timed out. The
                // voice session is gone; the player cannot recover.
                if code == 4004 || code == 4009 {
                    let node = self.clone();
                    tokio::spawn(async move {
                        if let Err(error) = node.destroy_player_and_link(guild_id).await {
                            warn!(
                                node = %node.name(),
                                guild_id,
                                %error,
                                "failed to destroy player after voice session loss"
                            );
                        }
                    });
                }
                self.publish(NodeEvent::WebSocketClosed {
                    node: node_name,
                    guild_id,
                    code,
                    reason,
                    by_remote,
                });
            }
        }
    }

    fn record(&self, event: TrackEvent) {
        self.penalties.lock().unwrap().record(event);
    }

    fn publish(&self, event: NodeEvent) {
        if self.publisher.publish(event) == 0 {
            trace!(node = %self.name(), "event reached no subscribers");
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name())
            .field("pool", &self.pool())
            .field("available", &self.is_available())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::test_node;
    use super::*;
    use crate::penalty::BLOCK;
    use crate::region::RegionGroup;
    use jwc_protocol::{CpuStats, MemoryStats};

    fn idle_stats() -> Stats {
        Stats {
            players: 0,
            playing_players: 0,
            uptime: 0,
            memory: MemoryStats {
                free: 0,
                used: 0,
                allocated: 0,
                reservable: 0,
            },
            cpu: CpuStats {
                cores: 1,
                system_load: 0.0,
                lavalink_load: 0.0,
            },
            frame_stats: None,
        }
    }

    #[tokio::test]
    async fn test_unavailable_node_rejects_rest_calls() {
        let node = test_node("a", "main", RegionGroup::Unknown);
        assert!(matches!(node.get_player(1).await, Err(Error::NodeUnavailable)));
        assert!(matches!(node.load_item("x").await, Err(Error::NodeUnavailable)));
        assert!(matches!(node.get_info().await, Err(Error::NodeUnavailable)));
        assert!(matches!(node.destroy_player(1).await, Err(Error::NodeUnavailable)));
    }

    #[tokio::test]
    async fn test_penalty_is_block_until_ready_and_stats() {
        let node = test_node("a", "main", RegionGroup::Unknown);
        assert_eq!(node.penalty_total(), BLOCK);

        node.force_available(true);
        assert_eq!(node.penalty_total(), BLOCK);

        node.force_stats(idle_stats());
        assert_eq!(node.penalty_total(), 0);
    }

    #[tokio::test]
    async fn test_ready_frame_marks_available_and_resets_penalties() {
        let node = test_node("a", "main", RegionGroup::Unknown);
        node.record_for_test(TrackEvent::TrackStuck);
        assert!(!node.penalties_empty());

        node.handle_frame(r#"{"op":"ready","resumed":false,"sessionId":"s1"}"#);

        assert!(node.is_available());
        assert_eq!(node.session_id().as_deref(), Some("s1"));
        assert!(node.penalties_empty());
    }

    #[tokio::test]
    async fn test_resumed_ready_keeps_penalties() {
        let node = test_node("a", "main", RegionGroup::Unknown);
        node.record_for_test(TrackEvent::TrackStuck);

        node.handle_frame(r#"{"op":"ready","resumed":true,"sessionId":"s2"}"#);

        assert!(node.is_available());
        assert!(!node.penalties_empty());
    }

    #[tokio::test]
    async fn test_stats_frame_stored() {
        let node = test_node("a", "main", RegionGroup::Unknown);
        let frame = serde_json::json!({
            "op": "stats",
            "players": 2,
            "playingPlayers": 1,
            "uptime": 100,
            "memory": {"free": 1, "used": 2, "allocated": 3, "reservable": 4},
            "cpu": {"cores": 2, "systemLoad": 0.0, "lavalinkLoad": 0.0}
        });
        node.handle_frame(&frame.to_string());
        assert_eq!(node.stats().unwrap().playing_players, 1);
    }

    #[tokio::test]
    async fn test_unknown_opcode_dropped() {
        let node = test_node("a", "main", RegionGroup::Unknown);
        node.handle_frame(r#"{"op":"mystery"}"#);
        node.handle_frame("not even json");
        assert!(!node.is_available());
    }
}
