//! Client orchestrator: node registry, pools, links, event fan-out.

use crate::balancer::LoadBalancer;
use crate::config::{user_id_from_token, NodeConfig};
use crate::error::{Error, Result};
use crate::events::{EventPublisher, NodeEvent, DEFAULT_EVENT_BUFFER};
use crate::link::{Link, LinkState};
use crate::node::{Node, NodeHost};
use crate::region::VoiceRegion;
use dashmap::DashMap;
use jwc_protocol::VoiceState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cadence of the reconnect probe worker.
pub const RECONNECT_INTERVAL: Duration = Duration::from_millis(500);

/// A guild member as the embedding application sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub guild_id: u64,
    pub user_id: u64,
    /// The audio channel the member currently occupies, if any.
    pub channel_id: Option<u64>,
}

/// The chat-platform gateway, supplied by the embedding application.
///
/// The core never talks to the chat platform itself; it only asks the
/// embedder to join or leave audio channels and to report presence.
pub trait VoiceGateway: Send + Sync + 'static {
    fn in_audio_channel(&self, member: &Member) -> bool;
    fn connect(&self, guild_id: u64, channel_id: u64);
    fn disconnect(&self, guild_id: u64);
}

/// Tunables for [`Client`] construction.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Instance tag reported to nodes via the `Client-Name` header.
    pub instance_name: String,
    /// Per-subscriber event buffer capacity.
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            instance_name: "main".into(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// The coordination layer: owns every node session, maps guilds to pools,
/// binds guilds to nodes through links and fans node events out to the
/// application.
///
/// # Example
///
/// ```no_run
/// use jwc_client::client::{Client, Member, VoiceGateway};
/// use jwc_client::config::NodeConfig;
/// use jwc_client::region::RegionGroup;
/// use std::sync::Arc;
///
/// struct Gateway;
///
/// impl VoiceGateway for Gateway {
///     fn in_audio_channel(&self, _member: &Member) -> bool { false }
///     fn connect(&self, _guild_id: u64, _channel_id: u64) {}
///     fn disconnect(&self, _guild_id: u64) {}
/// }
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::new("MTIzNDU2Nzg5.stub.token", Arc::new(Gateway))?;
/// client.add_node(
///     NodeConfig::builder()
///         .name("eu-1")
///         .host("10.0.0.7")
///         .password("youshallnotpass")
///         .pool("main")
///         .region_group(RegionGroup::Europe)
///         .build()?,
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    user_id: u64,
    instance_name: String,
    event_buffer: usize,
    gateway: Arc<dyn VoiceGateway>,
    balancer: LoadBalancer,
    nodes: RwLock<Vec<Arc<Node>>>,
    links: DashMap<u64, Arc<Link>>,
    current_pool: DashMap<u64, String>,
    pending_voice: DashMap<u64, VoiceState>,
    transfer_triggers: DashMap<u64, oneshot::Sender<()>>,
    publisher: EventPublisher,
    subscriptions: Mutex<Vec<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Client {
    /// Builds a client from the bot's auth token.
    ///
    /// Fails fast when the token does not carry a decodable user id.
    pub fn new(token: &str, gateway: Arc<dyn VoiceGateway>) -> Result<Self> {
        Self::with_config(token, gateway, ClientConfig::default())
    }

    pub fn with_config(
        token: &str,
        gateway: Arc<dyn VoiceGateway>,
        config: ClientConfig,
    ) -> Result<Self> {
        let user_id = user_id_from_token(token)?;
        let inner = Arc::new(ClientInner {
            user_id,
            instance_name: config.instance_name,
            event_buffer: config.event_buffer,
            gateway,
            balancer: LoadBalancer::new(),
            nodes: RwLock::new(Vec::new()),
            links: DashMap::new(),
            current_pool: DashMap::new(),
            pending_voice: DashMap::new(),
            transfer_triggers: DashMap::new(),
            publisher: EventPublisher::new(config.event_buffer),
            subscriptions: Mutex::new(Vec::new()),
            reconnect_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let scheduler = spawn_reconnect_scheduler(&inner);
        *inner.reconnect_task.lock().unwrap() = Some(scheduler);
        info!(user_id, "client initialized");

        Ok(Self { inner })
    }

    pub fn user_id(&self) -> u64 {
        self.inner.user_id
    }

    /// Subscribes to the client-wide event stream (every node's events,
    /// refiled through one publisher).
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<NodeEvent> {
        self.inner.publisher.subscribe()
    }

    /// Registers a node and starts its event socket.
    ///
    /// Rejects a second node with the same display name.
    pub fn add_node(&self, config: NodeConfig) -> Result<Arc<Node>> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Config("client is closed".into()));
        }

        let host: Weak<dyn NodeHost> = {
            let strong: Arc<dyn NodeHost> = self.inner.clone();
            Arc::downgrade(&strong)
        };

        let node = {
            let mut nodes = self.inner.nodes.write().unwrap();
            if nodes.iter().any(|n| n.name() == config.name()) {
                return Err(Error::Config(format!(
                    "node {} already exists",
                    config.name()
                )));
            }
            let node = Node::new(
                config,
                self.inner.user_id,
                self.inner.instance_name.clone(),
                host,
                self.inner.event_buffer,
            )?;
            nodes.push(node.clone());
            node
        };
        info!(node = %node.name(), pool = %node.pool(), "node added");

        // refile the node's events through the client publisher
        let mut rx = node.subscribe();
        let publisher = self.inner.publisher.clone();
        let refile = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        publisher.publish(event);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "client event refile lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.inner.subscriptions.lock().unwrap().push(refile);

        node.start();
        Ok(node)
    }

    pub fn get_nodes(&self, only_available: bool) -> Vec<Arc<Node>> {
        self.inner
            .nodes
            .read()
            .unwrap()
            .iter()
            .filter(|node| !only_available || node.is_available())
            .cloned()
            .collect()
    }

    pub fn get_link(&self, guild_id: u64) -> Option<Arc<Link>> {
        self.inner.links.get(&guild_id).map(|link| link.value().clone())
    }

    /// Maps a guild onto a pool. Links are only created for mapped guilds.
    pub fn set_pool(&self, guild_id: u64, pool: impl Into<String>) {
        self.inner.current_pool.insert(guild_id, pool.into());
    }

    pub fn current_pool(&self, guild_id: u64) -> Option<String> {
        self.inner.current_pool.get(&guild_id).map(|p| p.value().clone())
    }

    /// Returns the guild's link, creating one against the best node of the
    /// guild's current pool when absent.
    pub fn get_or_create_link(
        &self,
        guild_id: u64,
        region: Option<&VoiceRegion>,
    ) -> Result<Arc<Link>> {
        if let Some(link) = self.inner.links.get(&guild_id) {
            return Ok(link.value().clone());
        }
        let pool = self
            .inner
            .current_pool
            .get(&guild_id)
            .map(|p| p.value().clone())
            .ok_or(Error::PoolUnmapped(guild_id))?;
        let candidates = self.inner.nodes_in_pool(&pool);
        let node = self.inner.balancer.select(&candidates, region, guild_id)?;
        let link = self
            .inner
            .links
            .entry(guild_id)
            .or_insert_with(|| {
                debug!(guild_id, node = %node.name(), pool = %pool, "link created");
                Link::new(guild_id, node)
            })
            .value()
            .clone();
        Ok(link)
    }

    /// Re-homes a guild onto `pool`.
    ///
    /// Returns `false` without side effects beyond the pool remap when the
    /// pool has no available node (or the author is in no audio channel to
    /// join). Otherwise arms a one-shot trigger completed by the next
    /// voice-server update — immediately, when the bot is already in an
    /// audio channel — and, once it fires, balances within the new pool and
    /// hands the link over; `on_transfer` runs with the chosen node after
    /// the player has been recreated there. The link itself is only
    /// resolved after the trigger completes: it either predates the
    /// transfer or was created lazily by the voice-server update.
    pub fn load_and_transfer_to_node(
        &self,
        guild_id: u64,
        pool: &str,
        author: &Member,
        self_member: &Member,
        on_transfer: impl FnOnce(Arc<Node>) + Send + 'static,
    ) -> Result<bool> {
        self.inner.current_pool.insert(guild_id, pool.to_string());

        let candidates = self.inner.nodes_in_pool(pool);
        if !candidates.iter().any(|node| node.is_available()) {
            debug!(guild_id, pool, "no available node in target pool");
            return Ok(false);
        }

        let (trigger_tx, trigger_rx) = oneshot::channel();
        self.inner.transfer_triggers.insert(guild_id, trigger_tx);

        if !self.inner.gateway.in_audio_channel(self_member) {
            let Some(channel_id) = author.channel_id else {
                self.inner.transfer_triggers.remove(&guild_id);
                debug!(guild_id, "author is in no audio channel");
                return Ok(false);
            };
            self.inner.gateway.connect(guild_id, channel_id);
        } else if let Some((_, trigger)) = self.inner.transfer_triggers.remove(&guild_id) {
            let _ = trigger.send(());
        }

        let inner = self.inner.clone();
        let pool = pool.to_string();
        tokio::spawn(async move {
            if trigger_rx.await.is_err() {
                return;
            }
            let existing = inner.link_for(guild_id);
            let region = existing
                .as_ref()
                .and_then(|link| link.voice_region())
                .or_else(|| {
                    inner
                        .pending_voice
                        .get(&guild_id)
                        .filter(|voice| !voice.endpoint.is_empty())
                        .map(|voice| VoiceRegion::from_endpoint(&voice.endpoint))
                });
            let candidates = inner.nodes_in_pool(&pool);
            match inner.balancer.select(&candidates, region.as_ref(), guild_id) {
                Ok(chosen) => {
                    let link = match existing {
                        Some(link) => link,
                        None => inner
                            .links
                            .entry(guild_id)
                            .or_insert_with(|| {
                                debug!(
                                    guild_id,
                                    node = %chosen.name(),
                                    pool = %pool,
                                    "link created"
                                );
                                Link::new(guild_id, chosen.clone())
                            })
                            .value()
                            .clone(),
                    };
                    link.transfer_to_pool(chosen, on_transfer).await;
                }
                Err(error) => {
                    warn!(guild_id, pool, %error, "pool transfer aborted");
                    if let Some(link) = existing {
                        link.set_state(LinkState::Disconnected);
                    }
                }
            }
        });

        Ok(true)
    }

    /// Feeds a voice-server update from the chat gateway.
    ///
    /// Creates the guild's link lazily when its pool is known, pushes the
    /// credentials once complete, and completes a pending pool-transfer
    /// trigger.
    pub async fn on_voice_server_update(
        &self,
        guild_id: u64,
        token: &str,
        endpoint: &str,
    ) -> Result<()> {
        let voice = {
            let mut pending = self.inner.pending_voice.entry(guild_id).or_default();
            pending.token = token.to_string();
            pending.endpoint = endpoint.to_string();
            pending.value().clone()
        };

        // The link is created (and credentials pushed) before a pending
        // pool-transfer trigger completes, so the transfer continuation
        // finds it in the registry.
        let result = if self.inner.current_pool.contains_key(&guild_id) {
            let region = VoiceRegion::from_endpoint(endpoint);
            match self.get_or_create_link(guild_id, Some(&region)) {
                Ok(link) => {
                    if voice.is_complete() {
                        link.update_voice_state(voice).await;
                    }
                    Ok(())
                }
                Err(error) => Err(error),
            }
        } else {
            debug!(guild_id, "voice server update for unmapped guild");
            Ok(())
        };

        if let Some((_, trigger)) = self.inner.transfer_triggers.remove(&guild_id) {
            let _ = trigger.send(());
        }

        result
    }

    /// Feeds the bot's own voice-state update (its voice session id).
    pub async fn on_voice_state_update(&self, guild_id: u64, session_id: &str) -> Result<()> {
        let voice = {
            let mut pending = self.inner.pending_voice.entry(guild_id).or_default();
            pending.session_id = session_id.to_string();
            pending.value().clone()
        };
        if voice.is_complete() {
            if let Some(link) = self.get_link(guild_id) {
                link.update_voice_state(voice).await;
            }
        }
        Ok(())
    }

    /// Asks the gateway to leave the guild's audio channel.
    pub fn disconnect_audio(&self, guild_id: u64) {
        self.inner.gateway.disconnect(guild_id);
    }

    /// Shuts everything down: sockets, background workers, subscriptions.
    ///
    /// Idempotent; all workers have observed cancellation before this
    /// returns.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("closing client");

        let scheduler = self.inner.reconnect_task.lock().unwrap().take();
        if let Some(task) = scheduler {
            task.abort();
            let _ = task.await;
        }

        let nodes = std::mem::take(&mut *self.inner.nodes.write().unwrap());
        for node in &nodes {
            if let Some(task) = node.begin_close() {
                let _ = task.await;
            }
        }

        let subscriptions = std::mem::take(&mut *self.inner.subscriptions.lock().unwrap());
        for task in subscriptions {
            task.abort();
            let _ = task.await;
        }
    }
}

impl ClientInner {
    fn nodes_in_pool(&self, pool: &str) -> Vec<Arc<Node>> {
        self.nodes
            .read()
            .unwrap()
            .iter()
            .filter(|node| node.pool() == pool)
            .cloned()
            .collect()
    }
}

impl NodeHost for ClientInner {
    fn on_node_disconnected(&self, node: &Arc<Node>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let siblings = self.nodes_in_pool(node.pool());

        if siblings.len() <= 1 {
            warn!(node = %node.name(), pool = %node.pool(), "last node of pool disconnected");
            for link in self.links.iter() {
                link.set_state(LinkState::Disconnected);
            }
            return;
        }

        if siblings.iter().all(|sibling| !sibling.is_available()) {
            warn!(node = %node.name(), pool = %node.pool(), "pool has no available survivors");
            for link in self.links.iter() {
                if Arc::ptr_eq(&link.node(), node) {
                    link.set_state(LinkState::Disconnected);
                }
            }
            return;
        }

        for link in self.links.iter() {
            if !Arc::ptr_eq(&link.node(), node) {
                continue;
            }
            let region = link.voice_region();
            match self
                .balancer
                .select(&siblings, region.as_ref(), link.guild_id())
            {
                Ok(chosen) => link.transfer_node(chosen),
                Err(error) => {
                    warn!(
                        guild_id = link.guild_id(),
                        %error,
                        "no survivor for link, disconnecting"
                    );
                    link.set_state(LinkState::Disconnected);
                }
            }
        }
    }

    /// Adopts players stranded on unavailable nodes onto a node that just
    /// became ready, pool permitting.
    fn transfer_orphans_to(&self, node: &Arc<Node>) {
        if !node.is_available() {
            return;
        }

        let nodes = self.nodes.read().unwrap().clone();
        for other in nodes {
            if Arc::ptr_eq(&other, node) || other.is_available() {
                continue;
            }
            for player in other.cached_players() {
                let Some(link) = self.links.get(&player.guild_id).map(|l| l.value().clone())
                else {
                    continue;
                };
                if !player.voice.is_complete() {
                    continue;
                }
                let pool_matches = self
                    .current_pool
                    .get(&link.guild_id())
                    .map(|pool| *pool == node.pool())
                    .unwrap_or(false);
                if !pool_matches {
                    continue;
                }
                info!(
                    guild_id = link.guild_id(),
                    from = %other.name(),
                    to = %node.name(),
                    "adopting orphaned player"
                );
                link.transfer_node(node.clone());
            }
        }
    }

    fn link_for(&self, guild_id: u64) -> Option<Arc<Link>> {
        self.links.get(&guild_id).map(|link| link.value().clone())
    }

    fn remove_link(&self, guild_id: u64) {
        if self.links.remove(&guild_id).is_some() {
            debug!(guild_id, "link removed");
        }
    }
}

fn spawn_reconnect_scheduler(inner: &Arc<ClientInner>) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RECONNECT_INTERVAL);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else { break };
            if inner.closed.load(Ordering::SeqCst) {
                break;
            }
            let nodes = inner.nodes.read().unwrap().clone();
            for node in nodes {
                node.reconnect();
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionGroup;

    struct StubGateway;

    impl VoiceGateway for StubGateway {
        fn in_audio_channel(&self, _member: &Member) -> bool {
            false
        }
        fn connect(&self, _guild_id: u64, _channel_id: u64) {}
        fn disconnect(&self, _guild_id: u64) {}
    }

    // "123456789" base64-encoded, plus two stub segments
    const TOKEN: &str = "MTIzNDU2Nzg5.stub.token";

    fn test_client() -> Client {
        Client::new(TOKEN, Arc::new(StubGateway)).unwrap()
    }

    fn node_config(name: &str, pool: &str) -> NodeConfig {
        NodeConfig::builder()
            .name(name)
            .host("127.0.0.1")
            .port(59_999)
            .password("pw")
            .pool(pool)
            .region_group(RegionGroup::Europe)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_construction_parses_user_id() {
        let client = test_client();
        assert_eq!(client.user_id(), 123456789);
        client.close().await;
    }

    #[tokio::test]
    async fn test_construction_rejects_bad_token() {
        assert!(matches!(
            Client::new("invalid", Arc::new(StubGateway)),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_node_name_rejected() {
        let client = test_client();
        client.add_node(node_config("a", "main")).unwrap();
        let duplicate = client.add_node(node_config("a", "other"));
        assert!(matches!(duplicate, Err(Error::Config(_))));
        client.close().await;
    }

    #[tokio::test]
    async fn test_get_nodes_filters_on_availability() {
        let client = test_client();
        client.add_node(node_config("a", "main")).unwrap();
        client.add_node(node_config("b", "main")).unwrap();

        assert_eq!(client.get_nodes(false).len(), 2);
        // sockets point at a dead port, nothing ever becomes available
        assert_eq!(client.get_nodes(true).len(), 0);
        client.close().await;
    }

    #[tokio::test]
    async fn test_link_requires_pool_mapping() {
        let client = test_client();
        let result = client.get_or_create_link(42, None);
        assert!(matches!(result, Err(Error::PoolUnmapped(42))));
        client.close().await;
    }

    #[tokio::test]
    async fn test_transfer_reports_false_without_available_node() {
        let client = test_client();
        client.add_node(node_config("a", "target")).unwrap();
        let author = Member {
            guild_id: 1,
            user_id: 2,
            channel_id: Some(3),
        };
        let bot = Member {
            guild_id: 1,
            user_id: 123456789,
            channel_id: None,
        };
        let moved = client
            .load_and_transfer_to_node(1, "target", &author, &bot, |_| {})
            .unwrap();
        assert!(!moved);
        // the pool remap itself sticks
        assert_eq!(client.current_pool(1).as_deref(), Some("target"));
        client.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let client = test_client();
        client.add_node(node_config("a", "main")).unwrap();
        client.close().await;
        client.close().await;
        assert!(matches!(
            client.add_node(node_config("b", "main")),
            Err(Error::Config(_))
        ));
    }
}
