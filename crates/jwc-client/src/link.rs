//! Per-guild binding from a voice channel to a node's player.

use crate::node::Node;
use crate::region::VoiceRegion;
use jwc_protocol::{PlayerUpdate, VoiceState};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Settling pause before a transferred player is recreated on its new
/// node. The remote side needs this to release the voice session; shorting
/// it produces players that never connect.
pub const HANDOVER_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    Disconnected,
}

/// A guild's binding to a node.
///
/// The node pointer is switched *before* the delayed player re-creation
/// fires: observers see the new node immediately while the old node's
/// player is destroyed asynchronously. Identity is the guild id alone.
pub struct Link {
    guild_id: u64,
    node: RwLock<Arc<Node>>,
    state: RwLock<LinkState>,
}

impl Link {
    pub(crate) fn new(guild_id: u64, node: Arc<Node>) -> Arc<Self> {
        Arc::new(Self {
            guild_id,
            node: RwLock::new(node),
            state: RwLock::new(LinkState::Disconnected),
        })
    }

    pub fn guild_id(&self) -> u64 {
        self.guild_id
    }

    /// The currently selected node.
    pub fn node(&self) -> Arc<Node> {
        self.node.read().unwrap().clone()
    }

    pub fn state(&self) -> LinkState {
        *self.state.read().unwrap()
    }

    pub(crate) fn set_state(&self, state: LinkState) {
        *self.state.write().unwrap() = state;
    }

    /// Region of the voice server this link's player is bound to, when
    /// known.
    pub(crate) fn voice_region(&self) -> Option<VoiceRegion> {
        let player = self.node().get_cached_player(self.guild_id)?;
        if player.voice.endpoint.is_empty() {
            return None;
        }
        Some(VoiceRegion::from_endpoint(&player.voice.endpoint))
    }

    /// Pushes fresh voice credentials to the selected node. A no-op while
    /// the node is unavailable; a failed push leaves the link
    /// disconnected.
    pub async fn update_voice_state(self: &Arc<Self>, voice: VoiceState) {
        let node = self.node();
        if !node.is_available() {
            debug!(
                guild_id = self.guild_id,
                node = %node.name(),
                "dropping voice state, node unavailable"
            );
            return;
        }
        self.set_state(LinkState::Connecting);
        let update = PlayerUpdate::default().with_voice(voice);
        match node.update_player(self.guild_id, update, false).await {
            Ok(_) => debug!(guild_id = self.guild_id, node = %node.name(), "voice state pushed"),
            Err(error) => {
                warn!(
                    guild_id = self.guild_id,
                    node = %node.name(),
                    %error,
                    "voice state push failed"
                );
                self.set_state(LinkState::Disconnected);
            }
        }
    }

    /// Moves this link to another node in the same pool, carrying the full
    /// player state (track included). Used when the current node fails.
    pub(crate) fn transfer_node(self: &Arc<Self>, new_node: Arc<Node>) {
        self.set_state(LinkState::Connecting);
        let old_node = {
            let mut selected = self.node.write().unwrap();
            std::mem::replace(&mut *selected, new_node.clone())
        };

        let Some(player) = old_node.get_cached_player(self.guild_id) else {
            return;
        };
        info!(
            guild_id = self.guild_id,
            from = %old_node.name(),
            to = %new_node.name(),
            "transferring link"
        );

        let update = PlayerUpdate::from(&player);
        let link = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(HANDOVER_DELAY).await;
            match new_node.update_player(link.guild_id, update, false).await {
                Ok(_) => old_node.evict_player(link.guild_id),
                Err(error) => {
                    warn!(
                        guild_id = link.guild_id,
                        node = %new_node.name(),
                        %error,
                        "link transfer failed"
                    );
                    link.set_state(LinkState::Disconnected);
                }
            }
        });
    }

    /// Moves this link into another pool. Only volume, voice credentials
    /// and filters carry over; the track does not survive a pool change.
    /// The old player is destroyed before the new one is created.
    pub(crate) async fn transfer_to_pool(
        self: &Arc<Self>,
        new_node: Arc<Node>,
        after: impl FnOnce(Arc<Node>) + Send + 'static,
    ) {
        self.set_state(LinkState::Connecting);
        let old_node = {
            let mut selected = self.node.write().unwrap();
            std::mem::replace(&mut *selected, new_node.clone())
        };
        info!(
            guild_id = self.guild_id,
            from = %old_node.name(),
            to = %new_node.name(),
            "transferring link to pool"
        );

        let mut update = PlayerUpdate::default();
        if let Some(player) = old_node.get_cached_player(self.guild_id) {
            update.volume = Some(player.volume);
            update.voice = Some(player.voice.clone());
            update.filters = player.filters.clone();
        }

        if let Err(error) = old_node.destroy_player(self.guild_id).await {
            debug!(
                guild_id = self.guild_id,
                node = %old_node.name(),
                %error,
                "could not destroy player on old node during pool transfer"
            );
        }

        let link = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(HANDOVER_DELAY).await;
            match new_node.update_player(link.guild_id, update, false).await {
                Ok(_) => after(new_node),
                Err(error) => {
                    warn!(
                        guild_id = link.guild_id,
                        node = %new_node.name(),
                        %error,
                        "pool transfer failed"
                    );
                    link.set_state(LinkState::Disconnected);
                }
            }
        });
    }

    /// Destroys the remote player and evicts this link from the registry.
    pub async fn destroy(&self) -> crate::error::Result<()> {
        let node = self.node();
        node.destroy_player_and_link(self.guild_id).await
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.guild_id == other.guild_id
    }
}

impl Eq for Link {}

impl Hash for Link {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.guild_id.hash(state);
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("guild_id", &self.guild_id)
            .field("node", &self.node().name())
            .field("state", &self.state())
            .finish()
    }
}
