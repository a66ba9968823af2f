//! Penalty-based node selection.

use crate::error::{Error, Result};
use crate::node::Node;
use crate::penalty::{PenaltyProvider, RegionPenaltyProvider};
use crate::region::VoiceRegion;
use std::sync::Arc;
use tracing::trace;

/// Picks the lowest-scored available node from a candidate set.
///
/// The total score is the node's intrinsic penalty plus the sum over all
/// registered [`PenaltyProvider`]s. Ties keep the first candidate seen.
/// The default configuration registers the region provider.
pub struct LoadBalancer {
    providers: Vec<Box<dyn PenaltyProvider>>,
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self {
            providers: vec![Box::new(RegionPenaltyProvider)],
        }
    }
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_providers(providers: Vec<Box<dyn PenaltyProvider>>) -> Self {
        Self { providers }
    }

    pub fn select(
        &self,
        candidates: &[Arc<Node>],
        region: Option<&VoiceRegion>,
        guild_id: u64,
    ) -> Result<Arc<Node>> {
        if let [only] = candidates {
            if !only.is_available() {
                return Err(Error::NodeUnavailable);
            }
        }

        let mut best: Option<(&Arc<Node>, i64)> = None;
        for node in candidates.iter().filter(|n| n.is_available()) {
            let total = node.penalty_total()
                + self
                    .providers
                    .iter()
                    .map(|provider| provider.penalty(node, region))
                    .sum::<i64>();
            trace!(node = %node.name(), guild_id, total, "scored candidate");
            if best.as_ref().map_or(true, |(_, lowest)| total < *lowest) {
                best = Some((node, total));
            }
        }

        best.map(|(node, _)| Arc::clone(node))
            .ok_or(Error::NoAvailableNode)
    }
}
