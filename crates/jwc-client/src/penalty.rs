//! Penalty scoring for node selection.
//!
//! Each node keeps a rolling, minute-bucketed record of track outcomes.
//! Buckets are keyed by wall-clock minute and capped at
//! [`TRACKER_CAPACITY_MINUTES`]; keys are monotonic, so evicting the oldest
//! insertion keeps exactly the most recent minutes.
//!
//! The total score combines this record with the node's latest stats
//! snapshot; lower is better. An unusable node scores [`BLOCK`], a usable
//! node in the wrong region gets [`SOFT_BLOCK`] added by the region
//! provider.

use crate::node::Node;
use crate::region::{RegionGroup, VoiceRegion};
use chrono::{DateTime, Utc};
use jwc_protocol::Stats;
use std::collections::{HashMap, VecDeque};

/// Score of a node that must not be selected.
pub const BLOCK: i64 = 10_000_000;

/// Additive score for a node outside the voice server's region group.
pub const SOFT_BLOCK: i64 = 1_000;

/// How many minute buckets the tracker retains.
pub const TRACKER_CAPACITY_MINUTES: usize = 100;

/// Track outcomes fed into the tracker by the event socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEvent {
    LoadAttempt,
    LoadFailed,
    TrackException,
    TrackStuck,
}

/// Aggregated counters across all retained minutes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackCounts {
    pub load_attempts: u64,
    pub load_failed: u64,
    pub track_exceptions: u64,
    pub tracks_stuck: u64,
}

impl TrackCounts {
    fn bump(&mut self, event: TrackEvent) {
        match event {
            TrackEvent::LoadAttempt => self.load_attempts += 1,
            TrackEvent::LoadFailed => self.load_failed += 1,
            TrackEvent::TrackException => self.track_exceptions += 1,
            TrackEvent::TrackStuck => self.tracks_stuck += 1,
        }
    }

    fn merge(&mut self, other: &TrackCounts) {
        self.load_attempts += other.load_attempts;
        self.load_failed += other.load_failed;
        self.track_exceptions += other.track_exceptions;
        self.tracks_stuck += other.tracks_stuck;
    }
}

/// Rolling per-node record of track outcomes.
#[derive(Debug, Default)]
pub struct PenaltyTracker {
    buckets: HashMap<String, TrackCounts>,
    order: VecDeque<String>,
}

impl PenaltyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: TrackEvent) {
        self.record_at(Utc::now(), event);
    }

    pub(crate) fn record_at(&mut self, at: DateTime<Utc>, event: TrackEvent) {
        let key = at.format("%Y-%m-%d %H:%M").to_string();
        if !self.buckets.contains_key(&key) {
            self.order.push_back(key.clone());
            if self.order.len() > TRACKER_CAPACITY_MINUTES {
                if let Some(oldest) = self.order.pop_front() {
                    self.buckets.remove(&oldest);
                }
            }
        }
        self.buckets.entry(key).or_default().bump(event);
    }

    pub fn counts(&self) -> TrackCounts {
        let mut total = TrackCounts::default();
        for counts in self.buckets.values() {
            total.merge(counts);
        }
        total
    }

    /// Dropped on a fresh (non-resumed) session.
    pub fn reset(&mut self) {
        self.buckets.clear();
        self.order.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Computes a node's intrinsic score from its availability, latest stats
/// snapshot, locally counted playing players and track record.
pub(crate) fn score(
    available: bool,
    stats: Option<&Stats>,
    local_playing: u32,
    counts: TrackCounts,
) -> i64 {
    if !available {
        return BLOCK;
    }
    let Some(stats) = stats else {
        return BLOCK;
    };
    if counts.load_attempts > 0 && counts.load_attempts == counts.load_failed {
        return BLOCK;
    }

    let player_penalty = i64::from(local_playing.max(stats.playing_players));
    let cpu_penalty = (1.05f64.powf(100.0 * stats.cpu.system_load) * 10.0 - 10.0).floor() as i64;

    let (deficit_penalty, nulled_penalty) = match stats.frame_stats {
        Some(frames) if frames.deficit != -1 => {
            let deficit =
                (1.03f64.powf(500.0 * frames.deficit as f64 / 3000.0) * 600.0 - 600.0).floor() as i64;
            let nulled =
                (1.03f64.powf(500.0 * frames.nulled as f64 / 3000.0) * 600.0 - 600.0).floor() as i64;
            (deficit, nulled * 2)
        }
        _ => (0, 0),
    };

    let stuck_penalty = if counts.tracks_stuck > 0 {
        100 * counts.tracks_stuck as i64 - 100
    } else {
        0
    };
    let exception_penalty = if counts.track_exceptions > 0 {
        10 * counts.track_exceptions as i64 - 10
    } else {
        0
    };
    let load_failed_penalty = if counts.load_failed > 0 && counts.load_attempts > 0 {
        (counts.load_failed / counts.load_attempts) as i64
    } else {
        0
    };

    player_penalty
        + cpu_penalty
        + deficit_penalty
        + nulled_penalty
        + stuck_penalty
        + exception_penalty
        + load_failed_penalty
}

/// Extra, per-selection penalty source registered on the balancer.
pub trait PenaltyProvider: Send + Sync {
    fn penalty(&self, node: &Node, region: Option<&VoiceRegion>) -> i64;
}

/// Prefers nodes whose configured region group matches the voice server's.
///
/// Passes when either side is unknown; otherwise a mismatch adds
/// [`SOFT_BLOCK`].
pub struct RegionPenaltyProvider;

impl PenaltyProvider for RegionPenaltyProvider {
    fn penalty(&self, node: &Node, region: Option<&VoiceRegion>) -> i64 {
        let Some(region) = region else {
            return 0;
        };
        let node_group = node.config().region_group();
        if node_group == RegionGroup::Unknown || region.group == RegionGroup::Unknown {
            return 0;
        }
        if node_group == region.group {
            0
        } else {
            SOFT_BLOCK
        }
    }
}
