//! # config
//!
//! why: describe one node's place in the cluster and its logical-clock timeouts
//! relations: consumed once by node.rs at construction, built by drivers such as raft-sim
//! what: Config struct, defaults, builder setters, construction-time validation

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::NodeId;

/// Static configuration of a single raft node.
///
/// All timeouts are counted in calls to [`RaftNode::tick`](crate::RaftNode::tick),
/// never in wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Unique identifier for this node
    pub id: NodeId,

    /// Every other member of the cluster, in broadcast order. Must not contain `id`.
    pub peers: Vec<NodeId>,

    /// Base election timeout. A follower that hears nothing from a leader for
    /// a random number of ticks in `[election_tick, 2 * election_tick - 1]`
    /// becomes a candidate.
    pub election_tick: u64,

    /// A leader sends AppendEntries to every peer each `heartbeat_tick` ticks.
    pub heartbeat_tick: u64,

    /// Maximum number of entries carried by one AppendEntries message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub append_entries_batch_size: Option<usize>,
}

impl Config {
    pub const DEFAULT_ELECTION_TICK: u64 = 10;
    pub const DEFAULT_HEARTBEAT_TICK: u64 = 2;
    pub const DEFAULT_BATCH_SIZE: usize = 1;
    pub const MAX_ELECTION_TICK: u64 = u64::MAX / 2;

    pub fn new(id: NodeId, peers: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            id,
            peers: peers.into_iter().collect(),
            election_tick: Self::DEFAULT_ELECTION_TICK,
            heartbeat_tick: Self::DEFAULT_HEARTBEAT_TICK,
            append_entries_batch_size: None,
        }
    }

    pub fn with_election_tick(mut self, ticks: u64) -> Self {
        self.election_tick = ticks;
        self
    }

    pub fn with_heartbeat_tick(mut self, ticks: u64) -> Self {
        self.heartbeat_tick = ticks;
        self
    }

    pub fn with_batch_size(mut self, entries: usize) -> Self {
        self.append_entries_batch_size = Some(entries);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.append_entries_batch_size
            .unwrap_or(Self::DEFAULT_BATCH_SIZE)
    }

    /// number of voting members, including this node
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peers.contains(&self.id) {
            return Err(ConfigError::PeersContainSelf { id: self.id });
        }

        let mut seen = BTreeSet::new();
        for &peer in &self.peers {
            if !seen.insert(peer) {
                return Err(ConfigError::DuplicatePeer { peer });
            }
        }

        if self.election_tick == 0 {
            return Err(ConfigError::ZeroTicks {
                field: "election_tick",
            });
        }
        // the randomized timeout is drawn below 2 * election_tick
        if self.election_tick > Self::MAX_ELECTION_TICK {
            return Err(ConfigError::ElectionTickTooLarge {
                ticks: self.election_tick,
            });
        }
        if self.heartbeat_tick == 0 {
            return Err(ConfigError::ZeroTicks {
                field: "heartbeat_tick",
            });
        }
        if self.append_entries_batch_size == Some(0) {
            return Err(ConfigError::ZeroBatchSize);
        }

        Ok(())
    }
}

/// Error variants related to configuration.
#[derive(Debug, thiserror::Error)]
#[derive(PartialEq, Eq)]
pub enum ConfigError {
    #[error("peers must not contain the node's own id {id}")]
    PeersContainSelf { id: NodeId },

    #[error("peer {peer} is listed more than once")]
    DuplicatePeer { peer: NodeId },

    #[error("{field} must be at least 1 tick")]
    ZeroTicks { field: &'static str },

    #[error("election_tick {ticks} is too large, at most {} ticks", Config::MAX_ELECTION_TICK)]
    ElectionTickTooLarge { ticks: u64 },

    #[error("append_entries_batch_size must be at least 1")]
    ZeroBatchSize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = Config::new(1, [2, 3]);
        assert_eq!(config.election_tick, 10);
        assert_eq!(config.heartbeat_tick, 2);
        assert_eq!(config.batch_size(), 1);
        assert_eq!(config.cluster_size(), 3);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn custom_values_are_applied() {
        let config = Config::new(1, [2, 3])
            .with_election_tick(20)
            .with_heartbeat_tick(5)
            .with_batch_size(4);
        assert_eq!(config.election_tick, 20);
        assert_eq!(config.heartbeat_tick, 5);
        assert_eq!(config.batch_size(), 4);
    }

    #[test]
    fn peers_must_not_contain_self() {
        let config = Config::new(1, [1, 2, 3]);
        assert_eq!(config.validate(), Err(ConfigError::PeersContainSelf { id: 1 }));
    }

    #[test]
    fn peers_must_be_unique() {
        let config = Config::new(1, [2, 3, 2]);
        assert_eq!(config.validate(), Err(ConfigError::DuplicatePeer { peer: 2 }));
    }

    #[test]
    fn ticks_and_batch_must_be_positive() {
        assert_eq!(
            Config::new(1, [2]).with_election_tick(0).validate(),
            Err(ConfigError::ZeroTicks {
                field: "election_tick"
            })
        );
        assert_eq!(
            Config::new(1, [2]).with_heartbeat_tick(0).validate(),
            Err(ConfigError::ZeroTicks {
                field: "heartbeat_tick"
            })
        );
        assert_eq!(
            Config::new(1, [2]).with_batch_size(0).validate(),
            Err(ConfigError::ZeroBatchSize)
        );
    }

    #[test]
    fn election_tick_must_leave_room_for_randomization() {
        let largest = Config::new(1, [2]).with_election_tick(u64::MAX / 2);
        assert_eq!(largest.validate(), Ok(()));

        let too_large = Config::new(1, [2]).with_election_tick(u64::MAX / 2 + 1);
        assert_eq!(
            too_large.validate(),
            Err(ConfigError::ElectionTickTooLarge {
                ticks: u64::MAX / 2 + 1
            })
        );
        assert_eq!(
            Config::new(1, [2]).with_election_tick(u64::MAX).validate(),
            Err(ConfigError::ElectionTickTooLarge { ticks: u64::MAX })
        );
    }

    #[test]
    fn deserializes_without_batch_size() {
        let config: Config = serde_json::from_str(
            r#"{"id":1,"peers":[2,3],"electionTick":10,"heartbeatTick":2}"#,
        )
        .unwrap();
        assert_eq!(config, Config::new(1, [2, 3]));
    }
}
