//! # simulator
//!
//! why: run a whole cluster in one process on a shared logical clock
//! relations: drives raft-core nodes through tick/receive, routes their messages over channel.rs links
//! what: SimulatorOptions, SimulatorState snapshot, Simulator with tick/propose/partition/heal

use std::collections::BTreeMap;

use crossbeam::channel::Receiver;
use rand::rngs::StdRng;
use rand::SeedableRng;
use raft_core::{Config, LogEntry, Message, NodeId, NodeState, RaftNode, Role, Term};
use serde::{Deserialize, Serialize};

use crate::channel::MessageChannel;
use crate::error::{Result, SimError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorOptions {
    pub num_of_nodes: usize,
    /// latency of every link, in ticks
    pub message_channel_ticks: u64,
    pub node_election_ticks: u64,
    pub node_heartbeat_ticks: u64,
    /// node `id` draws its timeouts from `seed + id`
    pub seed: u64,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        Self {
            num_of_nodes: 3,
            message_channel_ticks: 1,
            node_election_ticks: 10,
            node_heartbeat_ticks: 2,
            seed: 0,
        }
    }
}

/// What the cluster looked like after the last tick.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorState {
    pub tick: u64,
    pub node_states: BTreeMap<NodeId, NodeState>,
    pub message_channels: BTreeMap<String, MessageChannel>,
}

struct SimNode {
    node: RaftNode,
    outbox: Receiver<Message>,
    committed_rx: Receiver<LogEntry>,
    /// everything this node reported as committed, in order
    committed: Vec<LogEntry>,
}

pub struct Simulator {
    options: SimulatorOptions,
    nodes: BTreeMap<NodeId, SimNode>,
    state: SimulatorState,
    next_message_id: u64,
    last_leader: Option<(NodeId, Term)>,
    stopped: bool,
}

impl Simulator {
    pub fn new(options: SimulatorOptions) -> Result<Self> {
        if options.num_of_nodes == 0 {
            return Err(SimError::NoNodes);
        }

        let ids: Vec<NodeId> = (1..=options.num_of_nodes as NodeId).collect();
        let mut nodes = BTreeMap::new();
        let mut message_channels = BTreeMap::new();

        for &id in &ids {
            let config = Config::new(id, ids.iter().copied().filter(|&p| p != id))
                .with_election_tick(options.node_election_ticks)
                .with_heartbeat_tick(options.node_heartbeat_ticks);
            let rng = StdRng::seed_from_u64(options.seed.wrapping_add(id));
            let mut node = RaftNode::with_rng(config, rng)?;

            let obs = node.observables();
            nodes.insert(
                id,
                SimNode {
                    node,
                    outbox: obs.message_sent,
                    committed_rx: obs.committed,
                    committed: Vec::new(),
                },
            );

            for &to in ids.iter().filter(|&&to| to != id) {
                message_channels.insert(MessageChannel::key(id, to), MessageChannel::new(id, to));
            }
        }

        let node_states = nodes.iter().map(|(&id, n)| (id, n.node.get_state())).collect();

        tracing::info!(
            nodes = options.num_of_nodes,
            channel_ticks = options.message_channel_ticks,
            seed = options.seed,
            "simulator started"
        );

        Ok(Self {
            options,
            nodes,
            state: SimulatorState {
                tick: 0,
                node_states,
                message_channels,
            },
            next_message_id: 0,
            last_leader: None,
            stopped: false,
        })
    }

    pub fn options(&self) -> &SimulatorOptions {
        &self.options
    }

    /// Advance the whole cluster by one tick.
    ///
    /// Messages sent since the last tick are put on their links first, then
    /// every link moves one step and delivers what arrives, then every node
    /// ticks. Nodes are visited in id order, links in key order. Does
    /// nothing once the simulator is stopped.
    pub fn tick(&mut self) {
        if self.stopped {
            tracing::trace!(tick = self.state.tick, "simulator stopped, tick ignored");
            return;
        }

        self.dispatch_outgoing();
        self.deliver_arrivals();

        for (&id, sim) in self.nodes.iter_mut() {
            sim.node.tick();
            sim.committed.extend(sim.committed_rx.try_iter());
            self.state.node_states.insert(id, sim.node.get_state());
        }
        self.state.tick += 1;

        self.log_leader_change();
    }

    fn dispatch_outgoing(&mut self) {
        for sim in self.nodes.values() {
            for message in sim.outbox.try_iter() {
                let (from, to) = (message.sender(), message.recipient());
                let Some(channel) = self
                    .state
                    .message_channels
                    .get_mut(&MessageChannel::key(from, to))
                else {
                    tracing::warn!(from, to, "message to unknown node dropped");
                    continue;
                };

                self.next_message_id += 1;
                if !channel.push(self.next_message_id, self.options.message_channel_ticks, message) {
                    tracing::trace!(from, to, "link down, message dropped");
                }
            }
        }
    }

    fn deliver_arrivals(&mut self) {
        for channel in self.state.message_channels.values_mut() {
            for message in channel.advance() {
                if let Some(sim) = self.nodes.get_mut(&channel.to) {
                    sim.node.receive(message);
                    sim.committed.extend(sim.committed_rx.try_iter());
                }
            }
        }
    }

    fn log_leader_change(&mut self) {
        let current = self.leader().map(|id| (id, self.state.node_states[&id].current_term));
        if current != self.last_leader {
            match current {
                Some((leader, term)) => {
                    tracing::info!(tick = self.state.tick, leader, term, "leader elected")
                }
                None => tracing::info!(tick = self.state.tick, "cluster has no leader"),
            }
            self.last_leader = current;
        }
    }

    /// The leader of the highest term any node believes it leads.
    ///
    /// During a partition a deposed leader may still think it leads an
    /// older term; it is never returned while a newer leader exists.
    pub fn leader(&self) -> Option<NodeId> {
        self.state
            .node_states
            .values()
            .filter(|s| s.role == Role::Leader)
            .max_by_key(|s| s.current_term)
            .map(|s| s.id)
    }

    /// Hand `data` to the current leader. Returns the id that accepted it.
    pub fn propose(&mut self, data: impl Into<String>) -> Result<NodeId> {
        if self.stopped {
            return Err(SimError::Stopped);
        }
        let leader = self.leader().ok_or(SimError::NoLeader)?;
        let sim = self.nodes.get_mut(&leader).ok_or(SimError::UnknownNode(leader))?;

        let response = sim.node.propose(data);
        sim.committed.extend(sim.committed_rx.try_iter());
        self.state.node_states.insert(leader, sim.node.get_state());

        if response.success {
            Ok(leader)
        } else {
            Err(SimError::NoLeader)
        }
    }

    /// Turn the directed link `from -> to` on or off.
    pub fn set_channel_active(&mut self, from: NodeId, to: NodeId, active: bool) -> Result<()> {
        let channel = self
            .state
            .message_channels
            .get_mut(&MessageChannel::key(from, to))
            .ok_or(SimError::UnknownChannel { from, to })?;
        channel.set_active(active);
        Ok(())
    }

    /// Cut every link between `group` and the rest of the cluster, both ways.
    pub fn partition(&mut self, group: &[NodeId]) -> Result<()> {
        if let Some(&unknown) = group.iter().find(|id| !self.nodes.contains_key(id)) {
            return Err(SimError::UnknownNode(unknown));
        }

        for channel in self.state.message_channels.values_mut() {
            if group.contains(&channel.from) != group.contains(&channel.to) {
                channel.set_active(false);
            }
        }
        tracing::info!(tick = self.state.tick, ?group, "partitioned");
        Ok(())
    }

    /// Bring every link back up.
    pub fn heal(&mut self) {
        for channel in self.state.message_channels.values_mut() {
            channel.set_active(true);
        }
        tracing::info!(tick = self.state.tick, "healed all links");
    }

    pub fn state(&self) -> &SimulatorState {
        &self.state
    }

    pub fn node_state(&self, id: NodeId) -> Option<&NodeState> {
        self.state.node_states.get(&id)
    }

    /// Entries `id` has reported committed so far, in commit order.
    pub fn committed(&self, id: NodeId) -> Option<&[LogEntry]> {
        self.nodes.get(&id).map(|sim| sim.committed.as_slice())
    }

    /// Stop every node's event streams and freeze the cluster: later ticks
    /// and proposals leave every node untouched. Calling it again does nothing.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        for sim in self.nodes.values_mut() {
            sim.node.stop();
        }
        self.stopped = true;
        tracing::info!(tick = self.state.tick, "simulator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_full_mesh_of_channels() {
        let sim = Simulator::new(SimulatorOptions::default()).unwrap();
        let keys: Vec<_> = sim.state().message_channels.keys().cloned().collect();
        assert_eq!(keys, vec!["1-2", "1-3", "2-1", "2-3", "3-1", "3-2"]);
        assert_eq!(sim.state().node_states.len(), 3);
    }

    #[test]
    fn rejects_empty_cluster() {
        let options = SimulatorOptions {
            num_of_nodes: 0,
            ..Default::default()
        };
        assert!(matches!(Simulator::new(options), Err(SimError::NoNodes)));
    }

    #[test]
    fn propose_without_leader_fails() {
        let mut sim = Simulator::new(SimulatorOptions::default()).unwrap();
        assert!(matches!(sim.propose("x"), Err(SimError::NoLeader)));
    }

    #[test]
    fn unknown_channel_is_an_error() {
        let mut sim = Simulator::new(SimulatorOptions::default()).unwrap();
        assert!(matches!(
            sim.set_channel_active(1, 1, false),
            Err(SimError::UnknownChannel { from: 1, to: 1 })
        ));
        assert!(matches!(sim.partition(&[9]), Err(SimError::UnknownNode(9))));
    }

    #[test]
    fn partition_cuts_only_crossing_links() {
        let mut sim = Simulator::new(SimulatorOptions::default()).unwrap();
        sim.partition(&[1]).unwrap();

        let channels = &sim.state().message_channels;
        assert!(!channels["1-2"].active);
        assert!(!channels["3-1"].active);
        assert!(channels["2-3"].active);

        sim.heal();
        assert!(sim.state().message_channels.values().all(|c| c.active));
    }

    #[test]
    fn stop_freezes_the_cluster() {
        let mut sim = Simulator::new(SimulatorOptions::default()).unwrap();
        for _ in 0..5 {
            sim.tick();
        }
        sim.stop();
        sim.stop();
        let frozen = sim.state().node_states.clone();

        // long enough for any follower to have started an election
        for _ in 0..50 {
            sim.tick();
        }

        assert_eq!(sim.state().tick, 5);
        assert_eq!(sim.state().node_states, frozen);
        assert!(matches!(sim.propose("x"), Err(SimError::Stopped)));
    }
}
