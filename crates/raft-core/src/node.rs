//! # node
//!
//! why: define the raft node state machine and state transitions
//! relations: uses message.rs for rpc types, log.rs for entry management, events.rs for notifications
//! what: Role enum, NodeState snapshot, RaftNode with tick/receive/campaign/propose

use std::cmp::{max, min};
use std::collections::BTreeMap;
use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{RaftError, Result};
use crate::events::{EventBus, Observables};
use crate::log::{self, LogEntry};
use crate::message::{
    AppendEntriesRequest, AppendEntriesResponse, Message, RequestVoteRequest, RequestVoteResponse,
};
use crate::{Index, NodeId, Term};

/// The three possible roles a Raft node can be in
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Passive role - listens for heartbeats, votes when asked
    #[default]
    Follower,
    /// Transitional role - requesting votes to become leader
    Candidate,
    /// Active role - manages log replication, sends heartbeats
    Leader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Follower => write!(f, "follower"),
            Role::Candidate => write!(f, "candidate"),
            Role::Leader => write!(f, "leader"),
        }
    }
}

/// Everything a node knows, as handed out to observers.
///
/// A `NodeState` obtained from [`RaftNode::get_state`] or the role-changed
/// stream is an independent copy; changing it has no effect on the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    pub id: NodeId,
    pub peers: Vec<NodeId>,
    pub role: Role,

    // persistent in a real deployment, memory-only here
    /// latest term this node has seen, starts at 1
    pub current_term: Term,
    /// candidate that received our vote in the current term
    pub voted_for: Option<NodeId>,
    pub log: Vec<LogEntry>,

    // volatile on all nodes
    /// highest index known to be committed
    pub commit_index: Index,
    /// highest index handed out through `entries_to_apply`
    pub last_applied: Index,

    // volatile on leaders, reinitialized after each election
    /// per peer, index of the next entry to send
    pub next_index: BTreeMap<NodeId, Index>,
    /// per peer, highest index known to be replicated there
    pub match_index: BTreeMap<NodeId, Index>,

    /// per peer, whether it granted its vote in the current candidacy
    pub vote_granted: BTreeMap<NodeId, bool>,

    /// last known leader
    pub leader_id: Option<NodeId>,

    pub election_elapsed: u64,
    pub heartbeat_elapsed: u64,
    pub election_timeout: u64,
    pub heartbeat_timeout: u64,
    /// drawn from `[election_timeout, 2 * election_timeout - 1]` whenever
    /// the node becomes follower or candidate
    pub randomized_election_timeout: u64,

    /// every message this node has sent, in order
    pub outgoing_messages: Vec<Message>,
}

/// Result of [`RaftNode::propose`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposeResponse {
    pub success: bool,
    /// where the caller should retry when `success` is false
    pub leader_id: Option<NodeId>,
}

/// Which handler `tick` dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    Election,
    Heartbeat,
}

/// A single Raft node in the cluster
///
/// The node is a synchronous state machine. It is driven by advancing its
/// logical clock with [`tick`](Self::tick) and by feeding it inbound messages
/// with [`receive`](Self::receive). Messages it wants delivered show up in
/// `outgoing_messages` and on the `message_sent` stream; moving them to peers
/// is the caller's job. Calls must be serialized per instance; separate
/// instances share nothing and can run on separate threads.
#[derive(Debug)]
pub struct RaftNode {
    config: Config,
    state: NodeState,
    timer: Timer,
    rng: StdRng,
    events: EventBus,
}

impl RaftNode {
    /// Create a new Raft node in Follower role at term 1
    pub fn new(config: Config) -> Result<Self> {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Like [`new`](Self::new), with an explicit source for the election
    /// timeout draws. Seeded generators make a node fully deterministic.
    pub fn with_rng(config: Config, rng: StdRng) -> Result<Self> {
        config.validate()?;

        let peers = config.peers.clone();
        let state = NodeState {
            id: config.id,
            peers: peers.clone(),
            role: Role::Follower,
            current_term: 1,
            voted_for: None,
            log: Vec::new(),
            commit_index: 0,
            last_applied: 0,
            next_index: peers.iter().map(|&p| (p, 1)).collect(),
            match_index: peers.iter().map(|&p| (p, 0)).collect(),
            vote_granted: peers.iter().map(|&p| (p, false)).collect(),
            leader_id: None,
            election_elapsed: 0,
            heartbeat_elapsed: 0,
            election_timeout: config.election_tick,
            heartbeat_timeout: config.heartbeat_tick,
            randomized_election_timeout: 0,
            outgoing_messages: Vec::new(),
        };

        let mut node = Self {
            config,
            state,
            timer: Timer::Election,
            rng,
            events: EventBus::default(),
        };
        node.become_follower(1, None);
        Ok(node)
    }

    pub fn id(&self) -> NodeId {
        self.config.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.state.role
    }

    pub fn current_term(&self) -> Term {
        self.state.current_term
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        self.state.leader_id
    }

    pub fn commit_index(&self) -> Index {
        self.state.commit_index
    }

    /// Independent copy of the node's whole state.
    pub fn get_state(&self) -> NodeState {
        self.state.clone()
    }

    /// Subscribe to the node's event streams.
    pub fn observables(&mut self) -> Observables {
        self.events.subscribe()
    }

    /// Close every event stream. Calling it again does nothing.
    pub fn stop(&mut self) {
        if !self.events.is_stopped() {
            tracing::debug!(node_id = self.config.id, "stopping event streams");
        }
        self.events.stop();
    }

    /// Advance the logical clock by one tick.
    pub fn tick(&mut self) {
        match self.timer {
            Timer::Election => self.tick_election(),
            Timer::Heartbeat => self.tick_heartbeat(),
        }
    }

    /// Become candidate and ask every peer for its vote.
    ///
    /// A leader may not campaign: that would demote it without cause.
    pub fn campaign(&mut self) -> Result<()> {
        if self.state.role == Role::Leader {
            return Err(RaftError::InvalidRoleTransition {
                from: Role::Leader,
                to: Role::Candidate,
            });
        }
        self.start_campaign();
        Ok(())
    }

    /// Append `data` to the log if this node is leader.
    ///
    /// Nothing is queued on other nodes; the response names the known
    /// leader so the caller can retry there.
    pub fn propose(&mut self, data: impl Into<String>) -> ProposeResponse {
        if self.state.role != Role::Leader {
            return ProposeResponse {
                success: false,
                leader_id: self.state.leader_id,
            };
        }

        let entry = LogEntry::new(data, self.state.current_term);
        self.state.log.push(entry);
        tracing::debug!(
            node_id = self.config.id,
            index = log::last_index(&self.state.log),
            term = self.state.current_term,
            "appended proposal"
        );

        // nobody will ever ack, the leader alone is the majority
        if self.config.peers.is_empty() {
            self.advance_commit_index();
        }

        ProposeResponse {
            success: true,
            leader_id: Some(self.config.id),
        }
    }

    /// Committed entries not yet handed out, advancing `last_applied`.
    pub fn entries_to_apply(&mut self) -> Vec<LogEntry> {
        let applied = self.state.last_applied;
        let committed = self.state.commit_index;
        if committed <= applied {
            return Vec::new();
        }

        let entries = log::slice(&self.state.log, applied, committed);
        self.state.last_applied = applied + entries.len() as Index;
        entries
    }

    /// Apply one inbound protocol message.
    pub fn receive(&mut self, message: Message) {
        tracing::debug!(
            node_id = self.config.id,
            from = message.sender(),
            kind = message.kind(),
            term = message.term(),
            "received message"
        );

        match message {
            Message::RequestVoteRequest(req) => self.handle_request_vote(req),
            Message::RequestVoteResponse(resp) => self.handle_request_vote_response(resp),
            Message::AppendEntriesRequest(req) => self.handle_append_entries(req),
            Message::AppendEntriesResponse(resp) => self.handle_append_entries_response(resp),
        }
    }

    /// Decode a json message from a transport and apply it.
    pub fn receive_json(&mut self, raw: &str) -> Result<()> {
        let message = Message::from_json(raw)?;
        self.receive(message);
        Ok(())
    }

    // -- timers --

    fn tick_election(&mut self) {
        self.state.election_elapsed += 1;
        if self.state.election_elapsed >= self.state.randomized_election_timeout {
            self.state.election_elapsed = 0;
            tracing::debug!(
                node_id = self.config.id,
                term = self.state.current_term,
                "election timeout elapsed"
            );
            self.start_campaign();
        }
    }

    fn tick_heartbeat(&mut self) {
        self.state.heartbeat_elapsed += 1;
        if self.state.heartbeat_elapsed >= self.state.heartbeat_timeout {
            self.state.heartbeat_elapsed = 0;
            for peer in self.config.peers.clone() {
                self.send_append_entries(peer);
            }
        }
    }

    // -- elections --

    fn start_campaign(&mut self) {
        self.become_candidate();

        let last_log_index = log::last_index(&self.state.log);
        let last_log_term = log::last_term(&self.state.log);
        for peer in self.config.peers.clone() {
            self.send(RequestVoteRequest {
                from: self.config.id,
                to: peer,
                term: self.state.current_term,
                last_log_index,
                last_log_term,
            });
        }

        // a single-node cluster elects itself
        if self.has_vote_quorum() {
            self.become_leader();
        }
    }

    fn handle_request_vote(&mut self, req: RequestVoteRequest) {
        if req.term > self.state.current_term {
            self.become_follower(req.term, None);
        }

        let granted = req.term == self.state.current_term
            && self.state.voted_for.map_or(true, |v| v == req.from)
            && log::is_up_to_date(&self.state.log, req.last_log_index, req.last_log_term);

        if granted {
            self.state.election_elapsed = 0;
            self.state.voted_for = Some(req.from);
        }

        tracing::debug!(
            node_id = self.config.id,
            candidate = req.from,
            term = self.state.current_term,
            granted,
            "RequestVote decided"
        );

        self.send(RequestVoteResponse {
            from: self.config.id,
            to: req.from,
            term: self.state.current_term,
            vote_granted: granted,
        });
    }

    fn handle_request_vote_response(&mut self, resp: RequestVoteResponse) {
        if resp.term > self.state.current_term {
            self.become_follower(resp.term, None);
            return;
        }

        if self.state.role != Role::Candidate || resp.term != self.state.current_term {
            return;
        }

        match self.state.vote_granted.get_mut(&resp.from) {
            Some(slot) => *slot = resp.vote_granted,
            None => {
                tracing::warn!(node_id = self.config.id, from = resp.from, "vote from unknown peer");
                return;
            }
        }

        if resp.vote_granted && self.has_vote_quorum() {
            self.become_leader();
        }
    }

    /// majority of the cluster, counting this node
    fn quorum_size(&self) -> usize {
        self.config.cluster_size() / 2 + 1
    }

    fn has_vote_quorum(&self) -> bool {
        let granted = self.state.vote_granted.values().filter(|&&g| g).count();
        granted + 1 >= self.quorum_size()
    }

    // -- replication --

    fn send_append_entries(&mut self, to: NodeId) {
        let next = self.state.next_index.get(&to).copied().unwrap_or(1);
        let prev_log_index = next.saturating_sub(1);
        let last = min(
            prev_log_index + self.config.batch_size() as Index,
            log::last_index(&self.state.log),
        );

        self.send(AppendEntriesRequest {
            from: self.config.id,
            to,
            term: self.state.current_term,
            leader_id: self.config.id,
            prev_log_index,
            prev_log_term: log::term_at(&self.state.log, prev_log_index),
            entries: log::slice(&self.state.log, prev_log_index, last),
            leader_commit: self.state.commit_index,
        });
    }

    fn handle_append_entries(&mut self, req: AppendEntriesRequest) {
        let mut success = false;
        let mut match_index = 0;

        // only one leader per term, so an equal term is also authoritative
        if req.term >= self.state.current_term {
            self.become_follower(req.term, Some(req.from));

            if log::matches(&self.state.log, req.prev_log_index, req.prev_log_term) {
                success = true;
                match_index = req.prev_log_index + req.entries.len() as Index;

                if let Some((index, discarded)) =
                    log::merge(&mut self.state.log, req.prev_log_index, req.entries)
                {
                    tracing::warn!(
                        node_id = self.config.id,
                        index,
                        existing_term = discarded,
                        leader = req.from,
                        "found conflict, truncating log"
                    );
                }

                if req.leader_commit > self.state.commit_index {
                    self.commit_to(min(req.leader_commit, match_index));
                }
            }
        }

        self.send(AppendEntriesResponse {
            from: self.config.id,
            to: req.from,
            term: self.state.current_term,
            success,
            match_index,
        });
    }

    fn handle_append_entries_response(&mut self, resp: AppendEntriesResponse) {
        if resp.term > self.state.current_term {
            self.become_follower(resp.term, None);
            return;
        }

        if self.state.role != Role::Leader || resp.term != self.state.current_term {
            return;
        }

        let last_index = log::last_index(&self.state.log);
        let (Some(matched), Some(next)) = (
            self.state.match_index.get_mut(&resp.from),
            self.state.next_index.get_mut(&resp.from),
        ) else {
            tracing::warn!(node_id = self.config.id, from = resp.from, "ack from unknown peer");
            return;
        };

        if resp.success {
            *matched = min(max(*matched, resp.match_index), last_index);
            *next = *matched + 1;
            self.advance_commit_index();
        } else {
            // linear back-off, retried on the next heartbeat
            *next = max(1, next.saturating_sub(1));
        }
    }

    /// Commit the highest index a majority holds, if it is from this term.
    fn advance_commit_index(&mut self) {
        let mut indexes: Vec<Index> = self.state.match_index.values().copied().collect();
        indexes.push(log::last_index(&self.state.log));
        indexes.sort_unstable();

        // at least quorum_size values are >= this one
        let candidate = indexes[indexes.len() - self.quorum_size()];

        if self.state.role == Role::Leader
            && candidate > self.state.commit_index
            && log::term_at(&self.state.log, candidate) == self.state.current_term
        {
            self.commit_to(candidate);
        }
    }

    /// Emit every entry in `(commit_index, index]` and move the commit index.
    fn commit_to(&mut self, index: Index) {
        let from = self.state.commit_index;
        if index <= from {
            return;
        }

        for entry in log::slice(&self.state.log, from, index) {
            self.events.committed(&entry);
        }
        self.state.commit_index = index;

        tracing::debug!(
            node_id = self.config.id,
            commit_index = index,
            role = %self.state.role,
            "advanced commit index"
        );
    }

    fn send(&mut self, message: impl Into<Message>) {
        let message = message.into();
        self.events.message_sent(&message);
        self.state.outgoing_messages.push(message);
    }

    // -- role transitions --

    fn reset(&mut self, term: Term) {
        if term != self.state.current_term {
            self.state.current_term = term;
            self.state.voted_for = None;
        }
        self.state.leader_id = None;
        self.state.election_elapsed = 0;
        self.state.heartbeat_elapsed = 0;
        self.reset_randomized_election_timeout();
    }

    fn reset_randomized_election_timeout(&mut self) {
        let base = self.state.election_timeout;
        self.state.randomized_election_timeout = self.rng.gen_range(base..2 * base);
    }

    fn become_follower(&mut self, term: Term, leader_id: Option<NodeId>) {
        let was = (self.state.role, self.state.current_term);

        self.reset(term);
        self.state.role = Role::Follower;
        self.state.leader_id = leader_id;
        // leader-only progress, the log may be truncated from here on
        for index in self.state.match_index.values_mut() {
            *index = 0;
        }
        self.timer = Timer::Election;

        if was != (Role::Follower, term) {
            tracing::info!(
                node_id = self.config.id,
                term,
                leader = ?leader_id,
                "became follower"
            );
        }
        self.emit_role_changed();
    }

    fn become_candidate(&mut self) {
        debug_assert_ne!(self.state.role, Role::Leader);

        self.reset(self.state.current_term + 1);
        self.state.role = Role::Candidate;
        self.state.voted_for = Some(self.config.id);
        for granted in self.state.vote_granted.values_mut() {
            *granted = false;
        }
        self.timer = Timer::Election;

        tracing::info!(
            node_id = self.config.id,
            term = self.state.current_term,
            "became candidate"
        );
        self.emit_role_changed();
    }

    fn become_leader(&mut self) {
        self.reset(self.state.current_term);
        self.state.role = Role::Leader;
        self.state.leader_id = Some(self.config.id);

        let next = log::last_index(&self.state.log) + 1;
        for index in self.state.next_index.values_mut() {
            *index = next;
        }
        for index in self.state.match_index.values_mut() {
            *index = 0;
        }
        self.timer = Timer::Heartbeat;

        tracing::info!(
            node_id = self.config.id,
            term = self.state.current_term,
            "became leader"
        );
        self.emit_role_changed();
    }

    fn emit_role_changed(&mut self) {
        if self.events.wants_role_changes() {
            let snapshot = self.get_state();
            self.events.role_changed(&snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: NodeId, peers: &[NodeId]) -> RaftNode {
        let config = Config::new(id, peers.iter().copied());
        RaftNode::with_rng(config, StdRng::seed_from_u64(7)).unwrap()
    }

    #[test]
    fn new_node_starts_as_follower() {
        let node = node(1, &[2, 3]);
        assert_eq!(node.role(), Role::Follower);
        assert_eq!(node.current_term(), 1);
        assert_eq!(node.state.voted_for, None);
        assert_eq!(node.timer, Timer::Election);
    }

    #[test]
    fn role_defaults_to_follower() {
        assert_eq!(Role::default(), Role::Follower);
        assert_eq!(Role::default().to_string(), "follower");
    }

    #[test]
    fn construction_rejects_self_in_peers() {
        let err = RaftNode::new(Config::new(1, [1, 2])).unwrap_err();
        assert!(matches!(err, RaftError::Config(_)));
    }

    #[test]
    fn quorum_size_by_cluster_size() {
        assert_eq!(node(1, &[]).quorum_size(), 1);
        assert_eq!(node(1, &[2]).quorum_size(), 2);
        assert_eq!(node(1, &[2, 3]).quorum_size(), 2);
        assert_eq!(node(1, &[2, 3, 4]).quorum_size(), 3);
        assert_eq!(node(1, &[2, 3, 4, 5]).quorum_size(), 3);
    }

    #[test]
    fn leader_installs_heartbeat_timer() {
        let mut node = node(1, &[2, 3]);
        node.campaign().unwrap();
        node.receive(
            RequestVoteResponse {
                from: 2,
                to: 1,
                term: 2,
                vote_granted: true,
            }
            .into(),
        );
        assert_eq!(node.role(), Role::Leader);
        assert_eq!(node.timer, Timer::Heartbeat);
    }

    #[test]
    fn randomized_timeout_stays_in_range() {
        let mut node = node(1, &[2, 3]);
        for _ in 0..200 {
            node.reset_randomized_election_timeout();
            let t = node.state.randomized_election_timeout;
            assert!((10..=19).contains(&t), "timeout {} out of range", t);
        }
    }

    #[test]
    fn largest_election_tick_does_not_overflow() {
        let config = Config::new(1, [2]).with_election_tick(Config::MAX_ELECTION_TICK);
        let node = RaftNode::with_rng(config, StdRng::seed_from_u64(3)).unwrap();
        assert!(node.state.randomized_election_timeout >= Config::MAX_ELECTION_TICK);

        let config = Config::new(1, [2]).with_election_tick(Config::MAX_ELECTION_TICK + 1);
        let err = RaftNode::with_rng(config, StdRng::seed_from_u64(3)).unwrap_err();
        assert!(matches!(
            err,
            RaftError::Config(crate::ConfigError::ElectionTickTooLarge { .. })
        ));
    }

    #[test]
    fn election_timeout_of_one_tick_is_fixed() {
        let config = Config::new(1, [2]).with_election_tick(1);
        let node = RaftNode::with_rng(config, StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(node.state.randomized_election_timeout, 1);
    }
}
