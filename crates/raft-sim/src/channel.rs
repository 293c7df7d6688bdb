//! # channel
//!
//! why: model a one-way network link with a fixed delivery latency
//! relations: owned by simulator.rs, one per ordered pair of nodes
//! what: InFlight message wrapper, MessageChannel queue with an on/off switch

use raft_core::{Message, NodeId};
use serde::Serialize;

/// A message travelling on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InFlight {
    pub id: u64,
    /// latency the message was sent with
    pub ticks: u64,
    /// ticks until delivery
    pub ticks_left: u64,
    pub message: Message,
}

/// Directed link `from -> to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageChannel {
    pub from: NodeId,
    pub to: NodeId,
    /// inactive links lose everything put on them
    pub active: bool,
    pub messages: Vec<InFlight>,
}

impl MessageChannel {
    pub fn new(from: NodeId, to: NodeId) -> Self {
        Self {
            from,
            to,
            active: true,
            messages: Vec::new(),
        }
    }

    pub fn key(from: NodeId, to: NodeId) -> String {
        format!("{}-{}", from, to)
    }

    /// Queue a message. Returns false if the link is down and it was dropped.
    pub fn push(&mut self, id: u64, ticks: u64, message: Message) -> bool {
        if !self.active {
            return false;
        }
        self.messages.push(InFlight {
            id,
            ticks,
            ticks_left: ticks,
            message,
        });
        true
    }

    /// Cutting a link also loses what is already on the wire.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
        if !active {
            self.messages.clear();
        }
    }

    /// Move every message one tick closer and hand back the arrivals, in
    /// send order.
    pub fn advance(&mut self) -> Vec<Message> {
        let mut arrived = Vec::new();
        self.messages.retain_mut(|m| {
            m.ticks_left = m.ticks_left.saturating_sub(1);
            if m.ticks_left == 0 {
                arrived.push(m.message.clone());
                false
            } else {
                true
            }
        });
        arrived
    }
}
