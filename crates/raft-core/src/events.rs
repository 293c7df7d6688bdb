//! # events
//!
//! why: let transports and uis watch a node without holding a reference into it
//! relations: fed by node.rs, drained by drivers such as raft-sim
//! what: Observables subscription handle, EventBus broadcaster over crossbeam channels

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::log::LogEntry;
use crate::message::Message;
use crate::node::NodeState;

/// The three read-only event streams of one node.
///
/// Each stream delivers every event emitted after the subscription was taken,
/// exactly once and in emission order. Once the node is stopped the senders
/// are dropped: receivers drain what is buffered and then report
/// disconnection.
#[derive(Debug, Clone)]
pub struct Observables {
    /// one event per newly committed entry, in index order
    pub committed: Receiver<LogEntry>,
    /// the full post-transition state after every role transition
    pub role_changed: Receiver<NodeState>,
    /// every message the node decided to send, in send order
    pub message_sent: Receiver<Message>,
}

#[derive(Debug, Default)]
pub(crate) struct EventBus {
    committed: Vec<Sender<LogEntry>>,
    role_changed: Vec<Sender<NodeState>>,
    message_sent: Vec<Sender<Message>>,
    stopped: bool,
}

impl EventBus {
    pub(crate) fn subscribe(&mut self) -> Observables {
        let (committed_tx, committed) = unbounded();
        let (role_tx, role_changed) = unbounded();
        let (message_tx, message_sent) = unbounded();

        // after stop() the senders are dropped right here
        if !self.stopped {
            self.committed.push(committed_tx);
            self.role_changed.push(role_tx);
            self.message_sent.push(message_tx);
        }

        Observables {
            committed,
            role_changed,
            message_sent,
        }
    }

    /// Snapshots are expensive, callers check this before building one.
    pub(crate) fn wants_role_changes(&self) -> bool {
        !self.role_changed.is_empty()
    }

    pub(crate) fn committed(&mut self, entry: &LogEntry) {
        broadcast(&mut self.committed, entry);
    }

    pub(crate) fn role_changed(&mut self, state: &NodeState) {
        broadcast(&mut self.role_changed, state);
    }

    pub(crate) fn message_sent(&mut self, message: &Message) {
        broadcast(&mut self.message_sent, message);
    }

    pub(crate) fn stop(&mut self) {
        self.stopped = true;
        self.committed.clear();
        self.role_changed.clear();
        self.message_sent.clear();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped
    }
}

/// Send to every subscriber, forgetting the ones whose receiver is gone.
fn broadcast<T: Clone>(senders: &mut Vec<Sender<T>>, event: &T) {
    senders.retain(|tx| tx.send(event.clone()).is_ok());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_sees_every_event_in_order() {
        let mut bus = EventBus::default();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.committed(&LogEntry::new("x", 1));
        bus.committed(&LogEntry::new("y", 1));

        for obs in [&a, &b] {
            let got: Vec<_> = obs.committed.try_iter().map(|e| e.data).collect();
            assert_eq!(got, vec!["x", "y"]);
        }
    }

    #[test]
    fn late_subscriber_misses_earlier_events() {
        let mut bus = EventBus::default();
        bus.committed(&LogEntry::new("x", 1));

        let obs = bus.subscribe();
        assert!(obs.committed.try_recv().is_err());
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let mut bus = EventBus::default();
        let obs = bus.subscribe();
        assert!(bus.wants_role_changes());

        drop(obs);
        bus.committed(&LogEntry::new("x", 1));
        assert!(bus.committed.is_empty());
        // untouched streams keep their dead sender until they emit
        assert!(bus.wants_role_changes());
    }

    #[test]
    fn stop_disconnects_and_is_idempotent() {
        let mut bus = EventBus::default();
        let obs = bus.subscribe();
        bus.committed(&LogEntry::new("x", 1));

        bus.stop();
        bus.stop();
        assert!(bus.is_stopped());
        assert!(!bus.wants_role_changes());

        // buffered events survive, then the stream ends
        assert_eq!(obs.committed.recv().unwrap().data, "x");
        assert!(obs.committed.recv().is_err());
        assert!(obs.message_sent.recv().is_err());

        let late = bus.subscribe();
        assert!(late.role_changed.recv().is_err());
    }
}
