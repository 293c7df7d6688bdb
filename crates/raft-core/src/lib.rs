//! # raft-core
//!
//! why: implement the core raft consensus algorithm in pure, portable rust
//! relations: driven by raft-sim (or any transport) through tick/receive and the event streams
//! what: node state machine, election logic, log management, message types, notifications

pub mod config;
pub mod error;
pub mod events;
pub mod log;
pub mod message;
pub mod node;

/// A node id. Unique within a cluster, fixed at construction.
pub type NodeId = u64;

/// A leader term number. Increases monotonically.
pub type Term = u64;

/// A 1-based log position; 0 means "before the first entry".
pub type Index = u64;

pub use config::{Config, ConfigError};
pub use error::{RaftError, Result};
pub use events::Observables;
pub use log::LogEntry;
pub use message::{
    AppendEntriesRequest, AppendEntriesResponse, Message, RequestVoteRequest, RequestVoteResponse,
};
pub use node::{NodeState, ProposeResponse, RaftNode, Role};
