//! # error
//!
//! why: give callers typed failures for the few things that are real errors in a raft node
//! relations: returned by node.rs (campaign, receive_json, construction) and message.rs (decoding)
//! what: RaftError enum, crate Result alias

use thiserror::Error;

use crate::config::ConfigError;
use crate::node::Role;

#[derive(Error, Debug)]
pub enum RaftError {
    /// The `type` tag of an inbound message is none of the four known kinds.
    #[error("received unexpected message type {0:?}")]
    UnrecognizedMessageType(String),

    #[error("malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    /// A transition that raft forbids, e.g. a leader campaigning again.
    #[error("invalid transition [{from} -> {to}]")]
    InvalidRoleTransition { from: Role, to: Role },

    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, RaftError>;
