use raft_core::{NodeId, RaftError};

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("a cluster needs at least one node")]
    NoNodes,

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("no channel {from} -> {to}")]
    UnknownChannel { from: NodeId, to: NodeId },

    #[error("no leader to accept the proposal")]
    NoLeader,

    #[error("simulator is stopped")]
    Stopped,

    #[error(transparent)]
    Raft(#[from] RaftError),
}

pub type Result<T> = std::result::Result<T, SimError>;
