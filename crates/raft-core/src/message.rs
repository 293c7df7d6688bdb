//! # message
//!
//! why: define all raft rpc message types for node communication
//! relations: produced and consumed by node.rs, serialized by whatever transport carries them
//! what: the four request/response payloads, the Message sum type, the json boundary

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RaftError, Result};
use crate::log::LogEntry;
use crate::{Index, NodeId, Term};

/// Sent by candidates to gather votes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestVoteRequest {
    pub from: NodeId,
    pub to: NodeId,
    pub term: Term,
    pub last_log_index: Index,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestVoteResponse {
    pub from: NodeId,
    pub to: NodeId,
    /// responder's current term, for the candidate to update itself
    pub term: Term,
    pub vote_granted: bool,
}

/// Sent by the leader to replicate entries; doubles as the heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendEntriesRequest {
    pub from: NodeId,
    pub to: NodeId,
    pub term: Term,
    pub leader_id: NodeId,
    pub prev_log_index: Index,
    pub prev_log_term: Term,
    /// entries to store, empty for a pure heartbeat
    pub entries: Vec<LogEntry>,
    pub leader_commit: Index,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendEntriesResponse {
    pub from: NodeId,
    pub to: NodeId,
    /// responder's current term, for the leader to update itself
    pub term: Term,
    /// true if the follower held an entry matching prevLogIndex and prevLogTerm
    pub success: bool,
    /// index of the last entry the follower is known to share with the leader
    pub match_index: Index,
}

/// All possible Raft messages between nodes
///
/// On the wire a message is a flat json object whose `type` field names the
/// variant, e.g. `{"type":"RequestVoteResponse","from":2,"to":1,...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    RequestVoteRequest(RequestVoteRequest),
    RequestVoteResponse(RequestVoteResponse),
    AppendEntriesRequest(AppendEntriesRequest),
    AppendEntriesResponse(AppendEntriesResponse),
}

impl Message {
    /// Every `type` tag a peer may legitimately send.
    pub const KINDS: [&'static str; 4] = [
        "RequestVoteRequest",
        "RequestVoteResponse",
        "AppendEntriesRequest",
        "AppendEntriesResponse",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            Message::RequestVoteRequest(_) => Self::KINDS[0],
            Message::RequestVoteResponse(_) => Self::KINDS[1],
            Message::AppendEntriesRequest(_) => Self::KINDS[2],
            Message::AppendEntriesResponse(_) => Self::KINDS[3],
        }
    }

    pub fn sender(&self) -> NodeId {
        match self {
            Message::RequestVoteRequest(m) => m.from,
            Message::RequestVoteResponse(m) => m.from,
            Message::AppendEntriesRequest(m) => m.from,
            Message::AppendEntriesResponse(m) => m.from,
        }
    }

    pub fn recipient(&self) -> NodeId {
        match self {
            Message::RequestVoteRequest(m) => m.to,
            Message::RequestVoteResponse(m) => m.to,
            Message::AppendEntriesRequest(m) => m.to,
            Message::AppendEntriesResponse(m) => m.to,
        }
    }

    pub fn term(&self) -> Term {
        match self {
            Message::RequestVoteRequest(m) => m.term,
            Message::RequestVoteResponse(m) => m.term,
            Message::AppendEntriesRequest(m) => m.term,
            Message::AppendEntriesResponse(m) => m.term,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a message received from a transport.
    ///
    /// A `type` tag outside [`Message::KINDS`] is a protocol error upstream
    /// and is reported as [`RaftError::UnrecognizedMessageType`]; a known tag
    /// with a bad payload is [`RaftError::MalformedMessage`].
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;

        let tag = match value.get("type") {
            Some(Value::String(tag)) => tag.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        if !Self::KINDS.contains(&tag.as_str()) {
            return Err(RaftError::UnrecognizedMessageType(tag));
        }

        Ok(serde_json::from_value(value)?)
    }
}

impl From<RequestVoteRequest> for Message {
    fn from(m: RequestVoteRequest) -> Self {
        Message::RequestVoteRequest(m)
    }
}

impl From<RequestVoteResponse> for Message {
    fn from(m: RequestVoteResponse) -> Self {
        Message::RequestVoteResponse(m)
    }
}

impl From<AppendEntriesRequest> for Message {
    fn from(m: AppendEntriesRequest) -> Self {
        Message::AppendEntriesRequest(m)
    }
}

impl From<AppendEntriesResponse> for Message {
    fn from(m: AppendEntriesResponse) -> Self {
        Message::AppendEntriesResponse(m)
    }
}
