use serde::{Deserialize, Serialize};

use super::types::{LogEntry, LogIndex, NodeId, Term};

/// RequestVote - invoked by candidates to gather votes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    /// Candidate's term
    pub term: Term,
    /// Candidate requesting the vote
    pub candidate_id: NodeId,
    /// Index of candidate's last log entry
    pub last_log_index: LogIndex,
    /// Term of candidate's last log entry
    pub last_log_term: Term,
}

/// AppendEntries - invoked by the leader to replicate entries; an empty or
/// tail-only `entries` payload doubles as the heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendRequest {
    /// Leader's term
    pub term: Term,
    /// So followers can forward clients
    pub leader_id: NodeId,
    /// Index of the log entry immediately preceding the new ones
    pub prev_log_index: LogIndex,
    /// Term of the entry at prev_log_index
    pub prev_log_term: Term,
    /// Entries to store (empty for a pure heartbeat)
    pub entries: Vec<LogEntry>,
    /// Leader's commit index
    pub leader_commit: LogIndex,
}

/// Everything one peer can send another. Timer firings stay inside the actor
/// and never appear here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PeerMessage {
    /// Fixes cluster membership; sent once by the bootstrap constructor
    Init { nodes: Vec<NodeId> },
    RequestVote(VoteRequest),
    GrantVote { term: Term },
    DenyVote { term: Term },
    AppendEntries(AppendRequest),
    /// Follower accepted; `index` is its log's last index after the append
    AppendSuccess { term: Term, index: LogIndex },
    AppendFailure { term: Term },
    /// A client proposal; forwarded verbatim by non-leaders
    ClientRequest { cid: u64, command: Vec<u8> },
    /// State machine output for a committed proposal, sent by the leader
    ClientResponse { cid: u64, result: Vec<u8> },
}

impl PeerMessage {
    /// Term carried by the message, if the protocol attaches one. Used for
    /// the universal higher-term preemption check.
    pub fn term(&self) -> Option<Term> {
        match self {
            PeerMessage::RequestVote(req) => Some(req.term),
            PeerMessage::GrantVote { term } => Some(*term),
            PeerMessage::DenyVote { term } => Some(*term),
            PeerMessage::AppendEntries(req) => Some(req.term),
            PeerMessage::AppendSuccess { term, .. } => Some(*term),
            PeerMessage::AppendFailure { term } => Some(*term),
            PeerMessage::Init { .. }
            | PeerMessage::ClientRequest { .. }
            | PeerMessage::ClientResponse { .. } => None,
        }
    }

    /// Short tag for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::Init { .. } => "Init",
            PeerMessage::RequestVote(_) => "RequestVote",
            PeerMessage::GrantVote { .. } => "GrantVote",
            PeerMessage::DenyVote { .. } => "DenyVote",
            PeerMessage::AppendEntries(_) => "AppendEntries",
            PeerMessage::AppendSuccess { .. } => "AppendSuccess",
            PeerMessage::AppendFailure { .. } => "AppendFailure",
            PeerMessage::ClientRequest { .. } => "ClientRequest",
            PeerMessage::ClientResponse { .. } => "ClientResponse",
        }
    }
}
