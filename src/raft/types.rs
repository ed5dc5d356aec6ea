use serde::{Deserialize, Serialize};

/// Type alias for term numbers
pub type Term = u64;

/// Type alias for log indices (1-based; 0 is the empty-log sentinel)
pub type LogIndex = u64;

/// Node identifier, also usable as a message destination
pub type NodeId = String;

/// Back-reference to the client that proposed an entry, so the leader can
/// reply once the entry commits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientRef {
    /// Who to send the commit reply to
    pub origin: NodeId,
    /// Request id chosen by the client
    pub cid: u64,
}

/// A single entry in the replicated log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    /// The term when this entry was proposed
    pub term: Term,
    /// The index of this entry in the log
    pub index: LogIndex,
    /// The command payload handed to the state machine on apply
    pub command: Vec<u8>,
    /// Set on the leader that accepted the proposal; followers carry it
    /// through replication but never act on it.
    pub client: Option<ClientRef>,
}

impl LogEntry {
    pub fn new(term: Term, index: LogIndex, command: Vec<u8>) -> Self {
        Self {
            term,
            index,
            command,
            client: None,
        }
    }

    pub fn with_client(term: Term, index: LogIndex, command: Vec<u8>, client: ClientRef) -> Self {
        Self {
            term,
            index,
            command,
            client: Some(client),
        }
    }
}
