use super::types::{LogIndex, NodeId, Term};
use std::collections::{HashMap, HashSet};

/// The roles a peer moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Freshly created; waiting for the membership list
    Initialising,
    /// Receives entries from the leader, votes when asked
    Follower,
    /// Requesting votes for leadership
    Candidate,
    /// Replicates the log and drives commits
    Leader,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Initialising => write!(f, "Initialising"),
            NodeState::Follower => write!(f, "Follower"),
            NodeState::Candidate => write!(f, "Candidate"),
            NodeState::Leader => write!(f, "Leader"),
        }
    }
}

/// Complete per-peer consensus state
#[derive(Debug, Clone)]
pub struct RaftState {
    // Persistent state
    /// Latest term this peer has seen; never decreases
    pub current_term: Term,
    /// Candidate granted our vote in the current term, if any
    pub voted_for: Option<NodeId>,

    // Volatile state
    /// Highest log index known committed
    pub commit_index: LogIndex,
    /// Highest log index handed to the state machine
    pub last_applied: LogIndex,
    /// Current role
    pub state: NodeState,
    /// Last known leader, if any
    pub current_leader: Option<NodeId>,
    /// This peer's id
    pub node_id: NodeId,
    /// Full cluster membership including self; fixed at Init
    pub nodes: Vec<NodeId>,

    // Leader bookkeeping, reinitialized on election
    /// Next log index to send to each peer
    pub next_index: HashMap<NodeId, LogIndex>,
    /// Highest log index known replicated on each peer
    pub match_index: HashMap<NodeId, LogIndex>,

    // Candidate bookkeeping
    /// Peers that granted us their vote in the current term
    pub votes_received: HashSet<NodeId>,
}

impl RaftState {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            current_term: 0,
            voted_for: None,
            commit_index: 0,
            last_applied: 0,
            state: NodeState::Initialising,
            current_leader: None,
            node_id,
            nodes: Vec::new(),
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            votes_received: HashSet::new(),
        }
    }

    /// Peers other than self
    pub fn peers(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter().filter(move |n| **n != self.node_id)
    }

    pub fn become_follower(&mut self, term: Term, leader: Option<NodeId>) {
        tracing::info!(
            "Node {} transitioning to Follower (term: {})",
            self.node_id,
            term
        );
        self.state = NodeState::Follower;
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
        }
        self.current_leader = leader;
        self.votes_received.clear();
    }

    pub fn become_candidate(&mut self) {
        self.current_term += 1;
        self.state = NodeState::Candidate;
        self.voted_for = Some(self.node_id.clone());
        self.current_leader = None;
        self.votes_received.clear();
        self.votes_received.insert(self.node_id.clone());

        tracing::info!(
            "Node {} transitioning to Candidate (term: {})",
            self.node_id,
            self.current_term
        );
    }

    pub fn become_leader(&mut self, last_log_index: LogIndex) {
        tracing::info!(
            "Node {} transitioning to Leader (term: {})",
            self.node_id,
            self.current_term
        );

        self.state = NodeState::Leader;
        self.current_leader = Some(self.node_id.clone());

        self.next_index.clear();
        self.match_index.clear();
        let peers: Vec<NodeId> = self.peers().cloned().collect();
        for peer_id in peers {
            self.next_index.insert(peer_id.clone(), last_log_index + 1);
            self.match_index.insert(peer_id, 0);
        }

        self.votes_received.clear();
    }

    pub fn add_vote(&mut self, from: NodeId) {
        self.votes_received.insert(from);
    }

    /// Majority of the fixed membership, counting self
    pub fn majority(&self) -> usize {
        self.nodes.len() / 2 + 1
    }

    pub fn has_majority(&self) -> bool {
        self.votes_received.len() >= self.majority()
    }

    pub fn is_leader(&self) -> bool {
        self.state == NodeState::Leader
    }

    pub fn is_candidate(&self) -> bool {
        self.state == NodeState::Candidate
    }

    pub fn is_follower(&self) -> bool {
        self.state == NodeState::Follower
    }
}
