use super::rpc::{PeerMessage, VoteRequest};
use super::state::RaftState;
use super::types::{NodeId, Term};
use crate::storage::{LogStorage, StateStorage};
use crate::util::errors::Result;

/// Build the RequestVote this candidate sends to every peer
pub fn create_vote_request<L: LogStorage + ?Sized>(
    state: &RaftState,
    log_storage: &L,
) -> VoteRequest {
    VoteRequest {
        term: state.current_term,
        candidate_id: state.node_id.clone(),
        last_log_index: log_storage.last_index(),
        last_log_term: log_storage.last_term(),
    }
}

/// Decide an incoming RequestVote and produce the reply.
///
/// Grants iff the candidate's term is current, no conflicting vote was cast
/// this term, and the candidate's log is at least as up-to-date as ours.
/// The reply always carries our (possibly just raised) current term.
pub fn handle_vote_request<L: LogStorage + ?Sized, S: StateStorage + ?Sized>(
    state: &mut RaftState,
    state_storage: &mut S,
    log_storage: &L,
    request: VoteRequest,
) -> Result<PeerMessage> {
    tracing::debug!(
        "Node {} received RequestVote from {} (term: {})",
        state.node_id,
        request.candidate_id,
        request.term
    );

    if request.term > state.current_term {
        state.become_follower(request.term, None);
        state_storage.save_term(state.current_term)?;
        state_storage.save_voted_for(None)?;
    }

    let mut vote_granted = false;

    if request.term >= state.current_term {
        let can_vote = state.voted_for.is_none()
            || state.voted_for.as_ref() == Some(&request.candidate_id);

        if can_vote {
            let last_log_term = log_storage.last_term();
            let last_log_index = log_storage.last_index();

            let log_is_up_to_date = request.last_log_term > last_log_term
                || (request.last_log_term == last_log_term
                    && request.last_log_index >= last_log_index);

            if log_is_up_to_date {
                vote_granted = true;
                state.voted_for = Some(request.candidate_id.clone());
                state_storage.save_voted_for(state.voted_for.clone())?;

                tracing::info!(
                    "Node {} granted vote to {} in term {}",
                    state.node_id,
                    request.candidate_id,
                    request.term
                );
            } else {
                tracing::debug!(
                    "Node {} denied vote to {} - log not up-to-date",
                    state.node_id,
                    request.candidate_id
                );
            }
        } else {
            tracing::debug!(
                "Node {} denied vote to {} - already voted for {:?}",
                state.node_id,
                request.candidate_id,
                state.voted_for
            );
        }
    } else {
        tracing::debug!(
            "Node {} denied vote to {} - request term {} < current term {}",
            state.node_id,
            request.candidate_id,
            request.term,
            state.current_term
        );
    }

    let term = state.current_term;
    Ok(if vote_granted {
        PeerMessage::GrantVote { term }
    } else {
        PeerMessage::DenyVote { term }
    })
}

/// Record a granted vote at a candidate. Returns true when the vote closes a
/// majority and we should take leadership.
pub fn handle_vote_granted(state: &mut RaftState, from: NodeId, term: Term) -> bool {
    if !state.is_candidate() {
        return false;
    }

    // Grants from earlier campaigns are void
    if term != state.current_term {
        return false;
    }

    state.add_vote(from.clone());

    tracing::debug!(
        "Node {} received vote from {} ({}/{} votes)",
        state.node_id,
        from,
        state.votes_received.len(),
        state.nodes.len()
    );

    if state.has_majority() {
        tracing::info!(
            "Node {} won election in term {} with {} votes",
            state.node_id,
            state.current_term,
            state.votes_received.len()
        );
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raft::types::LogEntry;
    use crate::storage::{MemoryLogStorage, MemoryStateStorage};

    fn follower(id: &str) -> RaftState {
        let mut state = RaftState::new(id.to_string());
        state.nodes = vec![
            "node-0".to_string(),
            "node-1".to_string(),
            "node-2".to_string(),
        ];
        state.become_follower(0, None);
        state
    }

    fn vote_request(term: Term, candidate: &str) -> VoteRequest {
        VoteRequest {
            term,
            candidate_id: candidate.to_string(),
            last_log_index: 0,
            last_log_term: 0,
        }
    }

    #[test]
    fn grants_vote_to_current_candidate_with_empty_logs() {
        let mut state = follower("node-0");
        let mut state_storage = MemoryStateStorage::new();
        let log_storage = MemoryLogStorage::new();

        let reply = handle_vote_request(
            &mut state,
            &mut state_storage,
            &log_storage,
            vote_request(1, "node-1"),
        )
        .unwrap();

        assert!(matches!(reply, PeerMessage::GrantVote { term: 1 }));
        assert_eq!(state.voted_for, Some("node-1".to_string()));
        assert_eq!(state.current_term, 1);
    }

    #[test]
    fn denies_stale_term_and_keeps_state_unchanged() {
        let mut state = follower("node-0");
        state.current_term = 5;
        let mut state_storage = MemoryStateStorage::new();
        let log_storage = MemoryLogStorage::new();

        let reply = handle_vote_request(
            &mut state,
            &mut state_storage,
            &log_storage,
            vote_request(3, "node-1"),
        )
        .unwrap();

        assert!(matches!(reply, PeerMessage::DenyVote { term: 5 }));
        assert_eq!(state.current_term, 5);
        assert_eq!(state.voted_for, None);
    }

    #[test]
    fn denies_second_candidate_in_same_term() {
        let mut state = follower("node-0");
        state.current_term = 1;
        state.voted_for = Some("node-1".to_string());
        let mut state_storage = MemoryStateStorage::new();
        let log_storage = MemoryLogStorage::new();

        let reply = handle_vote_request(
            &mut state,
            &mut state_storage,
            &log_storage,
            vote_request(1, "node-2"),
        )
        .unwrap();

        assert!(matches!(reply, PeerMessage::DenyVote { term: 1 }));
        assert_eq!(state.voted_for, Some("node-1".to_string()));
    }

    #[test]
    fn regrant_to_same_candidate_is_idempotent() {
        let mut state = follower("node-0");
        let mut state_storage = MemoryStateStorage::new();
        let log_storage = MemoryLogStorage::new();

        let first = handle_vote_request(
            &mut state,
            &mut state_storage,
            &log_storage,
            vote_request(1, "node-1"),
        )
        .unwrap();
        let second = handle_vote_request(
            &mut state,
            &mut state_storage,
            &log_storage,
            vote_request(1, "node-1"),
        )
        .unwrap();

        assert!(matches!(first, PeerMessage::GrantVote { term: 1 }));
        assert!(matches!(second, PeerMessage::GrantVote { term: 1 }));
    }

    #[test]
    fn denies_candidate_with_shorter_log() {
        let mut state = follower("node-0");
        let mut state_storage = MemoryStateStorage::new();
        let mut log_storage = MemoryLogStorage::new();
        log_storage
            .append(vec![
                LogEntry::new(1, 1, b"a".to_vec()),
                LogEntry::new(1, 2, b"b".to_vec()),
            ])
            .unwrap();

        let mut request = vote_request(2, "node-1");
        request.last_log_index = 1;
        request.last_log_term = 1;

        let reply = handle_vote_request(
            &mut state,
            &mut state_storage,
            &log_storage,
            request,
        )
        .unwrap();

        // Term is adopted even though the vote is denied
        assert!(matches!(reply, PeerMessage::DenyVote { term: 2 }));
        assert_eq!(state.current_term, 2);
    }

    #[test]
    fn grants_candidate_with_higher_last_term() {
        let mut state = follower("node-0");
        let mut state_storage = MemoryStateStorage::new();
        let mut log_storage = MemoryLogStorage::new();
        log_storage
            .append(vec![
                LogEntry::new(1, 1, b"a".to_vec()),
                LogEntry::new(1, 2, b"b".to_vec()),
            ])
            .unwrap();

        let mut request = vote_request(3, "node-1");
        request.last_log_index = 1;
        request.last_log_term = 2;

        let reply = handle_vote_request(
            &mut state,
            &mut state_storage,
            &log_storage,
            request,
        )
        .unwrap();

        assert!(matches!(reply, PeerMessage::GrantVote { term: 3 }));
    }

    #[test]
    fn tally_reaches_majority_of_three() {
        let mut state = follower("node-0");
        state.become_candidate();

        assert!(!state.has_majority());
        let term = state.current_term;
        let won = handle_vote_granted(&mut state, "node-1".to_string(), term);
        assert!(won);
    }

    #[test]
    fn stale_grant_from_old_term_is_ignored() {
        let mut state = follower("node-0");
        state.become_candidate();
        let stale = state.current_term - 1;
        let won = handle_vote_granted(&mut state, "node-1".to_string(), stale);
        assert!(!won);
        assert_eq!(state.votes_received.len(), 1);
    }

    #[test]
    fn single_node_cluster_wins_with_self_vote() {
        let mut state = RaftState::new("node-0".to_string());
        state.nodes = vec!["node-0".to_string()];
        state.become_candidate();
        assert!(state.has_majority());
    }
}
