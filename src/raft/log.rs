use super::rpc::{AppendRequest, PeerMessage};
use super::state::RaftState;
use super::types::NodeId;
use crate::storage::{LogStorage, StateStorage};
use crate::util::errors::Result;

/// Build the AppendEntries for one follower from its next_index. Carries the
/// whole tail from next_index up; an up-to-date follower gets an empty
/// payload, which is the heartbeat.
pub fn create_append_request<L: LogStorage + ?Sized>(
    state: &RaftState,
    log_storage: &L,
    follower_id: &NodeId,
) -> Result<AppendRequest> {
    let next_index = state.next_index.get(follower_id).copied().unwrap_or(1);

    let prev_log_index = next_index.saturating_sub(1);
    let prev_log_term = log_storage.term_of(prev_log_index)?.unwrap_or(0);

    let last_log_index = log_storage.last_index();
    let entries = if next_index <= last_log_index {
        log_storage.get_range(next_index, last_log_index)?
    } else {
        Vec::new()
    };

    Ok(AppendRequest {
        term: state.current_term,
        leader_id: state.node_id.clone(),
        prev_log_index,
        prev_log_term,
        entries,
        leader_commit: state.commit_index,
    })
}

/// Follower-side AppendEntries processing: consistency check, conflict
/// truncation, append, commit advance. The success reply carries the log's
/// last index after the mutation, so it must not be built earlier.
pub fn handle_append_entries<L: LogStorage + ?Sized, S: StateStorage + ?Sized>(
    state: &mut RaftState,
    state_storage: &mut S,
    log_storage: &mut L,
    request: AppendRequest,
) -> Result<PeerMessage> {
    if request.term > state.current_term {
        state.become_follower(request.term, Some(request.leader_id.clone()));
        state_storage.save_term(state.current_term)?;
        state_storage.save_voted_for(None)?;
    }

    if request.term < state.current_term {
        tracing::debug!(
            "Node {} rejected AppendEntries from {} - stale term ({} < {})",
            state.node_id,
            request.leader_id,
            request.term,
            state.current_term
        );
        return Ok(PeerMessage::AppendFailure {
            term: state.current_term,
        });
    }

    // Same term, so this sender is the elected leader
    state.current_leader = Some(request.leader_id.clone());

    // Consistency check: our log must hold the leader's previous entry
    if request.prev_log_index > 0 {
        match log_storage.term_of(request.prev_log_index)? {
            None => {
                tracing::debug!(
                    "Node {} rejected AppendEntries - missing entry at index {}",
                    state.node_id,
                    request.prev_log_index
                );
                return Ok(PeerMessage::AppendFailure {
                    term: state.current_term,
                });
            }
            Some(term) if term != request.prev_log_term => {
                tracing::debug!(
                    "Node {} rejected AppendEntries - term mismatch at index {} ({} != {})",
                    state.node_id,
                    request.prev_log_index,
                    term,
                    request.prev_log_term
                );
                return Ok(PeerMessage::AppendFailure {
                    term: state.current_term,
                });
            }
            Some(_) => {}
        }
    }

    // Truncate on the first conflicting entry, then append whatever we do
    // not already hold. Replaying an accepted request changes nothing.
    for (i, new_entry) in request.entries.iter().enumerate() {
        match log_storage.term_of(new_entry.index)? {
            Some(existing_term) if existing_term == new_entry.term => continue,
            Some(_) => {
                tracing::info!(
                    "Node {} found log conflict at index {}, truncating",
                    state.node_id,
                    new_entry.index
                );
                log_storage.truncate(new_entry.index)?;
                log_storage.append(request.entries[i..].to_vec())?;
                break;
            }
            None => {
                log_storage.append(request.entries[i..].to_vec())?;
                break;
            }
        }
    }

    if !request.entries.is_empty() {
        tracing::debug!(
            "Node {} log at index {} after append from {}",
            state.node_id,
            log_storage.last_index(),
            request.leader_id
        );
    }

    if request.leader_commit > state.commit_index {
        state.commit_index = std::cmp::min(request.leader_commit, log_storage.last_index());
        tracing::debug!(
            "Node {} updated commit_index to {}",
            state.node_id,
            state.commit_index
        );
    }

    Ok(PeerMessage::AppendSuccess {
        term: state.current_term,
        index: log_storage.last_index(),
    })
}

/// Leader-side bookkeeping for an AppendSuccess: the follower now matches
/// through `index`. Returns true when the commit index advanced.
pub fn handle_append_success<L: LogStorage + ?Sized>(
    state: &mut RaftState,
    log_storage: &L,
    from: NodeId,
    index: u64,
) -> Result<bool> {
    if !state.is_leader() {
        return Ok(false);
    }

    if let Some(match_idx) = state.match_index.get_mut(&from) {
        *match_idx = index;
    }
    if let Some(next_idx) = state.next_index.get_mut(&from) {
        *next_idx = index + 1;
    }

    tracing::debug!(
        "Node {} updated match_index for {} to {}",
        state.node_id,
        from,
        index
    );

    advance_commit_index(state, log_storage)
}

/// Leader-side bookkeeping for an AppendFailure: back the follower's
/// next_index off by one and let the next heartbeat retry. Stale-term
/// failures step the leader down before this is reached.
pub fn handle_append_failure(state: &mut RaftState, from: NodeId) {
    if !state.is_leader() {
        return;
    }

    if let Some(next_idx) = state.next_index.get_mut(&from) {
        if *next_idx > 1 {
            *next_idx -= 1;
        }
        tracing::debug!(
            "Node {} decremented next_index for {} to {}",
            state.node_id,
            from,
            *next_idx
        );
    }
}

/// Move commit_index to the highest current-term index replicated on a
/// majority. Entries from earlier terms never commit by counting alone.
pub fn advance_commit_index<L: LogStorage + ?Sized>(
    state: &mut RaftState,
    log_storage: &L,
) -> Result<bool> {
    if !state.is_leader() {
        return Ok(false);
    }

    let mut advanced = false;
    let last_log_index = log_storage.last_index();

    for n in (state.commit_index + 1)..=last_log_index {
        let count = 1 + state.match_index.values().filter(|m| **m >= n).count();
        if count < state.majority() {
            continue;
        }

        if log_storage.term_of(n)? == Some(state.current_term) {
            state.commit_index = n;
            advanced = true;
            tracing::info!("Leader {} advanced commit_index to {}", state.node_id, n);
        }
    }

    Ok(advanced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raft::types::LogEntry;
    use crate::storage::{MemoryLogStorage, MemoryStateStorage};

    fn follower(term: u64) -> RaftState {
        let mut state = RaftState::new("node-0".to_string());
        state.nodes = vec![
            "node-0".to_string(),
            "node-1".to_string(),
            "node-2".to_string(),
        ];
        state.become_follower(term, None);
        state.current_term = term;
        state
    }

    fn leader(term: u64, last_log_index: u64) -> RaftState {
        let mut state = follower(term.saturating_sub(1));
        state.become_candidate();
        state.current_term = term;
        state.become_leader(last_log_index);
        state
    }

    fn append_request(term: u64, prev: (u64, u64), entries: Vec<LogEntry>) -> AppendRequest {
        AppendRequest {
            term,
            leader_id: "node-1".to_string(),
            prev_log_index: prev.0,
            prev_log_term: prev.1,
            entries,
            leader_commit: 0,
        }
    }

    #[test]
    fn accepts_entries_on_empty_log() {
        let mut state = follower(1);
        let mut state_storage = MemoryStateStorage::new();
        let mut log_storage = MemoryLogStorage::new();

        let reply = handle_append_entries(
            &mut state,
            &mut state_storage,
            &mut log_storage,
            append_request(1, (0, 0), vec![LogEntry::new(1, 1, b"x".to_vec())]),
        )
        .unwrap();

        assert!(matches!(reply, PeerMessage::AppendSuccess { term: 1, index: 1 }));
        assert_eq!(log_storage.last_index(), 1);
        assert_eq!(state.current_leader, Some("node-1".to_string()));
    }

    #[test]
    fn rejects_stale_term() {
        let mut state = follower(2);
        let mut state_storage = MemoryStateStorage::new();
        let mut log_storage = MemoryLogStorage::new();

        let reply = handle_append_entries(
            &mut state,
            &mut state_storage,
            &mut log_storage,
            append_request(1, (0, 0), vec![]),
        )
        .unwrap();

        assert!(matches!(reply, PeerMessage::AppendFailure { term: 2 }));
        assert_eq!(state.current_leader, None);
    }

    #[test]
    fn rejects_when_prev_entry_missing() {
        let mut state = follower(2);
        let mut state_storage = MemoryStateStorage::new();
        let mut log_storage = MemoryLogStorage::new();
        log_storage
            .append(vec![
                LogEntry::new(1, 1, b"a".to_vec()),
                LogEntry::new(1, 2, b"b".to_vec()),
            ])
            .unwrap();

        // Leader assumes the follower holds (2, term 2); it holds (2, term 1)
        let reply = handle_append_entries(
            &mut state,
            &mut state_storage,
            &mut log_storage,
            append_request(2, (2, 2), vec![LogEntry::new(2, 3, b"c".to_vec())]),
        )
        .unwrap();

        assert!(matches!(reply, PeerMessage::AppendFailure { term: 2 }));
        assert_eq!(log_storage.last_index(), 2);
    }

    #[test]
    fn overwrites_uncommitted_conflict_after_backoff() {
        let mut state = follower(2);
        let mut state_storage = MemoryStateStorage::new();
        let mut log_storage = MemoryLogStorage::new();
        log_storage
            .append(vec![
                LogEntry::new(1, 1, b"a".to_vec()),
                LogEntry::new(1, 2, b"b".to_vec()),
            ])
            .unwrap();

        // Retry anchored one entry earlier matches, and index 2 is replaced
        let reply = handle_append_entries(
            &mut state,
            &mut state_storage,
            &mut log_storage,
            append_request(2, (1, 1), vec![LogEntry::new(2, 2, b"c".to_vec())]),
        )
        .unwrap();

        assert!(matches!(reply, PeerMessage::AppendSuccess { term: 2, index: 2 }));
        let overwritten = log_storage.get(2).unwrap().unwrap();
        assert_eq!(overwritten.term, 2);
        assert_eq!(overwritten.command, b"c".to_vec());
    }

    #[test]
    fn replaying_accepted_request_is_idempotent() {
        let mut state = follower(1);
        let mut state_storage = MemoryStateStorage::new();
        let mut log_storage = MemoryLogStorage::new();

        let request = append_request(
            1,
            (0, 0),
            vec![
                LogEntry::new(1, 1, b"a".to_vec()),
                LogEntry::new(1, 2, b"b".to_vec()),
            ],
        );

        let first = handle_append_entries(
            &mut state,
            &mut state_storage,
            &mut log_storage,
            request.clone(),
        )
        .unwrap();
        let second =
            handle_append_entries(&mut state, &mut state_storage, &mut log_storage, request)
                .unwrap();

        assert!(matches!(first, PeerMessage::AppendSuccess { index: 2, .. }));
        assert!(matches!(second, PeerMessage::AppendSuccess { index: 2, .. }));
        assert_eq!(log_storage.last_index(), 2);
    }

    #[test]
    fn commit_follows_leader_clamped_to_local_tail() {
        let mut state = follower(1);
        let mut state_storage = MemoryStateStorage::new();
        let mut log_storage = MemoryLogStorage::new();

        let mut request = append_request(1, (0, 0), vec![LogEntry::new(1, 1, b"a".to_vec())]);
        request.leader_commit = 7;

        handle_append_entries(&mut state, &mut state_storage, &mut log_storage, request).unwrap();

        assert_eq!(state.commit_index, 1);
    }

    #[test]
    fn heartbeat_with_empty_log_bypasses_prefix_check() {
        let mut state = follower(1);
        let mut state_storage = MemoryStateStorage::new();
        let mut log_storage = MemoryLogStorage::new();

        let reply = handle_append_entries(
            &mut state,
            &mut state_storage,
            &mut log_storage,
            append_request(1, (0, 0), vec![]),
        )
        .unwrap();

        assert!(matches!(reply, PeerMessage::AppendSuccess { term: 1, index: 0 }));
    }

    #[test]
    fn success_updates_tracking_and_commits_on_majority() {
        let mut state = leader(1, 0);
        let mut log_storage = MemoryLogStorage::new();
        log_storage
            .append(vec![LogEntry::new(1, 1, b"x".to_vec())])
            .unwrap();

        let advanced =
            handle_append_success(&mut state, &log_storage, "node-1".to_string(), 1).unwrap();

        assert!(advanced);
        assert_eq!(state.commit_index, 1);
        assert_eq!(state.match_index.get("node-1"), Some(&1));
        assert_eq!(state.next_index.get("node-1"), Some(&2));
    }

    #[test]
    fn prior_term_entries_never_commit_by_count_alone() {
        let mut state = leader(3, 1);
        let mut log_storage = MemoryLogStorage::new();
        log_storage
            .append(vec![LogEntry::new(2, 1, b"old".to_vec())])
            .unwrap();

        let advanced =
            handle_append_success(&mut state, &log_storage, "node-1".to_string(), 1).unwrap();

        assert!(!advanced);
        assert_eq!(state.commit_index, 0);
    }

    #[test]
    fn committing_current_term_entry_commits_prefix_too() {
        let mut state = leader(3, 1);
        let mut log_storage = MemoryLogStorage::new();
        log_storage
            .append(vec![
                LogEntry::new(2, 1, b"old".to_vec()),
                LogEntry::new(3, 2, b"new".to_vec()),
            ])
            .unwrap();
        // next_index was seeded past the old entry; the follower caught up
        handle_append_success(&mut state, &log_storage, "node-1".to_string(), 2).unwrap();

        assert_eq!(state.commit_index, 2);
    }

    #[test]
    fn failure_backs_next_index_off_and_saturates() {
        let mut state = leader(2, 1);
        assert_eq!(state.next_index.get("node-1"), Some(&2));

        handle_append_failure(&mut state, "node-1".to_string());
        assert_eq!(state.next_index.get("node-1"), Some(&1));

        handle_append_failure(&mut state, "node-1".to_string());
        assert_eq!(state.next_index.get("node-1"), Some(&1));
    }

    #[test]
    fn request_construction_takes_tail_from_next_index() {
        let mut state = leader(2, 2);
        let mut log_storage = MemoryLogStorage::new();
        log_storage
            .append(vec![
                LogEntry::new(1, 1, b"a".to_vec()),
                LogEntry::new(1, 2, b"b".to_vec()),
                LogEntry::new(2, 3, b"c".to_vec()),
            ])
            .unwrap();
        state.next_index.insert("node-1".to_string(), 2);

        let request = create_append_request(&state, &log_storage, &"node-1".to_string()).unwrap();

        assert_eq!(request.prev_log_index, 1);
        assert_eq!(request.prev_log_term, 1);
        assert_eq!(request.entries.len(), 2);
        assert_eq!(request.entries[0].index, 2);
    }

    #[test]
    fn caught_up_follower_gets_empty_heartbeat() {
        let mut state = leader(1, 1);
        let mut log_storage = MemoryLogStorage::new();
        log_storage
            .append(vec![LogEntry::new(1, 1, b"a".to_vec())])
            .unwrap();

        let request = create_append_request(&state, &log_storage, &"node-1".to_string()).unwrap();

        assert_eq!(request.prev_log_index, 1);
        assert!(request.entries.is_empty());
    }
}
