use actix::prelude::*;
use rand::Rng;
use std::time::Duration;

use super::election::{create_vote_request, handle_vote_granted, handle_vote_request};
use super::log::{
    advance_commit_index, create_append_request, handle_append_entries, handle_append_failure,
    handle_append_success,
};
use super::rpc::{AppendRequest, PeerMessage};
use super::state::{NodeState, RaftState};
use super::types::{ClientRef, LogEntry, LogIndex, NodeId, Term};
use crate::config::RaftConfig;
use crate::machine::StateMachine;
use crate::storage::{
    FileLogStorage, FileStateStorage, LogStorage, MemoryLogStorage, MemoryStateStorage,
    StateStorage,
};
use crate::util::errors::{RaftError, Result};

/// A peer message arriving over the transport. `from` names the originating
/// peer, which for a forwarded ClientRequest is the original requester.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Deliver {
    pub from: NodeId,
    pub message: PeerMessage,
}

/// An outgoing peer message handed to the transport layer
#[derive(Message)]
#[rtype(result = "()")]
pub struct Outbound {
    pub from: NodeId,
    pub to: NodeId,
    pub message: PeerMessage,
}

/// Wire up the transport this peer sends through
#[derive(Message)]
#[rtype(result = "()")]
pub struct SetTransport {
    pub addr: Recipient<Outbound>,
}

/// Snapshot of the peer's consensus state, for tests and monitoring
#[derive(Message)]
#[rtype(result = "StateInfo")]
pub struct GetState;

#[derive(Debug, Clone)]
pub struct StateInfo {
    pub node_id: NodeId,
    pub state: NodeState,
    pub current_term: Term,
    pub current_leader: Option<NodeId>,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub last_log_index: LogIndex,
}

impl<A, M> actix::dev::MessageResponse<A, M> for StateInfo
where
    A: Actor,
    M: Message<Result = StateInfo>,
{
    fn handle(self, _ctx: &mut A::Context, tx: Option<actix::dev::OneshotSender<M::Result>>) {
        if let Some(tx) = tx {
            let _ = tx.send(self);
        }
    }
}

/// Stop the peer immediately, as a crash would
#[derive(Message)]
#[rtype(result = "()")]
pub struct Halt;

/// Election timer fired
struct ElectionTimeout;

impl Message for ElectionTimeout {
    type Result = ();
}

/// Heartbeat timer fired (leaders only)
struct HeartbeatTimeout;

impl Message for HeartbeatTimeout {
    type Result = ();
}

/// One consensus peer. All state is mutated inside message handlers, one at
/// a time, so nothing here needs a lock.
pub struct RaftActor {
    state: RaftState,
    config: RaftConfig,
    log_storage: Box<dyn LogStorage>,
    state_storage: Box<dyn StateStorage>,
    machine: Box<dyn StateMachine>,
    transport: Option<Recipient<Outbound>>,
    election_timer: Option<SpawnHandle>,
    heartbeat_timer: Option<SpawnHandle>,
}

impl Actor for RaftActor {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("Node {} started", self.state.node_id);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("Node {} stopped", self.state.node_id);
    }
}

impl RaftActor {
    pub fn new(node_id: NodeId, config: RaftConfig, machine: Box<dyn StateMachine>) -> Result<Self> {
        config.validate().map_err(RaftError::InvalidConfig)?;

        let (log_storage, state_storage): (Box<dyn LogStorage>, Box<dyn StateStorage>) =
            match &config.data_dir {
                Some(dir) => {
                    let base = dir.join(&node_id);
                    (
                        Box::new(FileLogStorage::new(base.join("log"))?),
                        Box::new(FileStateStorage::new(base.join("state"))?),
                    )
                }
                None => (
                    Box::new(MemoryLogStorage::new()),
                    Box::new(MemoryStateStorage::new()),
                ),
            };

        let mut state = RaftState::new(node_id);
        let persisted = state_storage.load_state()?;
        state.current_term = persisted.current_term;
        state.voted_for = persisted.voted_for;

        Ok(Self {
            state,
            config,
            log_storage,
            state_storage,
            machine,
            transport: None,
            election_timer: None,
            heartbeat_timer: None,
        })
    }

    fn send_to(&self, to: NodeId, message: PeerMessage) {
        self.send_as(self.state.node_id.clone(), to, message);
    }

    /// Send with an explicit origin; used to forward a ClientRequest so the
    /// leader still sees the real requester.
    fn send_as(&self, from: NodeId, to: NodeId, message: PeerMessage) {
        match &self.transport {
            Some(transport) => transport.do_send(Outbound { from, to, message }),
            None => tracing::warn!(
                "Node {} has no transport, dropping outbound message",
                self.state.node_id
            ),
        }
    }

    fn reset_election_timer(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.election_timer.take() {
            ctx.cancel_future(handle);
        }

        let timeout_ms = rand::thread_rng()
            .gen_range(self.config.election_timeout_min_ms..self.config.election_timeout_max_ms);
        tracing::debug!(
            "Node {} reset election timeout to {}ms",
            self.state.node_id,
            timeout_ms
        );

        let handle = ctx.run_later(Duration::from_millis(timeout_ms), |_act, ctx| {
            ctx.notify(ElectionTimeout);
        });
        self.election_timer = Some(handle);
    }

    fn cancel_election_timer(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.election_timer.take() {
            ctx.cancel_future(handle);
        }
    }

    fn schedule_heartbeat(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.heartbeat_timer.take() {
            ctx.cancel_future(handle);
        }

        let interval_ms = rand::thread_rng()
            .gen_range(self.config.heartbeat_min_ms..self.config.heartbeat_max_ms);

        let handle = ctx.run_later(Duration::from_millis(interval_ms), |_act, ctx| {
            ctx.notify(HeartbeatTimeout);
        });
        self.heartbeat_timer = Some(handle);
    }

    fn cancel_heartbeat_timer(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.heartbeat_timer.take() {
            ctx.cancel_future(handle);
        }
    }

    /// Adopt a higher term and demote to Follower. Runs before any
    /// role-specific handling of a message carrying that term.
    fn step_down(
        &mut self,
        term: Term,
        leader: Option<NodeId>,
        ctx: &mut Context<Self>,
    ) -> Result<()> {
        self.state.become_follower(term, leader);
        self.state_storage.save_term(self.state.current_term)?;
        self.state_storage.save_voted_for(self.state.voted_for.clone())?;

        self.cancel_heartbeat_timer(ctx);
        self.reset_election_timer(ctx);

        Ok(())
    }

    fn start_election(&mut self, ctx: &mut Context<Self>) -> Result<()> {
        self.state.become_candidate();

        self.state_storage.save_term(self.state.current_term)?;
        self.state_storage.save_voted_for(self.state.voted_for.clone())?;

        // A one-node cluster wins on its own vote
        if self.state.has_majority() {
            return self.take_leadership(ctx);
        }

        let request = create_vote_request(&self.state, self.log_storage.as_ref());
        tracing::info!(
            "Node {} starting election for term {}",
            self.state.node_id,
            self.state.current_term
        );

        let peers: Vec<NodeId> = self.state.peers().cloned().collect();
        for peer in peers {
            self.send_to(peer, PeerMessage::RequestVote(request.clone()));
        }

        self.reset_election_timer(ctx);

        Ok(())
    }

    fn take_leadership(&mut self, ctx: &mut Context<Self>) -> Result<()> {
        let last_log_index = self.log_storage.last_index();
        self.state.become_leader(last_log_index);

        self.cancel_election_timer(ctx);

        // Inaugural heartbeat announces the new leader right away
        self.broadcast_append()?;
        self.schedule_heartbeat(ctx);

        // With no peers the majority is already satisfied
        if advance_commit_index(&mut self.state, self.log_storage.as_ref())? {
            self.apply_committed()?;
        }

        Ok(())
    }

    fn broadcast_append(&mut self) -> Result<()> {
        let peers: Vec<NodeId> = self.state.peers().cloned().collect();
        for peer in peers {
            let request = create_append_request(&self.state, self.log_storage.as_ref(), &peer)?;
            if !request.entries.is_empty() {
                tracing::debug!(
                    "Node {} sending {} entries to {}",
                    self.state.node_id,
                    request.entries.len(),
                    peer
                );
            }
            self.send_to(peer, PeerMessage::AppendEntries(request));
        }
        Ok(())
    }

    /// Hand newly committed entries to the state machine, in log order. The
    /// leader that committed an entry replies to the client bound to it.
    fn apply_committed(&mut self) -> Result<()> {
        while self.state.last_applied < self.state.commit_index {
            self.state.last_applied += 1;

            let entry = self
                .log_storage
                .get(self.state.last_applied)?
                .ok_or(RaftError::LogInconsistency)?;

            tracing::info!(
                "Node {} applying entry {} (term {})",
                self.state.node_id,
                entry.index,
                entry.term
            );
            let result = self.machine.apply(&entry.command);

            if self.state.is_leader() {
                if let Some(ClientRef { origin, cid }) = entry.client {
                    self.send_to(origin, PeerMessage::ClientResponse { cid, result });
                }
            }
        }

        Ok(())
    }

    /// Role FSM. The universal preemption rule runs first: any message with
    /// a term above ours demotes us before its role-specific handling.
    /// Pairings missing from the match are dropped.
    fn dispatch(&mut self, from: NodeId, message: PeerMessage, ctx: &mut Context<Self>) -> Result<()> {
        // Until Init fixes the membership the peer cannot vote, follow, or
        // campaign, so nothing else is worth reacting to
        if self.state.state == NodeState::Initialising {
            return match message {
                PeerMessage::Init { nodes } => self.handle_init(nodes, ctx),
                other => {
                    tracing::trace!(
                        "Node {} not initialised, dropping {}",
                        self.state.node_id,
                        other.kind()
                    );
                    Ok(())
                }
            };
        }

        if let Some(term) = message.term() {
            if term > self.state.current_term {
                let leader = match &message {
                    PeerMessage::AppendEntries(req) => Some(req.leader_id.clone()),
                    _ => None,
                };
                self.step_down(term, leader, ctx)?;
            }
        }

        match (self.state.state, message) {
            (NodeState::Follower, PeerMessage::RequestVote(request)) => {
                let reply = handle_vote_request(
                    &mut self.state,
                    self.state_storage.as_mut(),
                    self.log_storage.as_ref(),
                    request,
                )?;

                if matches!(reply, PeerMessage::GrantVote { .. }) {
                    self.reset_election_timer(ctx);
                }

                self.send_to(from, reply);
                Ok(())
            }

            (NodeState::Follower | NodeState::Candidate, PeerMessage::AppendEntries(request)) => {
                self.handle_append(from, request, ctx)
            }

            (
                NodeState::Follower | NodeState::Candidate,
                PeerMessage::ClientRequest { cid, command },
            ) => {
                match self.state.current_leader.clone() {
                    Some(leader) => {
                        tracing::debug!(
                            "Node {} forwarding client request {} to {}",
                            self.state.node_id,
                            cid,
                            leader
                        );
                        self.send_as(from, leader, PeerMessage::ClientRequest { cid, command });
                    }
                    None => tracing::debug!(
                        "Node {} has no known leader, dropping client request {}",
                        self.state.node_id,
                        cid
                    ),
                }
                Ok(())
            }

            (NodeState::Candidate, PeerMessage::GrantVote { term }) => {
                if handle_vote_granted(&mut self.state, from, term) {
                    self.take_leadership(ctx)?;
                }
                Ok(())
            }

            // A higher-term denial was handled by preemption; same-term
            // denials just mean the race is still open
            (NodeState::Candidate, PeerMessage::DenyVote { .. }) => Ok(()),

            (NodeState::Leader, PeerMessage::ClientRequest { cid, command }) => {
                self.handle_client_request(from, cid, command)
            }

            (NodeState::Leader, PeerMessage::AppendSuccess { term, index }) => {
                if term == self.state.current_term {
                    let advanced = handle_append_success(
                        &mut self.state,
                        self.log_storage.as_ref(),
                        from,
                        index,
                    )?;
                    if advanced {
                        self.apply_committed()?;
                    }
                }
                Ok(())
            }

            (NodeState::Leader, PeerMessage::AppendFailure { term }) => {
                if term == self.state.current_term {
                    handle_append_failure(&mut self.state, from);
                }
                Ok(())
            }

            (role, message) => {
                tracing::trace!(
                    "Node {} dropping {} in role {}",
                    self.state.node_id,
                    message.kind(),
                    role
                );
                Ok(())
            }
        }
    }

    fn handle_init(&mut self, nodes: Vec<NodeId>, ctx: &mut Context<Self>) -> Result<()> {
        tracing::info!(
            "Node {} joining cluster of {}: {:?}",
            self.state.node_id,
            nodes.len(),
            nodes
        );

        self.state.nodes = nodes;
        self.state.state = NodeState::Follower;
        self.reset_election_timer(ctx);

        Ok(())
    }

    fn handle_append(
        &mut self,
        from: NodeId,
        request: AppendRequest,
        ctx: &mut Context<Self>,
    ) -> Result<()> {
        // A candidate seeing a leader of its own term concedes
        if self.state.is_candidate() && request.term >= self.state.current_term {
            self.state
                .become_follower(request.term, Some(request.leader_id.clone()));
            self.cancel_heartbeat_timer(ctx);
        }

        if self.state.is_follower() && request.term >= self.state.current_term {
            self.reset_election_timer(ctx);
        }

        let reply = handle_append_entries(
            &mut self.state,
            self.state_storage.as_mut(),
            self.log_storage.as_mut(),
            request,
        )?;

        self.apply_committed()?;
        self.send_to(from, reply);

        Ok(())
    }

    fn handle_client_request(&mut self, from: NodeId, cid: u64, command: Vec<u8>) -> Result<()> {
        let index = self.log_storage.last_index() + 1;
        let entry = LogEntry::with_client(
            self.state.current_term,
            index,
            command,
            ClientRef { origin: from, cid },
        );

        self.log_storage.append(vec![entry])?;
        tracing::info!(
            "Leader {} appended client entry at index {}",
            self.state.node_id,
            index
        );

        // A single-node majority commits on the spot
        if advance_commit_index(&mut self.state, self.log_storage.as_ref())? {
            self.apply_committed()?;
        }

        // Eager replication instead of waiting out the heartbeat interval
        self.broadcast_append()
    }

    /// Storage failures must halt the peer instead of letting it reply with
    /// state that may not survive a crash.
    fn fail_stop(&self, err: RaftError, ctx: &mut Context<Self>) {
        tracing::error!("Node {} halting: {}", self.state.node_id, err);
        ctx.stop();
    }
}

impl Handler<Deliver> for RaftActor {
    type Result = ();

    fn handle(&mut self, msg: Deliver, ctx: &mut Context<Self>) -> Self::Result {
        if let Err(err) = self.dispatch(msg.from, msg.message, ctx) {
            self.fail_stop(err, ctx);
        }
    }
}

impl Handler<ElectionTimeout> for RaftActor {
    type Result = ();

    fn handle(&mut self, _msg: ElectionTimeout, ctx: &mut Context<Self>) -> Self::Result {
        match self.state.state {
            NodeState::Follower | NodeState::Candidate => {
                tracing::info!(
                    "Node {} election timeout, starting election",
                    self.state.node_id
                );
                if let Err(err) = self.start_election(ctx) {
                    self.fail_stop(err, ctx);
                }
            }
            // Leaders heartbeat instead; an uninitialised peer has no timers
            NodeState::Leader | NodeState::Initialising => {}
        }
    }
}

impl Handler<HeartbeatTimeout> for RaftActor {
    type Result = ();

    fn handle(&mut self, _msg: HeartbeatTimeout, ctx: &mut Context<Self>) -> Self::Result {
        if !self.state.is_leader() {
            return;
        }

        if let Err(err) = self.broadcast_append() {
            self.fail_stop(err, ctx);
            return;
        }
        self.schedule_heartbeat(ctx);
    }
}

impl Handler<SetTransport> for RaftActor {
    type Result = ();

    fn handle(&mut self, msg: SetTransport, _ctx: &mut Context<Self>) -> Self::Result {
        self.transport = Some(msg.addr);
    }
}

impl Handler<GetState> for RaftActor {
    type Result = StateInfo;

    fn handle(&mut self, _msg: GetState, _ctx: &mut Context<Self>) -> Self::Result {
        StateInfo {
            node_id: self.state.node_id.clone(),
            state: self.state.state,
            current_term: self.state.current_term,
            current_leader: self.state.current_leader.clone(),
            commit_index: self.state.commit_index,
            last_applied: self.state.last_applied,
            last_log_index: self.log_storage.last_index(),
        }
    }
}

impl Handler<Halt> for RaftActor {
    type Result = ();

    fn handle(&mut self, _msg: Halt, ctx: &mut Context<Self>) -> Self::Result {
        tracing::info!("Node {} halted", self.state.node_id);
        ctx.stop();
    }
}
