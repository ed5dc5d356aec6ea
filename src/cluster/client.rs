use actix::prelude::*;
use std::collections::HashMap;

use crate::raft::actor::{Deliver, Outbound};
use crate::raft::rpc::PeerMessage;
use crate::raft::types::NodeId;

/// A cluster client: proposes commands to a chosen peer and collects the
/// commit replies. Retrying after a dropped request is the caller's job, as
/// it would be for a real client.
pub struct ClusterClient {
    id: NodeId,
    transport: Recipient<Outbound>,
    next_cid: u64,
    responses: HashMap<u64, Vec<u8>>,
}

/// Propose `command` via the peer `to`; resolves to the request's cid
#[derive(Message)]
#[rtype(result = "Result<u64, String>")]
pub struct Submit {
    pub to: NodeId,
    pub command: Vec<u8>,
}

/// Drain the commit replies received so far
#[derive(Message)]
#[rtype(result = "ClientResponses")]
pub struct TakeResponses;

#[derive(Debug, Clone)]
pub struct ClientResponses {
    pub responses: Vec<(u64, Vec<u8>)>,
}

impl<A, M> actix::dev::MessageResponse<A, M> for ClientResponses
where
    A: Actor,
    M: Message<Result = ClientResponses>,
{
    fn handle(self, _ctx: &mut A::Context, tx: Option<actix::dev::OneshotSender<M::Result>>) {
        if let Some(tx) = tx {
            let _ = tx.send(self);
        }
    }
}

impl ClusterClient {
    pub fn new(id: NodeId, transport: Recipient<Outbound>) -> Self {
        Self {
            id,
            transport,
            next_cid: 1,
            responses: HashMap::new(),
        }
    }
}

impl Actor for ClusterClient {
    type Context = Context<Self>;
}

impl Handler<Submit> for ClusterClient {
    type Result = Result<u64, String>;

    fn handle(&mut self, msg: Submit, _ctx: &mut Context<Self>) -> Self::Result {
        let cid = self.next_cid;
        self.next_cid += 1;

        tracing::debug!("Client {} submitting cid {} via {}", self.id, cid, msg.to);
        self.transport.do_send(Outbound {
            from: self.id.clone(),
            to: msg.to,
            message: PeerMessage::ClientRequest {
                cid,
                command: msg.command,
            },
        });

        Ok(cid)
    }
}

impl Handler<Deliver> for ClusterClient {
    type Result = ();

    fn handle(&mut self, msg: Deliver, _ctx: &mut Context<Self>) -> Self::Result {
        if let PeerMessage::ClientResponse { cid, result } = msg.message {
            tracing::debug!("Client {} got reply for cid {}", self.id, cid);
            self.responses.insert(cid, result);
        }
    }
}

impl Handler<TakeResponses> for ClusterClient {
    type Result = ClientResponses;

    fn handle(&mut self, _msg: TakeResponses, _ctx: &mut Context<Self>) -> Self::Result {
        let mut responses: Vec<(u64, Vec<u8>)> = self.responses.drain().collect();
        responses.sort_by_key(|(cid, _)| *cid);
        ClientResponses { responses }
    }
}
