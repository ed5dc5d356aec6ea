//! In-process transport and cluster bootstrap. The router realizes the
//! delivery contract the consensus core assumes: reliable, in-order,
//! at-most-once between any named pair, best-effort to dead peers.

mod client;

pub use client::{ClientResponses, ClusterClient, Submit, TakeResponses};

use actix::prelude::*;
use std::collections::HashMap;

use crate::config::RaftConfig;
use crate::machine::{KvMachine, StateMachine};
use crate::raft::actor::{Deliver, Outbound, RaftActor, SetTransport};
use crate::raft::rpc::PeerMessage;
use crate::raft::types::NodeId;
use crate::util::errors::Result;

/// Name the bootstrap uses as the origin of `Init`
const BOOTSTRAP: &str = "bootstrap";

/// Routes outbound messages to the mailbox registered under the destination
/// id. Actix mailboxes give FIFO per sender/receiver pair, which is all the
/// consensus core requires of its transport.
#[derive(Default)]
pub struct Router {
    routes: HashMap<NodeId, Recipient<Deliver>>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Register {
    pub id: NodeId,
    pub recipient: Recipient<Deliver>,
}

impl Actor for Router {
    type Context = Context<Self>;
}

impl Handler<Register> for Router {
    type Result = ();

    fn handle(&mut self, msg: Register, _ctx: &mut Context<Self>) -> Self::Result {
        self.routes.insert(msg.id, msg.recipient);
    }
}

impl Handler<Outbound> for Router {
    type Result = ();

    fn handle(&mut self, msg: Outbound, _ctx: &mut Context<Self>) -> Self::Result {
        match self.routes.get(&msg.to) {
            Some(recipient) => recipient.do_send(Deliver {
                from: msg.from,
                message: msg.message,
            }),
            None => tracing::debug!("No route to {}, dropping {}", msg.to, msg.message.kind()),
        }
    }
}

/// A bootstrapped cluster: `size` peers wired through one router, each
/// handed the full membership list exactly once. Membership is frozen for
/// the cluster's lifetime.
pub struct Cluster {
    pub node_ids: Vec<NodeId>,
    addrs: HashMap<NodeId, Addr<RaftActor>>,
    router: Addr<Router>,
}

impl Cluster {
    /// Boot `size` peers replicating a [`KvMachine`] each
    pub fn spawn(size: usize, config: RaftConfig) -> Result<Self> {
        Self::spawn_with(size, config, |_| Box::new(KvMachine::new()))
    }

    /// Boot `size` peers with a caller-chosen state machine per peer
    pub fn spawn_with<F>(size: usize, config: RaftConfig, mut machine_for: F) -> Result<Self>
    where
        F: FnMut(&NodeId) -> Box<dyn StateMachine>,
    {
        let router = Router::default().start();

        let node_ids: Vec<NodeId> = (0..size).map(|i| format!("node-{}", i)).collect();
        let mut addrs = HashMap::new();

        for id in &node_ids {
            let machine = machine_for(id);
            let actor = RaftActor::new(id.clone(), config.clone(), machine)?;
            let addr = actor.start();

            router.do_send(Register {
                id: id.clone(),
                recipient: addr.clone().recipient::<Deliver>(),
            });
            addr.do_send(SetTransport {
                addr: router.clone().recipient::<Outbound>(),
            });

            addrs.insert(id.clone(), addr);
        }

        // Init goes straight to each mailbox so it cannot overtake the
        // transport wiring above
        for addr in addrs.values() {
            addr.do_send(Deliver {
                from: BOOTSTRAP.to_string(),
                message: PeerMessage::Init {
                    nodes: node_ids.clone(),
                },
            });
        }

        tracing::info!("Cluster of {} peers bootstrapped", size);

        Ok(Self {
            node_ids,
            addrs,
            router,
        })
    }

    pub fn addr(&self, id: &str) -> &Addr<RaftActor> {
        &self.addrs[id]
    }

    pub fn router(&self) -> &Addr<Router> {
        &self.router
    }

    /// Start a client registered with this cluster's router under `id`
    pub fn add_client(&self, id: &str) -> Addr<ClusterClient> {
        let client = ClusterClient::new(
            id.to_string(),
            self.router.clone().recipient::<Outbound>(),
        );
        let addr = client.start();

        self.router.do_send(Register {
            id: id.to_string(),
            recipient: addr.clone().recipient::<Deliver>(),
        });

        addr
    }
}
