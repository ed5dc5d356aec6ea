use caucus::cluster::{Cluster, Submit, TakeResponses};
use caucus::config::RaftConfig;
use caucus::raft::actor::GetState;
use caucus::raft::state::NodeState;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[actix_rt::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cluster = Cluster::spawn(3, RaftConfig::default()).expect("cluster bootstrap failed");
    let client = cluster.add_client("client-0");

    // Let the first election settle
    tokio::time::sleep(Duration::from_millis(800)).await;

    for id in &cluster.node_ids {
        if let Ok(info) = cluster.addr(id).send(GetState).await {
            tracing::info!(
                "{}: {} (term {}, leader {:?})",
                info.node_id,
                info.state,
                info.current_term,
                info.current_leader
            );
            if info.state == NodeState::Leader {
                match client
                    .send(Submit {
                        to: id.clone(),
                        command: b"set greeting hello".to_vec(),
                    })
                    .await
                {
                    Ok(Ok(cid)) => tracing::info!("submitted cid {} to {}", cid, id),
                    Ok(Err(e)) => tracing::error!("submit failed: {}", e),
                    Err(e) => tracing::error!("client mailbox error: {}", e),
                }
            }
        }
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    if let Ok(replies) = client.send(TakeResponses).await {
        for (cid, result) in replies.responses {
            tracing::info!("cid {} -> {}", cid, String::from_utf8_lossy(&result));
        }
    }

    println!("Cluster running, press Ctrl+C to exit");
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");
}
