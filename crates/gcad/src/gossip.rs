//! Fire-and-forget gossip to peer collection servers
//!
//! Peers are loosely synchronized: pushes are best-effort and unordered, and
//! recipients dedup via the registry rules. Failures are logged and dropped;
//! the periodic pull endpoints cover whatever gossip misses.

use crate::server::Server;
use gca_core::types::*;
use std::sync::Arc;
use tracing::{debug, warn};

/// HTTP base URL of a peer; the record's location doubles as its host
pub fn base_url(peer: &AuthorizedServer) -> String {
    format!("http://{}:{}", peer.location, peer.http_port)
}

/// POST one equipment authorization to a peer
pub async fn push_authorization(
    client: &reqwest::Client,
    peer: &AuthorizedServer,
    auth: &EquipmentAuthorization,
) -> Result<(), reqwest::Error> {
    client
        .post(format!("{}/api/v1/authorize-equipment", base_url(peer)))
        .json(auth)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

/// POST one peer-server record to a peer
pub async fn push_server_record(
    client: &reqwest::Client,
    peer: &AuthorizedServer,
    record: &AuthorizedServer,
) -> Result<(), reqwest::Error> {
    client
        .post(format!("{}/api/v1/authorized-servers", base_url(peer)))
        .json(record)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

/// Spread a freshly installed authorization to every non-banned peer
pub fn gossip_authorization(server: &Arc<Server>, auth: &EquipmentAuthorization) {
    let peers: Vec<AuthorizedServer> = server
        .gca_servers()
        .iter()
        .filter(|p| !p.banned)
        .cloned()
        .collect();
    for peer in peers {
        let client = server.http_client().clone();
        let auth = auth.clone();
        tokio::spawn(async move {
            if let Err(e) = push_authorization(&client, &peer, &auth).await {
                warn!(peer = %peer.location, "authorization gossip failed: {e}");
            } else {
                debug!(peer = %peer.location, "authorization gossiped");
            }
        });
    }
}

/// Spread a newly accepted server record to every known server, the new
/// one included
pub fn gossip_server_record(server: &Arc<Server>, record: &AuthorizedServer) {
    let peers: Vec<AuthorizedServer> = server
        .gca_servers()
        .iter()
        .filter(|p| !p.banned)
        .cloned()
        .collect();
    for peer in peers {
        let client = server.http_client().clone();
        let record = record.clone();
        tokio::spawn(async move {
            if let Err(e) = push_server_record(&client, &peer, &record).await {
                warn!(peer = %peer.location, "server-record gossip failed: {e}");
            }
        });
    }
}

/// Push the full equipment authorization list to a newly added peer, one
/// record per POST
pub fn push_equipment_list(server: &Arc<Server>, target: &AuthorizedServer) {
    let auths: Vec<EquipmentAuthorization> = {
        let state = server.state();
        state.devices().map(|(_, d)| d.auth.clone()).collect()
    };
    let client = server.http_client().clone();
    let target = target.clone();
    tokio::spawn(async move {
        for auth in auths {
            if let Err(e) = push_authorization(&client, &target, &auth).await {
                warn!(
                    peer = %target.location,
                    short_id = auth.short_id,
                    "equipment push failed: {e}"
                );
            }
        }
    });
}
