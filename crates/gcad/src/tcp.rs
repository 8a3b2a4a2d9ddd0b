//! TCP sync responder
//!
//! Devices that missed UDP reports ask here which timeslots the server
//! holds. The request is a bare 4-byte ShortID; the response is a single
//! length-prefixed frame signed by the server's static key, sized to fit
//! the whole missing-report bitfield in one packet. Clients reject frames
//! whose signing timestamp is more than 24 hours away from their own clock.

use crate::server::Server;
use gca_core::types::*;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Sync response errors
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("core error: {0}")]
    Core(#[from] gca_core::Error),

    #[error("response of {0} bytes exceeds the u16 frame limit")]
    Oversize(usize),
}

/// Accept loop; exits when the shutdown signal fires
pub async fn run(server: Arc<Server>, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(%addr, "sync connection");
                        let server = server.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(&server, stream).await {
                                debug!(%addr, "sync connection error: {e}");
                            }
                        });
                    }
                    Err(e) => warn!("tcp accept error: {e}"),
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

async fn handle_connection(server: &Server, mut stream: TcpStream) -> std::io::Result<()> {
    let mut id_buf = [0u8; 4];
    stream.read_exact(&mut id_buf).await?;
    let short_id = ShortId::from_le_bytes(id_buf);

    match build_sync_response(server, short_id) {
        Ok(Some(frame)) => stream.write_all(&frame).await?,
        // unknown device: one zero byte, then close
        Ok(None) => stream.write_all(&[0]).await?,
        Err(e) => {
            warn!(short_id, "sync response build failed: {e}");
            stream.write_all(&[0]).await?;
        }
    }
    stream.shutdown().await
}

/// Build the framed sync response for a device, or `None` if unknown.
///
/// Layout after the u16 LE length prefix:
/// equipment pubkey (32) ‖ ring offset u32 LE ‖ 504-byte presence bitfield ‖
/// either the pending migration (serialized bytes from offset 32, the
/// equipment key being redundant) or the peer-server list followed by a
/// 64-byte zero placeholder signature slot ‖ signing Unix time u64 LE ‖
/// server signature (64) over everything after the prefix.
pub fn build_sync_response(server: &Server, short_id: ShortId) -> Result<Option<Vec<u8>>, SyncError> {
    let state = server.state();
    let Some(device) = state.device(short_id) else {
        return Ok(None);
    };

    let mut payload = Vec::with_capacity(2 + 32 + 4 + RING_SLOTS / 8 + 256);
    payload.extend_from_slice(&device.auth.public_key.0);
    payload.extend_from_slice(&state.offset().to_le_bytes());
    let bitfield = state
        .bitfield(short_id)
        .unwrap_or([0u8; RING_SLOTS / 8]);
    payload.extend_from_slice(&bitfield);

    if let Some(migration) = state.migrations.get(&device.auth.public_key) {
        let bytes = migration.encode()?;
        payload.extend_from_slice(&bytes[32..]);
    } else {
        // no external I/O happens while both locks are held
        let servers = server.gca_servers();
        for record in servers.iter() {
            payload.extend_from_slice(&record.encode()?);
        }
        // historical placeholder preserved for client compatibility
        payload.extend_from_slice(&[0u8; 64]);
    }

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    payload.extend_from_slice(&timestamp.to_le_bytes());

    let signature = server.keypair().sign(&payload)?;
    payload.extend_from_slice(&signature.0);

    if payload.len() > u16::MAX as usize {
        return Err(SyncError::Oversize(payload.len()));
    }
    let mut frame = Vec::with_capacity(2 + payload.len());
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(Some(frame))
}
