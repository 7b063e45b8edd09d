//! Broadcast fan-out: dispatch a locally-originated mutation to every
//! active peer over a short-lived outbound connection, one task per peer
//! (generalized from `_broadcast_message`/`_send_to_peer`).

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::peers::{Peer, PeerRegistry};
use crate::protocol::Envelope;

const BROADCAST_TIMEOUT_SECS: u64 = 10;

/// Fan the envelope out to every currently-active peer. Each send runs on
/// its own task; failures are logged and do not affect the local apply —
/// the peer remains registered until the liveness monitor evicts it.
pub fn broadcast_message(registry: &PeerRegistry, envelope: Envelope) {
    let peers = registry.get_active_peers();
    if peers.is_empty() {
        log::warn!("no peers available to broadcast {}", envelope.action);
        return;
    }

    log::info!("broadcasting {} to {} peer(s)", envelope.action, peers.len());
    for peer in peers {
        let envelope = envelope.clone();
        tokio::spawn(async move {
            if let Err(e) = send_to_peer(&peer, &envelope).await {
                log::error!("failed to send {} to peer {}: {e}", envelope.action, peer.name);
            } else {
                log::info!("successfully sent {} to {}", envelope.action, peer.name);
            }
        });
    }
}

async fn send_to_peer(peer: &Peer, envelope: &Envelope) -> std::io::Result<()> {
    let addr = format!("{}:{}", peer.address, peer.port);
    let connect = timeout(Duration::from_secs(BROADCAST_TIMEOUT_SECS), TcpStream::connect(&addr));
    let mut stream = connect
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;

    let payload = envelope.to_json();
    crate::protocol::write_frame(&mut stream, payload.as_bytes())
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    let mut buf = [0u8; 8192];
    let read = timeout(Duration::from_secs(BROADCAST_TIMEOUT_SECS), stream.read(&mut buf));
    read.await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out"))??;
    Ok(())
}
