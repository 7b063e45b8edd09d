//! Liveness monitor: every 5 seconds, evict peers that have exceeded
//! `reconnect_timeout` and ping the ones that haven't, generalized from the
//! original `PeerManager._heartbeat_loop` / `_send_ping_to_peer`.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;

use crate::peers::PeerRegistry;
use crate::protocol::{write_frame, Envelope, EnvelopeType};

const LIVENESS_INTERVAL_SECS: u64 = 5;
const PING_TIMEOUT_SECS: u64 = 3;

pub async fn run_liveness_monitor(
    node_name: String,
    registry: PeerRegistry,
    reconnect_timeout: u64,
    cancel: CancellationToken,
) {
    let mut tick = interval(Duration::from_secs(LIVENESS_INTERVAL_SECS));
    log::info!("liveness monitor started (reconnect_timeout={reconnect_timeout}s)");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                for peer in registry.evict_stale(reconnect_timeout) {
                    log::warn!("peer {} ({}) is unresponsive, evicted", peer.name, peer.address);
                }
                for peer in registry.get_active_peers() {
                    let node_name = node_name.clone();
                    let addr = format!("{}:{}", peer.address, peer.port);
                    tokio::spawn(async move {
                        if let Err(e) = ping_peer(&node_name, &addr).await {
                            log::debug!("failed to ping {addr}: {e}");
                        }
                    });
                }
            }
        }
    }
    log::debug!("liveness monitor stopped");
}

/// Open a short-lived connection, send `heartbeat/ping`, and read the
/// response. Success is implicit — we don't update the registry here; the
/// peer's own accept loop refreshes its view of *us* on receipt (§4.4).
async fn ping_peer(node_name: &str, addr: &str) -> std::io::Result<()> {
    let connect = timeout(Duration::from_secs(PING_TIMEOUT_SECS), TcpStream::connect(addr));
    let mut stream = connect
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;

    let env = Envelope::new(EnvelopeType::Heartbeat, "ping", "", serde_json::Value::Null, node_name);
    let payload = env.to_json();
    write_frame(&mut stream, payload.as_bytes())
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    let mut buf = [0u8; 8192];
    let read = timeout(Duration::from_secs(PING_TIMEOUT_SECS), stream.read(&mut buf));
    read.await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out"))??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peers::PeerRegistry;

    #[test]
    fn evict_stale_is_what_the_monitor_relies_on() {
        let (registry, _rx) = PeerRegistry::new();
        registry.add_peer("A", "127.0.0.1", 9000);
        let evicted = registry.evict_stale(0);
        assert_eq!(evicted.len(), 1);
    }
}
