//! UDP broadcast discovery: an announcer that periodically broadcasts a
//! `discovery/announce` envelope, and a listener that turns received
//! announcements into peer-registry upserts. Socket setup follows the
//! teacher's `bind_reusable_udp` pattern (socket2, `SO_REUSEADDR`/
//! `SO_REUSEPORT`) so a second local instance can bind during development;
//! the wire payload is this system's own [`Envelope`], not the teacher's
//! bincode `DiscoveryBeacon`.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::peers::PeerRegistry;
use crate::protocol::{Envelope, EnvelopeType};

const DISCOVERY_INTERVAL_SECS: u64 = 5;
const RECV_BUF_SIZE: usize = 8192;

/// Bind a UDP socket with address/port reuse enabled, matching the
/// teacher's `bind_reusable_udp`.
pub fn bind_reusable_udp(bind_address: &str, port: u16) -> std::io::Result<UdpSocket> {
    let addr: SocketAddr = format!("{bind_address}:{port}")
        .parse()
        .unwrap_or_else(|_| SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)));

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(not(target_os = "windows"))]
    socket.set_reuse_port(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&socket2::SockAddr::from(addr))?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
}

/// Periodically broadcast `discovery/announce {port: tcp_port}` to the LAN.
pub async fn run_announcer(
    node_name: String,
    tcp_port: u16,
    discovery_port: u16,
    cancel: CancellationToken,
) {
    let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
        Ok(s) => s,
        Err(e) => {
            log::error!("discovery announcer failed to bind: {e}");
            return;
        }
    };
    if let Err(e) = socket.set_broadcast(true) {
        log::error!("discovery announcer set_broadcast failed: {e}");
        return;
    }

    let broadcast_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, discovery_port));
    let mut tick = interval(Duration::from_secs(DISCOVERY_INTERVAL_SECS));

    log::info!("discovery announcer started (port={discovery_port})");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                let env = Envelope::new(
                    EnvelopeType::Discovery,
                    "announce",
                    "",
                    serde_json::json!({ "port": tcp_port }),
                    node_name.clone(),
                );
                if let Err(e) = socket.send_to(env.to_json().as_bytes(), broadcast_addr).await {
                    log::warn!("discovery announce send failed: {e}");
                }
            }
        }
    }
    log::debug!("discovery announcer stopped");
}

/// Listen on a pre-bound socket for announcements from other nodes and
/// upsert them into `registry`. Self-announcements (`origin == node_name`)
/// are ignored.
pub async fn run_listener(
    node_name: String,
    registry: PeerRegistry,
    socket: UdpSocket,
    cancel: CancellationToken,
) {
    log::info!("discovery listener started");
    let mut buf = vec![0u8; RECV_BUF_SIZE];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, src)) => {
                        handle_datagram(&node_name, &registry, &buf[..len], src);
                    }
                    Err(e) => log::warn!("discovery recv error: {e}"),
                }
            }
        }
    }
    log::debug!("discovery listener stopped");
}

fn handle_datagram(node_name: &str, registry: &PeerRegistry, data: &[u8], src: SocketAddr) {
    let text = match std::str::from_utf8(data) {
        Ok(t) => t,
        Err(_) => return,
    };
    let env = match Envelope::from_json(text) {
        Ok(e) => e,
        Err(_) => return,
    };
    if env.type_ != "discovery" || env.action != "announce" || env.origin == node_name {
        return;
    }
    let tcp_port = env
        .content
        .get("port")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u16;
    if tcp_port == 0 {
        return;
    }
    registry.add_peer(&env.origin, &src.ip().to_string(), tcp_port);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peers::PeerRegistry;

    #[test]
    fn self_announcements_are_ignored() {
        let (registry, _rx) = PeerRegistry::new();
        let env = Envelope::new(
            EnvelopeType::Discovery,
            "announce",
            "",
            serde_json::json!({ "port": 9000 }),
            "A",
        );
        handle_datagram("A", &registry, env.to_json().as_bytes(), "127.0.0.1:1".parse().unwrap());
        assert!(registry.get_all_peers().is_empty());
    }

    #[test]
    fn peer_announcement_registers_sender_ip_and_declared_port() {
        let (registry, _rx) = PeerRegistry::new();
        let env = Envelope::new(
            EnvelopeType::Discovery,
            "announce",
            "",
            serde_json::json!({ "port": 9001 }),
            "B",
        );
        handle_datagram("A", &registry, env.to_json().as_bytes(), "10.0.0.5:4000".parse().unwrap());
        let peer = registry.get_peer("10.0.0.5", 9001).expect("peer registered");
        assert_eq!(peer.name, "B");
    }
}
