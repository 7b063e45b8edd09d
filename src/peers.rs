//! Peer registry: the in-memory map of known peers keyed by `address:port`,
//! generalized from the original `PeerManager`'s bookkeeping (this module
//! owns only the map and its mutations; discovery and liveness, which drove
//! those mutations in the original monolith, are separate modules here).
//!
//! The original wires connect/disconnect notification through assignable
//! callback slots (`on_peer_connected = None`). Per the design note against
//! nullable function fields, this registry instead emits [`PeerEvent`]s on
//! an unbounded channel that the daemon subscribes to.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Active,
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct Peer {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub last_seen: f64,
    pub status: PeerStatus,
    pub latency_ms: f64,
}

impl Peer {
    fn new(name: String, address: String, port: u16) -> Self {
        Self {
            name,
            address,
            port,
            last_seen: now_secs(),
            status: PeerStatus::Active,
            latency_ms: 0.0,
        }
    }

    pub fn is_alive(&self, timeout_secs: u64) -> bool {
        (now_secs() - self.last_seen) < timeout_secs as f64
    }

    fn touch(&mut self) {
        self.last_seen = now_secs();
        self.status = PeerStatus::Active;
    }

    pub fn key(address: &str, port: u16) -> String {
        format!("{address}:{port}")
    }
}

#[derive(Debug, Clone)]
pub enum PeerEvent {
    Connected(Peer),
    Disconnected(Peer),
}

/// Thread-safe peer map plus the event channel observers subscribe to.
/// `Clone` is cheap (the map and sender are both reference-counted), so the
/// registry can be shared across the accept loop, liveness monitor, and
/// discovery listener without an outer `Arc`.
#[derive(Clone)]
pub struct PeerRegistry {
    peers: std::sync::Arc<RwLock<HashMap<String, Peer>>>,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerRegistry {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers: std::sync::Arc::new(RwLock::new(HashMap::new())),
                events: tx,
            },
            rx,
        )
    }

    /// Add a peer on first sight (emitting [`PeerEvent::Connected`]), or
    /// refresh `last_seen` on a peer already known.
    pub fn add_peer(&self, name: &str, address: &str, port: u16) {
        let key = Peer::key(address, port);
        let mut map = self.peers.write();
        if let Some(existing) = map.get_mut(&key) {
            existing.touch();
        } else {
            let peer = Peer::new(name.to_string(), address.to_string(), port);
            map.insert(key, peer.clone());
            let _ = self.events.send(PeerEvent::Connected(peer));
        }
    }

    pub fn remove_peer(&self, address: &str, port: u16) {
        let key = Peer::key(address, port);
        let mut map = self.peers.write();
        if let Some(peer) = map.remove(&key) {
            let _ = self.events.send(PeerEvent::Disconnected(peer));
        }
    }

    pub fn update_peer_heartbeat(&self, address: &str, port: u16) {
        let key = Peer::key(address, port);
        let mut map = self.peers.write();
        if let Some(peer) = map.get_mut(&key) {
            peer.touch();
        }
    }

    pub fn get_active_peers(&self) -> Vec<Peer> {
        self.peers
            .read()
            .values()
            .filter(|p| p.status == PeerStatus::Active)
            .cloned()
            .collect()
    }

    pub fn get_all_peers(&self) -> Vec<Peer> {
        self.peers.read().values().cloned().collect()
    }

    pub fn get_peer(&self, address: &str, port: u16) -> Option<Peer> {
        self.peers.read().get(&Peer::key(address, port)).cloned()
    }

    pub fn get_peer_count(&self) -> usize {
        self.get_active_peers().len()
    }

    pub fn add_static_peer(&self, address: &str, port: u16, name: Option<&str>) {
        let name = name
            .map(|n| n.to_string())
            .unwrap_or_else(|| Peer::key(address, port));
        self.add_peer(&name, address, port);
    }

    /// Parse and register `"host:port"` strings from config. Malformed
    /// entries are logged and skipped rather than failing startup.
    pub fn load_static_peers(&self, peer_list: &[String]) {
        for entry in peer_list {
            match entry.rsplit_once(':') {
                Some((address, port_str)) => match port_str.parse::<u16>() {
                    Ok(port) => self.add_static_peer(address, port, None),
                    Err(_) => log::error!("failed to parse static peer port in '{entry}'"),
                },
                None => log::error!("failed to parse static peer '{entry}'"),
            }
        }
    }

    /// Evict every peer whose `last_seen` is at least `reconnect_timeout`
    /// seconds old. Used by the liveness monitor; separated out so it's
    /// independently testable without a real clock-driven loop.
    pub fn evict_stale(&self, reconnect_timeout: u64) -> Vec<Peer> {
        let mut evicted = Vec::new();
        let mut map = self.peers.write();
        let stale_keys: Vec<String> = map
            .iter()
            .filter(|(_, p)| !p.is_alive(reconnect_timeout))
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale_keys {
            if let Some(mut peer) = map.remove(&key) {
                peer.status = PeerStatus::Disconnected;
                let _ = self.events.send(PeerEvent::Disconnected(peer.clone()));
                evicted.push(peer);
            }
        }
        evicted
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_peer_emits_connected_once() {
        let (registry, mut events) = PeerRegistry::new();
        registry.add_peer("A", "127.0.0.1", 9000);
        registry.add_peer("A", "127.0.0.1", 9000);
        assert_eq!(registry.get_all_peers().len(), 1);
        assert!(matches!(events.try_recv(), Ok(PeerEvent::Connected(_))));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn evict_stale_removes_and_emits_disconnected() {
        let (registry, mut events) = PeerRegistry::new();
        registry.add_peer("A", "127.0.0.1", 9000);
        let _ = events.try_recv();

        let evicted = registry.evict_stale(0);
        assert_eq!(evicted.len(), 1);
        assert!(registry.get_all_peers().is_empty());
        assert!(matches!(events.try_recv(), Ok(PeerEvent::Disconnected(_))));
    }

    #[test]
    fn load_static_peers_skips_malformed_entries() {
        let (registry, _events) = PeerRegistry::new();
        registry.load_static_peers(&[
            "127.0.0.1:9000".to_string(),
            "not-a-peer".to_string(),
        ]);
        assert_eq!(registry.get_all_peers().len(), 1);
    }

    #[test]
    fn get_peer_count_reflects_active_only() {
        let (registry, _events) = PeerRegistry::new();
        registry.add_peer("A", "127.0.0.1", 9000);
        registry.add_peer("B", "127.0.0.1", 9001);
        assert_eq!(registry.get_peer_count(), 2);
    }
}
