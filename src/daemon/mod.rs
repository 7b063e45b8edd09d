//! Node daemon: owns the TCP listener, peer registry, VFS, and journal for
//! the process lifetime, and wires together the accept loop, discovery,
//! and liveness background workers. Generalized from `NodeDaemon`'s
//! `start`/`stop`/`_accept_connections`/`_handle_client`, with the
//! teacher's `LanTasks` (cancellation token + `JoinHandle` bag) as the
//! orchestration shape.

mod broadcast;
mod handlers;
mod sync;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::discovery;
use crate::error::DaemonResult;
use crate::journal::MetadataJournal;
use crate::liveness::run_liveness_monitor;
use crate::peers::PeerRegistry;
use crate::protocol::{read_frame, validate_envelope, write_frame, Envelope};
use crate::sampler::{LoadSampler, NullSampler};
use crate::vfs::VirtualFileSystem;

pub use sync::{IntegrityReport, SyncEngine};

const INBOUND_READ_TIMEOUT_SECS: u64 = 30;

/// Everything a connection handler or message dispatcher needs. Held
/// behind an `Arc` so accept-loop workers and background tasks can share
/// it cheaply.
pub struct DaemonState {
    pub node_name: String,
    pub tcp_port: u16,
    pub vfs: Arc<VirtualFileSystem>,
    pub journal: Arc<MetadataJournal>,
    pub sync_engine: SyncEngine,
    pub registry: PeerRegistry,
    pub sampler: Box<dyn LoadSampler>,
}

pub struct Daemon {
    state: Arc<DaemonState>,
    config: Config,
}

pub struct DaemonTasks {
    pub cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl DaemonTasks {
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for h in self.handles {
            let _ = h.await;
        }
    }
}

impl Daemon {
    pub fn new(config: Config) -> DaemonResult<Self> {
        let vfs = Arc::new(VirtualFileSystem::new(&config.filesystem.root_path)?);
        let db_path = std::path::Path::new(&config.filesystem.root_path).join(&config.filesystem.metadata_db);
        let journal = Arc::new(MetadataJournal::open(db_path)?);
        let (registry, mut peer_events) = PeerRegistry::new();
        registry.load_static_peers(&config.peers);

        let sync_engine = SyncEngine::new(vfs.clone(), journal.clone(), config.node.name.clone());

        tokio::spawn(async move {
            use crate::peers::PeerEvent;
            while let Some(event) = peer_events.recv().await {
                match event {
                    PeerEvent::Connected(p) => log::info!("peer connected: {} ({}:{})", p.name, p.address, p.port),
                    PeerEvent::Disconnected(p) => log::warn!("peer disconnected: {} ({}:{})", p.name, p.address, p.port),
                }
            }
        });

        let state = Arc::new(DaemonState {
            node_name: config.node.name.clone(),
            tcp_port: config.network.tcp_port,
            vfs,
            journal,
            sync_engine,
            registry,
            sampler: Box::new(NullSampler),
        });

        Ok(Self { state, config })
    }

    /// Start the accept loop and every background worker, returning a
    /// handle the caller awaits/cancels for graceful shutdown.
    pub async fn start(&self) -> DaemonResult<DaemonTasks> {
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        let bind_addr = format!("{}:{}", self.config.network.bind_address, self.config.network.tcp_port);
        let listener = TcpListener::bind(&bind_addr).await?;
        log::info!("TCP server listening on {bind_addr}");

        {
            let state = self.state.clone();
            let ct = cancel.clone();
            handles.push(tokio::spawn(async move {
                accept_loop(listener, state, ct).await;
            }));
        }

        if self.config.network.discovery_enabled {
            let socket = discovery::bind_reusable_udp(&self.config.network.bind_address, self.config.network.discovery_port)?;
            let node_name = self.state.node_name.clone();
            let registry = self.state.registry.clone();
            let ct = cancel.clone();
            handles.push(tokio::spawn(async move {
                discovery::run_listener(node_name, registry, socket, ct).await;
            }));

            let node_name = self.state.node_name.clone();
            let tcp_port = self.config.network.tcp_port;
            let discovery_port = self.config.network.discovery_port;
            let ct = cancel.clone();
            handles.push(tokio::spawn(async move {
                discovery::run_announcer(node_name, tcp_port, discovery_port, ct).await;
            }));
        }

        {
            let node_name = self.state.node_name.clone();
            let registry = self.state.registry.clone();
            let reconnect_timeout = self.config.network.reconnect_timeout;
            let ct = cancel.clone();
            handles.push(tokio::spawn(async move {
                run_liveness_monitor(node_name, registry, reconnect_timeout, ct).await;
            }));
        }

        if self.config.filesystem.sync_on_startup {
            let state = self.state.clone();
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                log::info!("performing initial scan...");
                match state.sync_engine.scan_local_files() {
                    Ok(changes) if !changes.is_empty() => log::info!("scanned and found {} changes", changes.len()),
                    Ok(_) => {}
                    Err(e) => log::error!("initial scan failed: {e}"),
                }
            }));
        }

        log::info!("NodeDaemon started: {}", self.state.node_name);
        Ok(DaemonTasks { cancel, handles })
    }

    pub fn state(&self) -> &Arc<DaemonState> {
        &self.state
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<DaemonState>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let state = state.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, addr, state).await;
                        });
                    }
                    Err(e) => log::error!("error accepting connection: {e}"),
                }
            }
        }
    }
    log::debug!("accept loop stopped");
}

async fn handle_connection(mut stream: TcpStream, addr: SocketAddr, state: Arc<DaemonState>) {
    let read = timeout(Duration::from_secs(INBOUND_READ_TIMEOUT_SECS), read_frame(&mut stream)).await;
    let body = match read {
        Ok(Ok(Some(body))) => body,
        Ok(Ok(None)) => return,
        Ok(Err(e)) => {
            log::warn!("frame error from {addr}: {e}");
            return;
        }
        Err(_) => {
            log::warn!("inbound read from {addr} timed out");
            return;
        }
    };

    let text = match std::str::from_utf8(&body) {
        Ok(t) => t,
        Err(_) => return,
    };

    let response = match Envelope::from_json(text) {
        Ok(env) => {
            if let Err(e) = validate_envelope(&env) {
                Envelope::response(env.action.clone(), false, e.to_string(), state.node_name.clone(), serde_json::Value::Null)
            } else {
                refresh_peer_heartbeat(&state, addr);
                handlers::process_message(&state, &env)
            }
        }
        Err(e) => Envelope::response("error", false, e.to_string(), state.node_name.clone(), serde_json::Value::Null),
    };

    let payload = response.to_json();
    if let Err(e) = write_frame(&mut stream, payload.as_bytes()).await {
        log::error!("failed to send response to {addr}: {e}");
    }
}

/// Find a registered peer whose address matches the connection's remote
/// IP; if none is found, fall back to assuming the configured TCP port
/// (§4.5 step 3; the peer may not yet be registered).
fn refresh_peer_heartbeat(state: &DaemonState, addr: SocketAddr) {
    let ip = addr.ip().to_string();
    if let Some(peer) = state.registry.get_all_peers().into_iter().find(|p| p.address == ip) {
        state.registry.update_peer_heartbeat(&peer.address, peer.port);
    } else {
        state.registry.update_peer_heartbeat(&ip, state.tcp_port);
    }
}
