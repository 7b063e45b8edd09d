//! End-to-end scenarios over real loopback sockets: two in-process daemons
//! speaking the actual length-prefixed wire protocol to each other, per the
//! propagation and integrity walkthroughs this system is built around.
//!
//! Discovery is disabled in every test here — these exercise the TCP
//! command/sync/heartbeat path, not UDP broadcast, which the sandbox this
//! suite runs in may not route anyway.

use std::time::Duration;

use driftmesh::config::Config;
use driftmesh::daemon::Daemon;
use driftmesh::protocol::{read_frame, write_frame, Envelope, EnvelopeType};
use serde_json::json;
use tokio::net::TcpStream;

fn config_for(name: &str, tcp_port: u16, root: &std::path::Path, peers: Vec<String>) -> Config {
    let mut cfg = Config::default();
    cfg.node.name = name.to_string();
    cfg.network.tcp_port = tcp_port;
    cfg.network.bind_address = "127.0.0.1".to_string();
    cfg.network.discovery_enabled = false;
    cfg.filesystem.root_path = root.to_string_lossy().to_string();
    cfg.filesystem.sync_on_startup = false;
    cfg.peers = peers;
    cfg
}

async fn send(port: u16, env: Envelope) -> Envelope {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.expect("connect");
    write_frame(&mut stream, env.to_json().as_bytes()).await.expect("write frame");
    let body = read_frame(&mut stream).await.expect("read frame").expect("response frame");
    Envelope::from_json(std::str::from_utf8(&body).unwrap()).expect("parse response")
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..50 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition was not met within the deadline");
}

#[tokio::test]
async fn create_and_write_propagate_to_peer() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let (port_a, port_b) = (19870, 19871);

    let daemon_a = Daemon::new(config_for("A", port_a, dir_a.path(), vec![format!("127.0.0.1:{port_b}")])).unwrap();
    let tasks_a = daemon_a.start().await.unwrap();
    let daemon_b = Daemon::new(config_for("B", port_b, dir_b.path(), vec![])).unwrap();
    let tasks_b = daemon_b.start().await.unwrap();

    let resp = send(port_a, Envelope::new(EnvelopeType::Command, "create", "note.txt", json!(null), "A")).await;
    assert_eq!(resp.content["success"], json!(true));

    let resp = send(port_a, Envelope::new(EnvelopeType::Command, "write", "note.txt", json!("hello from A"), "A")).await;
    assert_eq!(resp.content["success"], json!(true));

    wait_until(|| dir_b.path().join("note.txt").exists()).await;
    wait_until(|| std::fs::read_to_string(dir_b.path().join("note.txt")).unwrap_or_default() == "hello from A").await;

    tasks_a.shutdown().await;
    tasks_b.shutdown().await;
}

#[tokio::test]
async fn delete_propagates_to_peer() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let (port_a, port_b) = (19872, 19873);

    let daemon_a = Daemon::new(config_for("A", port_a, dir_a.path(), vec![format!("127.0.0.1:{port_b}")])).unwrap();
    let tasks_a = daemon_a.start().await.unwrap();
    let daemon_b = Daemon::new(config_for("B", port_b, dir_b.path(), vec![])).unwrap();
    let tasks_b = daemon_b.start().await.unwrap();

    send(port_a, Envelope::new(EnvelopeType::Command, "create", "gone.txt", json!(null), "A")).await;
    wait_until(|| dir_b.path().join("gone.txt").exists()).await;

    let resp = send(port_a, Envelope::new(EnvelopeType::Command, "delete", "gone.txt", json!(null), "A")).await;
    assert_eq!(resp.content["success"], json!(true));

    wait_until(|| !dir_b.path().join("gone.txt").exists()).await;

    tasks_a.shutdown().await;
    tasks_b.shutdown().await;
}

#[tokio::test]
async fn nested_mkdir_propagates_to_peer() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let (port_a, port_b) = (19874, 19875);

    let daemon_a = Daemon::new(config_for("A", port_a, dir_a.path(), vec![format!("127.0.0.1:{port_b}")])).unwrap();
    let tasks_a = daemon_a.start().await.unwrap();
    let daemon_b = Daemon::new(config_for("B", port_b, dir_b.path(), vec![])).unwrap();
    let tasks_b = daemon_b.start().await.unwrap();

    let resp = send(port_a, Envelope::new(EnvelopeType::Command, "mkdir", "alpha/beta/gamma", json!(null), "A")).await;
    assert_eq!(resp.content["success"], json!(true));

    wait_until(|| dir_b.path().join("alpha/beta/gamma").is_dir()).await;

    tasks_a.shutdown().await;
    tasks_b.shutdown().await;
}

#[tokio::test]
async fn integrity_sweep_flags_tampered_file_after_propagation() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let (port_a, port_b) = (19876, 19877);

    let daemon_a = Daemon::new(config_for("A", port_a, dir_a.path(), vec![format!("127.0.0.1:{port_b}")])).unwrap();
    let tasks_a = daemon_a.start().await.unwrap();
    let daemon_b = Daemon::new(config_for("B", port_b, dir_b.path(), vec![])).unwrap();
    let tasks_b = daemon_b.start().await.unwrap();

    send(port_a, Envelope::new(EnvelopeType::Command, "create", "data.bin", json!(null), "A")).await;
    send(port_a, Envelope::new(EnvelopeType::Command, "write", "data.bin", json!("original"), "A")).await;
    wait_until(|| std::fs::read_to_string(dir_b.path().join("data.bin")).unwrap_or_default() == "original").await;

    std::fs::write(dir_b.path().join("data.bin"), "tampered off to the side of the journal").unwrap();

    let report = daemon_b.state().sync_engine.verify_integrity().unwrap();
    assert_eq!(report.corrupted, vec!["data.bin".to_string()]);
    assert!(report.missing.is_empty());

    tasks_a.shutdown().await;
    tasks_b.shutdown().await;
}

#[tokio::test]
async fn heartbeat_and_history_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let port = 19878;

    let daemon = Daemon::new(config_for("A", port, dir.path(), vec![])).unwrap();
    let tasks = daemon.start().await.unwrap();

    let resp = send(port, Envelope::new(EnvelopeType::Heartbeat, "ping", "", json!(null), "A")).await;
    assert_eq!(resp.action, "pong");
    assert_eq!(resp.content["success"], json!(true));
    assert_eq!(resp.content["data"]["node_name"], json!("A"));

    send(port, Envelope::new(EnvelopeType::Command, "create", "logged.txt", json!(null), "A")).await;

    let resp = send(port, Envelope::new(EnvelopeType::Command, "history", "", json!({"limit": 10}), "A")).await;
    assert_eq!(resp.content["success"], json!(true));
    let entries = resp.content["data"].as_array().unwrap();
    assert!(entries.iter().any(|e| e["filepath"] == json!("logged.txt")));

    tasks.shutdown().await;
}
