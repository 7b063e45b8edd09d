//! Message dispatch: turns a validated inbound [`Envelope`] into a response
//! envelope, generalized from `_process_message`/`_handle_command`/
//! `_handle_sync`/`_handle_heartbeat`. Every branch downgrades failures to
//! `{success:false, message}` rather than propagating — a malformed or
//! failing single request must not take down the connection's worker.

use serde_json::json;

use crate::protocol::{decode_binary, encode_binary, Envelope, EnvelopeType};

use super::broadcast::broadcast_message;
use super::DaemonState;

pub fn process_message(state: &DaemonState, env: &Envelope) -> Envelope {
    match env.type_.as_str() {
        "command" => handle_command(state, env),
        "sync" => handle_sync(state, env),
        "heartbeat" => handle_heartbeat(state, env),
        other => Envelope::response(env.action.clone(), false, format!("unknown message type: {other}"), state.node_name.clone(), serde_json::Value::Null),
    }
}

fn handle_command(state: &DaemonState, env: &Envelope) -> Envelope {
    let is_local = env.origin == state.node_name;
    let path = env.path.as_str();

    match env.action.as_str() {
        "create" => {
            let result = state.vfs.create(path);
            if result.is_ok() {
                let checksum = state.vfs.get_checksum(path);
                let size = state.vfs.get_size(path) as i64;
                let _ = state.journal.add_file(path, &checksum, size, Some(&env.origin), "create");
                if is_local {
                    if let Ok(content) = state.vfs.read(path) {
                        broadcast_sync_file(state, path, &content, &checksum, size, "create");
                    }
                }
            }
            respond(state, "create", result.is_ok(), "File created", "Failed to create file")
        }
        "write" => {
            let content = decode_write_content(&env.content);
            let result = state.vfs.write(path, &content);
            if result.is_ok() {
                let checksum = state.vfs.get_checksum(path);
                let size = state.vfs.get_size(path) as i64;
                let _ = state.journal.add_file(path, &checksum, size, Some(&env.origin), "modify");
                if is_local {
                    broadcast_sync_file(state, path, &content, &checksum, size, "modify");
                }
            }
            respond(state, "write", result.is_ok(), "File written", "Failed to write file")
        }
        "read" => match state.vfs.read(path) {
            Ok(content) => Envelope::response("read", true, "File read", state.node_name.clone(), json!(encode_binary(&content))),
            Err(_) => respond(state, "read", false, "", "Failed to read file"),
        },
        "delete" => {
            let result = state.vfs.delete(path);
            if result.is_ok() {
                let _ = state.journal.delete_file(path, Some(&env.origin));
                if is_local {
                    broadcast_message(
                        &state.registry,
                        Envelope::new(EnvelopeType::Command, "delete", path, serde_json::Value::Null, state.node_name.clone()),
                    );
                }
            }
            respond(state, "delete", result.is_ok(), "File deleted", "Failed to delete file")
        }
        "mkdir" => {
            let result = state.vfs.mkdir(path);
            if result.is_ok() {
                let _ = state.journal.add_file(path, "", 0, Some(&env.origin), "mkdir");
                if is_local {
                    broadcast_message(
                        &state.registry,
                        Envelope::new(EnvelopeType::Command, "mkdir", path, serde_json::Value::Null, state.node_name.clone()),
                    );
                }
            }
            respond(state, "mkdir", result.is_ok(), "Directory created", "Failed to create directory")
        }
        "list" => match state.vfs.list(path) {
            Ok(items) => {
                let data: Vec<_> = items
                    .into_iter()
                    .map(|i| json!({"name": i.name, "type": if i.kind == crate::vfs::EntryKind::Dir {"dir"} else {"file"}, "size": i.size, "modified": i.modified}))
                    .collect();
                Envelope::response("list", true, "Listed directory", state.node_name.clone(), json!(data))
            }
            Err(e) => respond_err(state, "list", &e.to_string()),
        },
        "history" => {
            let limit = env.content.get("limit").and_then(|v| v.as_i64()).unwrap_or(50);
            match state.journal.get_operation_history(limit, None) {
                Ok(history) => Envelope::response("history", true, "History retrieved", state.node_name.clone(), json!(history_to_json(&history))),
                Err(e) => respond_err(state, "history", &e.to_string()),
            }
        }
        "loadbal" => {
            let sample = state.sampler.sample();
            let stats = json!({
                "node_name": state.node_name,
                "cpu_percent": sample.cpu_percent,
                "memory_percent": sample.memory_percent,
                "disk_percent": sample.disk_percent,
                "active_peers": state.registry.get_peer_count(),
            });
            Envelope::response("loadbal", true, "Load stats retrieved", state.node_name.clone(), stats)
        }
        other => Envelope::response(env.action.clone(), false, format!("unknown command: {other}"), state.node_name.clone(), serde_json::Value::Null),
    }
}

fn handle_sync(state: &DaemonState, env: &Envelope) -> Envelope {
    match env.action.as_str() {
        "sync_file" => {
            let data_b64 = env.content.get("data").and_then(|v| v.as_str()).unwrap_or("");
            let meta = env.content.get("metadata").cloned().unwrap_or_default();
            let checksum = meta.get("checksum").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let size = meta.get("size").and_then(|v| v.as_i64()).unwrap_or(0);
            let operation = meta.get("operation").and_then(|v| v.as_str()).unwrap_or("sync").to_string();

            let content = decode_binary(data_b64).unwrap_or_default();
            match state.sync_engine.apply_remote_change(&env.path, &content, &checksum, size, &env.origin, &operation) {
                Ok(applied) => respond(state, "sync_file", applied, "File synced", "Failed to sync file"),
                Err(e) => respond_err(state, "sync_file", &e.to_string()),
            }
        }
        "sync_metadata" => match state.journal.get_all_files() {
            Ok(files) => Envelope::response("sync_metadata", true, "Metadata sent", state.node_name.clone(), json!(file_records_to_json(&files))),
            Err(e) => respond_err(state, "sync_metadata", &e.to_string()),
        },
        "request_sync" => {
            let remote: Vec<crate::journal::FileRecord> = env
                .content
                .as_array()
                .map(|arr| arr.iter().filter_map(json_to_file_record).collect())
                .unwrap_or_default();
            match state.sync_engine.request_full_sync(&remote) {
                Ok(diff) => Envelope::response(
                    "request_sync",
                    true,
                    "Sync diff computed",
                    state.node_name.clone(),
                    json!({"missing": diff.missing, "outdated": diff.outdated, "newer": diff.newer}),
                ),
                Err(e) => respond_err(state, "request_sync", &e.to_string()),
            }
        }
        "request_file" => match state.vfs.read(&env.path) {
            Ok(content) => {
                let meta = state.journal.get_file(&env.path).ok().flatten();
                let data = json!({
                    "content": encode_binary(&content),
                    "checksum": meta.as_ref().map(|m| m.checksum.clone()).unwrap_or_default(),
                    "size": content.len(),
                    "node_id": state.node_name,
                });
                Envelope::response("request_file", true, "File sent", state.node_name.clone(), data)
            }
            Err(_) => respond(state, "request_file", false, "", "File not found"),
        },
        other => Envelope::response(env.action.clone(), false, format!("unknown sync action: {other}"), state.node_name.clone(), serde_json::Value::Null),
    }
}

fn handle_heartbeat(state: &DaemonState, _env: &Envelope) -> Envelope {
    let journal_stats = state.journal.get_stats().unwrap_or_default();
    let vfs_stats = state.vfs.get_stats();
    let data = json!({
        "node_name": state.node_name,
        "total_files": journal_stats.total_files,
        "total_size": journal_stats.total_size,
        "recent_syncs": journal_stats.recent_syncs,
        "vfs_total_files": vfs_stats.total_files,
        "vfs_total_dirs": vfs_stats.total_dirs,
    });
    Envelope::response("pong", true, "Alive", state.node_name.clone(), data)
}

fn broadcast_sync_file(state: &DaemonState, path: &str, content: &[u8], checksum: &str, size: i64, operation: &str) {
    let data = json!({
        "data": encode_binary(content),
        "metadata": {"checksum": checksum, "size": size, "operation": operation},
    });
    broadcast_message(
        &state.registry,
        Envelope::new(EnvelopeType::Sync, "sync_file", path, data, state.node_name.clone()),
    );
}

fn decode_write_content(content: &serde_json::Value) -> Vec<u8> {
    match content.as_str() {
        Some(s) => s.as_bytes().to_vec(),
        None => content.to_string().into_bytes(),
    }
}

fn respond(state: &DaemonState, action: &str, success: bool, ok_msg: &str, err_msg: &str) -> Envelope {
    let message = if success { ok_msg } else { err_msg };
    Envelope::response(action, success, message, state.node_name.clone(), serde_json::Value::Null)
}

fn respond_err(state: &DaemonState, action: &str, err: &str) -> Envelope {
    Envelope::response(action, false, err, state.node_name.clone(), serde_json::Value::Null)
}

fn file_records_to_json(records: &[crate::journal::FileRecord]) -> Vec<serde_json::Value> {
    records.iter().map(record_to_json).collect()
}

fn history_to_json(records: &[crate::journal::FileRecord]) -> Vec<serde_json::Value> {
    records.iter().map(record_to_json).collect()
}

fn record_to_json(r: &crate::journal::FileRecord) -> serde_json::Value {
    json!({
        "filepath": r.filepath,
        "checksum": r.checksum,
        "size": r.size,
        "version": r.version,
        "modified_time": r.modified_time,
        "created_time": r.created_time,
        "node_id": r.node_id,
        "operation_type": r.operation_type,
        "is_deleted": r.is_deleted,
    })
}

fn json_to_file_record(v: &serde_json::Value) -> Option<crate::journal::FileRecord> {
    Some(crate::journal::FileRecord {
        filepath: v.get("filepath")?.as_str()?.to_string(),
        checksum: v.get("checksum").and_then(|c| c.as_str()).unwrap_or("").to_string(),
        size: v.get("size").and_then(|c| c.as_i64()).unwrap_or(0),
        version: v.get("version").and_then(|c| c.as_i64()).unwrap_or(0),
        modified_time: v.get("modified_time").and_then(|c| c.as_f64()).unwrap_or(0.0),
        created_time: v.get("created_time").and_then(|c| c.as_f64()).unwrap_or(0.0),
        node_id: v.get("node_id").and_then(|c| c.as_str()).map(String::from),
        operation_type: v.get("operation_type").and_then(|c| c.as_str()).map(String::from),
        is_deleted: v.get("is_deleted").and_then(|c| c.as_bool()).unwrap_or(false),
    })
}
