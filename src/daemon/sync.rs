//! Sync engine: the idempotent apply path plus the maintenance sweeps
//! (startup scan, integrity verification) that keep the journal honest
//! about what's actually on disk. Generalized from the original
//! `SyncEngine`; `sync_file_to_peers`'s notification role is now the
//! broadcast module (§9 design note — channel instead of callback slots).

use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::DaemonResult;
use crate::journal::{FileRecord, MetadataDiff, MetadataJournal};
use crate::vfs::VirtualFileSystem;

pub struct SyncEngine {
    vfs: Arc<VirtualFileSystem>,
    journal: Arc<MetadataJournal>,
    node_name: String,
    /// Serializes the write -> checksum -> journal-upsert sequence per
    /// node so two concurrent `sync_file` applies to the same path can't
    /// interleave (§4.7, §5 "Sync apply" lock).
    sync_lock: Mutex<()>,
}

#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub valid: Vec<String>,
    pub corrupted: Vec<String>,
    pub missing: Vec<String>,
}

impl SyncEngine {
    pub fn new(vfs: Arc<VirtualFileSystem>, journal: Arc<MetadataJournal>, node_name: String) -> Self {
        Self { vfs, journal, node_name, sync_lock: Mutex::new(()) }
    }

    /// Apply a remote `sync_file`. Short-circuits if the checksum already
    /// matches what's on disk (idempotent re-apply). On checksum mismatch
    /// after write, deletes the just-written file and logs a failed sync
    /// row — the file must not be left in a half-written, unverified state.
    /// The whole write -> checksum -> journal-upsert sequence runs under
    /// `sync_lock` so two concurrent applies to the same path can't
    /// interleave their writes and checksums.
    pub fn apply_remote_change(
        &self,
        filepath: &str,
        content: &[u8],
        checksum: &str,
        size: i64,
        node_id: &str,
        operation: &str,
    ) -> DaemonResult<bool> {
        let _guard = self.sync_lock.lock();

        if let Some(local) = self.journal.get_file(filepath)? {
            if local.checksum == checksum {
                return Ok(true);
            }
        }

        if let Err(e) = self.vfs.write(filepath, content) {
            self.log_sync_failed(filepath, node_id, operation, &e.to_string())?;
            return Err(e);
        }

        let actual = self.vfs.get_checksum(filepath);
        if actual != checksum {
            let _ = self.vfs.delete(filepath);
            self.log_sync_failed(filepath, node_id, operation, "integrity mismatch: checksum does not match sender")?;
            return Ok(false);
        }

        self.journal.add_file(filepath, checksum, size, Some(node_id), operation)?;
        self.journal.log_sync(
            &Uuid::new_v4().to_string(),
            Some(node_id),
            Some(&self.node_name),
            Some(filepath),
            Some(operation),
            "success",
            None,
        )?;
        Ok(true)
    }

    fn log_sync_failed(&self, filepath: &str, node_id: &str, operation: &str, error: &str) -> DaemonResult<()> {
        self.journal.log_sync(
            &Uuid::new_v4().to_string(),
            Some(node_id),
            Some(&self.node_name),
            Some(filepath),
            Some(operation),
            "failed",
            Some(error),
        )
    }

    pub fn apply_remote_delete(&self, filepath: &str, node_id: &str) -> DaemonResult<()> {
        let _guard = self.sync_lock.lock();

        if self.vfs.exists(filepath) {
            self.vfs.delete(filepath)?;
        }
        self.journal.delete_file(filepath, Some(node_id))?;
        self.journal.log_sync(
            &Uuid::new_v4().to_string(),
            Some(node_id),
            Some(&self.node_name),
            Some(filepath),
            Some("delete"),
            "success",
            None,
        )?;
        Ok(())
    }

    /// Diff local journal state against a peer's metadata list (§4.7).
    pub fn request_full_sync(&self, remote_metadata: &[FileRecord]) -> DaemonResult<MetadataDiff> {
        self.journal.compare_metadata(remote_metadata)
    }

    /// Background startup scan: register on-disk files the journal doesn't
    /// know about yet, or whose checksum has drifted, tagged `scan` so
    /// they're never mistaken for locally-originated edits. No broadcast.
    pub fn scan_local_files(&self) -> DaemonResult<Vec<String>> {
        let mut changed = Vec::new();
        for filepath in self.vfs.get_all_files("")? {
            let checksum = self.vfs.get_checksum(&filepath);
            let size = self.vfs.get_size(&filepath) as i64;

            let needs_update = match self.journal.get_file(&filepath)? {
                None => true,
                Some(existing) => existing.checksum != checksum,
            };

            if needs_update {
                self.journal.add_file(&filepath, &checksum, size, Some(&self.node_name), "scan")?;
                changed.push(filepath);
            }
        }
        Ok(changed)
    }

    /// On-demand integrity sweep: classify every journaled path as valid,
    /// corrupted (checksum drift), or missing (no longer on disk).
    pub fn verify_integrity(&self) -> DaemonResult<IntegrityReport> {
        let mut report = IntegrityReport::default();
        for record in self.journal.get_all_files()? {
            if !self.vfs.exists(&record.filepath) {
                report.missing.push(record.filepath);
                continue;
            }
            let current = self.vfs.get_checksum(&record.filepath);
            if current == record.checksum {
                report.valid.push(record.filepath);
            } else {
                report.corrupted.push(record.filepath);
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::MetadataJournal;
    use crate::vfs::VirtualFileSystem;

    fn engine() -> (tempfile::TempDir, SyncEngine) {
        let dir = tempfile::tempdir().unwrap();
        let vfs = Arc::new(VirtualFileSystem::new(dir.path()).unwrap());
        let journal = Arc::new(MetadataJournal::open(":memory:").unwrap());
        (dir, SyncEngine::new(vfs, journal, "A".to_string()))
    }

    #[test]
    fn apply_remote_change_short_circuits_on_matching_checksum() {
        let (_dir, engine) = engine();
        let checksum = {
            use sha2::{Digest, Sha256};
            let digest = Sha256::digest(b"hello");
            digest.iter().fold(String::new(), |mut acc, b| {
                use std::fmt::Write;
                write!(acc, "{:02x}", b).unwrap();
                acc
            })
        };
        engine.journal.add_file("a.txt", &checksum, 5, Some("B"), "create").unwrap();
        let applied = engine.apply_remote_change("a.txt", b"hello", &checksum, 5, "B", "create").unwrap();
        assert!(applied);
        assert!(!engine.vfs.exists("a.txt"));
    }

    #[test]
    fn apply_remote_change_rolls_back_on_checksum_mismatch() {
        let (_dir, engine) = engine();
        let applied = engine
            .apply_remote_change("a.txt", b"hello", "0000000000000000000000000000000000000000000000000000000000000000", 5, "B", "create")
            .unwrap();
        assert!(!applied);
        assert!(!engine.vfs.exists("a.txt"));
        let history = engine.journal.get_sync_history(10).unwrap();
        assert_eq!(history[0].status.as_deref(), Some("failed"));
    }

    #[test]
    fn scan_local_files_registers_untracked_files_without_broadcast_side_effects() {
        let (_dir, engine) = engine();
        engine.vfs.write("pre-existing.txt", b"data").unwrap();
        let changed = engine.scan_local_files().unwrap();
        assert_eq!(changed, vec!["pre-existing.txt".to_string()]);
        assert!(engine.journal.get_file("pre-existing.txt").unwrap().is_some());
    }

    #[test]
    fn verify_integrity_classifies_corrupted_and_missing() {
        let (_dir, engine) = engine();
        engine.vfs.write("ok.txt", b"data").unwrap();
        engine.journal.add_file("ok.txt", &engine.vfs.get_checksum("ok.txt"), 4, Some("A"), "create").unwrap();

        engine.vfs.write("tampered.txt", b"data").unwrap();
        engine.journal.add_file("tampered.txt", "deadbeef", 4, Some("A"), "create").unwrap();

        engine.journal.add_file("gone.txt", "abc", 1, Some("A"), "create").unwrap();

        let report = engine.verify_integrity().unwrap();
        assert_eq!(report.valid, vec!["ok.txt".to_string()]);
        assert_eq!(report.corrupted, vec!["tampered.txt".to_string()]);
        assert_eq!(report.missing, vec!["gone.txt".to_string()]);
    }
}
