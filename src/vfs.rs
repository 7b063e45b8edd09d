//! Virtual filesystem: a path-sandboxed wrapper around the on-disk replica
//! root. Every method takes a root-relative path using forward slashes and
//! resolves it against the root before touching disk; anything that would
//! resolve outside the root is rejected rather than touched.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

use crate::error::{DaemonError, DaemonResult};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: f64,
}

#[derive(Debug, Clone, Default)]
pub struct VfsStats {
    pub total_files: u64,
    pub total_dirs: u64,
    pub total_size: u64,
}

pub struct VirtualFileSystem {
    root: PathBuf,
}

impl VirtualFileSystem {
    /// Create (if missing) and bind to `root`.
    pub fn new(root: impl Into<PathBuf>) -> DaemonResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            DaemonError::Vfs(format!("failed to create VFS root {}: {e}", root.display()))
        })?;
        let root = root
            .canonicalize()
            .map_err(|e| DaemonError::Vfs(format!("failed to resolve VFS root: {e}")))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Strip leading separators, join onto the root, and reject anything
    /// that resolves outside it. Mirrors the original `_resolve_path`'s
    /// `relative_to` escape check, using `path-cleaning` semantics since the
    /// target usually doesn't exist yet (so `canonicalize` can't be used
    /// directly on it — only on its closest existing ancestor).
    fn resolve(&self, path: &str) -> DaemonResult<PathBuf> {
        let trimmed = path.trim_start_matches(['/', '\\']);
        let joined = self.root.join(trimmed);
        let cleaned = clean_path(&joined);

        if !cleaned.starts_with(&self.root) {
            return Err(DaemonError::Sandbox(format!(
                "path '{path}' is outside the VFS root"
            )));
        }
        Ok(cleaned)
    }

    pub fn create(&self, filepath: &str) -> DaemonResult<()> {
        let abs = self.resolve(filepath)?;
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::OpenOptions::new().create(true).append(true).open(&abs)?;
        Ok(())
    }

    pub fn write(&self, filepath: &str, content: &[u8]) -> DaemonResult<()> {
        let abs = self.resolve(filepath)?;
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&abs, content)?;
        Ok(())
    }

    pub fn read(&self, filepath: &str) -> DaemonResult<Vec<u8>> {
        let abs = self.resolve(filepath)?;
        fs::read(&abs).map_err(|e| {
            DaemonError::Vfs(format!("failed to read '{filepath}': {e}"))
        })
    }

    pub fn delete(&self, filepath: &str) -> DaemonResult<()> {
        let abs = self.resolve(filepath)?;
        if !abs.exists() {
            return Err(DaemonError::Vfs(format!("not found: {filepath}")));
        }
        if abs.is_dir() {
            fs::remove_dir_all(&abs)?;
        } else {
            fs::remove_file(&abs)?;
        }
        Ok(())
    }

    pub fn mkdir(&self, dirpath: &str) -> DaemonResult<()> {
        let abs = self.resolve(dirpath)?;
        fs::create_dir_all(&abs)?;
        Ok(())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    pub fn is_file(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_dir()).unwrap_or(false)
    }

    /// Non-recursive listing, directories first then files, each
    /// alphabetical — matching the original's `sorted(..., key=(type != dir, name))`.
    pub fn list(&self, dirpath: &str) -> DaemonResult<Vec<DirEntryInfo>> {
        let abs = if dirpath.is_empty() {
            self.root.clone()
        } else {
            self.resolve(dirpath)?
        };
        if !abs.is_dir() {
            return Ok(Vec::new());
        }

        let mut items = Vec::new();
        for entry in fs::read_dir(&abs)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            let kind = if meta.is_dir() { EntryKind::Dir } else { EntryKind::File };
            items.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: if meta.is_file() { meta.len() } else { 0 },
                modified: mtime_secs(&meta),
                kind,
            });
        }
        items.sort_by(|a, b| {
            (a.kind != EntryKind::Dir, &a.name).cmp(&(b.kind != EntryKind::Dir, &b.name))
        });
        Ok(items)
    }

    pub fn get_size(&self, filepath: &str) -> u64 {
        self.resolve(filepath)
            .ok()
            .and_then(|p| fs::metadata(p).ok())
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// SHA-256 hex digest of the file's current bytes, or empty string if
    /// the path can't be read (matches the original's broad `except: ""`).
    pub fn get_checksum(&self, filepath: &str) -> String {
        match self.read(filepath) {
            Ok(bytes) => {
                let digest = Sha256::digest(&bytes);
                digest.iter().fold(String::with_capacity(64), |mut acc, b| {
                    use std::fmt::Write;
                    write!(acc, "{:02x}", b).unwrap();
                    acc
                })
            }
            Err(_) => String::new(),
        }
    }

    pub fn get_mtime(&self, filepath: &str) -> f64 {
        self.resolve(filepath)
            .ok()
            .and_then(|p| fs::metadata(p).ok())
            .map(|m| mtime_secs(&m))
            .unwrap_or(0.0)
    }

    pub fn copy(&self, src: &str, dst: &str) -> DaemonResult<()> {
        let src_abs = self.resolve(src)?;
        let dst_abs = self.resolve(dst)?;
        if !src_abs.exists() {
            return Err(DaemonError::Vfs(format!("copy source not found: {src}")));
        }
        if let Some(parent) = dst_abs.parent() {
            fs::create_dir_all(parent)?;
        }
        if src_abs.is_file() {
            fs::copy(&src_abs, &dst_abs)?;
        } else {
            copy_dir_recursive(&src_abs, &dst_abs)?;
        }
        Ok(())
    }

    pub fn move_path(&self, src: &str, dst: &str) -> DaemonResult<()> {
        let src_abs = self.resolve(src)?;
        let dst_abs = self.resolve(dst)?;
        if !src_abs.exists() {
            return Err(DaemonError::Vfs(format!("move source not found: {src}")));
        }
        if let Some(parent) = dst_abs.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&src_abs, &dst_abs)?;
        Ok(())
    }

    /// Recursively enumerate every file under `base_path` (root if empty),
    /// returning root-relative, forward-slash-normalized paths, sorted.
    pub fn get_all_files(&self, base_path: &str) -> DaemonResult<Vec<String>> {
        let abs = if base_path.is_empty() {
            self.root.clone()
        } else {
            self.resolve(base_path)?
        };

        let mut files = Vec::new();
        walk_files(&abs, &mut files)?;
        let mut rel: Vec<String> = files
            .into_iter()
            .filter_map(|p| {
                p.strip_prefix(&self.root)
                    .ok()
                    .map(|r| r.to_string_lossy().replace('\\', "/"))
            })
            .collect();
        rel.sort();
        Ok(rel)
    }

    pub fn get_stats(&self) -> VfsStats {
        let mut stats = VfsStats::default();
        let _ = walk_stats(&self.root, &mut stats);
        stats
    }
}

fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) -> DaemonResult<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn walk_stats(dir: &Path, stats: &mut VfsStats) -> DaemonResult<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            stats.total_dirs += 1;
            walk_stats(&path, stats)?;
        } else {
            stats.total_files += 1;
            stats.total_size += entry.metadata()?.len();
        }
    }
    Ok(())
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> DaemonResult<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if from.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

fn mtime_secs(meta: &fs::Metadata) -> f64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Lexically normalize `..`/`.` components without touching the filesystem
/// (the target of a `create`/`write` usually doesn't exist yet, so
/// `Path::canonicalize` isn't available). This is sufficient for the
/// sandbox check because the result is then compared against the
/// already-canonicalized root with `starts_with`.
fn clean_path(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vfs() -> (tempfile::TempDir, VirtualFileSystem) {
        let dir = tempfile::tempdir().unwrap();
        let vfs = VirtualFileSystem::new(dir.path()).unwrap();
        (dir, vfs)
    }

    #[test]
    fn create_write_read_round_trip() {
        let (_dir, fs) = vfs();
        fs.create("a.txt").unwrap();
        assert!(fs.exists("a.txt"));
        fs.write("a.txt", b"hello").unwrap();
        assert_eq!(fs.read("a.txt").unwrap(), b"hello");
    }

    #[test]
    fn escaping_the_root_is_rejected() {
        let (_dir, fs) = vfs();
        let err = fs.write("../../etc/passwd", b"x").unwrap_err();
        assert!(matches!(err, DaemonError::Sandbox(_)));
    }

    #[test]
    fn nested_mkdir_creates_all_segments() {
        let (_dir, fs) = vfs();
        fs.mkdir("x/y/z").unwrap();
        assert!(fs.is_dir("x/y/z"));
        assert!(fs.is_dir("x/y"));
    }

    #[test]
    fn delete_removes_file() {
        let (_dir, fs) = vfs();
        fs.create("a.txt").unwrap();
        fs.delete("a.txt").unwrap();
        assert!(!fs.exists("a.txt"));
    }

    #[test]
    fn get_all_files_is_recursive_and_sorted() {
        let (_dir, fs) = vfs();
        fs.write("b.txt", b"1").unwrap();
        fs.write("a/c.txt", b"2").unwrap();
        let files = fs.get_all_files("").unwrap();
        assert_eq!(files, vec!["a/c.txt".to_string(), "b.txt".to_string()]);
    }

    #[test]
    fn checksum_matches_sha256_of_bytes() {
        let (_dir, fs) = vfs();
        fs.write("a.txt", b"hello").unwrap();
        let expected = {
            let digest = Sha256::digest(b"hello");
            digest.iter().fold(String::new(), |mut acc, b| {
                use std::fmt::Write;
                write!(acc, "{:02x}", b).unwrap();
                acc
            })
        };
        assert_eq!(fs.get_checksum("a.txt"), expected);
    }
}
