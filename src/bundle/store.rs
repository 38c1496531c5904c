//! Streaming writer over the bundle work directory.
//!
//! Writes are serialized per path; concurrent writes to different paths
//! proceed in parallel. A second write to the same path is a no-op when the
//! content is identical (blake3 compare) and a [`PeriscopeError::BundleConflict`]
//! otherwise; policy for conflicts belongs to the scheduler.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::core::errors::{PeriscopeError, Result};

/// Read access to bundle contents, shared by the live store and an
/// extracted archive.
pub trait BundleReader: Send + Sync {
    /// Read one file by bundle-relative path.
    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// All bundle-relative paths matching the glob, sorted.
    fn glob(&self, pattern: &str) -> Result<Vec<String>>;

    /// Whether the path exists.
    fn exists(&self, path: &str) -> bool {
        self.read(path).is_ok()
    }
}

/// The on-disk bundle being assembled in a temp location.
pub struct BundleStore {
    root: PathBuf,
    hashes: Mutex<HashMap<String, blake3::Hash>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    tmp_seq: AtomicU64,
}

impl BundleStore {
    /// Create the work directory under the system temp location.
    pub fn create(prefix: &str) -> Result<Self> {
        let base = std::env::temp_dir();
        let pid = std::process::id();
        for attempt in 0u32..64 {
            let root = base.join(format!("periscope-{prefix}-{pid}-{attempt}"));
            match std::fs::create_dir(&root) {
                Ok(()) => {
                    std::fs::create_dir(root.join(".tmp"))
                        .map_err(|e| PeriscopeError::io("creating bundle scratch dir", e))?;
                    debug!(root = %root.display(), "created bundle work directory");
                    return Ok(Self {
                        root,
                        hashes: Mutex::new(HashMap::new()),
                        locks: Mutex::new(HashMap::new()),
                        tmp_seq: AtomicU64::new(0),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(PeriscopeError::io("creating bundle work directory", e)),
            }
        }
        Err(PeriscopeError::internal(
            "could not allocate a bundle work directory",
        ))
    }

    /// Open an existing directory as a store (tests and re-analysis).
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(PeriscopeError::internal(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        std::fs::create_dir_all(root.join(".tmp"))
            .map_err(|e| PeriscopeError::io("creating bundle scratch dir", e))?;
        Ok(Self {
            root,
            hashes: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            tmp_seq: AtomicU64::new(0),
        })
    }

    /// The work directory root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a stream of (already redacted) bytes at a bundle-relative path.
    ///
    /// Idempotent for identical content; conflicting content errors without
    /// touching the existing file.
    pub async fn write(
        &self,
        path: &str,
        mut reader: impl AsyncRead + Send + Unpin,
    ) -> Result<()> {
        let rel = normalize_path(path)?;
        let lock = self.path_lock(&rel);
        let _guard = lock.lock().await;

        // Stream into scratch while hashing, then decide.
        let tmp = self.root.join(".tmp").join(format!(
            "write-{}",
            self.tmp_seq.fetch_add(1, Ordering::Relaxed)
        ));
        let mut hasher = blake3::Hasher::new();
        {
            let mut file = tokio::fs::File::create(&tmp)
                .await
                .map_err(|e| PeriscopeError::io("creating scratch file", e))?;
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = reader
                    .read(&mut buf)
                    .await
                    .map_err(|e| PeriscopeError::io("reading bundle source", e))?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                file.write_all(&buf[..n])
                    .await
                    .map_err(|e| PeriscopeError::io("writing scratch file", e))?;
            }
            file.flush()
                .await
                .map_err(|e| PeriscopeError::io("flushing scratch file", e))?;
        }
        let hash = hasher.finalize();

        let existing = self.hashes.lock().get(&rel).copied();
        if let Some(existing) = existing {
            let _ = tokio::fs::remove_file(&tmp).await;
            if existing == hash {
                debug!(path = %rel, "suppressing duplicate write");
                return Ok(());
            }
            return Err(PeriscopeError::bundle_conflict(rel));
        }

        let dest = self.root.join(&rel);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PeriscopeError::io("creating bundle directories", e))?;
        }
        tokio::fs::rename(&tmp, &dest)
            .await
            .map_err(|e| PeriscopeError::io("placing bundle file", e))?;
        self.hashes.lock().insert(rel, hash);
        Ok(())
    }

    /// Convenience wrapper for in-memory content.
    pub async fn write_bytes(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.write(path, std::io::Cursor::new(bytes.to_vec())).await
    }

    /// Number of files written so far.
    pub fn file_count(&self) -> usize {
        self.hashes.lock().len()
    }

    /// Remove the work directory. Used on cancellation and after archival.
    pub async fn remove(&self) -> Result<()> {
        tokio::fs::remove_dir_all(&self.root)
            .await
            .map_err(|e| PeriscopeError::io("removing bundle work directory", e))
    }

    fn path_lock(&self, rel: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(rel.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

impl BundleReader for BundleStore {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let rel = normalize_path(path)?;
        std::fs::read(self.root.join(&rel))
            .map_err(|e| PeriscopeError::io(format!("reading bundle file {rel}"), e))
    }

    fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        glob_dir(&self.root, pattern)
    }
}

/// Glob over a directory tree, returning sorted bundle-relative paths.
pub(crate) fn glob_dir(root: &Path, pattern: &str) -> Result<Vec<String>> {
    let glob = globset::GlobBuilder::new(pattern)
        .literal_separator(false)
        .build()
        .map_err(|e| PeriscopeError::spec("", "invalid-glob", e.to_string()))?
        .compile_matcher();

    let mut matches = Vec::new();
    for entry in walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if rel.starts_with(".tmp/") {
            continue;
        }
        if glob.is_match(&rel) {
            matches.push(rel);
        }
    }
    matches.sort();
    Ok(matches)
}

/// Validate and normalize a bundle-relative path.
pub(crate) fn normalize_path(path: &str) -> Result<String> {
    let path = path.trim_matches('/');
    if path.is_empty() {
        return Err(PeriscopeError::internal("empty bundle path"));
    }
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(PeriscopeError::internal(format!(
                "invalid bundle path {path:?}"
            )));
        }
    }
    Ok(path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, BundleStore) {
        let dir = tempdir().unwrap();
        let store = BundleStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn write_creates_parent_directories() {
        let (_dir, store) = store();
        store
            .write_bytes("cluster-resources/pods/demo.json", b"[]")
            .await
            .unwrap();
        assert_eq!(store.read("cluster-resources/pods/demo.json").unwrap(), b"[]");
    }

    #[tokio::test]
    async fn identical_rewrite_is_idempotent() {
        let (_dir, store) = store();
        store.write_bytes("a/file.txt", b"same").await.unwrap();
        store.write_bytes("a/file.txt", b"same").await.unwrap();
        assert_eq!(store.file_count(), 1);
    }

    #[tokio::test]
    async fn conflicting_rewrite_fails_and_preserves_original() {
        let (_dir, store) = store();
        store.write_bytes("a/file.txt", b"first").await.unwrap();
        let err = store.write_bytes("a/file.txt", b"second").await.unwrap_err();
        assert!(matches!(err, PeriscopeError::BundleConflict { ref path } if path == "a/file.txt"));
        assert_eq!(store.read("a/file.txt").unwrap(), b"first");
    }

    #[tokio::test]
    async fn concurrent_writes_to_distinct_paths_succeed() {
        let (_dir, store) = store();
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .write_bytes(&format!("files/{i}.txt"), format!("{i}").as_bytes())
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.file_count(), 16);
    }

    #[tokio::test]
    async fn glob_returns_sorted_relative_paths() {
        let (_dir, store) = store();
        store.write_bytes("b/2.json", b"{}").await.unwrap();
        store.write_bytes("b/1.json", b"{}").await.unwrap();
        store.write_bytes("c/readme.txt", b"x").await.unwrap();
        let matched = store.glob("b/*.json").unwrap();
        assert_eq!(matched, vec!["b/1.json", "b/2.json"]);
    }

    #[test]
    fn traversal_paths_are_rejected() {
        assert!(normalize_path("../etc/passwd").is_err());
        assert!(normalize_path("a//b").is_err());
        assert!(normalize_path("ok/nested/path.txt").is_ok());
    }
}
