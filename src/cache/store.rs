//! On-disk store of synthesized audio, one file per cache key.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};

use super::CacheKey;

/// File extension of stored entries.
pub const ENTRY_EXTENSION: &str = "mp3";

/// Suffix appended to an entry's file name while it is being written.
const PARTIAL_SUFFIX: &str = "part";

static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Errors raised by [`CacheStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create cache directory {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read cache entry {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write cache entry {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A directory of `<key>.mp3` files.
///
/// Entries are written to a sibling `<key>.mp3.<writer>.part` file and
/// renamed into place, so a reader only ever sees a missing file or a complete
/// one. Concurrent writers of the same key never share a temp file; the last
/// rename wins.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Opens the store at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] if the path cannot be resolved or created.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref();
        let open_err = |source| StoreError::Open {
            path: root.to_path_buf(),
            source,
        };
        let root = std::path::absolute(root).map_err(open_err)?;
        tokio::fs::create_dir_all(&root).await.map_err(open_err)?;
        debug!(root = %root.display(), "cache store ready");
        Ok(Self { root })
    }

    /// Returns the directory entries live in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the path of the entry for `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{key}.{ENTRY_EXTENSION}"))
    }

    fn partial_path_for(&self, key: &CacheKey) -> PathBuf {
        let writer = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        self.root.join(format!(
            "{key}.{ENTRY_EXTENSION}.{}-{writer}.{PARTIAL_SUFFIX}",
            std::process::id()
        ))
    }

    /// Reads the entry for `key` in full.
    ///
    /// Returns `Ok(None)` when no entry exists. Any other I/O failure is an
    /// error, never a miss.
    pub async fn lookup(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read { path, source }),
        }
    }

    /// Stores `data` under `key`, replacing any existing entry atomically.
    pub async fn persist(&self, key: &CacheKey, data: &[u8]) -> Result<(), StoreError> {
        let partial = self.partial_path_for(key);
        let path = self.path_for(key);

        if let Err(source) = tokio::fs::write(&partial, data).await {
            discard(&partial).await;
            return Err(StoreError::Write {
                path: partial,
                source,
            });
        }

        if let Err(source) = tokio::fs::rename(&partial, &path).await {
            discard(&partial).await;
            return Err(StoreError::Write { path, source });
        }

        debug!(key = %key, bytes = data.len(), "cache entry written");
        Ok(())
    }
}

async fn discard(partial: &Path) {
    match tokio::fs::remove_file(partial).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            warn!(path = %partial.display(), error = %e, "failed to remove partial cache file");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(name: &str) -> CacheKey {
        CacheKey::from_preferred(name).unwrap()
    }

    fn leftover_partials(store: &CacheStore) -> usize {
        std::fs::read_dir(store.root())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".part")
            })
            .count()
    }

    #[tokio::test]
    async fn open_creates_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("a").join("b");
        let store = CacheStore::open(&root).await.unwrap();
        assert!(root.is_dir());
        assert!(store.root().is_absolute());
    }

    #[tokio::test]
    async fn missing_entry_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        assert!(store.lookup(&key("absent")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn persist_then_lookup_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        let k = CacheKey::from_payload(&json!({"input": "hi"}));
        let audio = vec![0x49, 0x44, 0x33, 0x04, 0x00, 0xff];

        store.persist(&k, &audio).await.unwrap();

        assert_eq!(store.lookup(&k).await.unwrap().as_deref(), Some(&audio[..]));
        assert!(store.path_for(&k).ends_with(format!("{k}.mp3")));
        assert_eq!(leftover_partials(&store), 0);
    }

    #[tokio::test]
    async fn persist_replaces_existing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        let k = key("line-1");

        store.persist(&k, b"old").await.unwrap();
        store.persist(&k, b"newer").await.unwrap();

        assert_eq!(store.lookup(&k).await.unwrap().as_deref(), Some(&b"newer"[..]));
    }

    #[tokio::test]
    async fn concurrent_writers_leave_one_complete_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        let k = key("shared");
        let a = vec![b'a'; 64 * 1024];
        let b = vec![b'b'; 64 * 1024];

        let (ra, rb) = tokio::join!(store.persist(&k, &a), store.persist(&k, &b));
        ra.unwrap();
        rb.unwrap();

        let stored = store.lookup(&k).await.unwrap().unwrap();
        assert!(stored[..] == a[..] || stored[..] == b[..]);
        assert_eq!(leftover_partials(&store), 0);
    }

    #[tokio::test]
    async fn entry_paths_stay_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        let k = CacheKey::derive(&json!({}), Some("../../outside/evil name"));
        let path = store.path_for(&k);
        assert_eq!(path.parent(), Some(store.root()));
    }

    #[tokio::test]
    async fn unreadable_entry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        let k = key("is-a-dir");
        std::fs::create_dir(store.path_for(&k)).unwrap();

        assert!(matches!(
            store.lookup(&k).await,
            Err(StoreError::Read { .. })
        ));
    }

    #[tokio::test]
    async fn failed_write_leaves_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        let k = key("blocked");
        // A non-empty directory in the final position makes the rename fail.
        let target = store.path_for(&k);
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep"), b"x").unwrap();

        assert!(matches!(
            store.persist(&k, b"audio").await,
            Err(StoreError::Write { .. })
        ));
        assert_eq!(leftover_partials(&store), 0);
    }
}
