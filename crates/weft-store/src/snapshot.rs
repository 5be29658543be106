//! Encrypted snapshot files
//!
//! One file per room, `<urlencode(roomName)>.dat`, containing exactly
//! the sealed blob of the room's encoded document state. Writes go to a
//! `.tmp` sibling and are renamed into place; the rename is the
//! durability boundary, so a crash mid-write leaves the previous
//! snapshot intact. Writes to the same room are serialized by a
//! per-room single-flight lock; different rooms flush in parallel.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;
use weft_crypto::RoomKey;

use crate::error::{Result, StoreError};

/// Snapshot file extension
const SNAPSHOT_EXT: &str = "dat";

/// Encrypted per-room snapshot store rooted at one directory
#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SnapshotStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            locks: DashMap::new(),
        })
    }

    /// Path of a room's snapshot file
    pub fn snapshot_path(&self, room: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{SNAPSHOT_EXT}", urlencoding::encode(room)))
    }

    fn lock_for(&self, room: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(room.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Encrypt and atomically write a room's snapshot
    ///
    /// A flush already in progress for the same room holds the
    /// single-flight lock; this call queues behind it rather than
    /// preempting.
    pub async fn write(&self, room: &str, key: &RoomKey, plaintext: Vec<u8>) -> Result<()> {
        let lock = self.lock_for(room);
        let _guard = lock.lock().await;

        // Sealing up to 100 MB is CPU work; keep it off the runtime.
        let key = key.clone();
        let blob = tokio::task::spawn_blocking(move || weft_crypto::seal(&key, &plaintext))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;

        let path = self.snapshot_path(room);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &blob).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Read and decrypt a room's snapshot
    ///
    /// Returns `Ok(None)` when no snapshot exists. Decryption failure
    /// is an error but never deletes the file — the operator may still
    /// recover it with the right key.
    pub async fn read(&self, room: &str, key: &RoomKey) -> Result<Option<Vec<u8>>> {
        let path = self.snapshot_path(room);
        let blob = match tokio::fs::read(&path).await {
            Ok(blob) => blob,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let key = key.clone();
        let plaintext = tokio::task::spawn_blocking(move || weft_crypto::open(&key, &blob))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;
        Ok(Some(plaintext))
    }

    /// Room names with a persisted snapshot
    ///
    /// Files whose names do not url-decode are skipped with a warning;
    /// stray `.tmp` files from an interrupted write are ignored.
    pub async fn scan(&self) -> Result<Vec<String>> {
        let mut rooms = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match urlencoding::decode(stem) {
                Ok(room) => rooms.push(room.into_owned()),
                Err(e) => warn!(file = %path.display(), error = %e, "skipping undecodable snapshot name"),
            }
        }
        rooms.sort();
        Ok(rooms)
    }

    /// Directory this store persists into
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
