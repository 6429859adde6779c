//! Durable keyed blob store backed by an embedded database.
//!
//! One single-file `sled` database with two trees:
//! - `content`: inode id → file bytes, written on flush and deleted on
//!   unlink/rmdir or delta-driven invalidation.
//! - `meta`: small auxiliary records, currently the serialized metadata
//!   snapshot (inode graph + delta cursor).
//!
//! Writes are flushed before returning, so a blob reported as stored
//! survives a crash. The store is internally concurrency-safe and needs
//! no caller-side locking.

use std::path::Path;

use thiserror::Error;
use tracing::debug;

use nimbus_core::types::ItemId;

const CONTENT_TREE: &str = "content";
const META_TREE: &str = "meta";

/// Errors from the on-disk store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend: {0}")]
    Backend(#[from] sled::Error),
}

/// Handle to the content database.
pub struct ContentStore {
    db: sled::Db,
    content: sled::Tree,
    meta: sled::Tree,
}

impl ContentStore {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref())?;
        let content = db.open_tree(CONTENT_TREE)?;
        let meta = db.open_tree(META_TREE)?;
        debug!(path = %path.as_ref().display(), "opened content store");
        Ok(Self { db, content, meta })
    }

    /// Returns the blob for `id`, or `None` if absent.
    pub fn get(&self, id: &ItemId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.content.get(id.as_str())?.map(|v| v.to_vec()))
    }

    /// Stores `data` under `id`, durably.
    pub fn put(&self, id: &ItemId, data: &[u8]) -> Result<(), StoreError> {
        self.content.insert(id.as_str(), data)?;
        self.content.flush()?;
        debug!(id = %id, bytes = data.len(), "stored content blob");
        Ok(())
    }

    /// Removes the blob for `id`, if any.
    pub fn delete(&self, id: &ItemId) -> Result<(), StoreError> {
        if self.content.remove(id.as_str())?.is_some() {
            debug!(id = %id, "deleted content blob");
        }
        Ok(())
    }

    /// Whether a blob exists for `id`.
    pub fn contains(&self, id: &ItemId) -> Result<bool, StoreError> {
        Ok(self.content.contains_key(id.as_str())?)
    }

    /// Moves the blob stored under `old` to the key `new`.
    ///
    /// Used when a local id is promoted to a server-assigned one; the
    /// cached bytes must follow the id. A missing source blob is not an
    /// error (the content may only exist in memory).
    pub fn rekey(&self, old: &ItemId, new: &ItemId) -> Result<(), StoreError> {
        if let Some(blob) = self.content.remove(old.as_str())? {
            self.content.insert(new.as_str(), blob)?;
            self.content.flush()?;
            debug!(old = %old, new = %new, "rekeyed content blob");
        }
        Ok(())
    }

    /// Stores an auxiliary record under `key` in the meta namespace.
    pub fn put_meta(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        self.meta.insert(key, data)?;
        self.meta.flush()?;
        Ok(())
    }

    /// Returns the auxiliary record under `key`, or `None`.
    pub fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.meta.get(key)?.map(|v| v.to_vec()))
    }

    /// Removes the auxiliary record under `key`, if any.
    pub fn delete_meta(&self, key: &str) -> Result<(), StoreError> {
        self.meta.remove(key)?;
        Ok(())
    }

    /// Flushes all trees to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
