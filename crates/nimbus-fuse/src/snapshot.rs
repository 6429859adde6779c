//! Metadata snapshot: serializing the inode graph (and the delta cursor)
//! into the content store's meta namespace, and restoring it on mount.
//!
//! Only durable metadata is captured: open-file content and in-flight
//! upload handles are deliberately dropped, and `has_changes` is not
//! persisted - an unmount with a failed upload loses that pending upload,
//! which is within the single-host durability posture.

use serde::{Deserialize, Serialize};

use nimbus_cache::ContentStore;
use nimbus_core::types::{ContentHashes, ItemId};

use crate::cache::MetadataCache;
use crate::inode::InodeState;

/// Key of the snapshot record in the meta namespace.
pub const SNAPSHOT_META_KEY: &str = "metadata-snapshot";

/// Serializable projection of one inode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InodeRecord {
    pub id: ItemId,
    pub name: String,
    pub parent_id: ItemId,
    pub size: u64,
    pub mtime: u64,
    pub mode: u32,
    pub hashes: Option<ContentHashes>,
    pub children: Option<Vec<ItemId>>,
    pub subdir_count: u32,
}

impl From<&InodeState> for InodeRecord {
    fn from(state: &InodeState) -> Self {
        Self {
            id: state.id.clone(),
            name: state.name.clone(),
            parent_id: state.parent_id.clone(),
            size: state.size,
            mtime: state.mtime,
            mode: state.mode,
            hashes: state.hashes.clone(),
            children: state.children.clone(),
            subdir_count: state.subdir_count,
        }
    }
}

impl InodeRecord {
    /// Rehydrates inode state; volatile fields start empty.
    pub fn into_state(self) -> InodeState {
        InodeState {
            id: self.id,
            name: self.name,
            parent_id: self.parent_id,
            size: self.size,
            mtime: self.mtime,
            mode: self.mode,
            hashes: self.hashes,
            children: self.children,
            subdir_count: self.subdir_count,
            data: None,
            has_changes: false,
            upload_session: None,
        }
    }
}

/// The persisted form of the whole metadata cache.
#[derive(Debug, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    pub root_id: ItemId,
    /// The delta cursor; absence triggers a reindex from "latest".
    pub delta_link: Option<String>,
    pub items: Vec<InodeRecord>,
}

/// Captures the current cache contents.
pub fn capture(cache: &MetadataCache) -> MetadataSnapshot {
    MetadataSnapshot {
        root_id: cache.root_id(),
        delta_link: cache.delta_link(),
        items: cache
            .snapshot_states()
            .iter()
            .map(InodeRecord::from)
            .collect(),
    }
}

/// Serializes the cache into the store's meta namespace.
pub fn save(cache: &MetadataCache, store: &ContentStore) -> anyhow::Result<()> {
    let snapshot = capture(cache);
    let bytes = serde_json::to_vec(&snapshot)?;
    store.put_meta(SNAPSHOT_META_KEY, &bytes)?;
    Ok(())
}

/// Loads the snapshot, if one was ever saved.
pub fn load(store: &ContentStore) -> anyhow::Result<Option<MetadataSnapshot>> {
    match store.get_meta(SNAPSHOT_META_KEY)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Rebuilds the cache from a snapshot. Child lists are part of the
/// records, so inodes are installed directly rather than re-linked.
pub fn restore(cache: &MetadataCache, snapshot: MetadataSnapshot) {
    let root_id = snapshot.root_id.clone();
    for record in snapshot.items {
        let is_root = record.id == root_id;
        let state = record.into_state();
        if is_root {
            cache.set_root(std::sync::Arc::new(crate::inode::Inode::new(state)));
        } else {
            cache.install(state);
        }
    }
    cache.set_delta_link(snapshot.delta_link);
}
