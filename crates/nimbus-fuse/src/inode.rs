//! The inode: in-memory metadata record for one drive item.
//!
//! Every mutable field lives behind a per-inode reader-writer lock.
//! Operations that cross a parent-child boundary always acquire the
//! parent's lock before the child's; see [`crate::cache`] for the
//! traversal primitives that enforce this.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use nimbus_core::types::{ContentHashes, ItemId};
use nimbus_graph::item::DriveItem;

use crate::upload::UploadSession;

/// Attribute size reported for directories.
pub const DIR_SIZE: u64 = 4096;

/// Default permission bits for files.
pub const DEFAULT_FILE_PERM: u32 = 0o644;

/// Default permission bits for directories.
pub const DEFAULT_DIR_PERM: u32 = 0o755;

/// Seconds since the epoch, for mtime stamping.
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The mutable state of an inode, guarded by the inode's lock.
#[derive(Debug, Clone)]
pub struct InodeState {
    /// Stable identifier; local until promoted.
    pub id: ItemId,
    /// Case-preserving name; sibling comparisons are case-insensitive.
    pub name: String,
    /// Id of the containing inode; empty for the root.
    pub parent_id: ItemId,
    /// Content length in bytes; directories report [`DIR_SIZE`].
    pub size: u64,
    /// Last modification, seconds since the epoch.
    pub mtime: u64,
    /// Type bits plus permissions.
    pub mode: u32,
    /// Recorded content hashes used to validate cached blobs.
    pub hashes: Option<ContentHashes>,
    /// Child ids for directories. `None` means "unknown, must fetch";
    /// an empty vector means "known empty".
    pub children: Option<Vec<ItemId>>,
    /// Number of directory children, maintained incrementally.
    pub subdir_count: u32,
    /// In-memory content, present only while the file is open.
    pub data: Option<Vec<u8>>,
    /// Local writes not yet handed to the upload manager.
    pub has_changes: bool,
    /// The in-flight upload for this inode, if any.
    pub upload_session: Option<Arc<UploadSession>>,
}

impl InodeState {
    /// A freshly created local file, content empty and dirty so the
    /// first flush uploads it.
    pub fn new_file(parent_id: ItemId, name: impl Into<String>, perm: u32) -> Self {
        Self {
            id: ItemId::local(),
            name: name.into(),
            parent_id,
            size: 0,
            mtime: now_unix(),
            mode: libc::S_IFREG | (perm & 0o7777),
            hashes: None,
            children: None,
            subdir_count: 0,
            data: Some(Vec::new()),
            has_changes: true,
            upload_session: None,
        }
    }

    /// A directory inode; the id comes from the server (directories are
    /// created remotely first).
    pub fn new_dir(id: ItemId, parent_id: ItemId, name: impl Into<String>, perm: u32) -> Self {
        Self {
            id,
            name: name.into(),
            parent_id,
            size: DIR_SIZE,
            mtime: now_unix(),
            mode: libc::S_IFDIR | (perm & 0o7777),
            hashes: None,
            children: Some(Vec::new()),
            subdir_count: 0,
            data: None,
            has_changes: false,
            upload_session: None,
        }
    }

    /// Maps a Graph drive item into inode state.
    pub fn from_drive_item(item: &DriveItem) -> Self {
        let is_dir = item.is_dir();
        Self {
            id: ItemId::new(item.id.clone()),
            name: item.name.clone(),
            parent_id: item
                .parent_id()
                .map(ItemId::new)
                .unwrap_or_else(|| ItemId::new("")),
            size: if is_dir { DIR_SIZE } else { item.size },
            mtime: item.mtime_unix(),
            mode: if is_dir {
                libc::S_IFDIR | DEFAULT_DIR_PERM
            } else {
                libc::S_IFREG | DEFAULT_FILE_PERM
            },
            hashes: item.content_hashes(),
            children: None,
            subdir_count: 0,
            data: None,
            has_changes: false,
            upload_session: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFDIR
    }

    /// Link count: directories count `.`, `..` and each subdirectory.
    pub fn nlink(&self) -> u32 {
        if self.is_dir() {
            2 + self.subdir_count
        } else {
            1
        }
    }

    /// Size as reported to `getattr`.
    pub fn attr_size(&self) -> u64 {
        if self.is_dir() {
            DIR_SIZE
        } else {
            self.size
        }
    }

    /// Applies a chmod: permission bits change, type bits are preserved.
    pub fn apply_mode(&mut self, mode: u32) {
        self.mode = (self.mode & libc::S_IFMT) | (mode & 0o7777);
    }
}

/// An inode: shared handle to locked state.
#[derive(Debug)]
pub struct Inode {
    state: RwLock<InodeState>,
}

impl Inode {
    pub fn new(state: InodeState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, InodeState> {
        self.state.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, InodeState> {
        self.state.write()
    }
}
