//! VFS operation handlers.
//!
//! The translation from kernel filesystem operations onto the metadata
//! cache, the content store and the upload manager. Handlers never call
//! the HTTP client for content directly; reads go through the content
//! store, writes through the upload manager.
//!
//! While offline, the namespace mutations (`create`, `mkdir`, `rename`,
//! `unlink`, `rmdir`) are refused with a remote-I/O error; reads from
//! cached content keep working, and plain writes are absorbed locally.

use std::sync::Arc;

use tracing::{debug, warn};

use nimbus_cache::integrity;
use nimbus_core::errors::{FsError, FsResult};
use nimbus_core::types::ItemId;
use nimbus_graph::GraphError;

use crate::context::FsContext;
use crate::inode::{now_unix, Inode, InodeState};
use crate::upload::UploadSession;

/// Fixed block size reported by `statfs`.
pub const STATFS_BLOCK_SIZE: u64 = 4096;

/// Personal drives do not report file counts accurately; a fixed fake
/// budget is advertised instead.
pub const FAKE_FILE_BUDGET: u64 = 100_000;

/// Maximum file name length reported by `statfs`.
pub const NAME_MAX: u32 = 255;

/// Nuisance names that `lookup` refuses outright, so the desktop
/// environment stops probing for them over the network.
const IGNORED_NAMES: &[&str] = &[
    ".Trash",
    ".Trash-1000",
    ".DS_Store",
    ".xdg-volume-info",
    ".localized",
    "._.",
    ".hidden",
    "autorun.inf",
    "BDMV",
];

/// Whether `lookup` should refuse this name without asking the server.
pub fn is_ignored_name(name: &str) -> bool {
    IGNORED_NAMES.contains(&name)
}

/// Attributes returned to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr {
    pub ino: u64,
    pub size: u64,
    pub nlink: u32,
    pub mtime: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

/// One entry of a directory listing.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub ino: u64,
    pub name: String,
    pub mode: u32,
}

/// Filesystem-level statistics.
#[derive(Debug, Clone, Copy)]
pub struct StatFs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
}

/// The subset of attributes `setattr` may change, applied in order:
/// mtime, then mode, then size.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetAttr {
    pub mtime: Option<u64>,
    pub mode: Option<u32>,
    pub size: Option<u64>,
}

fn process_ids() -> (u32, u32) {
    // getuid/getgid cannot fail
    unsafe { (libc::getuid(), libc::getgid()) }
}

/// The VFS handler surface over one mount's context.
#[derive(Clone)]
pub struct Vfs {
    pub ctx: Arc<FsContext>,
}

impl Vfs {
    pub fn new(ctx: Arc<FsContext>) -> Self {
        Self { ctx }
    }

    fn attr_of(&self, state: &InodeState) -> Attr {
        let (uid, gid) = process_ids();
        Attr {
            ino: self.ctx.cache.ino_for(&state.id),
            size: state.attr_size(),
            nlink: state.nlink(),
            mtime: state.mtime,
            mode: state.mode,
            uid,
            gid,
        }
    }

    // ========================================================================
    // Children materialization and name resolution
    // ========================================================================

    /// Fetches the child listing from the server if it is still unknown.
    async fn materialize_children(&self, dir: &Arc<Inode>) -> FsResult<()> {
        let (dir_id, known) = {
            let state = dir.read();
            if !state.is_dir() {
                return Err(FsError::InvalidArgument("not a directory".to_string()));
            }
            (state.id.clone(), state.children.is_some())
        };
        if known {
            return Ok(());
        }
        if dir_id.is_local() {
            // A directory the server does not know about cannot have
            // server-side children.
            dir.write().children.get_or_insert_with(Vec::new);
            return Ok(());
        }

        let items = self
            .ctx
            .graph
            .list_children(&dir_id)
            .await
            .map_err(FsError::from)?;
        dir.write().children.get_or_insert_with(Vec::new);
        for item in items {
            match self
                .ctx
                .cache
                .insert_child(&dir_id, InodeState::from_drive_item(&item))
            {
                Ok(_) => {}
                // First to insert wins on case-folded duplicates.
                Err(e) => debug!(name = %item.name, error = %e, "skipping server child"),
            }
        }
        Ok(())
    }

    /// Resolves a child by name. Applies the ignore list and the
    /// case-insensitive comparison rule.
    pub async fn lookup(&self, parent: &ItemId, name: &str) -> FsResult<Arc<Inode>> {
        if is_ignored_name(name) {
            return Err(FsError::NotFound);
        }
        let dir = self.ctx.cache.get(parent).ok_or(FsError::NotFound)?;
        self.materialize_children(&dir).await?;
        self.ctx
            .cache
            .child_by_name(parent, name)
            .ok_or(FsError::NotFound)
    }

    /// Walks an absolute path from the root, one segment at a time.
    pub async fn get_by_path(&self, path: &str) -> FsResult<Arc<Inode>> {
        let mut current = self.ctx.cache.root().ok_or(FsError::NotFound)?;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let dir_id = current.read().id.clone();
            current = self.lookup(&dir_id, segment).await?;
        }
        Ok(current)
    }

    /// Lists a directory, materializing the child listing if unknown.
    pub async fn readdir(&self, dir_id: &ItemId) -> FsResult<Vec<DirEntry>> {
        let dir = self.ctx.cache.get(dir_id).ok_or(FsError::NotFound)?;
        self.materialize_children(&dir).await?;

        let child_ids = dir.read().children.clone().unwrap_or_default();
        let mut entries = Vec::with_capacity(child_ids.len());
        for child_id in child_ids {
            if let Some(child) = self.ctx.cache.get(&child_id) {
                let state = child.read();
                entries.push(DirEntry {
                    ino: self.ctx.cache.ino_for(&state.id),
                    name: state.name.clone(),
                    mode: state.mode,
                });
            }
        }
        Ok(entries)
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    pub fn getattr(&self, id: &ItemId) -> FsResult<Attr> {
        let node = self.ctx.cache.get(id).ok_or(FsError::NotFound)?;
        let state = node.read();
        Ok(self.attr_of(&state))
    }

    pub async fn setattr(&self, id: &ItemId, changes: SetAttr) -> FsResult<Attr> {
        let node = self.ctx.cache.get(id).ok_or(FsError::NotFound)?;

        // Resizing needs the content in memory, except truncation to
        // zero, which replaces it wholesale.
        if let Some(size) = changes.size {
            let needs_data = {
                let state = node.read();
                !state.is_dir() && state.data.is_none() && size > 0
            };
            if needs_data {
                self.ensure_data(&node).await?;
            }
        }

        let mut state = node.write();
        if let Some(mtime) = changes.mtime {
            state.mtime = mtime;
        }
        if let Some(mode) = changes.mode {
            state.apply_mode(mode);
        }
        if let Some(size) = changes.size {
            if state.is_dir() {
                return Err(FsError::InvalidArgument(
                    "cannot truncate a directory".to_string(),
                ));
            }
            let data = state.data.get_or_insert_with(Vec::new);
            // Truncate or zero-extend to the requested length
            data.resize(size as usize, 0);
            state.size = size;
            state.has_changes = true;
        }
        Ok(self.attr_of(&state))
    }

    // ========================================================================
    // Content I/O
    // ========================================================================

    /// Populates `data`, trusting the cached blob only when its hash
    /// matches the recorded one. A mismatch triggers a single refetch.
    async fn ensure_data(&self, node: &Arc<Inode>) -> FsResult<()> {
        let (id, hashes) = {
            let state = node.read();
            if state.data.is_some() {
                return Ok(());
            }
            (state.id.clone(), state.hashes.clone())
        };

        if let Some(blob) = self.ctx.store.get(&id).map_err(store_err)? {
            let trusted = match &hashes {
                Some(recorded) => integrity::verify(self.ctx.drive_type, recorded, &blob),
                // A local-only item has no server copy; the blob is the
                // only truth there is.
                None => id.is_local(),
            };
            if trusted {
                node.write().data = Some(blob);
                return Ok(());
            }
            warn!(id = %id, "cached content failed hash validation, refetching");
        }

        if id.is_local() {
            // Nothing to fetch; a local file with no blob is empty.
            node.write().data = Some(Vec::new());
            return Ok(());
        }

        let bytes = self
            .ctx
            .graph
            .get_content(&id)
            .await
            .map_err(FsError::from)?;
        self.ctx.store.put(&id, &bytes).map_err(store_err)?;
        let mut state = node.write();
        state.size = bytes.len() as u64;
        state.data = Some(bytes);
        Ok(())
    }

    /// Opens a file: content is faulted in from the store or the server.
    pub async fn open(&self, id: &ItemId) -> FsResult<()> {
        let node = self.ctx.cache.get(id).ok_or(FsError::NotFound)?;
        if node.read().is_dir() {
            return Ok(());
        }
        self.ensure_data(&node).await
    }

    /// Reads `size` bytes at `offset`. Performs an implicit open when the
    /// content is not in memory.
    pub async fn read(&self, id: &ItemId, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        let node = self.ctx.cache.get(id).ok_or(FsError::NotFound)?;
        if node.read().is_dir() {
            return Err(FsError::InvalidArgument("is a directory".to_string()));
        }
        self.ensure_data(&node).await?;

        let state = node.read();
        let data = state.data.as_deref().unwrap_or_default();
        let offset = offset as usize;
        if offset > data.len() {
            return Err(FsError::InvalidArgument(format!(
                "read offset {offset} past end of file ({} bytes)",
                data.len()
            )));
        }
        let end = (offset + size as usize).min(data.len());
        Ok(data[offset..end].to_vec())
    }

    /// Writes `buf` at `offset`, in place where possible, extending the
    /// file (zero-padding any gap) otherwise. Never contacts the network.
    pub fn write(&self, id: &ItemId, offset: u64, buf: &[u8]) -> FsResult<u32> {
        let node = self.ctx.cache.get(id).ok_or(FsError::NotFound)?;
        let mut state = node.write();
        if state.is_dir() {
            return Err(FsError::InvalidArgument("is a directory".to_string()));
        }
        if state.data.is_none() {
            // The spilled blob is the fallback; the write path stays
            // network-free.
            let blob = self.ctx.store.get(&state.id).map_err(store_err)?;
            state.data = Some(blob.unwrap_or_default());
        }

        let offset = offset as usize;
        let new_size = {
            let data = state.data.get_or_insert_with(Vec::new);
            if offset > data.len() {
                data.resize(offset, 0);
            }
            if offset + buf.len() <= data.len() {
                data[offset..offset + buf.len()].copy_from_slice(buf);
            } else {
                data.truncate(offset);
                data.extend_from_slice(buf);
            }
            data.len() as u64
        };
        state.size = new_size;
        state.mtime = now_unix();
        state.has_changes = true;
        Ok(buf.len() as u32)
    }

    /// Hands dirty content to the upload manager and returns immediately.
    ///
    /// While offline the changes stay marked and are silently absorbed
    /// into the local cache; a later fsync retries.
    pub async fn fsync(&self, id: &ItemId) -> FsResult<()> {
        let node = self.ctx.cache.get(id).ok_or(FsError::NotFound)?;
        if self.ctx.is_offline() {
            debug!(id = %id, "offline: keeping changes local");
            return Ok(());
        }

        let session = {
            let mut state = node.write();
            if !state.has_changes {
                return Ok(());
            }
            state.has_changes = false;
            let data = state.data.clone().unwrap_or_default();
            state.hashes = Some(integrity::hash_for_drive(self.ctx.drive_type, &data));
            UploadSession::snapshot(&state)
        };

        if let Err(e) = self.ctx.uploads.queue(&self.ctx, session).await {
            warn!(id = %id, error = %e, "upload refused, keeping changes local");
            node.write().has_changes = true;
        }
        Ok(())
    }

    /// Flush: fsync, then spill the content to the store and release the
    /// in-memory copy. Called on every handle close.
    pub async fn flush(&self, id: &ItemId) -> FsResult<()> {
        self.fsync(id).await?;
        let node = self.ctx.cache.get(id).ok_or(FsError::NotFound)?;
        let (store_id, data) = {
            let state = node.read();
            (state.id.clone(), state.data.clone())
        };
        if let Some(data) = data {
            self.ctx.store.put(&store_id, &data).map_err(store_err)?;
            node.write().data = None;
        }
        Ok(())
    }

    // ========================================================================
    // Namespace mutation
    // ========================================================================

    /// Creates a local-only file. The server learns about it on first
    /// upload; until then it carries a synthetic local id.
    pub async fn create(&self, parent: &ItemId, name: &str, mode: u32) -> FsResult<Arc<Inode>> {
        if self.ctx.is_offline() {
            return Err(FsError::offline());
        }
        let dir = self.ctx.cache.get(parent).ok_or(FsError::NotFound)?;
        self.materialize_children(&dir).await?;

        if let Some(existing) = self.ctx.cache.child_by_name(parent, name) {
            let exact = existing.read().name == name;
            if exact {
                return Err(FsError::AlreadyExists(name.to_string()));
            }
            // A case-folded sibling exists under another casing. The
            // server treats the two names as the same item, so adopt it:
            // the displayed name takes the new casing and the content is
            // truncated, exactly as a create-over-existing would.
            let mut state = existing.write();
            state.name = name.to_string();
            state.data = Some(Vec::new());
            state.size = 0;
            state.mtime = now_unix();
            state.has_changes = true;
            drop(state);
            debug!(name, "create adopted a case-folded sibling");
            return Ok(existing);
        }

        self.ctx
            .cache
            .insert_child(parent, InodeState::new_file(parent.clone(), name, mode))
    }

    /// Creates a directory on the server first - it must have a remote id
    /// immediately so child uploads can address it - then in the cache.
    pub async fn mkdir(&self, parent: &ItemId, name: &str, mode: u32) -> FsResult<Arc<Inode>> {
        if self.ctx.is_offline() {
            return Err(FsError::offline());
        }
        let dir = self.ctx.cache.get(parent).ok_or(FsError::NotFound)?;
        self.materialize_children(&dir).await?;
        if self.ctx.cache.child_by_name(parent, name).is_some() {
            return Err(FsError::AlreadyExists(name.to_string()));
        }

        let item = self
            .ctx
            .graph
            .create_folder(parent, name)
            .await
            .map_err(FsError::from)?;
        self.ctx.cache.insert_child(
            parent,
            InodeState::new_dir(ItemId::new(item.id), parent.clone(), name, mode),
        )
    }

    pub async fn unlink(&self, parent: &ItemId, name: &str) -> FsResult<()> {
        self.remove_entry(parent, name, false).await
    }

    pub async fn rmdir(&self, parent: &ItemId, name: &str) -> FsResult<()> {
        self.remove_entry(parent, name, true).await
    }

    /// Shared unlink/rmdir implementation: server delete (when the item
    /// has a remote id), then local removal of metadata and blob.
    async fn remove_entry(&self, parent: &ItemId, name: &str, want_dir: bool) -> FsResult<()> {
        if self.ctx.is_offline() {
            return Err(FsError::offline());
        }
        let child = self.lookup(parent, name).await?;
        let (child_id, is_dir) = {
            let state = child.read();
            (state.id.clone(), state.is_dir())
        };
        if want_dir {
            if !is_dir {
                return Err(FsError::InvalidArgument("not a directory".to_string()));
            }
            self.materialize_children(&child).await?;
            let occupied = child
                .read()
                .children
                .as_ref()
                .is_some_and(|c| !c.is_empty());
            if occupied {
                return Err(FsError::NotEmpty(name.to_string()));
            }
        } else if is_dir {
            return Err(FsError::InvalidArgument("is a directory".to_string()));
        }

        if !child_id.is_local() {
            match self.ctx.graph.delete_item(&child_id).await {
                Ok(()) => {}
                // Already gone server-side; proceed with local removal.
                Err(e) if e.status() == Some(404) => {}
                Err(e) => return Err(e.into()),
            }
        }
        for removed in self.ctx.cache.remove_subtree(&child_id) {
            if let Err(e) = self.ctx.store.delete(&removed) {
                warn!(id = %removed, error = %e, "failed to drop content blob");
            }
        }
        Ok(())
    }

    /// Server-side move/rename, then the local linkage update. On remote
    /// failure, local state is left unchanged.
    pub async fn rename(
        &self,
        old_parent: &ItemId,
        old_name: &str,
        new_parent: &ItemId,
        new_name: &str,
    ) -> FsResult<()> {
        if self.ctx.is_offline() {
            return Err(FsError::offline());
        }
        let child = self.lookup(old_parent, old_name).await?;
        let dest = self.ctx.cache.get(new_parent).ok_or(FsError::NotFound)?;
        if dest.read().id.is_local() {
            return Err(FsError::BadDescriptor(
                "destination directory has no remote id".to_string(),
            ));
        }
        self.materialize_children(&dest).await?;

        if let Some(existing) = self.ctx.cache.child_by_name(new_parent, new_name) {
            let same_inode = Arc::ptr_eq(&existing, &child);
            if !same_inode {
                return Err(FsError::Conflict(new_name.to_string()));
            }
        }

        let child_id = {
            let state = child.read();
            state.id.clone()
        };
        let remote_id = ensure_remote_id(&self.ctx, &child_id).await?;

        self.ctx
            .graph
            .move_item(&remote_id, new_parent, new_name)
            .await
            .map_err(FsError::from)?;
        self.ctx.cache.move_child(&remote_id, new_parent, new_name)
    }

    // ========================================================================
    // Filesystem statistics
    // ========================================================================

    /// Total/free blocks from the server quota, with a fixed fake file
    /// budget. The last successful quota answer is served when the server
    /// cannot be reached; only the delta synchronizer toggles the offline
    /// flag.
    pub async fn statfs(&self) -> FsResult<StatFs> {
        if !self.ctx.is_offline() {
            match self.ctx.graph.get_drive().await {
                Ok(drive) => {
                    if let Some(quota) = drive.quota {
                        self.ctx.set_quota(quota);
                    }
                }
                Err(GraphError::Transport(e)) => {
                    debug!(error = %e, "statfs falling back to cached quota");
                }
                Err(e) => warn!(error = %e, "quota refresh failed"),
            }
        }

        let quota = self.ctx.quota();
        let total = quota.total.unwrap_or(0);
        let used = quota.used.unwrap_or(0);
        let remaining = quota.remaining.unwrap_or_else(|| total.saturating_sub(used));
        // Integer division: close enough for multi-TB drives, and the
        // reporting is advisory anyway.
        Ok(StatFs {
            blocks: total / STATFS_BLOCK_SIZE,
            bfree: remaining / STATFS_BLOCK_SIZE,
            bavail: remaining / STATFS_BLOCK_SIZE,
            files: FAKE_FILE_BUDGET,
            ffree: FAKE_FILE_BUDGET.saturating_sub(self.ctx.cache.len() as u64),
            bsize: STATFS_BLOCK_SIZE as u32,
            namelen: NAME_MAX,
        })
    }
}

fn store_err(err: nimbus_cache::StoreError) -> FsError {
    FsError::Io(err.to_string())
}

/// Obtains a remote id for `id`, promoting a local id by uploading a
/// zero-byte placeholder under the parent path.
///
/// On `nameAlreadyExists` the two benign races are re-checked: a
/// concurrent caller may have promoted this inode already, or the server
/// may already hold an item at this path; either outcome is accepted.
pub(crate) async fn ensure_remote_id(ctx: &FsContext, id: &ItemId) -> FsResult<ItemId> {
    let node = ctx.cache.get(id).ok_or(FsError::NotFound)?;
    let (current, parent_id, name) = {
        let state = node.read();
        (state.id.clone(), state.parent_id.clone(), state.name.clone())
    };
    if !current.is_local() {
        return Ok(current);
    }
    if parent_id.is_local() {
        return Err(FsError::BadDescriptor(
            "parent directory has no remote id".to_string(),
        ));
    }

    let promote = |item_id: String| -> ItemId {
        let new_id = ItemId::new(item_id);
        ctx.cache.promote(&current, new_id.clone());
        if let Err(e) = ctx.store.rekey(&current, &new_id) {
            warn!(error = %e, "failed to rekey content blob after promotion");
        }
        new_id
    };

    match ctx.graph.put_content_by_name(&parent_id, &name, &[]).await {
        Ok(item) => Ok(promote(item.id)),
        Err(e) if e.is_name_exists() => {
            let now = node.read().id.clone();
            if !now.is_local() {
                // Someone promoted this inode while our PUT was in flight.
                return Ok(now);
            }
            match ctx.graph.get_child_by_name(&parent_id, &name).await {
                Ok(item) => Ok(promote(item.id)),
                Err(e) => Err(FsError::BadDescriptor(e.to_string())),
            }
        }
        Err(e) => Err(FsError::BadDescriptor(e.to_string())),
    }
}
