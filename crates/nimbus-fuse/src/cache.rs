//! The metadata cache: an id-keyed arena of inodes plus the kernel-facing
//! inode-number table.
//!
//! The graph is a tree by construction: each inode records its parent id,
//! directories hold a list of child ids, and traversals are map lookups
//! rather than pointer chases. Lock order is strictly parent before
//! child; when an operation spans two parents (a cross-directory move)
//! the parents are locked in id order to keep the order total.
//!
//! Kernel inode numbers are assigned monotonically, starting at
//! [`ROOT_INO`], and survive local-to-remote id promotion via an atomic
//! rekey of the lookup tables.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use nimbus_core::errors::{FsError, FsResult};
use nimbus_core::types::ItemId;

use crate::inode::{Inode, InodeState};

/// The kernel inode number of the mount root.
pub const ROOT_INO: u64 = 1;

/// Case folding used for sibling name comparisons (the server's
/// NTFS-derived rule, restricted to ASCII).
pub fn names_collide(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Id-keyed inode arena with bidirectional ino mapping.
pub struct MetadataCache {
    items: DashMap<ItemId, Arc<Inode>>,
    ino_by_id: DashMap<ItemId, u64>,
    id_by_ino: DashMap<u64, ItemId>,
    next_ino: AtomicU64,
    root_id: RwLock<ItemId>,
    delta_link: RwLock<Option<String>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
            ino_by_id: DashMap::new(),
            id_by_ino: DashMap::new(),
            next_ino: AtomicU64::new(ROOT_INO + 1),
            root_id: RwLock::new(ItemId::new("")),
            delta_link: RwLock::new(None),
        }
    }

    // ========================================================================
    // Root and cursor
    // ========================================================================

    /// Registers the root inode under [`ROOT_INO`].
    pub fn set_root(&self, root: Arc<Inode>) {
        let id = root.read().id.clone();
        self.items.insert(id.clone(), root);
        self.ino_by_id.insert(id.clone(), ROOT_INO);
        self.id_by_ino.insert(ROOT_INO, id.clone());
        *self.root_id.write() = id;
    }

    pub fn root_id(&self) -> ItemId {
        self.root_id.read().clone()
    }

    pub fn root(&self) -> Option<Arc<Inode>> {
        self.get(&self.root_id())
    }

    /// The saved delta cursor, if any.
    pub fn delta_link(&self) -> Option<String> {
        self.delta_link.read().clone()
    }

    pub fn set_delta_link(&self, link: Option<String>) {
        *self.delta_link.write() = link;
    }

    // ========================================================================
    // Lookup primitives
    // ========================================================================

    pub fn get(&self, id: &ItemId) -> Option<Arc<Inode>> {
        self.items.get(id).map(|r| Arc::clone(r.value()))
    }

    pub fn get_by_ino(&self, ino: u64) -> Option<Arc<Inode>> {
        let id = self.id_by_ino.get(&ino).map(|r| r.value().clone())?;
        self.get(&id)
    }

    /// The kernel inode number for `id`, assigned on first use.
    pub fn ino_for(&self, id: &ItemId) -> u64 {
        *self.ino_by_id.entry(id.clone()).or_insert_with(|| {
            let ino = self.next_ino.fetch_add(1, Ordering::SeqCst);
            self.id_by_ino.insert(ino, id.clone());
            ino
        })
    }

    /// Number of inodes in the arena.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Finds a child of `parent` by case-insensitive name. Children must
    /// already be materialized; unknown listings return `None`.
    pub fn child_by_name(&self, parent: &ItemId, name: &str) -> Option<Arc<Inode>> {
        let dir = self.get(parent)?;
        let state = dir.read();
        let children = state.children.as_ref()?;
        for child_id in children {
            if let Some(child) = self.get(child_id) {
                if names_collide(&child.read().name, name) {
                    return Some(child);
                }
            }
        }
        None
    }

    // ========================================================================
    // Structural mutation
    // ========================================================================

    /// Inserts `child` under `parent`.
    ///
    /// Idempotent by id: re-inserting a known child returns the existing
    /// inode. A case-folded name collision with a *different* child is
    /// refused - first to insert wins, matching the server's rule.
    pub fn insert_child(&self, parent_id: &ItemId, child: InodeState) -> FsResult<Arc<Inode>> {
        let parent = self.get(parent_id).ok_or(FsError::NotFound)?;
        let child_id = child.id.clone();
        let child_name = child.name.clone();
        let child_is_dir = child.is_dir();

        let mut pstate = parent.write();
        let already_linked = pstate
            .children
            .get_or_insert_with(Vec::new)
            .contains(&child_id);
        if already_linked {
            drop(pstate);
            if let Some(existing) = self.get(&child_id) {
                return Ok(existing);
            }
            // Linked but never installed (a restore gap): install without
            // touching the parent again.
            let node = Arc::new(Inode::new(child));
            self.items.insert(child_id.clone(), Arc::clone(&node));
            self.ino_for(&child_id);
            return Ok(node);
        }

        for sibling_id in pstate.children.as_deref().unwrap_or_default() {
            if let Some(sibling) = self.items.get(sibling_id) {
                if names_collide(&sibling.value().read().name, &child_name) {
                    return Err(FsError::AlreadyExists(child_name));
                }
            }
        }

        pstate
            .children
            .get_or_insert_with(Vec::new)
            .push(child_id.clone());
        if child_is_dir {
            pstate.subdir_count += 1;
        }
        drop(pstate);

        let node = Arc::new(Inode::new(child));
        self.items.insert(child_id.clone(), Arc::clone(&node));
        self.ino_for(&child_id);
        Ok(node)
    }

    /// Installs an inode into the arena without touching any parent.
    ///
    /// Used by snapshot restore, where the parents' child lists are part
    /// of the restored records themselves.
    pub fn install(&self, state: InodeState) {
        let id = state.id.clone();
        self.items.insert(id.clone(), Arc::new(Inode::new(state)));
        self.ino_for(&id);
    }

    /// Removes `id` and every descendant from the arena, detaching the
    /// top inode from its parent. Returns the removed ids so the caller
    /// can drop content blobs.
    pub fn remove_subtree(&self, id: &ItemId) -> Vec<ItemId> {
        let Some(node) = self.get(id) else {
            return Vec::new();
        };

        // Detach from the parent first so concurrent lookups stop seeing
        // the subtree.
        let (parent_id, is_dir) = {
            let state = node.read();
            (state.parent_id.clone(), state.is_dir())
        };
        if let Some(parent) = self.get(&parent_id) {
            let mut pstate = parent.write();
            if let Some(children) = pstate.children.as_mut() {
                children.retain(|c| c != id);
            }
            if is_dir && pstate.subdir_count > 0 {
                pstate.subdir_count -= 1;
            }
        }

        // Collect the subtree, parents before children.
        let mut removed = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.get(&current) {
                if let Some(children) = node.read().children.as_ref() {
                    stack.extend(children.iter().cloned());
                }
            }
            removed.push(current);
        }

        for rid in &removed {
            self.items.remove(rid);
            if let Some((_, ino)) = self.ino_by_id.remove(rid) {
                self.id_by_ino.remove(&ino);
            }
        }
        debug!(id = %id, removed = removed.len(), "removed subtree");
        removed
    }

    /// Renames and/or reparents an inode, updating both child lists.
    ///
    /// The destination is checked for a case-folded sibling collision
    /// (excluding the moving inode itself).
    pub fn move_child(
        &self,
        id: &ItemId,
        new_parent_id: &ItemId,
        new_name: &str,
    ) -> FsResult<()> {
        let node = self.get(id).ok_or(FsError::NotFound)?;
        let (old_parent_id, is_dir) = {
            let state = node.read();
            (state.parent_id.clone(), state.is_dir())
        };
        let new_parent = self.get(new_parent_id).ok_or(FsError::NotFound)?;

        if old_parent_id == *new_parent_id {
            let pstate = new_parent.write();
            self.check_collision(pstate.children.as_deref(), id, new_name)?;
            drop(pstate);
            let mut state = node.write();
            state.name = new_name.to_string();
            return Ok(());
        }

        let old_parent = self.get(&old_parent_id).ok_or(FsError::NotFound)?;

        // Two distinct parents: lock in id order to keep the lock order
        // total across concurrent opposite-direction moves.
        let (mut old_guard, mut new_guard) = if old_parent_id.as_str() <= new_parent_id.as_str() {
            let old = old_parent.write();
            let new = new_parent.write();
            (old, new)
        } else {
            let new = new_parent.write();
            let old = old_parent.write();
            (old, new)
        };

        self.check_collision(new_guard.children.as_deref(), id, new_name)?;

        if let Some(children) = old_guard.children.as_mut() {
            children.retain(|c| c != id);
        }
        if is_dir && old_guard.subdir_count > 0 {
            old_guard.subdir_count -= 1;
        }
        new_guard.children.get_or_insert_with(Vec::new).push(id.clone());
        if is_dir {
            new_guard.subdir_count += 1;
        }
        drop(old_guard);
        drop(new_guard);

        let mut state = node.write();
        state.parent_id = new_parent_id.clone();
        state.name = new_name.to_string();
        Ok(())
    }

    fn check_collision(
        &self,
        children: Option<&[ItemId]>,
        moving: &ItemId,
        name: &str,
    ) -> FsResult<()> {
        for sibling_id in children.unwrap_or_default() {
            if sibling_id == moving {
                continue;
            }
            if let Some(sibling) = self.items.get(sibling_id) {
                if names_collide(&sibling.value().read().name, name) {
                    return Err(FsError::Conflict(name.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Swaps a local id for the server-assigned one: the inode itself,
    /// the parent's child list and the ino tables all move together under
    /// the parent's lock.
    pub fn promote(&self, old_id: &ItemId, new_id: ItemId) {
        let Some(node) = self.get(old_id) else {
            return;
        };
        let parent_id = node.read().parent_id.clone();

        if let Some(parent) = self.get(&parent_id) {
            let mut pstate = parent.write();
            if let Some(children) = pstate.children.as_mut() {
                for child in children.iter_mut() {
                    if child == old_id {
                        *child = new_id.clone();
                    }
                }
            }
            node.write().id = new_id.clone();
        } else {
            node.write().id = new_id.clone();
        }

        self.items.remove(old_id);
        self.items.insert(new_id.clone(), node);
        if let Some((_, ino)) = self.ino_by_id.remove(old_id) {
            self.ino_by_id.insert(new_id.clone(), ino);
            self.id_by_ino.insert(ino, new_id.clone());
        }
        debug!(old = %old_id, new = %new_id, "promoted local id");
    }

    /// Clones every inode's state, for serialization.
    pub fn snapshot_states(&self) -> Vec<InodeState> {
        self.items
            .iter()
            .map(|entry| entry.value().read().clone())
            .collect()
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}
