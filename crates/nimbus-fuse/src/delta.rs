//! The delta synchronizer: folds the server-side change feed into the
//! metadata cache without clobbering local changes it can recognize.
//!
//! At a fixed interval the loop drains one delta cycle (following
//! `@odata.nextLink` pagination), coalesces the records so the last delta
//! per id wins, applies them, advances the cursor and serializes the
//! metadata graph. A transport failure flips the offline flag; the next
//! successful page clears it.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nimbus_core::types::ItemId;
use nimbus_graph::delta::{coalesce, cursor_token, DELTA_LATEST_PATH};
use nimbus_graph::item::DriveItem;
use nimbus_graph::GraphError;

use crate::context::FsContext;
use crate::inode::InodeState;

/// The background polling loop.
pub struct DeltaLoop;

impl DeltaLoop {
    /// Runs until cancelled: poll, persist, sleep.
    pub async fn run(ctx: Arc<FsContext>, cancel: CancellationToken) {
        let interval = ctx.config.poll_interval();
        info!(interval_secs = interval.as_secs(), "delta synchronizer started");
        loop {
            match Self::poll_once(&ctx).await {
                Ok(applied) if applied > 0 => info!(applied, "delta cycle applied"),
                Ok(_) => {}
                Err(e) => warn!(error = %format!("{e:#}"), "delta cycle failed"),
            }
            ctx.persist_metadata();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("delta synchronizer stopped");
    }

    /// Drains one delta cycle and applies it. Returns the number of
    /// coalesced records applied.
    pub async fn poll_once(ctx: &FsContext) -> anyhow::Result<usize> {
        let mut link = ctx
            .cache
            .delta_link()
            .unwrap_or_else(|| DELTA_LATEST_PATH.to_string());
        let mut changes: Vec<DriveItem> = Vec::new();

        loop {
            let page = match ctx.graph.delta_page(&link).await {
                Ok(page) => {
                    ctx.set_offline(false);
                    page
                }
                Err(GraphError::Transport(e)) => {
                    ctx.set_offline(true);
                    anyhow::bail!("server unreachable: {e}");
                }
                Err(e) if e.status() == Some(410) => {
                    // The cursor expired server-side; restart from
                    // "latest" on the next cycle.
                    warn!("delta cursor expired, resetting to latest");
                    ctx.cache.set_delta_link(None);
                    return Ok(0);
                }
                Err(e) => return Err(e.into()),
            };

            changes.extend(page.value);
            if let Some(next) = page.next_link {
                link = next;
                continue;
            }
            if let Some(cursor) = page.delta_link {
                debug!(token = ?cursor_token(&cursor), "advancing delta cursor");
                ctx.cache.set_delta_link(Some(cursor));
            }
            break;
        }

        let coalesced = coalesce(changes);
        let applied = coalesced.len();
        for item in coalesced.values() {
            Self::apply(ctx, item);
        }
        Ok(applied)
    }

    /// Applies one coalesced delta record to the cache.
    pub fn apply(ctx: &FsContext, item: &DriveItem) {
        let id = ItemId::new(item.id.clone());

        // The root's own record carries nothing the cache needs.
        if item.is_root() || id == ctx.cache.root_id() {
            return;
        }

        if item.is_deleted() {
            if ctx.cache.get(&id).is_some() {
                for removed in ctx.cache.remove_subtree(&id) {
                    if let Err(e) = ctx.store.delete(&removed) {
                        warn!(id = %removed, error = %e, "failed to drop blob for deleted item");
                    }
                }
                debug!(id = %id, "delta: removed deleted item");
            }
            return;
        }

        let Some(parent_id) = item.parent_id().map(ItemId::new) else {
            return;
        };
        let Some(parent) = ctx.cache.get(&parent_id) else {
            // Unknown parent: the item is fetched lazily if ever traversed.
            debug!(id = %id, "delta: parent not cached, skipping");
            return;
        };

        match ctx.cache.get(&id) {
            None => {
                if parent.read().children.is_none() {
                    // The listing is unknown anyway; materialization will
                    // pick the item up when the directory is traversed.
                    debug!(id = %id, "delta: parent children unknown, deferring");
                    return;
                }
                match ctx
                    .cache
                    .insert_child(&parent_id, InodeState::from_drive_item(item))
                {
                    Ok(_) => debug!(id = %id, name = %item.name, "delta: created item"),
                    Err(e) => debug!(id = %id, error = %e, "delta: create skipped"),
                }
            }
            Some(node) => {
                Self::apply_to_existing(ctx, item, &id, &parent_id, &node);
            }
        }
    }

    fn apply_to_existing(
        ctx: &FsContext,
        item: &DriveItem,
        id: &ItemId,
        parent_id: &ItemId,
        node: &Arc<crate::inode::Inode>,
    ) {
        // Step 1: mirror a server-side rename/move, metadata only.
        let (cur_parent, cur_name) = {
            let state = node.read();
            (state.parent_id.clone(), state.name.clone())
        };
        if (cur_parent != *parent_id || cur_name != item.name) && !item.name.is_empty() {
            match ctx.cache.move_child(id, parent_id, &item.name) {
                Ok(()) => debug!(id = %id, name = %item.name, "delta: moved/renamed item"),
                Err(e) => {
                    warn!(id = %id, error = %e, "delta: move not applied");
                    return;
                }
            }
        }

        // Step 2: content freshness. Size 0 is assumed to be an
        // in-progress upload's placeholder and is not applied.
        if item.is_dir() {
            return;
        }
        let remote_mtime = item.mtime_unix();
        let (local_mtime, local_hashes) = {
            let state = node.read();
            (state.mtime, state.hashes.clone())
        };
        if remote_mtime <= local_mtime || item.size == 0 {
            return;
        }

        let remote_hashes = item.content_hashes().unwrap_or_default();
        let unchanged = local_hashes
            .as_ref()
            .map(|local| local.same_content(&remote_hashes, ctx.drive_type))
            .unwrap_or(false);

        let mut state = node.write();
        if unchanged {
            // Same bytes, newer stamp (a rename or a metadata-only
            // change): keep the blob.
            state.mtime = remote_mtime;
            return;
        }
        if state.has_changes {
            // Last-writer-wins: un-uploaded local edits lose to the
            // server copy.
            warn!(id = %id, "delta: remote change overwrites un-uploaded local edits");
        }
        state.mtime = remote_mtime;
        state.size = item.size;
        state.hashes = Some(remote_hashes);
        state.data = None;
        state.has_changes = false;
        drop(state);

        if let Err(e) = ctx.store.delete(id) {
            warn!(id = %id, error = %e, "failed to invalidate content blob");
        }
        debug!(id = %id, "delta: invalidated local content");
    }
}
