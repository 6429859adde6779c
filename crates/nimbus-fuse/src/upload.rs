//! The upload manager: a deduplicating queue turning local mutations into
//! idempotent server uploads.
//!
//! Submissions arrive through [`UploadManager::queue`], which snapshots
//! the inode's content so later writes cannot corrupt an in-flight body.
//! One session per inode id may exist at a time; re-submission cancels
//! and replaces the earlier session (server-side delete of its session
//! URL if it was chunked), so the most-recently-submitted snapshot wins.
//!
//! The worker inspects the session map on a fixed tick, starting
//! `NotStarted` sessions and reaping `Complete` and `Errored` ones.
//! Files at or below 4 MiB go up as a single `PUT`; larger files use a
//! resumable session with 10 MiB chunks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nimbus_core::errors::{FsError, FsResult};
use nimbus_core::types::ItemId;
use nimbus_graph::item::DriveItem;

use crate::context::FsContext;
use crate::inode::InodeState;
use crate::vfs;

/// Largest body accepted by the simple single-PUT upload.
pub const SIMPLE_UPLOAD_LIMIT: u64 = 4 * 1024 * 1024;

/// Chunk size for resumable sessions. A multiple of 320 KiB, as the
/// server requires.
pub const CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// First retry delay for 5xx chunk failures; doubles per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Lifecycle of one upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    NotStarted,
    Started,
    Complete,
    Errored(FsError),
}

/// How a finished run is handed back to the tick loop.
enum Outcome {
    Done(Option<DriveItem>),
    Superseded,
    Failed(FsError),
}

/// One upload: an immutable snapshot of the inode's content at
/// submission time, plus the session's own mutable state.
#[derive(Debug)]
pub struct UploadSession {
    id: ItemId,
    parent_id: ItemId,
    name: String,
    size: u64,
    data: Vec<u8>,
    state: Mutex<UploadState>,
    upload_url: Mutex<Option<String>>,
    cancelled: AtomicBool,
}

impl UploadSession {
    /// Snapshots `state` for upload. The caller holds the inode lock, so
    /// the copied data and size are consistent.
    pub fn snapshot(state: &InodeState) -> Self {
        Self {
            id: state.id.clone(),
            parent_id: state.parent_id.clone(),
            name: state.name.clone(),
            size: state.size,
            data: state.data.clone().unwrap_or_default(),
            state: Mutex::new(UploadState::NotStarted),
            upload_url: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &ItemId {
        &self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn state(&self) -> UploadState {
        self.state.lock().clone()
    }

    fn set_state(&self, state: UploadState) {
        *self.state.lock() = state;
    }

    /// Whether this session must use the chunked strategy.
    pub fn is_large(&self) -> bool {
        self.size > SIMPLE_UPLOAD_LIMIT
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Owner of the per-id session map and the background worker logic.
pub struct UploadManager {
    sessions: Mutex<HashMap<ItemId, Arc<UploadSession>>>,
}

impl UploadManager {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Number of sessions currently queued or running.
    pub fn pending(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Submits a snapshot for upload, displacing any earlier session for
    /// the same id.
    pub async fn queue(&self, ctx: &FsContext, session: UploadSession) -> FsResult<Arc<UploadSession>> {
        if ctx.is_offline() {
            return Err(FsError::offline());
        }
        let session = Arc::new(session);
        let displaced = self
            .sessions
            .lock()
            .insert(session.id().clone(), Arc::clone(&session));
        if let Some(old) = displaced {
            debug!(id = %old.id(), "superseding queued upload");
            Self::cancel(ctx, &old).await;
        }
        if let Some(node) = ctx.cache.get(session.id()) {
            node.write().upload_session = Some(Arc::clone(&session));
        }
        Ok(session)
    }

    /// Cancels a displaced session: flags the runner and deletes the
    /// server-side session if one was created. Best-effort.
    async fn cancel(ctx: &FsContext, session: &UploadSession) {
        session.cancelled.store(true, Ordering::SeqCst);
        let url = session.upload_url.lock().clone();
        if let Some(url) = url {
            if let Err(e) = ctx.graph.cancel_upload_session(&url).await {
                warn!(id = %session.id(), error = %e, "failed to delete superseded upload session");
            }
        }
    }

    /// One worker tick: start pending sessions, apply results, reap.
    pub async fn tick(&self, ctx: &FsContext) {
        let pending: Vec<Arc<UploadSession>> = self
            .sessions
            .lock()
            .values()
            .filter(|s| s.state() == UploadState::NotStarted)
            .cloned()
            .collect();

        for session in pending {
            // Skip sessions displaced between collection and start.
            let current = self
                .sessions
                .lock()
                .get(session.id())
                .map(|s| Arc::ptr_eq(s, &session))
                .unwrap_or(false);
            if !current || session.is_cancelled() {
                continue;
            }

            session.set_state(UploadState::Started);
            match Self::run_session(ctx, &session).await {
                Outcome::Done(item) => {
                    session.set_state(UploadState::Complete);
                    Self::apply_completion(ctx, &session, item);
                }
                Outcome::Superseded => {
                    debug!(id = %session.id(), "upload superseded mid-flight");
                }
                Outcome::Failed(err) => {
                    warn!(id = %session.id(), error = %err, "upload failed");
                    session.set_state(UploadState::Errored(err));
                    Self::mark_errored(ctx, &session);
                }
            }
        }

        self.sessions.lock().retain(|_, s| {
            matches!(s.state(), UploadState::NotStarted | UploadState::Started)
        });
    }

    /// Background worker loop; exits cooperatively on cancellation.
    pub async fn run(ctx: Arc<FsContext>, cancel: CancellationToken) {
        let tick = ctx.config.upload_tick();
        info!(tick_secs = tick.as_secs(), "upload worker started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(tick) => ctx.uploads.tick(&ctx).await,
            }
        }
        info!("upload worker stopped");
    }

    // ========================================================================
    // Session execution
    // ========================================================================

    async fn run_session(ctx: &FsContext, session: &Arc<UploadSession>) -> Outcome {
        let result = if session.is_large() {
            Self::run_chunked(ctx, session).await
        } else {
            Self::run_simple(ctx, session).await.map(Some)
        };
        match result {
            Ok(item) => {
                if session.is_cancelled() {
                    Outcome::Superseded
                } else {
                    Outcome::Done(item)
                }
            }
            Err(_) if session.is_cancelled() => Outcome::Superseded,
            Err(err) => Outcome::Failed(err),
        }
    }

    /// Single-PUT upload. Local ids go by parent path, which doubles as
    /// id promotion; the response item carries the assigned id.
    async fn run_simple(ctx: &FsContext, session: &UploadSession) -> FsResult<DriveItem> {
        let mut retried = false;
        loop {
            let attempt = if session.id.is_local() {
                ctx.graph
                    .put_content_by_name(&session.parent_id, &session.name, &session.data)
                    .await
            } else {
                ctx.graph.put_content(&session.id, &session.data).await
            };
            match attempt {
                Ok(item) => return Ok(item),
                Err(e) if e.is_resource_modified() && !retried => {
                    // The server saw a concurrent change; settle and retry once.
                    debug!(id = %session.id, "resourceModified, retrying simple upload");
                    tokio::time::sleep(RETRY_BASE_DELAY).await;
                    retried = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Chunked resumable upload with the retry policy:
    /// - transport failure: cancel the session server-side, fail
    /// - 5xx: retry the same chunk, exponential backoff from 1s
    /// - 404: the session expired server-side; fail without deleting
    /// - other 4xx: fail with the server body
    async fn run_chunked(
        ctx: &FsContext,
        session: &Arc<UploadSession>,
    ) -> FsResult<Option<DriveItem>> {
        let remote_id = if session.id.is_local() {
            vfs::ensure_remote_id(ctx, &session.id).await?
        } else {
            session.id.clone()
        };

        let info = ctx
            .graph
            .create_upload_session(&remote_id)
            .await
            .map_err(FsError::from)?;
        *session.upload_url.lock() = Some(info.upload_url.clone());
        info!(
            id = %remote_id,
            size = session.size,
            chunks = session.size.div_ceil(CHUNK_SIZE),
            "started chunked upload session"
        );

        let total = session.size;
        let mut offset: u64 = 0;
        let mut final_item: Option<DriveItem> = None;

        while offset < total {
            if session.is_cancelled() {
                return Err(FsError::RemoteIo("upload superseded".to_string()));
            }
            let end = (offset + CHUNK_SIZE).min(total);
            let chunk = &session.data[offset as usize..end as usize];

            let mut delay = RETRY_BASE_DELAY;
            let resp = loop {
                match ctx
                    .graph
                    .upload_chunk(&info.upload_url, chunk, offset, total)
                    .await
                {
                    Err(e) => {
                        // Transport failure: the session is unusable; delete
                        // it server-side, best-effort.
                        if let Err(del) = ctx.graph.cancel_upload_session(&info.upload_url).await {
                            debug!(error = %del, "session cleanup after transport failure failed");
                        }
                        return Err(FsError::RemoteIo(e.to_string()));
                    }
                    Ok(resp) if resp.status == 404 => {
                        return Err(FsError::SessionExpired);
                    }
                    Ok(resp) if (500..600).contains(&resp.status) => {
                        warn!(
                            offset,
                            status = resp.status,
                            delay_secs = delay.as_secs(),
                            "server error on chunk, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                    Ok(resp) if resp.is_success() => break resp,
                    Ok(resp) => {
                        return Err(FsError::RemoteIo(resp.body_text()));
                    }
                }
            };

            if resp.status == 200 || resp.status == 201 {
                // Final chunk: the body is the completed item record.
                match serde_json::from_slice::<DriveItem>(&resp.body) {
                    Ok(item) => final_item = Some(item),
                    Err(e) => debug!(error = %e, "completed session body did not parse as an item"),
                }
            }
            offset = end;
        }

        Ok(final_item)
    }

    // ========================================================================
    // Result application
    // ========================================================================

    /// Folds the server's item record back into the inode: id promotion
    /// for formerly-local files, plus the authoritative hashes and mtime
    /// so the next delta cycle recognizes the content as already synced.
    fn apply_completion(ctx: &FsContext, session: &UploadSession, item: Option<DriveItem>) {
        let Some(item) = item else {
            Self::clear_session_handle(ctx, &session.id);
            return;
        };
        let new_id = ItemId::new(item.id.clone());
        if session.id.is_local() && !new_id.is_local() {
            ctx.cache.promote(&session.id, new_id.clone());
            if let Err(e) = ctx.store.rekey(&session.id, &new_id) {
                warn!(error = %e, "failed to rekey content blob after promotion");
            }
        }
        if let Some(node) = ctx.cache.get(&new_id) {
            let mut state = node.write();
            if let Some(hashes) = item.content_hashes() {
                state.hashes = Some(hashes);
            }
            if item.mtime_unix() > 0 {
                state.mtime = item.mtime_unix();
            }
            state.upload_session = None;
        }
        info!(id = %new_id, bytes = session.size, "upload complete");
    }

    /// An errored upload re-marks the inode dirty so a later fsync
    /// re-queues it.
    fn mark_errored(ctx: &FsContext, session: &UploadSession) {
        if let Some(node) = ctx.cache.get(&session.id) {
            let mut state = node.write();
            state.has_changes = true;
            state.upload_session = None;
        }
    }

    fn clear_session_handle(ctx: &FsContext, id: &ItemId) {
        if let Some(node) = ctx.cache.get(id) {
            node.write().upload_session = None;
        }
    }
}

impl Default for UploadManager {
    fn default() -> Self {
        Self::new()
    }
}
