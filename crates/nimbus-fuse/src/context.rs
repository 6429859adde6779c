//! Process-wide filesystem state with a defined lifecycle.
//!
//! Everything the handlers and background workers share - the Graph
//! client, the content store, the metadata cache, the upload manager and
//! the offline flag - is carried explicitly in one [`FsContext`] rather
//! than through ambient singletons. It is initialized at mount and torn
//! down at unmount.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context as _;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use nimbus_cache::ContentStore;
use nimbus_core::config::Config;
use nimbus_core::ports::{AuthProvider, HttpClient};
use nimbus_core::types::DriveType;
use nimbus_graph::item::Quota;
use nimbus_graph::GraphClient;

use crate::cache::MetadataCache;
use crate::delta::DeltaLoop;
use crate::inode::{Inode, InodeState};
use crate::snapshot;
use crate::upload::UploadManager;

/// Name of the embedded database file inside the cache directory.
pub const STORE_FILE: &str = "nimbus.db";

/// Shared state for one mount.
pub struct FsContext {
    pub graph: GraphClient,
    pub store: ContentStore,
    pub cache: MetadataCache,
    pub uploads: UploadManager,
    pub config: Config,
    pub drive_type: DriveType,
    offline: AtomicBool,
    quota: Mutex<Quota>,
}

impl FsContext {
    /// Initializes a mount: opens the store, queries the drive, and
    /// either restores the serialized metadata or seeds the cache with
    /// the server's root item.
    pub async fn bootstrap(
        config: Config,
        http: Arc<dyn HttpClient>,
        auth: Arc<dyn AuthProvider>,
    ) -> anyhow::Result<Arc<Self>> {
        std::fs::create_dir_all(&config.cache_dir)
            .with_context(|| format!("creating cache dir {}", config.cache_dir.display()))?;
        let store = ContentStore::open(config.cache_dir.join(STORE_FILE))
            .context("opening content store")?;
        let graph = GraphClient::new(http, auth);

        let drive = graph.get_drive().await.context("fetching drive metadata")?;
        let drive_type = DriveType::from_graph(drive.drive_type.as_deref().unwrap_or(""));
        let quota = drive.quota.unwrap_or_default();

        let cache = MetadataCache::new();
        match snapshot::load(&store).context("loading metadata snapshot")? {
            Some(snap) => {
                info!(items = snap.items.len(), "restored metadata snapshot");
                snapshot::restore(&cache, snap);
            }
            None => {
                let root = graph.get_root().await.context("fetching drive root")?;
                info!(root_id = %root.id, ?drive_type, "starting with a fresh metadata cache");
                cache.set_root(Arc::new(Inode::new(InodeState::from_drive_item(&root))));
            }
        }

        Ok(Arc::new(Self {
            graph,
            store,
            cache,
            uploads: UploadManager::new(),
            config,
            drive_type,
            offline: AtomicBool::new(false),
            quota: Mutex::new(quota),
        }))
    }

    /// Builds a context from already-constructed parts. Tests use this to
    /// wire in fakes without touching the network.
    pub fn from_parts(
        graph: GraphClient,
        store: ContentStore,
        cache: MetadataCache,
        config: Config,
        drive_type: DriveType,
    ) -> Arc<Self> {
        Arc::new(Self {
            graph,
            store,
            cache,
            uploads: UploadManager::new(),
            config,
            drive_type,
            offline: AtomicBool::new(false),
            quota: Mutex::new(Quota::default()),
        })
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Flips the offline flag, logging transitions.
    pub fn set_offline(&self, offline: bool) {
        let was = self.offline.swap(offline, Ordering::SeqCst);
        if was != offline {
            if offline {
                warn!("server unreachable, entering offline mode");
            } else {
                info!("server reachable again, leaving offline mode");
            }
        }
    }

    pub fn quota(&self) -> Quota {
        *self.quota.lock()
    }

    pub fn set_quota(&self, quota: Quota) {
        *self.quota.lock() = quota;
    }

    /// Serializes the metadata graph into the store; called by the delta
    /// loop at end-of-cycle and by unmount.
    pub fn persist_metadata(&self) {
        if let Err(e) = snapshot::save(&self.cache, &self.store) {
            warn!(error = %e, "failed to persist metadata snapshot");
        }
    }
}

/// Spawns the two background workers; both exit at their next iteration
/// once `cancel` fires.
pub fn spawn_workers(ctx: &Arc<FsContext>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(UploadManager::run(Arc::clone(ctx), cancel.clone())),
        tokio::spawn(DeltaLoop::run(Arc::clone(ctx), cancel.clone())),
    ]
}
