//! Nimbus FUSE - the filesystem engine
//!
//! Mounts a OneDrive drive as a POSIX-like hierarchy. Not a sync client:
//! content is fetched lazily on open, cached in the on-disk content
//! store, and local mutations propagate back to the server
//! asynchronously through the upload manager while a delta loop folds
//! remote changes into the metadata cache.
//!
//! The moving parts:
//! - [`cache::MetadataCache`] - id-keyed inode arena with per-inode locks
//! - [`vfs::Vfs`] - the VFS operation handlers
//! - [`upload::UploadManager`] - deduplicating upload queue with chunked
//!   resumable sessions for large files
//! - [`delta::DeltaLoop`] - the change-feed poller
//! - [`fs::NimbusFs`] - the `fuser` adapter served to the kernel
//!
//! # Mounting
//!
//! ```ignore
//! let ctx = FsContext::bootstrap(config, http, auth).await?;
//! let cancel = CancellationToken::new();
//! let workers = context::spawn_workers(&ctx, &cancel);
//! let fs = NimbusFs::new(ctx.clone(), tokio::runtime::Handle::current());
//! fuser::mount2(fs, mountpoint, &NimbusFs::mount_options("nimbus"))?;
//! // on unmount:
//! cancel.cancel();
//! ctx.persist_metadata();
//! ```

pub mod cache;
pub mod context;
pub mod delta;
pub mod fs;
pub mod inode;
pub mod snapshot;
pub mod upload;
pub mod vfs;

pub use cache::{MetadataCache, ROOT_INO};
pub use context::{spawn_workers, FsContext};
pub use delta::DeltaLoop;
pub use fs::NimbusFs;
pub use upload::{UploadManager, CHUNK_SIZE, SIMPLE_UPLOAD_LIMIT};
pub use vfs::Vfs;
