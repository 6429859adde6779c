//! FUSE adapter: bridges the kernel's callback surface onto the async
//! VFS handlers.
//!
//! FUSE dispatches callbacks from multiple threads; each callback blocks
//! on the corresponding handler future via a runtime handle. Errors are
//! translated to errno values through [`FsError::errno`]. The extended
//! attribute surface is disabled.

use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr,
    Request, TimeOrNow,
};
use tokio::runtime::Handle;
use tracing::debug;

use nimbus_core::errors::{FsError, FsResult};
use nimbus_core::types::ItemId;

use crate::cache::ROOT_INO;
use crate::context::FsContext;
use crate::vfs::{Attr, SetAttr, Vfs};

/// The FUSE filesystem served to the kernel.
pub struct NimbusFs {
    vfs: Vfs,
    rt: Handle,
    ttl: Duration,
    next_fh: AtomicU64,
}

impl NimbusFs {
    pub fn new(ctx: Arc<FsContext>, rt: Handle) -> Self {
        let ttl = ctx.config.attr_timeout();
        Self {
            vfs: Vfs::new(ctx),
            rt,
            ttl,
            next_fh: AtomicU64::new(1),
        }
    }

    /// Mount options matching the handler surface: no xattrs, default
    /// permissions handling in the kernel.
    pub fn mount_options(name: &str) -> Vec<MountOption> {
        vec![
            MountOption::FSName(name.to_string()),
            MountOption::DefaultPermissions,
            MountOption::NoDev,
            MountOption::NoSuid,
        ]
    }

    fn id_of(&self, ino: u64) -> FsResult<ItemId> {
        self.vfs
            .ctx
            .cache
            .get_by_ino(ino)
            .map(|node| node.read().id.clone())
            .ok_or(FsError::NotFound)
    }

    fn alloc_fh(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::SeqCst)
    }

    fn kind_of(mode: u32) -> FileType {
        if mode & libc::S_IFMT == libc::S_IFDIR {
            FileType::Directory
        } else {
            FileType::RegularFile
        }
    }

    fn to_file_attr(attr: &Attr) -> FileAttr {
        let mtime = UNIX_EPOCH + Duration::from_secs(attr.mtime);
        FileAttr {
            ino: attr.ino,
            size: attr.size,
            blocks: attr.size.div_ceil(512),
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind: Self::kind_of(attr.mode),
            perm: (attr.mode & 0o7777) as u16,
            nlink: attr.nlink,
            uid: attr.uid,
            gid: attr.gid,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }

    fn time_or_now(t: TimeOrNow) -> u64 {
        let time = match t {
            TimeOrNow::SpecificTime(t) => t,
            TimeOrNow::Now => SystemTime::now(),
        };
        time.duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

impl Filesystem for NimbusFs {
    fn init(
        &mut self,
        _req: &Request<'_>,
        config: &mut fuser::KernelConfig,
    ) -> Result<(), libc::c_int> {
        let max_background = self.vfs.ctx.config.mount.max_background;
        if let Err(kernel_max) = config.set_max_background(max_background) {
            debug!(requested = max_background, kernel_max, "kernel limited max_background");
        }
        Ok(())
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let result: FsResult<Attr> = self.rt.block_on(async {
            let parent_id = self.id_of(parent)?;
            let node = self.vfs.lookup(&parent_id, name).await?;
            let id = node.read().id.clone();
            self.vfs.getattr(&id)
        });
        match result {
            Ok(attr) => reply.entry(&self.ttl, &Self::to_file_attr(&attr), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let result = self.id_of(ino).and_then(|id| self.vfs.getattr(&id));
        match result {
            Ok(attr) => reply.attr(&self.ttl, &Self::to_file_attr(&attr)),
            Err(e) => reply.error(e.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        if uid.is_some() || gid.is_some() {
            // Ownership is the mounting user's, always.
            reply.error(libc::EPERM);
            return;
        }
        let changes = SetAttr {
            mtime: mtime.map(Self::time_or_now),
            mode,
            size,
        };
        let result = self.rt.block_on(async {
            let id = self.id_of(ino)?;
            self.vfs.setattr(&id, changes).await
        });
        match result {
            Ok(attr) => reply.attr(&self.ttl, &Self::to_file_attr(&attr)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let result = self.rt.block_on(async {
            let id = self.id_of(ino)?;
            let parent_ino = self
                .vfs
                .ctx
                .cache
                .get_by_ino(ino)
                .map(|node| {
                    let parent_id = node.read().parent_id.clone();
                    if parent_id.as_str().is_empty() {
                        ROOT_INO
                    } else {
                        self.vfs.ctx.cache.ino_for(&parent_id)
                    }
                })
                .unwrap_or(ROOT_INO);
            let entries = self.vfs.readdir(&id).await?;
            Ok::<_, FsError>((parent_ino, entries))
        });

        let (parent_ino, entries) = match result {
            Ok(pair) => pair,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        let mut cursor = 0_i64;
        // "." and ".." first, then the children.
        if cursor >= offset {
            if reply.add(ino, cursor + 1, FileType::Directory, OsStr::new(".")) {
                reply.ok();
                return;
            }
        }
        cursor += 1;
        if cursor >= offset {
            if reply.add(parent_ino, cursor + 1, FileType::Directory, OsStr::new("..")) {
                reply.ok();
                return;
            }
        }
        cursor += 1;
        for entry in entries {
            if cursor >= offset {
                if reply.add(
                    entry.ino,
                    cursor + 1,
                    Self::kind_of(entry.mode),
                    OsStr::new(&entry.name),
                ) {
                    break;
                }
            }
            cursor += 1;
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let result = self.rt.block_on(async {
            let id = self.id_of(ino)?;
            self.vfs.open(&id).await
        });
        match result {
            Ok(()) => reply.opened(self.alloc_fh(), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(self.alloc_fh(), 0);
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let result = self.rt.block_on(async {
            let id = self.id_of(ino)?;
            self.vfs.read(&id, offset as u64, size).await
        });
        match result {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let result = self
            .id_of(ino)
            .and_then(|id| self.vfs.write(&id, offset as u64, data));
        match result {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let result = self.rt.block_on(async {
            let id = self.id_of(ino)?;
            self.vfs.flush(&id).await
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        // The last handle close spills content to the store.
        let result = self.rt.block_on(async {
            let id = self.id_of(ino)?;
            self.vfs.flush(&id).await
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => {
                debug!(ino, errno = e.errno(), "release flush failed");
                reply.error(e.errno());
            }
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        let result = self.rt.block_on(async {
            let id = self.id_of(ino)?;
            self.vfs.fsync(&id).await
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let result = self.rt.block_on(async {
            let parent_id = self.id_of(parent)?;
            let node = self.vfs.create(&parent_id, name, mode).await?;
            let id = node.read().id.clone();
            self.vfs.getattr(&id)
        });
        match result {
            Ok(attr) => reply.created(
                &self.ttl,
                &Self::to_file_attr(&attr),
                0,
                self.alloc_fh(),
                flags as u32,
            ),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let result = self.rt.block_on(async {
            let parent_id = self.id_of(parent)?;
            let node = self.vfs.mkdir(&parent_id, name, mode).await?;
            let id = node.read().id.clone();
            self.vfs.getattr(&id)
        });
        match result {
            Ok(attr) => reply.entry(&self.ttl, &Self::to_file_attr(&attr), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let result = self.rt.block_on(async {
            let parent_id = self.id_of(parent)?;
            self.vfs.unlink(&parent_id, name).await
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let result = self.rt.block_on(async {
            let parent_id = self.id_of(parent)?;
            self.vfs.rmdir(&parent_id, name).await
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(name), Some(newname)) = (name.to_str(), newname.to_str()) else {
            reply.error(libc::EINVAL);
            return;
        };
        let result = self.rt.block_on(async {
            let old_parent = self.id_of(parent)?;
            let new_parent = self.id_of(newparent)?;
            self.vfs.rename(&old_parent, name, &new_parent, newname).await
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let result = self.rt.block_on(self.vfs.statfs());
        match result {
            Ok(st) => reply.statfs(
                st.blocks, st.bfree, st.bavail, st.files, st.ffree, st.bsize, st.namelen,
                st.bsize,
            ),
            Err(e) => reply.error(e.errno()),
        }
    }

    // The xattr surface is disabled.

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _size: u32,
        reply: ReplyXattr,
    ) {
        reply.error(libc::ENODATA);
    }

    fn listxattr(&mut self, _req: &Request<'_>, _ino: u64, size: u32, reply: ReplyXattr) {
        if size == 0 {
            reply.size(0);
        } else {
            reply.data(&[]);
        }
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(libc::EPERM);
    }

    fn removexattr(&mut self, _req: &Request<'_>, _ino: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(libc::ENODATA);
    }

    fn access(&mut self, _req: &Request<'_>, _ino: u64, _mask: i32, reply: ReplyEmpty) {
        reply.ok();
    }
}
