//! FUSE adapter: exposes [`ObjectFs`] to the kernel through rfuse3.
//!
//! The adapter is deliberately thin. Inode-level requests map onto the
//! core's `*_at`/`*_ino` operations; attribute and type conversion helpers
//! live at the bottom of the module. IO is stateless (`fh` is always 0) and
//! directory listings are re-read per request.

pub mod mount;

use crate::objstore::client::ObjectBackend;
use crate::vfs::fs::{Caller, ObjectFs};
use crate::vfs::inode::{FileAttr as VfsFileAttr, Timespec};
use bytes::Bytes;
use rfuse3::Errno;
use rfuse3::Result as FuseResult;
use rfuse3::raw::Filesystem;
use rfuse3::raw::Request;
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, ReplyAttr, ReplyCreated, ReplyData, ReplyDirectory,
    ReplyDirectoryPlus, ReplyEntry, ReplyInit, ReplyOpen, ReplyStatFs, ReplyWrite,
};
use rfuse3::{FileType as FuseFileType, SetAttr, Timestamp};
use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(1);

#[allow(refining_impl_trait_reachable)]
impl<B> Filesystem for ObjectFs<B>
where
    B: ObjectBackend + 'static,
{
    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        // Conservative max write size (1 MiB); a larger value mostly grows
        // the data buffer between flushes.
        let max_write = NonZeroU32::new(1024 * 1024).unwrap();
        Ok(ReplyInit { max_write })
    }

    async fn destroy(&self, _req: Request) {
        // Unflushed records are lost on unmount unless the kernel sent an
        // fsync first; push them out while we still can.
        if let Err(e) = self.sync().await {
            tracing::warn!(error = %e, "flush on unmount failed");
        }
    }

    async fn lookup(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        let name = name.to_string_lossy();
        let Some(child) = self.child_of(parent as u32, name.as_ref()).await else {
            return Err(libc::ENOENT.into());
        };
        let Some(attr) = self.stat_ino(child).await else {
            return Err(libc::ENOENT.into());
        };
        Ok(ReplyEntry {
            ttl: TTL,
            attr: to_fuse_attr(&attr),
            generation: 0,
        })
    }

    async fn getattr(
        &self,
        _req: Request,
        ino: u64,
        _fh: Option<u64>,
        _flags: u32,
    ) -> FuseResult<ReplyAttr> {
        let Some(attr) = self.stat_ino(ino as u32).await else {
            return Err(libc::ENOENT.into());
        };
        Ok(ReplyAttr {
            ttl: TTL,
            attr: to_fuse_attr(&attr),
        })
    }

    async fn setattr(
        &self,
        _req: Request,
        ino: u64,
        _fh: Option<u64>,
        set_attr: SetAttr,
    ) -> FuseResult<ReplyAttr> {
        let ino = ino as u32;
        if let Some(size) = set_attr.size {
            self.truncate_ino(ino, size).await.map_err(errno)?;
        }
        if let Some(mode) = set_attr.mode {
            self.chmod_ino(ino, mode).await.map_err(errno)?;
        }
        if let Some(mtime) = set_attr.mtime {
            self.utimens_ino(ino, Some(from_timestamp(mtime)))
                .await
                .map_err(errno)?;
        }
        let Some(attr) = self.stat_ino(ino).await else {
            return Err(libc::ENOENT.into());
        };
        Ok(ReplyAttr {
            ttl: TTL,
            attr: to_fuse_attr(&attr),
        })
    }

    async fn mkdir(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
    ) -> FuseResult<ReplyEntry> {
        let name = name.to_string_lossy();
        let attr = self
            .mkdir_at(parent as u32, name.as_ref(), mode, &caller(&req))
            .await
            .map_err(errno)?;
        Ok(ReplyEntry {
            ttl: TTL,
            attr: to_fuse_attr(&attr),
            generation: 0,
        })
    }

    async fn create(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _flags: u32,
    ) -> FuseResult<ReplyCreated> {
        let name = name.to_string_lossy();
        let attr = self
            .create_at(parent as u32, name.as_ref(), mode, &caller(&req))
            .await
            .map_err(errno)?;
        Ok(ReplyCreated {
            ttl: TTL,
            attr: to_fuse_attr(&attr),
            generation: 0,
            fh: 0,
            flags: 0,
        })
    }

    async fn mknod(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        rdev: u32,
    ) -> FuseResult<ReplyEntry> {
        let name = name.to_string_lossy();
        let attr = self
            .mknod_at(parent as u32, name.as_ref(), mode, rdev, &caller(&req))
            .await
            .map_err(errno)?;
        Ok(ReplyEntry {
            ttl: TTL,
            attr: to_fuse_attr(&attr),
            generation: 0,
        })
    }

    async fn symlink(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        link: &OsStr,
    ) -> FuseResult<ReplyEntry> {
        let name = name.to_string_lossy();
        let target = link.to_string_lossy();
        let attr = self
            .symlink_at(parent as u32, name.as_ref(), target.as_ref(), &caller(&req))
            .await
            .map_err(errno)?;
        Ok(ReplyEntry {
            ttl: TTL,
            attr: to_fuse_attr(&attr),
            generation: 0,
        })
    }

    async fn readlink(&self, _req: Request, ino: u64) -> FuseResult<ReplyData> {
        let target = self.readlink_ino(ino as u32).await.map_err(errno)?;
        Ok(ReplyData {
            data: Bytes::from(target.into_bytes()),
        })
    }

    async fn unlink(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        let name = name.to_string_lossy();
        self.unlink_at(parent as u32, name.as_ref())
            .await
            .map_err(errno)
    }

    async fn rmdir(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        let name = name.to_string_lossy();
        self.rmdir_at(parent as u32, name.as_ref())
            .await
            .map_err(errno)
    }

    async fn rename(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        new_parent: u64,
        new_name: &OsStr,
    ) -> FuseResult<()> {
        let name = name.to_string_lossy();
        let new_name = new_name.to_string_lossy();
        self.rename_at(
            parent as u32,
            name.as_ref(),
            new_parent as u32,
            new_name.as_ref(),
        )
        .await
        .map_err(errno)
    }

    // Stateless IO: every open succeeds with fh 0 once the kind checks out.
    async fn open(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        let Some(attr) = self.stat_ino(ino as u32).await else {
            return Err(libc::ENOENT.into());
        };
        if attr.kind == crate::vfs::inode::FileKind::Dir {
            return Err(libc::EISDIR.into());
        }
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn opendir(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        let Some(attr) = self.stat_ino(ino as u32).await else {
            return Err(libc::ENOENT.into());
        };
        if attr.kind != crate::vfs::inode::FileKind::Dir {
            return Err(libc::ENOTDIR.into());
        }
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn read(
        &self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        let data = self
            .read_ino(ino as u32, offset, size as usize)
            .await
            .map_err(errno)?;
        Ok(ReplyData {
            data: Bytes::from(data),
        })
    }

    async fn write(
        &self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> FuseResult<ReplyWrite> {
        let written = self
            .write_ino(ino as u32, offset, data)
            .await
            .map_err(errno)? as u32;
        Ok(ReplyWrite { written })
    }

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory<futures_util::stream::BoxStream<'a, FuseResult<DirectoryEntry>>>>
    {
        let entries = self.readdir_ino(ino as u32).await.map_err(errno)?;
        let mut all: Vec<DirectoryEntry> = Vec::new();

        // Offsets 1 and 2 are taken by "." and "..".
        if offset == 0 {
            all.push(DirectoryEntry {
                inode: ino,
                kind: FuseFileType::Directory,
                name: OsString::from("."),
                offset: 1,
            });
            let parent = self.parent_of(ino as u32).await.unwrap_or(self.root_ino());
            all.push(DirectoryEntry {
                inode: parent as u64,
                kind: FuseFileType::Directory,
                name: OsString::from(".."),
                offset: 2,
            });
        }

        let skip = if offset <= 2 { 0 } else { (offset - 2) as usize };
        for (i, entry) in entries.iter().enumerate().skip(skip) {
            let kind = match self.stat_ino(entry.ino).await {
                Some(attr) => fuse_kind(attr.mode),
                None => continue,
            };
            all.push(DirectoryEntry {
                inode: entry.ino as u64,
                kind,
                name: OsString::from(entry.name.clone()),
                offset: i as i64 + 3,
            });
        }

        let stream = futures_util::stream::iter(all.into_iter().map(Ok));
        Ok(ReplyDirectory {
            entries: Box::pin(stream),
        })
    }

    async fn readdirplus<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> FuseResult<
        ReplyDirectoryPlus<futures_util::stream::BoxStream<'a, FuseResult<DirectoryEntryPlus>>>,
    > {
        let entries = self.readdir_ino(ino as u32).await.map_err(errno)?;
        let mut all: Vec<DirectoryEntryPlus> = Vec::new();

        if offset == 0 {
            let Some(attr) = self.stat_ino(ino as u32).await else {
                return Err(libc::ENOENT.into());
            };
            all.push(DirectoryEntryPlus {
                inode: ino,
                generation: 0,
                kind: FuseFileType::Directory,
                name: OsString::from("."),
                offset: 1,
                attr: to_fuse_attr(&attr),
                entry_ttl: TTL,
                attr_ttl: TTL,
            });
            let parent = self.parent_of(ino as u32).await.unwrap_or(self.root_ino());
            if let Some(pattr) = self.stat_ino(parent).await {
                all.push(DirectoryEntryPlus {
                    inode: parent as u64,
                    generation: 0,
                    kind: FuseFileType::Directory,
                    name: OsString::from(".."),
                    offset: 2,
                    attr: to_fuse_attr(&pattr),
                    entry_ttl: TTL,
                    attr_ttl: TTL,
                });
            }
        }

        let skip = offset.saturating_sub(2) as usize;
        for (i, entry) in entries.iter().enumerate().skip(skip) {
            let Some(attr) = self.stat_ino(entry.ino).await else {
                continue;
            };
            all.push(DirectoryEntryPlus {
                inode: entry.ino as u64,
                generation: 0,
                kind: fuse_kind(attr.mode),
                name: OsString::from(entry.name.clone()),
                offset: i as i64 + 3,
                attr: to_fuse_attr(&attr),
                entry_ttl: TTL,
                attr_ttl: TTL,
            });
        }

        let stream = futures_util::stream::iter(all.into_iter().map(Ok));
        Ok(ReplyDirectoryPlus {
            entries: Box::pin(stream),
        })
    }

    async fn statfs(&self, _req: Request, _ino: u64) -> FuseResult<ReplyStatFs> {
        let s = self.statfs();
        Ok(ReplyStatFs {
            blocks: s.blocks,
            bfree: s.bfree,
            bavail: s.bavail,
            files: s.files,
            ffree: 0,
            bsize: s.block_size,
            namelen: s.name_max,
            frsize: s.block_size,
        })
    }

    async fn fsync(&self, _req: Request, _ino: u64, _fh: u64, _datasync: bool) -> FuseResult<()> {
        self.sync().await.map_err(errno)
    }

    async fn fsyncdir(
        &self,
        _req: Request,
        _ino: u64,
        _fh: u64,
        _datasync: bool,
    ) -> FuseResult<()> {
        self.sync().await.map_err(errno)
    }

    async fn flush(&self, _req: Request, _ino: u64, _fh: u64, _lock_owner: u64) -> FuseResult<()> {
        Ok(())
    }

    async fn release(
        &self,
        _req: Request,
        _ino: u64,
        _fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> FuseResult<()> {
        Ok(())
    }

    async fn releasedir(&self, _req: Request, _ino: u64, _fh: u64, _flags: u32) -> FuseResult<()> {
        Ok(())
    }

    async fn forget(&self, _req: Request, _ino: u64, _nlookup: u64) {}

    async fn batch_forget(&self, _req: Request, _inodes: &[(u64, u64)]) {}

    async fn interrupt(&self, _req: Request, _unique: u64) -> FuseResult<()> {
        Ok(())
    }
}

// =============== helpers ===============

fn caller(req: &Request) -> Caller {
    Caller {
        uid: req.uid,
        gid: req.gid,
    }
}

fn errno(e: crate::vfs::error::FsError) -> Errno {
    e.errno().into()
}

fn timestamp(t: Timespec) -> Timestamp {
    Timestamp::new(t.sec, t.nsec as u32)
}

fn from_timestamp(t: Timestamp) -> Timespec {
    Timespec {
        sec: t.sec,
        nsec: t.nsec as i64,
    }
}

fn fuse_kind(mode: u32) -> FuseFileType {
    match mode & libc::S_IFMT as u32 {
        m if m == libc::S_IFIFO as u32 => FuseFileType::NamedPipe,
        m if m == libc::S_IFCHR as u32 => FuseFileType::CharDevice,
        m if m == libc::S_IFBLK as u32 => FuseFileType::BlockDevice,
        m if m == libc::S_IFDIR as u32 => FuseFileType::Directory,
        m if m == libc::S_IFLNK as u32 => FuseFileType::Symlink,
        m if m == libc::S_IFSOCK as u32 => FuseFileType::Socket,
        _ => FuseFileType::RegularFile,
    }
}

fn to_fuse_attr(a: &VfsFileAttr) -> rfuse3::raw::reply::FileAttr {
    let mtime = timestamp(a.mtime);
    rfuse3::raw::reply::FileAttr {
        ino: a.ino as u64,
        size: a.size.max(0) as u64,
        blocks: a.blocks() as u64,
        atime: mtime,
        mtime,
        ctime: mtime,
        #[cfg(target_os = "macos")]
        crtime: mtime,
        kind: fuse_kind(a.mode),
        perm: (a.mode & 0o7777) as u16,
        nlink: a.nlink,
        uid: a.uid,
        gid: a.gid,
        rdev: a.rdev,
        #[cfg(target_os = "macos")]
        flags: 0,
        blksize: 4096,
    }
}
