//! The filesystem core: path-based upcalls over the in-memory model, the
//! packager driving object flushes, and the mount-time replay loader.
//!
//! Every operation serializes on one mutex, held across any backend call it
//! makes (range GETs during read, the PUT during flush). An upcall returns
//! success once its records sit in the metadata buffer; durability requires
//! a flush, which callers force with `sync`.

use crate::objstore::client::{ObjectBackend, ObjectClient};
use crate::oplog::object::{
    OBJECT_HEADER_LEN, ObjectHeader, ObjectKind, ParsedKey, object_key, parse_object_key,
};
use crate::oplog::record::{DataRecord, InodeRecord, LogRecord, NAME_MAX};
use crate::oplog::replay::replay_object;
use crate::vfs::error::FsError;
use crate::vfs::extent::Extent;
use crate::vfs::inode::{
    DirEntry, FileAttr, FileKind, Inode, InodeAttr, InodeBody, InodeTable, ROOT_INUM, Timespec,
};
use crate::vfs::pager::{LogConfig, Pager};
use anyhow::anyhow;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Identity of the caller, as reported by the host (FUSE request context).
/// Newly created inodes inherit it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Caller {
    pub uid: u32,
    pub gid: u32,
}

/// `statfs` snapshot. Object stores have no meaningful block accounting, so
/// the counts stay zero.
#[derive(Debug, Clone, Copy)]
pub struct StatFs {
    pub block_size: u32,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub name_max: u32,
}

struct FsState {
    table: InodeTable,
    pager: Pager,
    /// header_length per object, learned at mount and on first read of an
    /// object. Objects are immutable after PUT, so entries never expire.
    data_offsets: HashMap<u32, u32>,
}

/// An object-log filesystem bound to one key prefix of a backing store.
pub struct ObjectFs<B: ObjectBackend> {
    client: ObjectClient<B>,
    prefix: String,
    state: Mutex<FsState>,
}

impl<B: ObjectBackend> ObjectFs<B> {
    /// Mount: list the prefix, replay every log object in index order, and
    /// position the packager after the highest index seen. A prefix with no
    /// objects yields a fresh filesystem holding only the root directory.
    pub async fn mount(
        client: ObjectClient<B>,
        prefix: impl Into<String>,
        cfg: LogConfig,
    ) -> Result<Self, FsError> {
        let prefix = prefix.into();
        let mut table = InodeTable::new();
        // The root is never logged itself; records reference it from the
        // very first object, so it must exist before replay begins.
        table.ensure_root();
        let mut data_offsets = HashMap::new();

        let keys = client.list_objects(&prefix).await.map_err(FsError::Store)?;
        let mut indices = Vec::with_capacity(keys.len());
        for key in &keys {
            match parse_object_key(&prefix, key) {
                Some(ParsedKey::Data(index)) => indices.push(index),
                Some(ParsedKey::Checkpoint(index)) => {
                    tracing::debug!(key, index, "skipping checkpoint object");
                }
                None => {
                    return Err(FsError::Store(anyhow!(
                        "unrecognized key {key:?} under prefix {prefix:?}"
                    )));
                }
            }
        }
        indices.sort_unstable();

        for &index in &indices {
            let key = object_key(&prefix, index);
            let mut head = [0u8; OBJECT_HEADER_LEN];
            read_exact(&client, &key, 0, &mut head).await?;
            let header = ObjectHeader::decode(&head)?;
            if header.kind != ObjectKind::Data {
                return Err(FsError::Store(anyhow!("object {key} is not a log object")));
            }
            let mut buf = vec![0u8; header.header_len as usize];
            read_exact(&client, &key, 0, &mut buf).await?;
            let records = LogRecord::decode_stream(&buf[OBJECT_HEADER_LEN..])?;
            replay_object(&mut table, index, &records)?;
            data_offsets.insert(index, header.header_len);
            tracing::debug!(key, records = records.len(), "replayed log object");
        }

        let mut pager = Pager::new(cfg);
        pager.set_index(indices.last().map_or(0, |last| last + 1));
        tracing::info!(
            prefix = %prefix,
            objects = indices.len(),
            next_index = pager.this_index(),
            next_inum = table.next_inum(),
            "mounted"
        );

        Ok(Self {
            client,
            prefix,
            state: Mutex::new(FsState {
                table,
                pager,
                data_offsets,
            }),
        })
    }

    pub fn root_ino(&self) -> u32 {
        ROOT_INUM
    }

    // ===== attribute and namespace queries =====

    pub async fn getattr(&self, path: &str) -> Result<FileAttr, FsError> {
        let st = self.state.lock().await;
        let inum = resolve(&st.table, path)?;
        Ok(attr_of(st.table.get(inum).unwrap()))
    }

    pub async fn stat_ino(&self, ino: u32) -> Option<FileAttr> {
        let st = self.state.lock().await;
        st.table.get(ino).map(attr_of)
    }

    /// Child inode of `parent` by name.
    pub async fn child_of(&self, parent: u32, name: &str) -> Option<u32> {
        let st = self.state.lock().await;
        st.table.get(parent)?.entries()?.get(name).copied()
    }

    /// Directory containing `ino`; the root for the root itself.
    pub async fn parent_of(&self, ino: u32) -> Option<u32> {
        if ino == ROOT_INUM {
            return Some(ROOT_INUM);
        }
        let st = self.state.lock().await;
        st.table.parent_of(ino)
    }

    pub async fn readdir(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        let st = self.state.lock().await;
        let inum = resolve(&st.table, path)?;
        readdir_entries(&st.table, inum, path)
    }

    pub async fn readdir_ino(&self, ino: u32) -> Result<Vec<DirEntry>, FsError> {
        let st = self.state.lock().await;
        readdir_entries(&st.table, ino, "")
    }

    pub async fn readlink(&self, path: &str) -> Result<String, FsError> {
        let st = self.state.lock().await;
        let inum = resolve(&st.table, path)?;
        readlink_target(&st.table, inum, path)
    }

    pub async fn readlink_ino(&self, ino: u32) -> Result<String, FsError> {
        let st = self.state.lock().await;
        readlink_target(&st.table, ino, "")
    }

    pub fn statfs(&self) -> StatFs {
        StatFs {
            block_size: 4096,
            blocks: 0,
            bfree: 0,
            bavail: 0,
            files: 0,
            name_max: NAME_MAX as u32,
        }
    }

    // ===== create family =====

    pub async fn mkdir(&self, path: &str, mode: u32, caller: &Caller) -> Result<FileAttr, FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        let (existing, parent, leaf) = resolve_parent(&st.table, path)?;
        if existing.is_some() {
            return Err(FsError::already_exists(path));
        }
        let leaf = leaf.to_string();
        let inum = create_node(st, parent, &leaf, mode | libc::S_IFDIR as u32, 0, caller)?;
        self.maybe_flush(st).await?;
        Ok(attr_of(st.table.get(inum).unwrap()))
    }

    pub async fn mkdir_at(
        &self,
        parent: u32,
        name: &str,
        mode: u32,
        caller: &Caller,
    ) -> Result<FileAttr, FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        let inum = create_node(st, parent, name, mode | libc::S_IFDIR as u32, 0, caller)?;
        self.maybe_flush(st).await?;
        Ok(attr_of(st.table.get(inum).unwrap()))
    }

    /// Create a regular file.
    pub async fn create(&self, path: &str, mode: u32, caller: &Caller) -> Result<FileAttr, FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        let (existing, parent, leaf) = resolve_parent(&st.table, path)?;
        if existing.is_some() {
            return Err(FsError::already_exists(path));
        }
        let leaf = leaf.to_string();
        let inum = create_node(st, parent, &leaf, mode | libc::S_IFREG as u32, 0, caller)?;
        self.maybe_flush(st).await?;
        Ok(attr_of(st.table.get(inum).unwrap()))
    }

    pub async fn create_at(
        &self,
        parent: u32,
        name: &str,
        mode: u32,
        caller: &Caller,
    ) -> Result<FileAttr, FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        let inum = create_node(st, parent, name, mode | libc::S_IFREG as u32, 0, caller)?;
        self.maybe_flush(st).await?;
        Ok(attr_of(st.table.get(inum).unwrap()))
    }

    /// Create a device node, FIFO, or socket. The mode carries the type
    /// bits; directories and symlinks have their own upcalls.
    pub async fn mknod(
        &self,
        path: &str,
        mode: u32,
        rdev: u32,
        caller: &Caller,
    ) -> Result<FileAttr, FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        check_mknod_mode(mode, path)?;
        let (existing, parent, leaf) = resolve_parent(&st.table, path)?;
        if existing.is_some() {
            return Err(FsError::already_exists(path));
        }
        let leaf = leaf.to_string();
        let inum = create_node(st, parent, &leaf, mode, rdev, caller)?;
        self.maybe_flush(st).await?;
        Ok(attr_of(st.table.get(inum).unwrap()))
    }

    pub async fn mknod_at(
        &self,
        parent: u32,
        name: &str,
        mode: u32,
        rdev: u32,
        caller: &Caller,
    ) -> Result<FileAttr, FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        check_mknod_mode(mode, name)?;
        let inum = create_node(st, parent, name, mode, rdev, caller)?;
        self.maybe_flush(st).await?;
        Ok(attr_of(st.table.get(inum).unwrap()))
    }

    /// Create a symlink at `path` pointing at `target`.
    pub async fn symlink(
        &self,
        target: &str,
        path: &str,
        caller: &Caller,
    ) -> Result<FileAttr, FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        let (existing, parent, leaf) = resolve_parent(&st.table, path)?;
        if existing.is_some() {
            return Err(FsError::already_exists(path));
        }
        let leaf = leaf.to_string();
        let inum = symlink_node(st, parent, &leaf, target, caller)?;
        self.maybe_flush(st).await?;
        Ok(attr_of(st.table.get(inum).unwrap()))
    }

    pub async fn symlink_at(
        &self,
        parent: u32,
        name: &str,
        target: &str,
        caller: &Caller,
    ) -> Result<FileAttr, FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        let inum = symlink_node(st, parent, name, target, caller)?;
        self.maybe_flush(st).await?;
        Ok(attr_of(st.table.get(inum).unwrap()))
    }

    // ===== removal =====

    pub async fn unlink(&self, path: &str) -> Result<(), FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        let (existing, parent, leaf) = resolve_parent(&st.table, path)?;
        let inum = existing.ok_or_else(|| FsError::not_found(path))?;
        let leaf = leaf.to_string();
        unlink_node(st, parent, inum, &leaf)?;
        self.maybe_flush(st).await
    }

    pub async fn unlink_at(&self, parent: u32, name: &str) -> Result<(), FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        let inum = child_in(&st.table, parent, name)?;
        unlink_node(st, parent, inum, name)?;
        self.maybe_flush(st).await
    }

    pub async fn rmdir(&self, path: &str) -> Result<(), FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        let (existing, parent, leaf) = resolve_parent(&st.table, path)?;
        let inum = existing.ok_or_else(|| FsError::not_found(path))?;
        let leaf = leaf.to_string();
        rmdir_node(st, parent, inum, &leaf)?;
        self.maybe_flush(st).await
    }

    pub async fn rmdir_at(&self, parent: u32, name: &str) -> Result<(), FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        let inum = child_in(&st.table, parent, name)?;
        rmdir_node(st, parent, inum, name)?;
        self.maybe_flush(st).await
    }

    // ===== rename =====

    /// Move `old` to `new`. The destination must not exist.
    pub async fn rename(&self, old: &str, new: &str) -> Result<(), FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        let (src, src_parent, src_leaf) = resolve_parent(&st.table, old)?;
        let inum = src.ok_or_else(|| FsError::not_found(old))?;
        let src_leaf = src_leaf.to_string();
        let (dst, dst_parent, dst_leaf) = resolve_parent(&st.table, new)?;
        if dst.is_some() {
            return Err(FsError::already_exists(new));
        }
        let dst_leaf = dst_leaf.to_string();
        rename_node(st, inum, src_parent, &src_leaf, dst_parent, &dst_leaf)?;
        self.maybe_flush(st).await
    }

    pub async fn rename_at(
        &self,
        src_parent: u32,
        src_name: &str,
        dst_parent: u32,
        dst_name: &str,
    ) -> Result<(), FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        let inum = child_in(&st.table, src_parent, src_name)?;
        rename_node(st, inum, src_parent, src_name, dst_parent, dst_name)?;
        self.maybe_flush(st).await
    }

    // ===== attribute mutation =====

    pub async fn chmod(&self, path: &str, mode: u32) -> Result<(), FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        let inum = resolve(&st.table, path)?;
        chmod_node(st, inum, mode);
        self.maybe_flush(st).await
    }

    pub async fn chmod_ino(&self, ino: u32, mode: u32) -> Result<(), FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        if !st.table.contains(ino) {
            return Err(FsError::not_found(""));
        }
        chmod_node(st, ino, mode);
        self.maybe_flush(st).await
    }

    /// Set the modification time; `None` means "now".
    pub async fn utimens(&self, path: &str, mtime: Option<Timespec>) -> Result<(), FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        let inum = resolve(&st.table, path)?;
        utimens_node(st, inum, mtime);
        self.maybe_flush(st).await
    }

    pub async fn utimens_ino(&self, ino: u32, mtime: Option<Timespec>) -> Result<(), FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        if !st.table.contains(ino) {
            return Err(FsError::not_found(""));
        }
        utimens_node(st, ino, mtime);
        self.maybe_flush(st).await
    }

    // ===== data path =====

    pub async fn truncate(&self, path: &str, new_size: u64) -> Result<(), FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        let inum = resolve(&st.table, path)?;
        truncate_node(st, inum, new_size, path)?;
        self.maybe_flush(st).await
    }

    pub async fn truncate_ino(&self, ino: u32, new_size: u64) -> Result<(), FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        truncate_node(st, ino, new_size, "")?;
        self.maybe_flush(st).await
    }

    /// Append `data` at `offset`, growing the file as needed. Returns the
    /// number of bytes accepted (always all of them).
    pub async fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<usize, FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        let inum = resolve(&st.table, path)?;
        write_node(st, inum, offset, data, path)?;
        self.maybe_flush(st).await?;
        Ok(data.len())
    }

    pub async fn write_ino(&self, ino: u32, offset: u64, data: &[u8]) -> Result<usize, FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        write_node(st, ino, offset, data, "")?;
        self.maybe_flush(st).await?;
        Ok(data.len())
    }

    pub async fn read(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>, FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        let inum = resolve(&st.table, path)?;
        self.read_inner(st, inum, offset, len, path).await
    }

    pub async fn read_ino(&self, ino: u32, offset: u64, len: usize) -> Result<Vec<u8>, FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        self.read_inner(st, ino, offset, len, "").await
    }

    /// `fsync` upcall. The object under assembly is shared by every file,
    /// so syncing one path flushes everything buffered.
    pub async fn fsync(&self, path: &str) -> Result<(), FsError> {
        {
            let st = self.state.lock().await;
            resolve(&st.table, path)?;
        }
        self.sync().await
    }

    /// Force the packager to close and PUT the current object. A no-op when
    /// nothing is buffered and no inode is dirty.
    pub async fn sync(&self) -> Result<(), FsError> {
        let mut st = self.state.lock().await;
        let st = &mut *st;
        if st.pager.is_clean() {
            return Ok(());
        }
        self.flush(st).await
    }

    /// Unmount teardown: drop all in-memory state. Unflushed records are
    /// lost, which is the documented durability contract.
    pub async fn destroy(&self) {
        let mut st = self.state.lock().await;
        st.table.clear();
        st.pager.reset();
        st.data_offsets.clear();
    }

    // ===== internals =====

    async fn read_inner(
        &self,
        st: &mut FsState,
        inum: u32,
        offset: u64,
        len: usize,
        path: &str,
    ) -> Result<Vec<u8>, FsError> {
        let inode = st
            .table
            .get(inum)
            .ok_or_else(|| FsError::not_found(path))?;
        match inode.kind() {
            FileKind::File => {}
            FileKind::Dir => return Err(FsError::is_a_directory(path)),
            _ => return Err(FsError::invalid(path)),
        }
        let size = inode.attr.size.max(0) as u64;
        if len == 0 || offset >= size {
            return Ok(Vec::new());
        }
        let end = size.min(offset + len as u64);

        // Holes stay zero; only mapped runs are copied over them.
        let mut out = vec![0u8; (end - offset) as usize];
        let spans: Vec<(u64, Extent)> = inode
            .extents()
            .unwrap()
            .iter_from(offset)
            .take_while(|(base, _)| *base < end)
            .map(|(base, e)| (base, *e))
            .collect();

        for (base, e) in spans {
            let ext_end = base + e.len as u64;
            let lo = base.max(offset);
            let hi = ext_end.min(end);
            if lo >= hi {
                continue;
            }
            let skip = (lo - base) as u32;
            let n = (hi - lo) as usize;
            let dst = &mut out[(lo - offset) as usize..][..n];
            if e.objnum == st.pager.this_index() {
                // Still in the unflushed data buffer.
                dst.copy_from_slice(st.pager.data_slice((e.offset + skip) as usize, n));
            } else {
                let header_len = self.header_len(&mut st.data_offsets, e.objnum).await?;
                let key = object_key(&self.prefix, e.objnum);
                let abs = header_len as u64 + e.offset as u64 + skip as u64;
                read_exact(&self.client, &key, abs, dst).await?;
            }
        }
        Ok(out)
    }

    /// header_length of a flushed object, via the memoizing cache.
    async fn header_len(
        &self,
        cache: &mut HashMap<u32, u32>,
        objnum: u32,
    ) -> Result<u32, FsError> {
        if let Some(n) = cache.get(&objnum) {
            return Ok(*n);
        }
        let key = object_key(&self.prefix, objnum);
        let mut head = [0u8; OBJECT_HEADER_LEN];
        read_exact(&self.client, &key, 0, &mut head).await?;
        let header = ObjectHeader::decode(&head)?;
        cache.insert(objnum, header.header_len);
        Ok(header.header_len)
    }

    async fn flush(&self, st: &mut FsState) -> Result<(), FsError> {
        // Late attribute changes ride out as one INODE record each. Inodes
        // removed after they were dirtied have nothing left to record.
        for inum in st.pager.take_dirty() {
            if let Some(inode) = st.table.get(inum) {
                st.pager.push_record(&inode_record(inode));
            }
        }
        let (index, parts) = st.pager.seal();
        let key = object_key(&self.prefix, index);
        let bytes: usize = parts.iter().map(|p| p.len()).sum();
        self.client
            .put_object_vectored(&key, parts)
            .await
            .map_err(FsError::Store)?;
        tracing::debug!(key, bytes, "flushed log object");
        Ok(())
    }

    async fn maybe_flush(&self, st: &mut FsState) -> Result<(), FsError> {
        if st.pager.over_threshold() {
            self.flush(st).await
        } else {
            Ok(())
        }
    }
}

// ===== free helpers over the locked state =====

async fn read_exact<B: ObjectBackend>(
    client: &ObjectClient<B>,
    key: &str,
    offset: u64,
    buf: &mut [u8],
) -> Result<(), FsError> {
    let n = client
        .get_object_range(key, offset, buf)
        .await
        .map_err(FsError::Store)?;
    if n != buf.len() {
        return Err(FsError::Store(anyhow!(
            "short read of {key}: wanted {} bytes at {offset}, got {n}",
            buf.len()
        )));
    }
    Ok(())
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn resolve(table: &InodeTable, path: &str) -> Result<u32, FsError> {
    let mut inum = ROOT_INUM;
    for part in split_path(path) {
        let inode = table.get(inum).ok_or_else(|| FsError::not_found(path))?;
        let entries = inode
            .entries()
            .ok_or_else(|| FsError::not_a_directory(path))?;
        inum = *entries.get(part).ok_or_else(|| FsError::not_found(path))?;
    }
    Ok(inum)
}

/// Resolve a path to (existing target, parent inode, leaf name). Fails on
/// the root itself and whenever an intermediate component is missing or not
/// a directory.
fn resolve_parent<'p>(
    table: &InodeTable,
    path: &'p str,
) -> Result<(Option<u32>, u32, &'p str), FsError> {
    let parts: Vec<&str> = split_path(path).collect();
    let Some((leaf, dir_parts)) = parts.split_last() else {
        return Err(FsError::invalid(path));
    };
    let mut inum = ROOT_INUM;
    for part in dir_parts {
        let inode = table.get(inum).ok_or_else(|| FsError::not_found(path))?;
        let entries = inode
            .entries()
            .ok_or_else(|| FsError::not_a_directory(path))?;
        inum = *entries.get(*part).ok_or_else(|| FsError::not_found(path))?;
    }
    let parent = table.get(inum).ok_or_else(|| FsError::not_found(path))?;
    let entries = parent
        .entries()
        .ok_or_else(|| FsError::not_a_directory(path))?;
    Ok((entries.get(*leaf).copied(), inum, *leaf))
}

fn child_in(table: &InodeTable, parent: u32, name: &str) -> Result<u32, FsError> {
    let dir = table.get(parent).ok_or_else(|| FsError::not_found(name))?;
    let entries = dir
        .entries()
        .ok_or_else(|| FsError::not_a_directory(name))?;
    entries
        .get(name)
        .copied()
        .ok_or_else(|| FsError::not_found(name))
}

fn attr_of(inode: &Inode) -> FileAttr {
    let a = &inode.attr;
    FileAttr {
        ino: a.inum,
        size: a.size,
        kind: inode.kind(),
        mode: a.mode,
        uid: a.uid,
        gid: a.gid,
        rdev: a.rdev,
        mtime: a.mtime,
        nlink: 1,
    }
}

fn inode_record(inode: &Inode) -> LogRecord {
    let a = &inode.attr;
    LogRecord::Inode(InodeRecord {
        inum: a.inum,
        mode: a.mode,
        uid: a.uid,
        gid: a.gid,
        rdev: a.rdev,
        mtime_sec: a.mtime.sec,
        mtime_nsec: a.mtime.nsec,
    })
}

fn check_name(name: &str) -> Result<(), FsError> {
    if name.is_empty() || name.contains('\0') {
        return Err(FsError::invalid(name));
    }
    if name.len() > NAME_MAX {
        return Err(FsError::NameTooLong { path: name.into() });
    }
    Ok(())
}

fn check_mknod_mode(mode: u32, path: &str) -> Result<(), FsError> {
    match FileKind::from_mode(mode) {
        FileKind::Dir | FileKind::Symlink => Err(FsError::invalid(path)),
        _ => Ok(()),
    }
}

fn readdir_entries(table: &InodeTable, inum: u32, path: &str) -> Result<Vec<DirEntry>, FsError> {
    let inode = table.get(inum).ok_or_else(|| FsError::not_found(path))?;
    let entries = inode
        .entries()
        .ok_or_else(|| FsError::not_a_directory(path))?;
    Ok(entries
        .iter()
        .filter_map(|(name, child)| {
            table.get(*child).map(|c| DirEntry {
                name: name.clone(),
                ino: *child,
                kind: c.kind(),
            })
        })
        .collect())
}

fn readlink_target(table: &InodeTable, inum: u32, path: &str) -> Result<String, FsError> {
    let inode = table.get(inum).ok_or_else(|| FsError::not_found(path))?;
    match &inode.body {
        InodeBody::Symlink { target } => Ok(target.clone()),
        _ => Err(FsError::invalid(path)),
    }
}

/// Allocate an inode of the kind encoded in `mode`, link it into `parent`,
/// and emit INODE then CREATE.
fn create_node(
    st: &mut FsState,
    parent: u32,
    name: &str,
    mode: u32,
    rdev: u32,
    caller: &Caller,
) -> Result<u32, FsError> {
    check_name(name)?;
    {
        let dir = st.table.get(parent).ok_or_else(|| FsError::not_found(name))?;
        let entries = dir
            .entries()
            .ok_or_else(|| FsError::not_a_directory(name))?;
        if entries.contains_key(name) {
            return Err(FsError::already_exists(name));
        }
    }
    let inum = st.table.alloc_inum();
    let now = Timespec::now();
    let inode = Inode {
        attr: InodeAttr {
            inum,
            mode,
            uid: caller.uid,
            gid: caller.gid,
            rdev,
            size: 0,
            mtime: now,
        },
        body: InodeBody::for_mode(mode),
    };
    // The new inode's record is written eagerly; the dirty set cannot be
    // relied on for ordering against the CREATE that follows.
    st.pager.push_record(&inode_record(&inode));
    st.table.insert(inode);

    let dir = st.table.get_mut(parent).unwrap();
    dir.attr.mtime = now;
    dir.entries_mut().unwrap().insert(name.to_string(), inum);
    st.pager.mark_dirty(parent);
    st.pager.push_record(&LogRecord::Create {
        parent,
        inum,
        name: name.to_string(),
    });
    Ok(inum)
}

/// Symlink creation records INODE, SYMLINK, CREATE in that order so replay
/// sees the inode before its target and its directory entry.
fn symlink_node(
    st: &mut FsState,
    parent: u32,
    name: &str,
    target: &str,
    caller: &Caller,
) -> Result<u32, FsError> {
    check_name(name)?;
    if target.len() > NAME_MAX {
        return Err(FsError::NameTooLong {
            path: target.into(),
        });
    }
    {
        let dir = st.table.get(parent).ok_or_else(|| FsError::not_found(name))?;
        let entries = dir
            .entries()
            .ok_or_else(|| FsError::not_a_directory(name))?;
        if entries.contains_key(name) {
            return Err(FsError::already_exists(name));
        }
    }
    let inum = st.table.alloc_inum();
    let now = Timespec::now();
    let inode = Inode {
        attr: InodeAttr {
            inum,
            mode: libc::S_IFLNK as u32 | 0o777,
            uid: caller.uid,
            gid: caller.gid,
            rdev: 0,
            size: 0,
            mtime: now,
        },
        body: InodeBody::Symlink {
            target: target.to_string(),
        },
    };
    st.pager.push_record(&inode_record(&inode));
    st.pager.push_record(&LogRecord::Symlink {
        inum,
        target: target.to_string(),
    });
    st.table.insert(inode);

    let dir = st.table.get_mut(parent).unwrap();
    dir.attr.mtime = now;
    dir.entries_mut().unwrap().insert(name.to_string(), inum);
    st.pager.mark_dirty(parent);
    st.pager.push_record(&LogRecord::Create {
        parent,
        inum,
        name: name.to_string(),
    });
    Ok(inum)
}

fn unlink_node(st: &mut FsState, parent: u32, inum: u32, name: &str) -> Result<(), FsError> {
    let kind = st
        .table
        .get(inum)
        .ok_or_else(|| FsError::not_found(name))?
        .kind();
    if kind == FileKind::Dir {
        return Err(FsError::is_a_directory(name));
    }
    if kind == FileKind::File {
        // Data is dropped before the name: replay applies TRUNC while the
        // inode still exists.
        let file = st.table.get_mut(inum).unwrap();
        file.extents_mut().unwrap().truncate(0);
        file.attr.size = 0;
        st.pager.push_record(&LogRecord::Trunc { inum, new_size: 0 });
    }
    remove_entry(st, parent, inum, name)
}

fn rmdir_node(st: &mut FsState, parent: u32, inum: u32, name: &str) -> Result<(), FsError> {
    let inode = st.table.get(inum).ok_or_else(|| FsError::not_found(name))?;
    let entries = inode
        .entries()
        .ok_or_else(|| FsError::not_a_directory(name))?;
    if !entries.is_empty() {
        return Err(FsError::DirectoryNotEmpty { path: name.into() });
    }
    remove_entry(st, parent, inum, name)
}

fn remove_entry(st: &mut FsState, parent: u32, inum: u32, name: &str) -> Result<(), FsError> {
    let dir = st
        .table
        .get_mut(parent)
        .ok_or_else(|| FsError::not_found(name))?;
    dir.attr.mtime = Timespec::now();
    dir.entries_mut()
        .ok_or_else(|| FsError::not_a_directory(name))?
        .remove(name);
    st.pager.mark_dirty(parent);
    st.table.remove(inum);
    st.pager.unmark_dirty(inum);
    st.pager.push_record(&LogRecord::Delete {
        parent,
        inum,
        name: name.to_string(),
    });
    Ok(())
}

fn rename_node(
    st: &mut FsState,
    inum: u32,
    src_parent: u32,
    src_name: &str,
    dst_parent: u32,
    dst_name: &str,
) -> Result<(), FsError> {
    check_name(dst_name)?;
    {
        let dst = st
            .table
            .get(dst_parent)
            .ok_or_else(|| FsError::not_found(dst_name))?;
        let entries = dst
            .entries()
            .ok_or_else(|| FsError::not_a_directory(dst_name))?;
        if entries.contains_key(dst_name) {
            return Err(FsError::already_exists(dst_name));
        }
    }
    let now = Timespec::now();
    let src = st
        .table
        .get_mut(src_parent)
        .ok_or_else(|| FsError::not_found(src_name))?;
    src.attr.mtime = now;
    src.entries_mut()
        .ok_or_else(|| FsError::not_a_directory(src_name))?
        .remove(src_name);
    st.pager.mark_dirty(src_parent);

    let dst = st.table.get_mut(dst_parent).unwrap();
    dst.attr.mtime = now;
    dst.entries_mut().unwrap().insert(dst_name.to_string(), inum);
    st.pager.mark_dirty(dst_parent);

    st.pager.push_record(&LogRecord::Rename {
        inum,
        src_parent,
        dst_parent,
        src_name: src_name.to_string(),
        dst_name: dst_name.to_string(),
    });
    Ok(())
}

fn chmod_node(st: &mut FsState, inum: u32, mode: u32) {
    let inode = st.table.get_mut(inum).expect("caller validated the inode");
    inode.attr.mode = (mode & 0o7777) | (inode.attr.mode & libc::S_IFMT as u32);
    st.pager.mark_dirty(inum);
}

fn utimens_node(st: &mut FsState, inum: u32, mtime: Option<Timespec>) {
    let inode = st.table.get_mut(inum).expect("caller validated the inode");
    inode.attr.mtime = mtime.unwrap_or_else(Timespec::now);
    st.pager.mark_dirty(inum);
}

fn truncate_node(st: &mut FsState, inum: u32, new_size: u64, path: &str) -> Result<(), FsError> {
    let inode = st
        .table
        .get_mut(inum)
        .ok_or_else(|| FsError::not_found(path))?;
    match inode.kind() {
        FileKind::File => {}
        FileKind::Dir => return Err(FsError::is_a_directory(path)),
        _ => return Err(FsError::invalid(path)),
    }
    let new_size = new_size as i64;
    if new_size <= inode.attr.size {
        inode.extents_mut().unwrap().truncate(new_size as u64);
        inode.attr.size = new_size;
        st.pager.push_record(&LogRecord::Trunc { inum, new_size });
    } else {
        // TRUNC cannot replay a grow; the larger size only becomes durable
        // through later DATA records.
        inode.attr.size = new_size;
    }
    inode.attr.mtime = Timespec::now();
    st.pager.mark_dirty(inum);
    Ok(())
}

fn write_node(
    st: &mut FsState,
    inum: u32,
    offset: u64,
    data: &[u8],
    path: &str,
) -> Result<(), FsError> {
    let this_index = st.pager.this_index();
    let inode = st
        .table
        .get_mut(inum)
        .ok_or_else(|| FsError::not_found(path))?;
    match inode.kind() {
        FileKind::File => {}
        FileKind::Dir => return Err(FsError::is_a_directory(path)),
        _ => return Err(FsError::invalid(path)),
    }
    if data.is_empty() {
        return Ok(());
    }
    let new_size = inode.attr.size.max((offset + data.len() as u64) as i64);
    let obj_offset = st.pager.append_data(data);
    st.pager.push_record(&LogRecord::Data(DataRecord {
        inum,
        obj_offset,
        file_offset: offset as i64,
        size: new_size,
        len: data.len() as u32,
    }));
    inode.extents_mut().unwrap().update(
        offset,
        Extent {
            objnum: this_index,
            offset: obj_offset,
            len: data.len() as u32,
        },
    );
    inode.attr.size = new_size;
    inode.attr.mtime = Timespec::now();
    st.pager.mark_dirty(inum);
    Ok(())
}

#[cfg(test)]
mod tests;
