//! In-memory inodes and the process-wide inode table.
//!
//! Inodes are a tagged variant over the four kinds the log can describe.
//! Directory entries hold inode numbers, never references; the table owns
//! every inode exclusively and all cross-referencing goes through it.

use crate::vfs::extent::ExtentMap;
use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

/// The root directory's inode number.
pub const ROOT_INUM: u32 = 1;

/// First inode number handed out by the allocator.
const FIRST_INUM: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
    Other,
}

impl FileKind {
    /// Kind as encoded in the `S_IFMT` bits of a mode.
    pub fn from_mode(mode: u32) -> FileKind {
        match mode & libc::S_IFMT as u32 {
            m if m == libc::S_IFDIR as u32 => FileKind::Dir,
            m if m == libc::S_IFREG as u32 => FileKind::File,
            m if m == libc::S_IFLNK as u32 => FileKind::Symlink,
            _ => FileKind::Other,
        }
    }
}

/// Seconds + nanoseconds since the epoch; both components are 8 bytes on
/// the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    pub fn now() -> Timespec {
        let d = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timespec {
            sec: d.as_secs() as i64,
            nsec: d.subsec_nanos() as i64,
        }
    }
}

/// Attributes common to every inode kind. `size` is maintained for regular
/// files only; it stays 0 for everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeAttr {
    pub inum: u32,
    /// Full POSIX mode including the type bits.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub size: i64,
    pub mtime: Timespec,
}

/// Kind-specific payload.
#[derive(Debug, Clone)]
pub enum InodeBody {
    File { extents: ExtentMap },
    Dir { entries: BTreeMap<String, u32> },
    Symlink { target: String },
    Other,
}

impl InodeBody {
    /// Empty payload matching the kind encoded in `mode`.
    pub fn for_mode(mode: u32) -> InodeBody {
        match FileKind::from_mode(mode) {
            FileKind::File => InodeBody::File {
                extents: ExtentMap::new(),
            },
            FileKind::Dir => InodeBody::Dir {
                entries: BTreeMap::new(),
            },
            FileKind::Symlink => InodeBody::Symlink {
                target: String::new(),
            },
            FileKind::Other => InodeBody::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Inode {
    pub attr: InodeAttr,
    pub body: InodeBody,
}

impl Inode {
    pub fn kind(&self) -> FileKind {
        match self.body {
            InodeBody::File { .. } => FileKind::File,
            InodeBody::Dir { .. } => FileKind::Dir,
            InodeBody::Symlink { .. } => FileKind::Symlink,
            InodeBody::Other => FileKind::Other,
        }
    }

    pub fn entries(&self) -> Option<&BTreeMap<String, u32>> {
        match &self.body {
            InodeBody::Dir { entries } => Some(entries),
            _ => None,
        }
    }

    pub fn entries_mut(&mut self) -> Option<&mut BTreeMap<String, u32>> {
        match &mut self.body {
            InodeBody::Dir { entries } => Some(entries),
            _ => None,
        }
    }

    pub fn extents(&self) -> Option<&ExtentMap> {
        match &self.body {
            InodeBody::File { extents } => Some(extents),
            _ => None,
        }
    }

    pub fn extents_mut(&mut self) -> Option<&mut ExtentMap> {
        match &mut self.body {
            InodeBody::File { extents } => Some(extents),
            _ => None,
        }
    }
}

/// Public attribute snapshot handed to hosts. Hard links are unsupported,
/// so `nlink` is always 1.
#[derive(Debug, Clone, Copy)]
pub struct FileAttr {
    pub ino: u32,
    pub size: i64,
    pub kind: FileKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub mtime: Timespec,
    pub nlink: u32,
}

impl FileAttr {
    /// `st_blocks` in 4 KiB units.
    pub fn blocks(&self) -> i64 {
        (self.size + 4095) / 4096
    }
}

/// Directory entry as reported by `readdir`.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub ino: u32,
    pub kind: FileKind,
}

/// The process-wide inode table.
#[derive(Debug)]
pub struct InodeTable {
    map: HashMap<u32, Inode>,
    next_inum: u32,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> InodeTable {
        InodeTable {
            map: HashMap::new(),
            next_inum: FIRST_INUM,
        }
    }

    pub fn get(&self, inum: u32) -> Option<&Inode> {
        self.map.get(&inum)
    }

    pub fn get_mut(&mut self, inum: u32) -> Option<&mut Inode> {
        self.map.get_mut(&inum)
    }

    pub fn contains(&self, inum: u32) -> bool {
        self.map.contains_key(&inum)
    }

    pub fn insert(&mut self, inode: Inode) {
        self.map.insert(inode.attr.inum, inode);
    }

    pub fn remove(&mut self, inum: u32) -> Option<Inode> {
        self.map.remove(&inum)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn next_inum(&self) -> u32 {
        self.next_inum
    }

    pub fn alloc_inum(&mut self) -> u32 {
        let inum = self.next_inum;
        self.next_inum += 1;
        inum
    }

    /// Keep the allocator ahead of every inode number seen during replay.
    pub fn observe_inum(&mut self, inum: u32) {
        self.next_inum = self.next_inum.max(inum + 1);
    }

    /// Directory containing `inum`, found by scanning. With nlink fixed at
    /// 1 an inode has at most one parent.
    pub fn parent_of(&self, inum: u32) -> Option<u32> {
        self.map.iter().find_map(|(parent, inode)| {
            inode
                .entries()
                .is_some_and(|entries| entries.values().any(|child| *child == inum))
                .then_some(*parent)
        })
    }

    /// Install the root directory if replay did not produce one.
    pub fn ensure_root(&mut self) {
        if self.map.contains_key(&ROOT_INUM) {
            return;
        }
        self.map.insert(
            ROOT_INUM,
            Inode {
                attr: InodeAttr {
                    inum: ROOT_INUM,
                    mode: libc::S_IFDIR as u32 | 0o755,
                    uid: 0,
                    gid: 0,
                    rdev: 0,
                    size: 0,
                    mtime: Timespec::now(),
                },
                body: InodeBody::Dir {
                    entries: BTreeMap::new(),
                },
            },
        );
    }

    /// Drop everything and reset the allocator.
    pub fn clear(&mut self) {
        self.map.clear();
        self.next_inum = FIRST_INUM;
    }
}
