// Library crate for SlateFS: expose the filesystem core and the object
// store adapters while keeping the wire internals private.
#![allow(dead_code)]

pub(crate) mod objstore;
pub(crate) mod oplog;
pub mod fuse;
pub(crate) mod vfs;

// Backends and the client wrapper hosts construct the filesystem with.
pub use crate::objstore::client::{ObjectBackend, ObjectClient};
pub use crate::objstore::localfs::LocalFsBackend;
pub use crate::objstore::memory::MemoryBackend;
pub use crate::objstore::s3::{S3Backend, S3Config};

// The filesystem core and its public types.
pub use crate::oplog::record::WireError;
pub use crate::oplog::replay::ReplayError;
pub use crate::vfs::error::{FsError, PathHint};
pub use crate::vfs::fs::{Caller, ObjectFs, StatFs};
pub use crate::vfs::inode::{DirEntry, FileAttr, FileKind, ROOT_INUM, Timespec};
pub use crate::vfs::pager::LogConfig;
