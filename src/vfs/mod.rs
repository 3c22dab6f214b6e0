//! The in-memory filesystem: inode table, per-file extent maps, the
//! packager, and the upcall surface.
//!
//! Submodules:
//! - `extent`: sparse file-offset → (object, offset, length) index
//! - `inode`: tagged inodes and the process-wide table
//! - `pager`: record/data buffering and object assembly
//! - `fs`: the mutation API, read path, and mount loader
//! - `error`: the POSIX-mapped error surface

pub mod error;
pub mod extent;
pub mod fs;
pub mod inode;
pub mod pager;
