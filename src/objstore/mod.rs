//! Object-store adapters: the backend capability the core requires, plus
//! S3, local-filesystem, and in-memory implementations.

pub mod client;
pub mod localfs;
pub mod memory;
pub mod s3;

pub use client::{ObjectBackend, ObjectClient};
pub use localfs::LocalFsBackend;
pub use memory::MemoryBackend;
pub use s3::{S3Backend, S3Config};
