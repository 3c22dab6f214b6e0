//! High-level object client wrapping a pluggable backend.
//!
//! The core needs exactly three capabilities: a vectored PUT (objects are
//! assembled as header | records | data and should not be concatenated
//! here), a ranged GET, and a key listing. Keys are opaque strings.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

#[async_trait]
pub trait ObjectBackend: Clone + Send + Sync {
    /// Store `parts` as one object under `key`, logically concatenated.
    async fn put_object_vectored(&self, key: &str, parts: Vec<Bytes>) -> Result<()>;

    /// Read up to `buf.len()` bytes at `offset` into `buf`, returning the
    /// number of bytes produced. Reads past the end of the object are
    /// short, not errors.
    async fn get_object_range(&self, key: &str, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// All keys starting with `prefix`, in no particular order.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;
}

#[derive(Clone)]
pub struct ObjectClient<B: ObjectBackend> {
    backend: B,
}

impl<B: ObjectBackend> ObjectClient<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub async fn put_object_vectored(&self, key: &str, parts: Vec<Bytes>) -> Result<()> {
        self.backend.put_object_vectored(key, parts).await
    }

    pub async fn get_object_range(&self, key: &str, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.backend.get_object_range(key, offset, buf).await
    }

    pub async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        self.backend.list_objects(prefix).await
    }
}
