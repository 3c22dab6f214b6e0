//! In-memory backend for tests and local experiments.

use crate::objstore::client::ObjectBackend;
use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct MemoryBackend {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn put_object_vectored(&self, key: &str, parts: Vec<Bytes>) -> Result<()> {
        let mut data = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
        for part in parts {
            data.extend_from_slice(&part);
        }
        self.objects.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn get_object_range(&self, key: &str, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let guard = self.objects.read().await;
        let Some(data) = guard.get(key) else {
            bail!("no such object: {key}");
        };
        let start = (offset as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn vectored_put_concatenates() {
        let store = MemoryBackend::new();
        store
            .put_object_vectored(
                "p.00000000",
                vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")],
            )
            .await
            .unwrap();

        let mut buf = [0u8; 3];
        let n = store.get_object_range("p.00000000", 1, &mut buf).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(&buf, b"bcd");
    }

    #[tokio::test]
    async fn range_read_is_short_at_eof() {
        let store = MemoryBackend::new();
        store
            .put_object_vectored("k", vec![Bytes::from_static(b"xyz")])
            .await
            .unwrap();
        let mut buf = [0u8; 8];
        let n = store.get_object_range("k", 2, &mut buf).await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(buf[0], b'z');
        assert!(store.get_object_range("missing", 0, &mut buf).await.is_err());
    }

    #[tokio::test]
    async fn listing_filters_by_prefix() {
        let store = MemoryBackend::new();
        for key in ["a.00000000", "a.00000001", "b.00000000"] {
            store
                .put_object_vectored(key, vec![Bytes::new()])
                .await
                .unwrap();
        }
        let keys = store.list_objects("a.").await.unwrap();
        assert_eq!(keys, vec!["a.00000000", "a.00000001"]);
    }
}
