//! Local filesystem backend: one file per object under a root directory.
//! Mostly used to mock an object store during development and testing.

#[cfg(unix)]
use std::os::unix::fs::FileExt;

use crate::objstore::client::ObjectBackend;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashSet;
use std::io::{IoSlice, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

#[derive(Clone)]
pub struct LocalFsBackend {
    root: PathBuf,
    created_dirs: Arc<DashSet<PathBuf>>,
}

impl LocalFsBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            created_dirs: Arc::new(DashSet::new()),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    async fn ensure_dir(&self, dir: &Path) -> Result<()> {
        if self.created_dirs.contains(dir) {
            return Ok(());
        }
        fs::create_dir_all(dir).await?;
        self.created_dirs.insert(dir.to_path_buf());
        Ok(())
    }
}

#[async_trait]
impl ObjectBackend for LocalFsBackend {
    async fn put_object_vectored(&self, key: &str, parts: Vec<Bytes>) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            self.ensure_dir(parent).await?;
        }

        // std write_vectored + spawn_blocking avoids the extra copy that
        // tokio's write_vectored performs.
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut f = std::fs::File::create(path)?;
            let mut slices = parts.iter().map(|p| IoSlice::new(p)).collect::<Vec<_>>();
            let mut slices_ref = slices.as_mut_slice();
            while !slices_ref.is_empty() {
                let n = f.write_vectored(slices_ref)?;
                if n == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "write zero",
                    ));
                }
                IoSlice::advance_slices(&mut slices_ref, n);
            }
            f.flush()
        })
        .await
        .map_err(|e| anyhow::anyhow!("blocking write failed: {e}"))??;
        Ok(())
    }

    #[tracing::instrument(name = "LocalFsBackend.get_object_range", level = "trace", skip(self, buf))]
    async fn get_object_range(&self, key: &str, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let path = self.path_for(key);
        let len = buf.len();

        let read = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let file = std::fs::File::open(&path)?;
            let mut local = vec![0u8; len];
            let mut read = 0usize;
            while read < len {
                let n = file.read_at(&mut local[read..], offset + read as u64)?;
                if n == 0 {
                    break;
                }
                read += n;
            }
            local.truncate(read);
            Ok(local)
        })
        .await
        .map_err(|e| anyhow::anyhow!("blocking read failed: {e}"))??;

        buf[..read.len()].copy_from_slice(&read);
        Ok(read.len())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let mut keys = Vec::new();
            if !root.exists() {
                return Ok(keys);
            }
            let mut stack = vec![root.clone()];
            while let Some(dir) = stack.pop() {
                for entry in std::fs::read_dir(&dir)? {
                    let entry = entry?;
                    let path = entry.path();
                    if path.is_dir() {
                        stack.push(path);
                    } else if let Ok(rel) = path.strip_prefix(&root) {
                        let key = rel.to_string_lossy().into_owned();
                        if key.starts_with(&prefix) {
                            keys.push(key);
                        }
                    }
                }
            }
            Ok(keys)
        })
        .await
        .map_err(|e| anyhow::anyhow!("blocking list failed: {e}"))?
    }
}
