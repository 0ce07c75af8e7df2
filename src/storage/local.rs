//! Directory-backed object store.
//!
//! Layout: `{root}/{bucket}/{key}` where `/` in keys maps to sub-directories.
//! Writes go to a temp file in the destination directory and are then
//! renamed into place, so readers never observe a half-written object.
//! [`Precondition::DoesNotExist`] uses a no-clobber persist, which makes
//! "create if absent" atomic even with concurrent writers.

use super::{ObjectStore, Precondition};
use crate::error::StorageError;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local directory of `bucket`. Bucket names are a single path segment.
    pub fn bucket_path(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        if !is_relative_path(bucket) || bucket.contains('/') {
            return Err(StorageError::InvalidKey(bucket.to_string()));
        }
        Ok(self.root.join(bucket))
    }

    /// Local path of `bucket/key`, rejecting keys that escape the bucket.
    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        let dir = self.bucket_path(bucket)?;
        if !is_relative_path(key) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(dir.join(key))
    }
}

fn is_relative_path(s: &str) -> bool {
    !s.is_empty()
        && Path::new(s)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

fn io_err(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn not_found_or_io(bucket: &str, key: &str, path: &Path, e: std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    } else {
        io_err(path, e)
    }
}

fn write_blocking(
    path: &Path,
    data: &[u8],
    precondition: Precondition,
    bucket: &str,
    key: &str,
) -> Result<(), StorageError> {
    let parent = path
        .parent()
        .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;
    std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| io_err(parent, e))?;
    tmp.write_all(data).map_err(|e| io_err(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| io_err(path, e))?;

    match precondition {
        Precondition::None => {
            tmp.persist(path).map_err(|e| io_err(path, e.error))?;
        }
        Precondition::DoesNotExist => {
            if let Err(e) = tmp.persist_noclobber(path) {
                return Err(if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                    StorageError::PreconditionFailed {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    io_err(path, e.error)
                });
            }
        }
    }
    Ok(())
}

fn collect_keys(dir: &Path, rel: &str, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        // In-flight temp files from `write_blocking`.
        if name.starts_with(".tmp") {
            continue;
        }
        let key = if rel.is_empty() {
            name
        } else {
            format!("{rel}/{name}")
        };
        if entry.file_type()?.is_dir() {
            collect_keys(&entry.path(), &key, out)?;
        } else {
            out.push(key);
        }
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn download_to(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64, StorageError> {
        let src = self.object_path(bucket, key)?;
        let n = tokio::fs::copy(&src, dest)
            .await
            .map_err(|e| not_found_or_io(bucket, key, &src, e))?;
        debug!("Copied {} → {} ({} bytes)", src.display(), dest.display(), n);
        Ok(n)
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        precondition: Precondition,
    ) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        let (bucket, key) = (bucket.to_string(), key.to_string());
        let task_path = path.clone();
        tokio::task::spawn_blocking(move || {
            write_blocking(&task_path, &data, precondition, &bucket, &key)
        })
        .await
        .map_err(|e| io_err(&path, std::io::Error::other(e.to_string())))?
    }

    async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(bucket, key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| not_found_or_io(bucket, key, &path, e))
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(bucket, key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_err(&path, e))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.bucket_path(bucket)?;
        let prefix = prefix.to_string();
        let task_dir = dir.clone();
        let mut keys = tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            match collect_keys(&task_dir, "", &mut keys) {
                Ok(()) => Ok(keys),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(|e| io_err(&dir, std::io::Error::other(e.to_string())))?
        .map_err(|e| io_err(&dir, e))?;

        keys.retain(|k| k.starts_with(&prefix));
        keys.sort();
        Ok(keys)
    }
}
